//! Extraction pipelines.
//!
//! Both pipelines have the same shape, each stage feeding the next:
//!
//! ```text
//! scan:     fetch links → filter (LLM) → fetch + analyze (LLM) → save
//! monitor:  find latest issue (LLM) → fetch links → filter (LLM) → fetch + analyze (LLM) → save
//! ```
//!
//! Stages are async methods on [`Pipeline`] returning [`Result`]. A failing
//! stage is tagged with [`AtStage::at`] and `?` skips every later stage. The
//! run then reports a [`RunOutcome`] instead of raising: runs are started in
//! the background and nobody is waiting for an error.
//!
//! - [`scan`]: the per-source pipeline
//! - [`monitor`]: the newsletter pipeline

pub mod monitor;
pub mod scan;

use itertools::Itertools;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::fetch::Fetch;
use crate::llm::{Ask, ask_json};
use crate::models::Link;
use crate::store::JsonStore;

/// Links beyond this many are not shown to the relevance filter.
pub const FILTER_LINK_LIMIT: usize = 300;

/// The pipeline stages, used to report where a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    FindLatestIssue,
    FetchLinks,
    FilterLinks,
    Analyze,
    Save,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::FindLatestIssue => "find_latest_issue",
            Self::FetchLinks => "fetch_links",
            Self::FilterLinks => "filter_links",
            Self::Analyze => "analyze",
            Self::Save => "save",
        };
        f.write_str(s)
    }
}

/// How a pipeline run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// At least one new event was written.
    Saved { added: usize, skipped: usize },
    /// The run completed but every candidate was already stored or filtered out.
    NothingNew,
    /// A stage failed and the remaining stages were skipped.
    Failed { stage: Stage, reason: String },
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Saved { added, skipped } => {
                write!(f, "saved {added} new event(s), skipped {skipped} duplicate(s)")
            }
            Self::NothingNew => f.write_str("nothing new"),
            Self::Failed { stage, reason } => write!(f, "failed at {stage}: {reason}"),
        }
    }
}

/// An error tagged with the stage it stopped.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: Stage,
    pub error: Error,
}

impl From<StageFailure> for RunOutcome {
    fn from(failure: StageFailure) -> Self {
        Self::Failed {
            stage: failure.stage,
            reason: failure.error.to_string(),
        }
    }
}

pub trait AtStage<T> {
    fn at(self, stage: Stage) -> std::result::Result<T, StageFailure>;
}

impl<T> AtStage<T> for Result<T> {
    fn at(self, stage: Stage) -> std::result::Result<T, StageFailure> {
        self.map_err(|error| StageFailure { stage, error })
    }
}

/// One `{"selected_url": ...}` entry from a filter reply. Bare URL strings
/// are accepted too.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SelectedItem {
    Object { selected_url: String },
    Bare(String),
}

/// A filter reply: an array of picks or a single pick.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Selection {
    Many(Vec<SelectedItem>),
    One(SelectedItem),
}

impl Selection {
    fn urls(self) -> Vec<String> {
        let items = match self {
            Self::Many(items) => items,
            Self::One(item) => vec![item],
        };
        items
            .into_iter()
            .map(|item| match item {
                SelectedItem::Object { selected_url } => selected_url,
                SelectedItem::Bare(url) => url,
            })
            .collect()
    }
}

/// Map selected URLs back to candidate links, dropping URLs that were not
/// offered and collapsing repeats. Selection order is kept.
pub fn match_selection(urls: &[String], candidates: &[Link]) -> Vec<Link> {
    urls.iter()
        .filter_map(|url| candidates.iter().find(|l| l.url == url.trim()))
        .unique_by(|l| l.url.clone())
        .cloned()
        .collect()
}

/// Serialize links the way the filter prompts present them.
fn links_for_prompt(links: &[Link]) -> Result<String> {
    Ok(serde_json::to_string_pretty(links)?)
}

/// Shared dependencies of every pipeline run.
#[derive(Clone)]
pub struct Pipeline {
    fetcher: Arc<dyn Fetch>,
    llm: Arc<dyn Ask>,
    store: Arc<JsonStore>,
}

impl Pipeline {
    pub fn new(fetcher: Arc<dyn Fetch>, llm: Arc<dyn Ask>, store: Arc<JsonStore>) -> Self {
        Self {
            fetcher,
            llm,
            store,
        }
    }

    pub fn store(&self) -> &Arc<JsonStore> {
        &self.store
    }

    /// Load prompt `name` from the store and fill in `vars`.
    async fn render_prompt(&self, name: &str, vars: &[(&str, &str)]) -> Result<String> {
        self.store.prompt(name).await?.render(vars)
    }

    /// Ask the LLM to pick links from the first [`FILTER_LINK_LIMIT`]
    /// candidates with prompt `prompt_name`.
    ///
    /// `Ok(None)` means the model answered `null`.
    async fn select_links(&self, prompt_name: &str, links: &[Link]) -> Result<Option<Vec<Link>>> {
        let subset = &links[..links.len().min(FILTER_LINK_LIMIT)];
        let listing = links_for_prompt(subset)?;
        let prompt = self.render_prompt(prompt_name, &[("links", &listing)]).await?;
        let reply: Option<Selection> = ask_json(self.llm.as_ref(), &prompt).await?;
        Ok(reply.map(|selection| match_selection(&selection.urls(), links)))
    }
}
