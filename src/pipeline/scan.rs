//! Per-source scan: find the relevant articles on a tracked site and store
//! one analyzed event for each.

use chrono::Utc;
use tracing::{error, info, instrument, warn};

use super::{AtStage, Pipeline, RunOutcome, Stage, StageFailure};
use crate::error::{Error, Result};
use crate::fetch::{extract_links, fetch_page_text};
use crate::llm::ask_json;
use crate::models::{Analysis, Event, Link, Source};
use crate::prompts;
use crate::store::AppendReport;

impl Pipeline {
    /// Run every stage for `source`. Failures are logged and reported in the
    /// outcome, never raised.
    #[instrument(level = "info", skip_all, fields(source = %source.name, url = %source.url))]
    pub async fn scan_source(&self, source: &Source) -> RunOutcome {
        let outcome = match self.try_scan(source).await {
            Ok(outcome) => outcome,
            Err(failure) => failure.into(),
        };
        match &outcome {
            RunOutcome::Failed { .. } => warn!(%outcome, "Scan stopped"),
            _ => info!(%outcome, "Scan finished"),
        }
        outcome
    }

    async fn try_scan(&self, source: &Source) -> std::result::Result<RunOutcome, StageFailure> {
        let links = extract_links(self.fetcher.as_ref(), &source.url).await;
        let selected = self.filter_links(&links).await.at(Stage::FilterLinks)?;
        let events = self.analyze_links(source, &selected).await.at(Stage::Analyze)?;
        let report = self.save_scan(source, events).await.at(Stage::Save)?;

        Ok(if report.added > 0 {
            RunOutcome::Saved {
                added: report.added,
                skipped: report.skipped,
            }
        } else {
            RunOutcome::NothingNew
        })
    }

    #[instrument(level = "info", skip_all, fields(candidates = links.len()))]
    async fn filter_links(&self, links: &[Link]) -> Result<Vec<Link>> {
        if links.is_empty() {
            return Err(Error::stage("No links found"));
        }
        match self.select_links(prompts::LINK_FILTER, links).await {
            Ok(Some(selected)) => {
                for (i, link) in selected.iter().enumerate() {
                    info!(i, url = %link.url, "Selected link");
                }
                Ok(selected)
            }
            Ok(None) => Err(Error::stage("No relevant articles found")),
            Err(e) => Err(Error::stage(format!("Filtering failed: {e}"))),
        }
    }

    /// Fetch and analyze each selected link in turn.
    ///
    /// A link whose page cannot be fetched is skipped. An empty page or a
    /// failed analysis fails the whole stage.
    #[instrument(level = "info", skip_all, fields(selected = selected.len()))]
    async fn analyze_links(&self, source: &Source, selected: &[Link]) -> Result<Vec<Event>> {
        if selected.is_empty() {
            return Err(Error::stage("No link selected"));
        }

        let mut events = Vec::with_capacity(selected.len());
        for link in selected {
            let content = match fetch_page_text(self.fetcher.as_ref(), &link.url).await {
                Ok(content) => content,
                Err(e) => {
                    error!(url = %link.url, error = %e, "Article fetch failed; skipping");
                    continue;
                }
            };
            if content.is_empty() {
                return Err(Error::stage(format!("Failed to fetch content from {}", link.url)));
            }

            let prompt = self
                .render_prompt(prompts::CONTENT_ANALYSIS, &[("content", &content)])
                .await?;
            let analysis: Analysis = ask_json(self.llm.as_ref(), &prompt)
                .await
                .map_err(|e| Error::stage(format!("Analysis failed: {e}")))?;

            info!(url = %link.url, impact = %analysis.impact_level, "Analyzed article");
            events.push(Event::from_analysis(link, &source.id, analysis, &content));
        }
        Ok(events)
    }

    async fn save_scan(&self, source: &Source, events: Vec<Event>) -> Result<AppendReport> {
        let report = self.store.append_events(events).await?;
        self.store.touch_source(&source.id, Utc::now()).await?;
        Ok(report)
    }

    /// Scan every registered source one after another.
    #[instrument(level = "info", skip_all)]
    pub async fn scan_all(&self) -> Result<Vec<(String, RunOutcome)>> {
        let sources = self.store.sources().await?;
        info!(count = sources.len(), "Scanning all sources");
        let mut outcomes = Vec::with_capacity(sources.len());
        for source in sources {
            let outcome = self.scan_source(&source).await;
            outcomes.push((source.id, outcome));
        }
        Ok(outcomes)
    }
}
