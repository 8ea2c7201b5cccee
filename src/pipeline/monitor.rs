//! Newsletter monitor: locate the newest issue on an archive page, then pick
//! and analyze the AI-security stories it links to.
//!
//! Unlike a source scan, already-stored URLs are dropped before anything is
//! fetched, a single bad story never fails the run, and the analysis carries a
//! sentiment label. Events are filed under the virtual source id
//! `monitor-<archive url>`.

use futures::stream::{self, StreamExt};
use serde::Deserialize;
use tracing::{error, info, instrument, warn};
use url::Url;

use super::{AtStage, Pipeline, RunOutcome, Stage, StageFailure};
use crate::error::{Error, Result};
use crate::fetch::{extract_links, fetch_page_text};
use crate::llm::ask_json;
use crate::models::{Analysis, Event, Link, PromptTemplate};
use crate::prompts;

/// Newsletter archive watched when no URL is given.
pub const DEFAULT_MONITOR_URL: &str = "https://tldr.tech/ai";

/// Only this many archive links are offered when looking for the latest issue.
pub const ISSUE_LINK_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
struct LatestIssue {
    #[serde(default)]
    latest_issue_url: Option<String>,
}

/// Source id stamped on events found through `archive_url`.
pub fn monitor_source_id(archive_url: &str) -> String {
    format!("monitor-{archive_url}")
}

impl Pipeline {
    /// Run the newsletter pipeline against `archive_url`.
    #[instrument(level = "info", skip(self))]
    pub async fn monitor(&self, archive_url: &str) -> RunOutcome {
        let outcome = match self.try_monitor(archive_url).await {
            Ok(outcome) => outcome,
            Err(failure) => failure.into(),
        };
        match &outcome {
            RunOutcome::Failed { .. } => warn!(%outcome, "Monitor run stopped"),
            _ => info!(%outcome, "Monitor run finished"),
        }
        outcome
    }

    async fn try_monitor(&self, archive_url: &str) -> std::result::Result<RunOutcome, StageFailure> {
        let issue_url = self
            .find_latest_issue(archive_url)
            .await
            .at(Stage::FindLatestIssue)?;
        let links = self.issue_links(&issue_url).await.at(Stage::FetchLinks)?;
        let selected = self.filter_monitor_links(&links).await.at(Stage::FilterLinks)?;
        let events = self
            .analyze_new_links(archive_url, &selected)
            .await
            .at(Stage::Analyze)?;

        if events.is_empty() {
            return Ok(RunOutcome::NothingNew);
        }
        info!(count = events.len(), "Saving new events");
        let report = self.store.append_events(events).await.at(Stage::Save)?;
        Ok(if report.added > 0 {
            RunOutcome::Saved {
                added: report.added,
                skipped: report.skipped,
            }
        } else {
            RunOutcome::NothingNew
        })
    }

    /// Ask the LLM which archive link is the newest issue. Relative answers
    /// are resolved against the archive URL.
    #[instrument(level = "info", skip(self))]
    async fn find_latest_issue(&self, archive_url: &str) -> Result<String> {
        let base = Url::parse(archive_url)?;
        let links = extract_links(self.fetcher.as_ref(), archive_url).await;
        if links.is_empty() {
            return Err(Error::stage("No links found on archive page"));
        }

        let subset = &links[..links.len().min(ISSUE_LINK_LIMIT)];
        let listing = serde_json::to_string_pretty(subset)?;
        let prompt = self
            .render_prompt(prompts::LATEST_ISSUE, &[("links", &listing)])
            .await?;
        let reply: Option<LatestIssue> = ask_json(self.llm.as_ref(), &prompt)
            .await
            .map_err(|e| Error::stage(format!("Error finding latest issue: {e}")))?;

        let found = reply
            .and_then(|r| r.latest_issue_url)
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| Error::stage("Could not find latest issue URL"))?;
        let resolved = base.join(found.trim())?.to_string();
        info!(issue = %resolved, "Found latest issue");
        Ok(resolved)
    }

    async fn issue_links(&self, issue_url: &str) -> Result<Vec<Link>> {
        let links = extract_links(self.fetcher.as_ref(), issue_url).await;
        if links.is_empty() {
            return Err(Error::stage("No links found"));
        }
        info!(count = links.len(), "Found links in newsletter");
        Ok(links)
    }

    /// Like the scan filter, but a `null` answer just means nothing relevant.
    async fn filter_monitor_links(&self, links: &[Link]) -> Result<Vec<Link>> {
        match self.select_links(prompts::MONITOR_FILTER, links).await {
            Ok(selected) => {
                let selected = selected.unwrap_or_default();
                info!(count = selected.len(), "Selected relevant links");
                Ok(selected)
            }
            Err(e) => Err(Error::stage(format!("Filtering failed: {e}"))),
        }
    }

    /// Analyze the selected links that are not stored yet, one at a time.
    /// Links that fail to fetch or analyze are logged and skipped.
    #[instrument(level = "info", skip_all, fields(selected = selected.len()))]
    async fn analyze_new_links(&self, archive_url: &str, selected: &[Link]) -> Result<Vec<Event>> {
        if selected.is_empty() {
            info!("No URLs selected to analyze");
            return Ok(Vec::new());
        }

        let known = self.store.event_urls().await?;
        let fresh: Vec<&Link> = selected.iter().filter(|l| !known.contains(&l.url)).collect();
        if fresh.is_empty() {
            info!("All URLs already analyzed");
            return Ok(Vec::new());
        }

        let template = self.store.prompt(prompts::MONITOR_ANALYSIS).await?;
        // an unfillable template fails the stage, not each link
        template.render(&[("content", "")])?;

        let source_id = monitor_source_id(archive_url);
        let events: Vec<Event> = stream::iter(fresh)
            .then(|link| self.analyze_story(link, &template, &source_id))
            .filter_map(std::future::ready)
            .collect()
            .await;

        info!(count = events.len(), "Analyzed newsletter stories");
        Ok(events)
    }

    async fn analyze_story(
        &self,
        link: &Link,
        template: &PromptTemplate,
        source_id: &str,
    ) -> Option<Event> {
        let content = match fetch_page_text(self.fetcher.as_ref(), &link.url).await {
            Ok(content) if !content.is_empty() => content,
            Ok(_) => {
                warn!(url = %link.url, "Story has no readable text; skipping");
                return None;
            }
            Err(e) => {
                error!(url = %link.url, error = %e, "Story fetch failed; skipping");
                return None;
            }
        };

        let analysis: Result<Analysis> = match template.render(&[("content", &content)]) {
            Ok(prompt) => ask_json(self.llm.as_ref(), &prompt).await,
            Err(e) => Err(e),
        };
        match analysis {
            Ok(analysis) => {
                info!(
                    url = %link.url,
                    sentiment = ?analysis.sentiment,
                    impact = %analysis.impact_level,
                    "Analyzed story"
                );
                Some(Event::from_analysis(link, source_id, analysis, &content))
            }
            Err(e) => {
                error!(url = %link.url, error = %e, "Failed to analyze story; skipping");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{analysis_reply, harness};
    use super::*;
    use crate::fetch::tests::FakeFetcher;
    use crate::llm::tests::ScriptedLlm;
    use crate::models::{Link, Sentiment};

    const ARCHIVE: &str = "https://news.example.com/ai";
    const ISSUE: &str = "https://news.example.com/ai/2025-05-06";

    const ARCHIVE_PAGE: &str = r#"<html><body>
        <a href="/ai/2025-05-06">TLDR AI 2025-05-06</a>
        <a href="/ai/2025-05-05">TLDR AI 2025-05-05</a>
    </body></html>"#;

    const ISSUE_PAGE: &str = r#"<html><body>
        <a href="https://a.example.org/jailbreak">Universal jailbreak for frontier models</a>
        <a href="https://b.example.org/supply-chain">Poisoned model weights on a hub</a>
        <a href="https://c.example.org/agents">Agent memory injection attack</a>
        <a href="https://sponsor.example.org/">Sponsor: buy our GPUs</a>
    </body></html>"#;

    fn sentiment_reply(sentiment: &str, summary: &str) -> String {
        analysis_reply(summary).replacen('{', &format!("{{\n  \"sentiment\": \"{sentiment}\","), 1)
    }

    #[tokio::test]
    async fn test_all_duplicates_is_empty_and_writes_nothing() {
        let fetcher = FakeFetcher::default()
            .with_page(ARCHIVE, ARCHIVE_PAGE)
            .with_page(ISSUE, ISSUE_PAGE);
        let llm = ScriptedLlm::default()
            .reply(r#"{"latest_issue_url": "/ai/2025-05-06"}"#)
            .reply(r#"[{"selected_url": "https://a.example.org/jailbreak"}]"#);
        let (tmp, pipeline, fetcher, llm) = harness(fetcher, llm).await;

        let link = Link {
            text: "Universal jailbreak for frontier models".to_string(),
            url: "https://a.example.org/jailbreak".to_string(),
        };
        let analysis: Analysis = serde_json::from_str(
            crate::llm::strip_code_blocks(&analysis_reply("stored earlier")),
        )
        .unwrap();
        let existing = Event::from_analysis(&link, "src", analysis, "text");
        pipeline.store().append_events(vec![existing]).await.unwrap();
        let before = std::fs::read_to_string(tmp.path().join("events.json")).unwrap();

        let outcome = pipeline.monitor(ARCHIVE).await;
        assert_eq!(outcome, RunOutcome::NothingNew);

        let after = std::fs::read_to_string(tmp.path().join("events.json")).unwrap();
        assert_eq!(before, after);
        assert_eq!(llm.prompts().len(), 2);
        assert!(!fetcher.requested().contains(&link.url));
    }

    #[tokio::test]
    async fn test_monitor_skips_failing_stories() {
        // a: no page (fetch fails), b: unparseable analysis, c: good
        let fetcher = FakeFetcher::default()
            .with_page(ARCHIVE, ARCHIVE_PAGE)
            .with_page(ISSUE, ISSUE_PAGE)
            .with_page("https://b.example.org/supply-chain", "<p>Weights were backdoored.</p>")
            .with_page("https://c.example.org/agents", "<p>Memory entries carried instructions.</p>");
        let llm = ScriptedLlm::default()
            .reply(r#"{"latest_issue_url": "https://news.example.com/ai/2025-05-06"}"#)
            .reply(
                r#"[{"selected_url": "https://a.example.org/jailbreak"},
                    {"selected_url": "https://b.example.org/supply-chain"},
                    {"selected_url": "https://c.example.org/agents"}]"#,
            )
            .reply("not json at all")
            .reply(&sentiment_reply("Negative", "Agents persist injected memories"));
        let (_tmp, pipeline, _fetcher, _llm) = harness(fetcher, llm).await;

        let outcome = pipeline.monitor(ARCHIVE).await;
        assert_eq!(outcome, RunOutcome::Saved { added: 1, skipped: 0 });

        let events = pipeline.store().events().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].url, "https://c.example.org/agents");
        assert_eq!(events[0].source_website_id, monitor_source_id(ARCHIVE));
        assert_eq!(events[0].analysis.sentiment, Some(Sentiment::Negative));
    }

    #[tokio::test]
    async fn test_monitor_null_filter_is_nothing_new() {
        let fetcher = FakeFetcher::default()
            .with_page(ARCHIVE, ARCHIVE_PAGE)
            .with_page(ISSUE, ISSUE_PAGE);
        let llm = ScriptedLlm::default()
            .reply(r#"{"latest_issue_url": "/ai/2025-05-06"}"#)
            .reply("null");
        let (tmp, pipeline, _fetcher, _llm) = harness(fetcher, llm).await;

        assert_eq!(pipeline.monitor(ARCHIVE).await, RunOutcome::NothingNew);
        assert!(!tmp.path().join("events.json").exists());
    }

    #[tokio::test]
    async fn test_monitor_without_issue_fails() {
        let fetcher = FakeFetcher::default().with_page(ARCHIVE, ARCHIVE_PAGE);
        let llm = ScriptedLlm::default().reply("null");
        let (_tmp, pipeline, _fetcher, _llm) = harness(fetcher, llm).await;

        assert_eq!(
            pipeline.monitor(ARCHIVE).await,
            RunOutcome::Failed {
                stage: Stage::FindLatestIssue,
                reason: "Could not find latest issue URL".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_monitor_offers_at_most_fifty_archive_links() {
        let archive: String = (0..80)
            .map(|i| format!(r#"<a href="/ai/issue-{i}">Newsletter issue {i}</a>"#))
            .collect();
        let fetcher = FakeFetcher::default().with_page(ARCHIVE, &archive);
        let llm = ScriptedLlm::default().reply(r#"{"latest_issue_url": "/ai/issue-0"}"#);
        let (_tmp, pipeline, _fetcher, llm) = harness(fetcher, llm).await;

        // issue page is missing, so the run stops after picking the issue
        let outcome = pipeline.monitor(ARCHIVE).await;
        assert!(matches!(outcome, RunOutcome::Failed { stage: Stage::FetchLinks, .. }));
        let prompt = &llm.prompts()[0];
        assert!(prompt.contains("issue-49\""));
        assert!(!prompt.contains("issue-50\""));
    }
}
