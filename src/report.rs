//! Plain-text daily summary of the events scanned on one day.

use chrono::{Local, NaiveDate, TimeZone};
use tracing::{info, instrument};

use crate::error::Result;
use crate::models::Event;
use crate::store::JsonStore;

/// Summarize the events scanned on `date` (local time, default today).
#[instrument(level = "info", skip(store))]
pub async fn daily_report(store: &JsonStore, date: Option<NaiveDate>) -> Result<String> {
    let date = date.unwrap_or_else(|| Local::now().date_naive());
    let events = store.events().await?;
    Ok(daily_summary(&events, date, &Local))
}

/// Render the report for the events whose `scanned_at`, seen in `tz`,
/// falls on `date`.
pub fn daily_summary<Tz: TimeZone>(events: &[Event], date: NaiveDate, tz: &Tz) -> String {
    let todays: Vec<&Event> = events
        .iter()
        .filter(|e| e.scanned_at.with_timezone(tz).date_naive() == date)
        .collect();
    info!(%date, count = todays.len(), "Generating daily summary");

    if todays.is_empty() {
        return format!("No events found for {date}.");
    }

    let mut out = format!(
        "Daily AI Security Summary for {date}\n\nTotal Events: {}\n\n",
        todays.len()
    );
    for event in todays {
        let sentiment = event
            .analysis
            .sentiment
            .map(|s| s.to_string())
            .unwrap_or_else(|| "N/A".to_string());
        out.push_str(&format!(
            "- [{sentiment}] {} ({})\n  {}\n  Link: {}\n\n",
            event.title, event.analysis.impact_level, event.analysis.summary, event.url
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Analysis, ImpactLevel, Link, Sentiment};
    use chrono::{TimeZone, Utc};

    fn event(title: &str, day: u32, sentiment: Option<Sentiment>) -> Event {
        let link = Link {
            text: title.to_string(),
            url: format!("https://example.com/{}", title.replace(' ', "-")),
        };
        let analysis = Analysis {
            summary: format!("About {title}"),
            attack_vectors: vec![],
            vulnerabilities: vec![],
            affected_components: vec![],
            impact_level: ImpactLevel::Critical,
            technical_details: String::new(),
            published_date: None,
            sentiment,
        };
        let mut event = Event::from_analysis(&link, "src", analysis, "");
        event.scanned_at = Utc.with_ymd_and_hms(2025, 5, day, 12, 0, 0).unwrap();
        event
    }

    #[test]
    fn test_summary_lists_only_that_day() {
        let events = vec![
            event("Model hijack", 6, Some(Sentiment::Critical)),
            event("Old news", 5, None),
            event("RAG poisoning", 6, None),
        ];
        let date = NaiveDate::from_ymd_opt(2025, 5, 6).unwrap();
        let text = daily_summary(&events, date, &Utc);

        assert!(text.starts_with("Daily AI Security Summary for 2025-05-06\n\n"));
        assert!(text.contains("Total Events: 2\n"));
        assert!(text.contains("- [Critical] Model hijack (Critical)\n  About Model hijack\n  Link: https://example.com/Model-hijack\n"));
        assert!(text.contains("- [N/A] RAG poisoning (Critical)"));
        assert!(!text.contains("Old news"));
    }

    #[test]
    fn test_summary_exact_layout() {
        let events = vec![event("Model hijack", 6, Some(Sentiment::Critical))];
        let date = NaiveDate::from_ymd_opt(2025, 5, 6).unwrap();

        assert_eq!(
            daily_summary(&events, date, &Utc),
            "Daily AI Security Summary for 2025-05-06\n\n\
             Total Events: 1\n\n\
             - [Critical] Model hijack (Critical)\n  \
             About Model hijack\n  \
             Link: https://example.com/Model-hijack\n\n"
        );
    }

    #[test]
    fn test_summary_empty_day() {
        let events = vec![event("Old news", 5, None)];
        let date = NaiveDate::from_ymd_opt(2025, 5, 7).unwrap();
        assert_eq!(daily_summary(&events, date, &Utc), "No events found for 2025-05-07.");
    }

    #[tokio::test]
    async fn test_daily_report_reads_store() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("websites.json"), "[]").unwrap();
        let store = JsonStore::open(tmp.path()).await.unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 5, 6).unwrap();
        let text = daily_report(&store, Some(date)).await.unwrap();
        assert_eq!(text, "No events found for 2025-05-06.");
    }
}
