//! Data models for tracked sources, extracted security events and prompts.
//!
//! This module defines the records that flow through the pipelines and end up
//! in the flat-file store:
//! - [`Source`]: a tracked website or newsletter archive
//! - [`Link`]: an anchor scraped from a page, candidate input for the LLM filter
//! - [`Analysis`]: the structured fields the LLM extracts from an article
//! - [`Event`]: one analyzed article tied to a source
//! - [`PromptTemplate`]: an editable, versioned LLM prompt
//!
//! Field names match the JSON files and the HTTP API, so the structs
//! serialize as-is in both places.

use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::utils::truncate_chars;

/// Number of content characters kept in [`Event::raw_content_snippet`].
pub const SNIPPET_CHARS: usize = 500;

static ISO_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}").unwrap());

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// A tracked website or newsletter whose front page or archive is scraped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    #[serde(default = "new_id")]
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Set by the scan pipeline after a successful save.
    #[serde(default)]
    pub last_scraped_at: Option<DateTime<Utc>>,
}

impl Source {
    pub fn new(name: &str, url: &str, description: Option<&str>) -> Self {
        Self {
            id: new_id(),
            name: name.to_string(),
            url: url.to_string(),
            description: description.map(str::to_string),
            last_scraped_at: None,
        }
    }
}

/// A source plus the number of stored events that reference it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSummary {
    #[serde(flatten)]
    pub source: Source,
    pub event_count: usize,
}

/// An anchor found on a scraped page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    pub text: String,
    pub url: String,
}

/// Severity word the analyzer assigns to an event.
///
/// Parsing is lenient: case is ignored and answers such as `"High/Critical"`
/// use their first word. Anything else becomes [`ImpactLevel::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String")]
pub enum ImpactLevel {
    Critical,
    High,
    Medium,
    Low,
    #[default]
    Unknown,
}

impl From<String> for ImpactLevel {
    fn from(value: String) -> Self {
        match first_word(&value).as_str() {
            "critical" => Self::Critical,
            "high" => Self::High,
            "medium" | "moderate" => Self::Medium,
            "low" => Self::Low,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ImpactLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Critical => "Critical",
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Tone label produced by the newsletter monitor's analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String")]
pub enum Sentiment {
    Critical,
    Negative,
    Neutral,
    Positive,
    Unknown,
}

impl From<String> for Sentiment {
    fn from(value: String) -> Self {
        match first_word(&value).as_str() {
            "critical" => Self::Critical,
            "negative" => Self::Negative,
            "neutral" => Self::Neutral,
            "positive" => Self::Positive,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Critical => "Critical",
            Self::Negative => "Negative",
            Self::Neutral => "Neutral",
            Self::Positive => "Positive",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

fn first_word(value: &str) -> String {
    value
        .trim()
        .split(|c: char| c == '/' || c == ',' || c.is_whitespace())
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// Structured fields the LLM extracts from an article.
///
/// Only the shape is checked: list fields default to empty when the model
/// leaves them out, everything else must be present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub summary: String,
    #[serde(default)]
    pub attack_vectors: Vec<String>,
    #[serde(default)]
    pub vulnerabilities: Vec<String>,
    #[serde(default)]
    pub affected_components: Vec<String>,
    pub impact_level: ImpactLevel,
    pub technical_details: String,
    #[serde(default)]
    pub published_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
}

impl Analysis {
    /// Publication date reported by the model, if it holds a `YYYY-MM-DD` date.
    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        parse_published_date(self.published_date.as_deref()?)
    }
}

/// Find a `YYYY-MM-DD` date in `raw` and return it as midnight UTC.
pub fn parse_published_date(raw: &str) -> Option<DateTime<Utc>> {
    let found = ISO_DATE.find(raw)?;
    let date = NaiveDate::parse_from_str(found.as_str(), "%Y-%m-%d").ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

/// One extracted, LLM-summarized security article tied to a source.
///
/// Events are unique by `url` across the whole store and never change after
/// they are written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default = "new_id")]
    pub id: String,
    pub title: String,
    pub url: String,
    pub source_website_id: String,
    pub published_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub scanned_at: DateTime<Utc>,
    pub analysis: Analysis,
    #[serde(default)]
    pub raw_content_snippet: Option<String>,
}

impl Event {
    /// Build an event for `link` from the analyzer's output.
    ///
    /// When the reported publication date is missing or unparseable the scan
    /// time is used instead.
    pub fn from_analysis(link: &Link, source_id: &str, analysis: Analysis, content: &str) -> Self {
        let now = Utc::now();
        let published_at = match analysis.published_at() {
            Some(at) => at,
            None => {
                tracing::debug!(
                    url = %link.url,
                    published_date = ?analysis.published_date,
                    "No usable publication date; using scan time"
                );
                now
            }
        };
        Self {
            id: new_id(),
            title: link.text.clone(),
            url: link.url.clone(),
            source_website_id: source_id.to_string(),
            published_at,
            scanned_at: now,
            analysis,
            raw_content_snippet: Some(format!("{}...", truncate_chars(content, SNIPPET_CHARS))),
        }
    }
}

/// A named LLM prompt with `{variable}` placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub template: String,
    #[serde(default)]
    pub input_variables: Vec<String>,
    #[serde(default = "first_version")]
    pub version: u32,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn first_version() -> u32 {
    1
}
