//! Flat-file JSON store for sources, events and prompt templates.
//!
//! Each collection is one pretty-printed JSON array in the data directory:
//! ```text
//! data_dir/
//! ├── websites.json
//! ├── events.json
//! └── prompts.json
//! ```
//!
//! Files are rewritten in full on every save, through a temporary file and a
//! rename so a reader never sees half a file. Read-modify-write sequences
//! inside one process are serialized by an async mutex. A missing file reads
//! as an empty collection.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};
use crate::models::{Event, PromptTemplate, Source, SourceSummary};
use crate::prompts;

const SOURCES_FILE: &str = "websites.json";
const EVENTS_FILE: &str = "events.json";
const PROMPTS_FILE: &str = "prompts.json";

/// Curated AI-security sources written to a fresh data directory.
const DEFAULT_SOURCES: &[(&str, &str, &str)] = &[
    ("Zenity Blog", "https://www.zenity.io/blog/", "Enterprise Agent Security, Copilot, RAG"),
    ("HiddenLayer Research", "https://hiddenlayer.com/research/", "Adversarial ML, Model Hijacking"),
    ("Protect AI / Huntr", "https://www.protectai.com/blog", "AI Supply Chain Vulnerabilities"),
    ("Wiz Research", "https://www.wiz.io/blog", "Cloud AI Infrastructure, Tenant Isolation"),
    ("Enkrypt AI", "https://www.enkryptai.com/blog", "LLM Jailbreaking & Red Teaming"),
    ("Huntr.com Feed", "https://huntr.com/", "AI Bug Bounty Feed"),
    ("MITRE ATLAS", "https://atlas.mitre.org/", "Real-world AI attacks mapped to ATT&CK"),
    ("Hugging Face Security", "https://huggingface.co/blog/security", "Malicious Model Scanning"),
    ("Google Project Zero", "https://googleprojectzero.blogspot.com/", "Low-level vulnerabilities"),
    ("arXiv (Cryptography and Security)", "https://arxiv.org/list/cs.CR/recent", "Academic research on AI security"),
    ("OpenAI Safety", "https://openai.com/safety", "Core model safety updates, superalignment"),
    ("Anthropic Research", "https://www.anthropic.com/research", "Constitutional AI, mechanistic interpretability"),
    (
        "Microsoft Security (AI)",
        "https://www.microsoft.com/en-us/security/blog/topic/artificial-intelligence/",
        "Copilot security, enterprise threat intel",
    ),
    ("Cloudflare AI Blog", "https://blog.cloudflare.com/tag/ai/", "AI Gateway security, prompt injection WAF"),
    (
        "Unit 42 (Palo Alto)",
        "https://unit42.paloaltonetworks.com/tag/artificial-intelligence/",
        "Wild AI attacks, real-world vulnerabilities",
    ),
    ("Darktrace Blog", "https://darktrace.com/blog", "Offensive AI, autonomous response trends"),
    ("Pillar Security", "https://pillar.security/blog", "Red Teaming, MLOps security"),
];

pub fn default_sources() -> Vec<Source> {
    DEFAULT_SOURCES
        .iter()
        .map(|(name, url, description)| Source::new(name, url, Some(description)))
        .collect()
}

/// Counts reported by [`JsonStore::append_events`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppendReport {
    pub added: usize,
    pub skipped: usize,
}

pub struct JsonStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl JsonStore {
    /// Open the store in `dir`, creating the directory and seeding the
    /// default sources and prompts where their files are missing.
    #[instrument(level = "info", skip_all, fields(dir = %dir.as_ref().display()))]
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        let store = Self {
            dir,
            lock: Mutex::new(()),
        };

        let _guard = store.lock.lock().await;
        if !fs::try_exists(store.path(SOURCES_FILE)).await? {
            let seeded = default_sources();
            info!(count = seeded.len(), "Seeding default sources");
            store.write_list(SOURCES_FILE, &seeded).await?;
        }

        let mut stored: Vec<PromptTemplate> = store.read_list(PROMPTS_FILE).await?;
        let missing: Vec<PromptTemplate> = prompts::defaults()
            .into_iter()
            .filter(|d| !stored.iter().any(|p| p.name == d.name))
            .collect();
        if !missing.is_empty() {
            info!(count = missing.len(), "Seeding default prompt templates");
            stored.extend(missing);
            store.write_list(PROMPTS_FILE, &stored).await?;
        }
        drop(_guard);

        Ok(store)
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    async fn read_list<T: DeserializeOwned>(&self, file: &str) -> Result<Vec<T>> {
        let path = self.path(file);
        match fs::read_to_string(&path).await {
            Ok(text) if text.trim().is_empty() => Ok(Vec::new()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_list<T: Serialize>(&self, file: &str, items: &[T]) -> Result<()> {
        let path = self.path(file);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(items)?;
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), count = items.len(), "Wrote collection");
        Ok(())
    }

    // --- sources ---

    pub async fn sources(&self) -> Result<Vec<Source>> {
        self.read_list(SOURCES_FILE).await
    }

    /// Look up one source by id.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when no source has `id`.
    pub async fn source(&self, id: &str) -> Result<Source> {
        self.sources()
            .await?
            .into_iter()
            .find(|s| s.id == id)
            .ok_or_else(|| Error::not_found("Website", id))
    }

    /// Every source with the number of stored events that reference it.
    pub async fn sources_with_counts(&self) -> Result<Vec<SourceSummary>> {
        let sources = self.sources().await?;
        let events = self.events().await?;
        Ok(sources
            .into_iter()
            .map(|source| {
                let event_count = events
                    .iter()
                    .filter(|e| e.source_website_id == source.id)
                    .count();
                SourceSummary {
                    source,
                    event_count,
                }
            })
            .collect())
    }

    /// Register a new source.
    ///
    /// # Arguments
    ///
    /// * `source` - The source to store, with its id already assigned
    ///
    /// # Returns
    ///
    /// The stored source.
    ///
    /// # Errors
    ///
    /// [`Error::Conflict`] when a source with the same id exists. Nothing is
    /// written in that case.
    #[instrument(level = "info", skip_all, fields(id = %source.id, url = %source.url))]
    pub async fn add_source(&self, source: Source) -> Result<Source> {
        let _guard = self.lock.lock().await;
        let mut sources = self.sources().await?;
        if sources.iter().any(|s| s.id == source.id) {
            return Err(Error::Conflict {
                kind: "Website",
                id: source.id,
            });
        }
        sources.push(source.clone());
        self.write_list(SOURCES_FILE, &sources).await?;
        info!("Added source");
        Ok(source)
    }

    /// Remove exactly the source with `id`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when no source has `id`.
    #[instrument(level = "info", skip(self))]
    pub async fn delete_source(&self, id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut sources = self.sources().await?;
        let before = sources.len();
        sources.retain(|s| s.id != id);
        if sources.len() == before {
            return Err(Error::not_found("Website", id));
        }
        self.write_list(SOURCES_FILE, &sources).await?;
        info!("Deleted source");
        Ok(())
    }

    /// Record a completed scan. Unknown ids are logged and ignored.
    #[instrument(level = "debug", skip(self))]
    pub async fn touch_source(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut sources = self.sources().await?;
        match sources.iter_mut().find(|s| s.id == id) {
            Some(source) => {
                source.last_scraped_at = Some(at);
                let name = source.name.clone();
                self.write_list(SOURCES_FILE, &sources).await?;
                info!(%name, "Updated last_scraped_at");
            }
            None => warn!("Source vanished before last_scraped_at update"),
        }
        Ok(())
    }

    // --- events ---

    pub async fn events(&self) -> Result<Vec<Event>> {
        self.read_list(EVENTS_FILE).await
    }

    pub async fn event_urls(&self) -> Result<HashSet<String>> {
        Ok(self.events().await?.into_iter().map(|e| e.url).collect())
    }

    /// Append `new` to the event list, skipping URLs that are already stored
    /// (or repeated within `new`). Nothing is written when nothing is added.
    ///
    /// # Arguments
    ///
    /// * `new` - Freshly analyzed events, in the order they should be stored
    ///
    /// # Returns
    ///
    /// How many events were added and how many were skipped as duplicates.
    #[instrument(level = "info", skip_all, fields(incoming = new.len()))]
    pub async fn append_events(&self, new: Vec<Event>) -> Result<AppendReport> {
        let _guard = self.lock.lock().await;
        let mut events = self.events().await?;
        let mut seen: HashSet<String> = events.iter().map(|e| e.url.clone()).collect();

        let mut report = AppendReport::default();
        for event in new {
            if seen.insert(event.url.clone()) {
                events.push(event);
                report.added += 1;
            } else {
                debug!(url = %event.url, "Duplicate event, skipping save");
                report.skipped += 1;
            }
        }

        if report.added > 0 {
            self.write_list(EVENTS_FILE, &events).await?;
        }
        info!(added = report.added, skipped = report.skipped, "Stored events");
        Ok(report)
    }

    // --- prompts ---

    pub async fn prompts(&self) -> Result<Vec<PromptTemplate>> {
        self.read_list(PROMPTS_FILE).await
    }

    pub async fn prompt(&self, name: &str) -> Result<PromptTemplate> {
        self.prompts()
            .await?
            .into_iter()
            .find(|p| p.name == name)
            .ok_or_else(|| Error::not_found("Prompt", name))
    }

    /// Replace a template's text (and optionally its description), bumping
    /// its version.
    #[instrument(level = "info", skip(self, template, description))]
    pub async fn update_prompt(
        &self,
        name: &str,
        template: String,
        description: Option<String>,
    ) -> Result<PromptTemplate> {
        let _guard = self.lock.lock().await;
        let mut stored = self.prompts().await?;
        let prompt = stored
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| Error::not_found("Prompt", name))?;

        prompt.template = template;
        if let Some(description) = description {
            prompt.description = description;
        }
        prompt.version += 1;
        prompt.updated_at = Some(Utc::now());
        let updated = prompt.clone();

        self.write_list(PROMPTS_FILE, &stored).await?;
        info!(version = updated.version, "Updated prompt template");
        Ok(updated)
    }
}
