//! LLM access over an OpenAI-compatible chat-completions API.
//!
//! # Architecture
//!
//! - [`Ask`]: core trait for sending one prompt and getting the reply text
//! - [`ChatClient`]: `reqwest` implementation posting to `{base_url}/chat/completions`
//! - [`ask_json`]: sends a prompt and decodes the reply as JSON, accepting
//!   replies wrapped in Markdown code fences
//!
//! Calls are made at temperature 0 and are not retried. A failed call fails
//! the pipeline stage that made it.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};
use crate::fetch::client_builder;
use crate::utils::{looks_truncated, truncate_for_log};

/// Gemini's OpenAI-compatible endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Send text to an LLM and receive its reply.
#[async_trait]
pub trait Ask: Send + Sync {
    async fn ask(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions client for any OpenAI-compatible provider.
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl ChatClient {
    /// Build a client. Without an API key no `Authorization` header is sent,
    /// which suits local endpoints.
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: Option<&str>,
        proxy: Option<&str>,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        match api_key {
            Some(key) => {
                let value = HeaderValue::from_str(&format!("Bearer {key}"))
                    .map_err(|e| Error::Llm(format!("invalid API key: {e}")))?;
                headers.insert(AUTHORIZATION, value);
            }
            None => warn!("No LLM API key configured; requests are sent unauthenticated"),
        }

        let http = client_builder(proxy)?.default_headers(headers).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl Ask for ChatClient {
    #[instrument(level = "info", skip_all, fields(model = %self.model, prompt_bytes = prompt.len()))]
    async fn ask(&self, prompt: &str) -> Result<String> {
        let t0 = Instant::now();
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.0,
        };

        let response = self.http.post(&url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                elapsed_ms = t0.elapsed().as_millis() as u128,
                %status,
                body = %truncate_for_log(&body, 300),
                "API call failed"
            );
            return Err(Error::Llm(format!("chat completion returned {status}")));
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Llm("reply has no message content".to_string()))?;

        info!(
            elapsed_ms = t0.elapsed().as_millis() as u128,
            reply_bytes = content.len(),
            "API call succeeded"
        );
        Ok(content)
    }
}

/// Strip a surrounding Markdown code fence (` ```json ... ``` `) from a reply.
pub fn strip_code_blocks(reply: &str) -> &str {
    reply
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```JSON")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// The body of the first Markdown code fence anywhere in a reply.
static FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").unwrap());

/// Decode an LLM reply as `T`.
///
/// The whole reply is tried first (minus a surrounding fence). Models often
/// wrap the JSON in prose, so a fenced block found anywhere in the reply is
/// tried next, and finally the span from the first `[`/`{` to the last
/// `]`/`}`.
///
/// # Errors
///
/// Returns [`Error::Llm`] with the error of the whole-reply attempt when no
/// candidate decodes.
pub fn parse_json_reply<T: DeserializeOwned>(reply: &str) -> Result<T> {
    let body = strip_code_blocks(reply);
    let first_err = match serde_json::from_str(body) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    let fenced = FENCED
        .captures(reply)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str());
    for candidate in fenced.into_iter().chain(json_span(reply)) {
        if let Ok(value) = serde_json::from_str(candidate) {
            debug!(bytes = candidate.len(), "Decoded JSON embedded in LLM reply");
            return Ok(value);
        }
    }

    if looks_truncated(&first_err) {
        warn!(
            error = %first_err,
            reply = %truncate_for_log(body, 200),
            "LLM reply looks truncated"
        );
    } else {
        warn!(
            error = %first_err,
            reply = %truncate_for_log(body, 200),
            "LLM reply is not the expected JSON"
        );
    }
    Err(Error::Llm(format!("unparseable reply: {first_err}")))
}

/// From the first `[` or `{` to the last `]` or `}`.
fn json_span(reply: &str) -> Option<&str> {
    let start = reply.find(['[', '{'])?;
    let end = reply.rfind([']', '}'])?;
    (end > start).then(|| &reply[start..=end])
}

/// Send `prompt` and decode the reply as `T`.
pub async fn ask_json<T: DeserializeOwned>(llm: &dyn Ask, prompt: &str) -> Result<T> {
    let reply = llm.ask(prompt).await?;
    debug!(reply = %truncate_for_log(&reply, 500), "LLM reply");
    parse_json_reply(&reply)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned replies in order and records every prompt.
    #[derive(Default)]
    pub(crate) struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        pub(crate) fn reply(self, text: &str) -> Self {
            self.replies.lock().unwrap().push_back(Ok(text.to_string()));
            self
        }

        pub(crate) fn fail(self, reason: &str) -> Self {
            self.replies
                .lock()
                .unwrap()
                .push_back(Err(Error::Llm(reason.to_string())));
            self
        }

        pub(crate) fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Ask for ScriptedLlm {
        async fn ask(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::Llm("no scripted reply left".to_string())))
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Pick {
        selected_url: String,
    }

    #[test]
    fn test_strip_code_blocks() {
        assert_eq!(strip_code_blocks("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("```\n[1]\n```"), "[1]");
        assert_eq!(strip_code_blocks("  null  "), "null");
    }

    #[test]
    fn test_parse_json_reply_fenced() {
        let reply = "```json\n{\"selected_url\": \"https://a.test\"}\n```";
        let pick: Pick = parse_json_reply(reply).unwrap();
        assert_eq!(pick.selected_url, "https://a.test");
    }

    #[test]
    fn test_parse_json_reply_null_into_option() {
        let pick: Option<Pick> = parse_json_reply("null").unwrap();
        assert_eq!(pick, None);
    }

    #[test]
    fn test_parse_json_reply_fence_after_prose() {
        let reply = "Here are the relevant links:\n```json\n[{\"selected_url\": \"https://a.test/x\"}]\n```";
        let picks: Vec<Pick> = parse_json_reply(reply).unwrap();
        assert_eq!(
            picks,
            vec![Pick {
                selected_url: "https://a.test/x".to_string()
            }]
        );
    }

    #[test]
    fn test_parse_json_reply_bare_json_inside_prose() {
        let reply = "Sure! {\"selected_url\": \"https://a.test/y\"} Let me know if you need more.";
        let pick: Pick = parse_json_reply(reply).unwrap();
        assert_eq!(pick.selected_url, "https://a.test/y");
    }

    #[test]
    fn test_json_span() {
        assert_eq!(json_span("x [1, {\"a\": 2}] y"), Some("[1, {\"a\": 2}]"));
        assert_eq!(json_span("no json here"), None);
        assert_eq!(json_span("} backwards {"), None);
    }

    #[test]
    fn test_parse_json_reply_garbage_is_llm_error() {
        let err = parse_json_reply::<Pick>("I could not find anything").unwrap_err();
        assert!(matches!(err, Error::Llm(_)));
        let err = parse_json_reply::<Pick>("{\"selected_url\": \"https://a").unwrap_err();
        assert!(matches!(err, Error::Llm(_)));
    }

    #[tokio::test]
    async fn test_ask_json_uses_scripted_reply() {
        let llm = ScriptedLlm::default().reply("[{\"selected_url\": \"https://a.test\"}]");
        let picks: Vec<Pick> = ask_json(&llm, "choose").await.unwrap();
        assert_eq!(picks.len(), 1);
        assert_eq!(llm.prompts(), vec!["choose".to_string()]);
    }

    #[tokio::test]
    async fn test_ask_json_propagates_failure() {
        let llm = ScriptedLlm::default().fail("quota exceeded");
        let err = ask_json::<Pick>(&llm, "choose").await.unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[test]
    fn test_chat_client_trims_base_url() {
        let client = ChatClient::new("http://localhost:8080/v1/", DEFAULT_MODEL, Some("k"), None).unwrap();
        assert_eq!(client.base_url, "http://localhost:8080/v1");
    }
}
