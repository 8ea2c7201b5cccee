//! Default LLM prompt templates and `{variable}` rendering.
//!
//! Templates live in `prompts.json` so operators can tune them through the
//! API. The defaults below are seeded the first time the store is read.
//! Placeholders are written `{name}`; literal braces are doubled (`{{`, `}}`).

use chrono::Utc;

use crate::error::{Error, Result};
use crate::models::PromptTemplate;

pub const LINK_FILTER: &str = "link_filter";
pub const CONTENT_ANALYSIS: &str = "content_analysis";
pub const LATEST_ISSUE: &str = "latest_issue";
pub const MONITOR_FILTER: &str = "monitor_filter";
pub const MONITOR_ANALYSIS: &str = "monitor_analysis";

const LINK_FILTER_TEMPLATE: &str = r#"You are an AI Security Researcher. Your goal is to identify recent article links from the provided list that discuss a specific AI Security Event, Attack, Vulnerability, or Research.

Focus on:
- New attack techniques against AI/LLMs and AI Agents.
- New vulnerabilities found in AI infrastructure or libraries.
- AI Security research papers on adversarial ML, attacks and vulnerability research.
- Real-world AI security incidents.
- Published in the last 6 months.

Ignore:
- General company news or marketing.
- General company products or solutions.
- Generic "What is AI" or "What is the top AI threat" articles.
- Links to login pages, social media, homepages or ads.
- Links to other sites.

Links:
{links}

Return a JSON array where each item is an object with a key "selected_url" containing the URL, for example [{{"selected_url": "https://..."}}]. If nothing is relevant, return null."#;

const CONTENT_ANALYSIS_TEMPLATE: &str = r#"You are an expert AI Security Analyst. Analyze the following article content and extract the security details.

Article Content:
{content}

Return a JSON object matching this schema:
{{
    "summary": "Brief summary of the event/research",
    "attack_vectors": ["List of specific attack vectors mentioned"],
    "vulnerabilities": ["List of vulnerabilities or CVEs"],
    "affected_components": ["List of affected libraries, models, or platforms"],
    "impact_level": "Critical/High/Medium/Low",
    "technical_details": "A short paragraph explaining the technical aspect of the attack/finding",
    "published_date": "YYYY-MM-DD"
}}

IMPORTANT: 'published_date' must be in YYYY-MM-DD format. If the date is not explicitly mentioned, infer it from the context or metadata. If no date can be found at all, use today's date."#;

const LATEST_ISSUE_TEMPLATE: &str = r#"You are looking for the link to the *latest* newsletter issue in a list of links found on an archive page.

Links:
{links}

Return a JSON object with the key "latest_issue_url". If no issue link is present, return null.
Prefer links that look like dates or "Issue #..."."#;

const MONITOR_FILTER_TEMPLATE: &str = r#"You are an AI Security Watchdog.
Identify articles related to:
- AI attack events
- AI threats
- AI vulnerabilities
- Adversarial Machine Learning
- LLM prompt injection / jailbreaks

Ignore:
- General AI news (new models, generic business news)
- Sponsors and ads
- Social media profiles

Links:
{links}

Return a JSON array where each item is an object with a key "selected_url" containing the URL. If nothing is relevant, return null."#;

const MONITOR_ANALYSIS_TEMPLATE: &str = r#"Analyze the following article for AI Security details.

Article Content:
{content}

Return a JSON object matching the schema below.
Start with the field "sentiment", one of "Critical", "Negative", "Neutral", "Positive":
- Critical/Negative: attacks, vulnerabilities or threats found.
- Neutral: research without an immediate threat, or general discussion.
- Positive: defenses, fixes, improvements.

Schema:
{{
    "sentiment": "Critical/Negative/Neutral/Positive",
    "summary": "Brief summary",
    "attack_vectors": ["List..."],
    "vulnerabilities": ["List..."],
    "affected_components": ["List..."],
    "impact_level": "Critical/High/Medium/Low",
    "technical_details": "Details...",
    "published_date": "YYYY-MM-DD"
}}"#;

/// The prompt set seeded into an empty store.
pub fn defaults() -> Vec<PromptTemplate> {
    let entries = [
        (
            LINK_FILTER,
            "Pick the relevant AI-security article links from a scraped page",
            LINK_FILTER_TEMPLATE,
            "links",
        ),
        (
            CONTENT_ANALYSIS,
            "Extract structured security details from an article",
            CONTENT_ANALYSIS_TEMPLATE,
            "content",
        ),
        (
            LATEST_ISSUE,
            "Find the newest issue on a newsletter archive page",
            LATEST_ISSUE_TEMPLATE,
            "links",
        ),
        (
            MONITOR_FILTER,
            "Pick AI-security links out of a newsletter issue",
            MONITOR_FILTER_TEMPLATE,
            "links",
        ),
        (
            MONITOR_ANALYSIS,
            "Extract security details plus a sentiment label from a newsletter article",
            MONITOR_ANALYSIS_TEMPLATE,
            "content",
        ),
    ];
    let now = Utc::now();
    entries
        .into_iter()
        .map(|(name, description, template, var)| PromptTemplate {
            name: name.to_string(),
            description: description.to_string(),
            template: template.to_string(),
            input_variables: vec![var.to_string()],
            version: 1,
            updated_at: Some(now),
        })
        .collect()
}

impl PromptTemplate {
    /// Fill this template's placeholders from `vars`.
    pub fn render(&self, vars: &[(&str, &str)]) -> Result<String> {
        render(&self.template, vars).map_err(|e| match e {
            Error::Prompt(msg) => Error::Prompt(format!("{}: {msg}", self.name)),
            other => other,
        })
    }
}

/// Substitute `{name}` placeholders and unescape doubled braces.
///
/// A placeholder with no matching entry in `vars`, or an unterminated `{`,
/// is an error. A lone `}` is kept as-is.
pub fn render(template: &str, vars: &[(&str, &str)]) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => name.push(ch),
                        None => {
                            return Err(Error::Prompt(format!(
                                "unterminated placeholder '{{{name}'"
                            )));
                        }
                    }
                }
                let name = name.trim();
                let value = vars
                    .iter()
                    .find(|(k, _)| *k == name)
                    .map(|(_, v)| *v)
                    .ok_or_else(|| Error::Prompt(format!("missing value for '{name}'")))?;
                out.push_str(value);
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_and_unescapes() {
        let out = render("A {x} and {{literal}} {y}", &[("x", "1"), ("y", "2")]).unwrap();
        assert_eq!(out, "A 1 and {literal} 2");
    }

    #[test]
    fn test_render_value_is_not_reinterpreted() {
        let out = render("{content}", &[("content", "{not_a_var}")]).unwrap();
        assert_eq!(out, "{not_a_var}");
    }

    #[test]
    fn test_render_missing_variable_errors() {
        let err = render("Hello {name}", &[]).unwrap_err();
        assert!(matches!(err, Error::Prompt(_)));
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn test_render_unterminated_placeholder_errors() {
        assert!(render("oops {links", &[("links", "x")]).is_err());
    }

    #[test]
    fn test_render_lone_closing_brace_kept() {
        assert_eq!(render("a } b", &[]).unwrap(), "a } b");
    }

    #[test]
    fn test_defaults_render_with_declared_variables() {
        let defaults = defaults();
        assert_eq!(defaults.len(), 5);
        for prompt in &defaults {
            let vars: Vec<(&str, &str)> = prompt
                .input_variables
                .iter()
                .map(|v| (v.as_str(), "VALUE"))
                .collect();
            let rendered = prompt.render(&vars).unwrap();
            assert!(rendered.contains("VALUE"), "{} lost its variable", prompt.name);
            assert!(!rendered.contains("{{"), "{} kept an escape", prompt.name);
        }
    }

    #[test]
    fn test_analysis_prompt_keeps_json_schema() {
        let prompt = defaults()
            .into_iter()
            .find(|p| p.name == CONTENT_ANALYSIS)
            .unwrap();
        let rendered = prompt.render(&[("content", "body")]).unwrap();
        assert!(rendered.contains("{\n    \"summary\""));
    }

    #[test]
    fn test_template_render_error_names_prompt() {
        let prompt = defaults().into_iter().find(|p| p.name == LINK_FILTER).unwrap();
        let err = prompt.render(&[]).unwrap_err();
        assert!(err.to_string().contains(LINK_FILTER));
    }
}
