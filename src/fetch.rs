//! Page fetching, link discovery and article text extraction.
//!
//! Every source is scraped the same way:
//!
//! 1. **Link discovery**: fetch the page and collect `(anchor text, absolute URL)`
//!    pairs from every `a[href]`
//! 2. **Content fetch**: fetch a chosen article and reduce it to plain text
//!
//! Network access goes through the [`Fetch`] trait so pipelines can be driven
//! by canned pages in tests. [`HttpFetcher`] is the real implementation: a
//! shared `reqwest` client with a browser-like header set, a fixed timeout and
//! an optional proxy.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::header::{self, HeaderMap, HeaderValue};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::Result;
use crate::models::Link;
use crate::utils::truncate_chars;

/// Per-request timeout for every outbound call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Article text beyond this many characters is dropped before analysis.
pub const MAX_CONTENT_CHARS: usize = 15_000;

/// Anchors whose trimmed text is this short or shorter are ignored.
const MIN_LINK_TEXT_CHARS: usize = 5;

/// Subtrees that never contribute article text.
const SKIPPED_TAGS: &[&str] = &["script", "style", "nav", "footer", "header"];

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());

/// Something that can return the HTML body behind a URL.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch_html(&self, url: &str) -> Result<String>;
}

/// Start a `reqwest` client builder with the shared timeout and, when set,
/// an HTTP proxy for all schemes.
pub fn client_builder(proxy: Option<&str>) -> Result<reqwest::ClientBuilder> {
    let mut builder = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);
    if let Some(proxy) = proxy {
        info!(%proxy, "Routing outbound requests through proxy");
        builder = builder.proxy(reqwest::Proxy::all(proxy)?);
    }
    Ok(builder)
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8",
        ),
    );
    headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(header::UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers.insert("sec-fetch-dest", HeaderValue::from_static("document"));
    headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
    headers.insert("sec-fetch-site", HeaderValue::from_static("none"));
    headers.insert("sec-fetch-user", HeaderValue::from_static("?1"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    headers
}

/// Plain HTTP GET with browser-like headers.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(proxy: Option<&str>) -> Result<Self> {
        let client = client_builder(proxy)?
            .default_headers(browser_headers())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    #[instrument(level = "debug", skip(self))]
    async fn fetch_html(&self, url: &str) -> Result<String> {
        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        debug!(bytes = body.len(), "Fetched page");
        Ok(body)
    }
}

/// Fetch `url` and return its links.
///
/// # Arguments
///
/// * `fetcher` - Where the page comes from
/// * `url` - The page to scan; relative hrefs are resolved against it
///
/// # Returns
///
/// The unique links in document order. Never fails: an unparseable URL or
/// a network or HTTP error is logged and yields an empty list.
#[instrument(level = "info", skip(fetcher))]
pub async fn extract_links(fetcher: &dyn Fetch, url: &str) -> Vec<Link> {
    let base = match Url::parse(url) {
        Ok(base) => base,
        Err(e) => {
            warn!(error = %e, "Invalid page URL");
            return Vec::new();
        }
    };
    match fetcher.fetch_html(url).await {
        Ok(html) => {
            let links = parse_links(&html, &base);
            info!(count = links.len(), "Extracted links");
            links
        }
        Err(e) => {
            warn!(error = %e, "Error extracting links");
            Vec::new()
        }
    }
}

/// Collect anchors from `html`, resolved against `base`.
///
/// Anchors with 5 or fewer characters of trimmed text are dropped. Links are
/// unique by URL: a repeated URL keeps the position of its first occurrence
/// and the text of its last.
pub fn parse_links(html: &str, base: &Url) -> Vec<Link> {
    let document = Html::parse_document(html);
    let mut links: Vec<Link> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for element in document.select(&ANCHOR) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let text: String = element.text().map(str::trim).collect();
        if text.chars().count() <= MIN_LINK_TEXT_CHARS {
            continue;
        }
        let Ok(resolved) = base.join(href.trim()) else {
            debug!(%href, "Unresolvable href");
            continue;
        };
        let url = resolved.to_string();

        match positions.get(&url) {
            Some(&idx) => links[idx].text = text,
            None => {
                positions.insert(url.clone(), links.len());
                links.push(Link { text, url });
            }
        }
    }
    links
}

/// Fetch `url` and reduce it to article text.
///
/// # Returns
///
/// The page text, capped at [`MAX_CONTENT_CHARS`]. An empty string means
/// the page had no readable text.
///
/// # Errors
///
/// Whatever the fetcher returns for an unreachable page or an error status.
#[instrument(level = "info", skip(fetcher))]
pub async fn fetch_page_text(fetcher: &dyn Fetch, url: &str) -> Result<String> {
    let html = fetcher.fetch_html(url).await?;
    let text = page_text(&html);
    info!(chars = text.chars().count(), "Parsed page text");
    Ok(text)
}

/// Visible text of `html` with non-content subtrees removed.
///
/// Text fragments are trimmed, empty ones dropped, the rest joined by single
/// spaces and capped at [`MAX_CONTENT_CHARS`].
pub fn page_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut fragments: Vec<&str> = Vec::new();
    collect_text(document.root_element(), &mut fragments);
    let joined = fragments.join(" ");
    truncate_chars(&joined, MAX_CONTENT_CHARS).to_string()
}

fn collect_text<'a>(element: ElementRef<'a>, out: &mut Vec<&'a str>) {
    if SKIPPED_TAGS.contains(&element.value().name()) {
        return;
    }
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                out.push(trimmed);
            }
        } else if let Some(child_element) = ElementRef::wrap(child) {
            collect_text(child_element, out);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Mutex;

    /// Serves canned pages and records every requested URL.
    #[derive(Default)]
    pub(crate) struct FakeFetcher {
        pages: HashMap<String, String>,
        pub(crate) requested: Mutex<Vec<String>>,
    }

    impl FakeFetcher {
        pub(crate) fn with_page(mut self, url: &str, html: &str) -> Self {
            self.pages.insert(url.to_string(), html.to_string());
            self
        }

        pub(crate) fn requested(&self) -> Vec<String> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Fetch for FakeFetcher {
        async fn fetch_html(&self, url: &str) -> Result<String> {
            self.requested.lock().unwrap().push(url.to_string());
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| Error::not_found("Page", url))
        }
    }

    fn base() -> Url {
        Url::parse("https://blog.example.com/research/").unwrap()
    }

    #[test]
    fn test_parse_links_resolves_relative() {
        let html = r#"<html><body>
            <a href="/posts/prompt-injection">Prompt injection in agents</a>
            <a href="model-theft">Model theft at scale</a>
            <a href="https://other.test/x">External write-up</a>
        </body></html>"#;
        let links = parse_links(html, &base());
        let urls: Vec<&str> = links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://blog.example.com/posts/prompt-injection",
                "https://blog.example.com/research/model-theft",
                "https://other.test/x",
            ]
        );
    }

    #[test]
    fn test_parse_links_drops_short_text() {
        let html = r#"<a href="/a">Home</a><a href="/b">  Login  </a><a href="/c">Jailbreaks</a><a href="/d"><img src="x.png"></a>"#;
        let links = parse_links(html, &base());
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].text, "Jailbreaks");
    }

    #[test]
    fn test_parse_links_dedup_first_position_last_text() {
        let html = r#"
            <a href="/one">First title</a>
            <a href="/two">Second title</a>
            <a href="/one">Read more about one</a>
        "#;
        let links = parse_links(html, &base());
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].url, "https://blog.example.com/one");
        assert_eq!(links[0].text, "Read more about one");
        assert_eq!(links[1].text, "Second title");
    }

    #[test]
    fn test_parse_links_joins_nested_text() {
        let html = r#"<a href="/p"><span> Data </span><b>poisoning</b></a>"#;
        let links = parse_links(html, &base());
        assert_eq!(links[0].text, "Datapoisoning");
    }

    #[test]
    fn test_page_text_strips_boilerplate() {
        let html = r#"<html><head><style>p { color: red }</style><script>var x = 1;</script></head>
            <body>
              <header>Site header</header>
              <nav>Menu items</nav>
              <article><h1>  Title  </h1><p>First   paragraph.</p><p>Second <em>part</em></p></article>
              <footer>Copyright</footer>
            </body></html>"#;
        assert_eq!(page_text(html), "Title First   paragraph. Second part");
    }

    #[test]
    fn test_page_text_is_capped() {
        let html = format!("<p>{}</p>", "word ".repeat(10_000));
        assert_eq!(page_text(&html).chars().count(), MAX_CONTENT_CHARS);
    }

    #[test]
    fn test_page_text_empty_page() {
        assert_eq!(page_text("<html><body><script>1</script></body></html>"), "");
    }

    #[tokio::test]
    async fn test_extract_links_error_yields_empty() {
        let fetcher = FakeFetcher::default();
        let links = extract_links(&fetcher, "https://down.test/").await;
        assert!(links.is_empty());
        assert_eq!(fetcher.requested(), vec!["https://down.test/".to_string()]);
    }

    #[tokio::test]
    async fn test_fetch_page_text_uses_fetcher() {
        let fetcher = FakeFetcher::default().with_page("https://a.test/post", "<p>Hello there</p>");
        let text = fetch_page_text(&fetcher, "https://a.test/post").await.unwrap();
        assert_eq!(text, "Hello there");
    }

    #[test]
    fn test_http_fetcher_builds() {
        assert!(HttpFetcher::new(None).is_ok());
        assert!(HttpFetcher::new(Some("http://127.0.0.1:7890")).is_ok());
    }
}
