use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

pub const GOOGLE_SEARCH_ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";
pub const WIKIPEDIA_API_ENDPOINT: &str = "https://en.wikipedia.org/w/api.php";
const WIKIPEDIA_ARTICLE_BASE: &str = "https://en.wikipedia.org/wiki/";
/// Wikipedia hits are a stand-in for real search; keep only the top few.
const WIKIPEDIA_MAX_RESULTS: usize = 2;

static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchHit {
    pub title: String,
    pub snippet: String,
    pub source: String,
    pub link: String,
}

/// Web research collaborator. Never fails: an unavailable or failing service
/// yields an empty result list.
#[async_trait]
pub trait ResearchClient: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Vec<ResearchHit>;
}

#[derive(Debug, Clone, Default)]
pub struct NoResearch;

#[async_trait]
impl ResearchClient for NoResearch {
    async fn search(&self, _query: &str, _max_results: usize) -> Vec<ResearchHit> {
        Vec::new()
    }
}

fn http_client() -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(concat!("ebookforge/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("build http client")
}

/// Google Custom Search JSON API client, optionally backed by Wikipedia when
/// a request fails.
#[derive(Debug, Clone)]
pub struct GoogleSearch {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    engine_id: String,
    fallback: Option<WikipediaSearch>,
}

impl GoogleSearch {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        engine_id: impl Into<String>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client()?,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            engine_id: engine_id.into(),
            fallback: None,
        })
    }

    pub fn with_fallback(mut self, fallback: WikipediaSearch) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// `None` unless both `GOOGLE_API_KEY` and `SEARCH_ENGINE_ID` are set.
    pub fn from_env() -> anyhow::Result<Option<Self>> {
        let api_key = std::env::var("GOOGLE_API_KEY").ok();
        let engine_id = std::env::var("SEARCH_ENGINE_ID").ok();
        match (api_key, engine_id) {
            (Some(key), Some(cx)) if !key.trim().is_empty() && !cx.trim().is_empty() => {
                Ok(Some(Self::new(GOOGLE_SEARCH_ENDPOINT, key, cx)?))
            }
            _ => Ok(None),
        }
    }

    fn request_url(&self, query: &str, max_results: usize) -> anyhow::Result<Url> {
        // The API caps `num` at 10.
        let num = max_results.clamp(1, 10).to_string();
        Url::parse_with_params(
            &self.endpoint,
            [
                ("key", self.api_key.as_str()),
                ("cx", self.engine_id.as_str()),
                ("q", query),
                ("num", num.as_str()),
            ],
        )
        .with_context(|| format!("build search url: {}", self.endpoint))
    }

    async fn try_search(&self, query: &str, max_results: usize) -> anyhow::Result<Vec<ResearchHit>> {
        let url = self.request_url(query, max_results)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("GET custom search")?;
        let status = response.status();
        let raw = response.text().await.context("read search response body")?;
        if !status.is_success() {
            anyhow::bail!("search API error ({status})");
        }
        let value: serde_json::Value =
            serde_json::from_str(&raw).context("parse search response")?;
        let mut hits = parse_items(&value);
        hits.truncate(max_results);
        Ok(hits)
    }
}

#[async_trait]
impl ResearchClient for GoogleSearch {
    async fn search(&self, query: &str, max_results: usize) -> Vec<ResearchHit> {
        if max_results == 0 {
            return Vec::new();
        }
        match self.try_search(query, max_results).await {
            Ok(hits) => {
                tracing::debug!(query, hits = hits.len(), "research");
                hits
            }
            Err(err) => match &self.fallback {
                Some(fallback) => {
                    tracing::warn!(query, error = %format!("{err:#}"), "research failed; trying wikipedia");
                    fallback.search(query, max_results).await
                }
                None => {
                    tracing::warn!(query, error = %format!("{err:#}"), "research failed; continuing without results");
                    Vec::new()
                }
            },
        }
    }
}

/// MediaWiki search API client. Needs no credentials.
#[derive(Debug, Clone)]
pub struct WikipediaSearch {
    client: reqwest::Client,
    endpoint: String,
}

impl WikipediaSearch {
    pub fn new(endpoint: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client()?,
            endpoint: endpoint.into(),
        })
    }

    fn request_url(&self, query: &str, max_results: usize) -> anyhow::Result<Url> {
        let limit = max_results.clamp(1, WIKIPEDIA_MAX_RESULTS).to_string();
        Url::parse_with_params(
            &self.endpoint,
            [
                ("action", "query"),
                ("list", "search"),
                ("srsearch", query),
                ("srlimit", limit.as_str()),
                ("srprop", "snippet"),
                ("format", "json"),
            ],
        )
        .with_context(|| format!("build wikipedia url: {}", self.endpoint))
    }

    async fn try_search(&self, query: &str, max_results: usize) -> anyhow::Result<Vec<ResearchHit>> {
        let url = self.request_url(query, max_results)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("GET wikipedia search")?;
        let status = response.status();
        let raw = response.text().await.context("read wikipedia response body")?;
        if !status.is_success() {
            anyhow::bail!("wikipedia API error ({status})");
        }
        let value: serde_json::Value =
            serde_json::from_str(&raw).context("parse wikipedia response")?;
        let mut hits = parse_wikipedia(&value);
        hits.truncate(max_results.min(WIKIPEDIA_MAX_RESULTS));
        Ok(hits)
    }
}

#[async_trait]
impl ResearchClient for WikipediaSearch {
    async fn search(&self, query: &str, max_results: usize) -> Vec<ResearchHit> {
        if max_results == 0 {
            return Vec::new();
        }
        match self.try_search(query, max_results).await {
            Ok(hits) => {
                tracing::debug!(query, hits = hits.len(), "wikipedia research");
                hits
            }
            Err(err) => {
                tracing::warn!(query, error = %format!("{err:#}"), "wikipedia research failed; continuing without results");
                Vec::new()
            }
        }
    }
}

fn parse_wikipedia(value: &serde_json::Value) -> Vec<ResearchHit> {
    let Some(results) = value
        .pointer("/query/search")
        .and_then(|v| v.as_array())
    else {
        return Vec::new();
    };
    results
        .iter()
        .filter_map(|result| {
            let title = result.get("title")?.as_str()?.trim();
            if title.is_empty() {
                return None;
            }
            let snippet = result
                .get("snippet")
                .and_then(|v| v.as_str())
                .map(plain_text)
                .unwrap_or_default();
            Some(ResearchHit {
                title: title.to_owned(),
                snippet,
                source: "Wikipedia".to_owned(),
                link: article_link(title),
            })
        })
        .collect()
}

fn article_link(title: &str) -> String {
    let Ok(mut url) = Url::parse(WIKIPEDIA_ARTICLE_BASE) else {
        return String::new();
    };
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push(&title.replace(' ', "_"));
    }
    url.to_string()
}

/// Search snippets carry `<span class="searchmatch">` markup and entities.
fn plain_text(snippet: &str) -> String {
    HTML_TAG_RE
        .replace_all(snippet, "")
        .replace("&quot;", "\"")
        .replace("&#039;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
        .trim()
        .to_owned()
}

fn parse_items(value: &serde_json::Value) -> Vec<ResearchHit> {
    let Some(items) = value.get("items").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    let field = |item: &serde_json::Value, key: &str| {
        item.get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .trim()
            .to_owned()
    };
    items
        .iter()
        .map(|item| ResearchHit {
            title: field(item, "title"),
            snippet: field(item, "snippet"),
            source: "Google Search".to_owned(),
            link: field(item, "link"),
        })
        .filter(|hit| !hit.title.is_empty())
        .collect()
}
