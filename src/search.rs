use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::catalog::cover_url;
use crate::cli::SearchArgs;
use crate::config::Config;

const DEFAULT_CACHE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchItem {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub total_count: u64,
    pub items: Vec<SearchItem>,
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("search request failed: {0}")]
    Transport(String),
}

pub struct SearchProxy {
    client: reqwest::Client,
    books_base_url: String,
    openlibrary_base_url: String,
    covers_base_url: String,
    books_api_key: Option<String>,
    cache: ResponseCache,
}

impl SearchProxy {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("build search http client")?;
        Ok(Self {
            client,
            books_base_url: config.books_base_url.clone(),
            openlibrary_base_url: config.openlibrary_base_url.clone(),
            covers_base_url: config.covers_base_url.clone(),
            books_api_key: config.books_api_key.clone(),
            cache: ResponseCache::new(config.search_cache_ttl, DEFAULT_CACHE_CAPACITY),
        })
    }

    /// Cache first, then route by credential: the primary provider when a key
    /// is configured, Open Library otherwise. A primary transport failure is
    /// surfaced, not re-routed to the secondary provider.
    pub async fn search(&self, query: &str, limit: u32) -> Result<SearchResponse, SearchError> {
        let key = CacheKey {
            query: query.to_string(),
            limit,
        };
        if let Some(hit) = self.cache.get(&key).await {
            tracing::debug!(query, limit, "search cache hit");
            return Ok(hit);
        }

        let response = match &self.books_api_key {
            Some(api_key) => self.search_primary(query, limit, api_key).await?,
            None => {
                tracing::warn!("GOOGLE_BOOKS_API_KEY not set; routing search to Open Library");
                self.search_secondary(query, limit).await?
            }
        };

        self.cache.insert(key, response.clone()).await;
        Ok(response)
    }

    async fn search_primary(
        &self,
        query: &str,
        limit: u32,
        api_key: &str,
    ) -> Result<SearchResponse, SearchError> {
        let endpoint = format!("{}/volumes", self.books_base_url);
        let response = self
            .client
            .get(&endpoint)
            .query(&[
                ("q", query),
                ("maxResults", &limit.to_string()),
                ("key", api_key),
            ])
            .send()
            .await
            .map_err(|err| SearchError::Transport(format!("GET {endpoint}: {err}")))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|err| SearchError::Transport(format!("read search response body: {err}")))?;

        if !status.is_success() {
            return Err(SearchError::Upstream {
                status: status.as_u16(),
                message: upstream_error_message(&raw),
            });
        }

        let page: VolumesPage = serde_json::from_str(&raw)
            .map_err(|err| SearchError::Transport(format!("parse search response: {err}")))?;

        let items = page
            .items
            .unwrap_or_default()
            .into_iter()
            .map(|volume| {
                let info = volume.volume_info;
                SearchItem {
                    id: volume.id,
                    title: info.as_ref().and_then(|info| info.title.clone()),
                    authors: info
                        .as_ref()
                        .and_then(|info| info.authors.clone())
                        .unwrap_or_default(),
                    cover_image_url: info
                        .and_then(|info| info.image_links)
                        .and_then(|links| links.thumbnail),
                }
            })
            .collect::<Vec<_>>();

        Ok(SearchResponse {
            total_count: page.total_items.unwrap_or(items.len() as u64),
            items,
        })
    }

    async fn search_secondary(&self, query: &str, limit: u32) -> Result<SearchResponse, SearchError> {
        let endpoint = format!("{}/search.json", self.openlibrary_base_url);
        let response = self
            .client
            .get(&endpoint)
            .query(&[("q", query), ("limit", &limit.to_string())])
            .send()
            .await
            .map_err(|err| SearchError::Transport(format!("GET {endpoint}: {err}")))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|err| SearchError::Transport(format!("read search response body: {err}")))?;

        if !status.is_success() {
            return Err(SearchError::Upstream {
                status: status.as_u16(),
                message: upstream_error_message(&raw),
            });
        }

        let page: OpenLibraryPage = serde_json::from_str(&raw)
            .map_err(|err| SearchError::Transport(format!("parse search response: {err}")))?;

        let items = page
            .docs
            .unwrap_or_default()
            .into_iter()
            .filter_map(|doc| {
                let id = normalize_search_key(doc.key.as_deref()?);
                if id.is_empty() {
                    return None;
                }
                Some(SearchItem {
                    id,
                    title: doc.title,
                    authors: doc.author_name.unwrap_or_default(),
                    cover_image_url: doc
                        .cover_i
                        .map(|cover| cover_url(&self.covers_base_url, cover, "M")),
                })
            })
            .collect::<Vec<_>>();

        Ok(SearchResponse {
            total_count: page.num_found.unwrap_or(items.len() as u64),
            items,
        })
    }
}

/// Open Library keys are hierarchical ("/works/OL123W"); flatten to the last
/// path segment so the id round-trips through the metadata resolver's
/// secondary-id path. A trailing separator falls back to the cleaned key.
pub fn normalize_search_key(raw: &str) -> String {
    let cleaned = raw.trim_start_matches('/');
    match cleaned.rsplit('/').next() {
        Some(last) if !last.is_empty() => last.to_string(),
        _ => cleaned.to_string(),
    }
}

fn upstream_error_message(raw: &str) -> String {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .or_else(|| value.get("error"))
                .and_then(|v| v.as_str())
                .map(|message| message.to_string())
        })
        .unwrap_or_else(|| "search provider returned an error".to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub query: String,
    pub limit: u32,
}

struct CacheEntry {
    inserted_at: Instant,
    response: SearchResponse,
}

/// TTL response cache. Expired entries are dropped on read; once the map
/// reaches capacity an insert sweeps all expired entries first.
pub struct ResponseCache {
    ttl: Duration,
    capacity: usize,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    async fn get(&self, key: &CacheKey) -> Option<SearchResponse> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get(key)?;
        if entry.inserted_at.elapsed() >= self.ttl {
            entries.remove(key);
            return None;
        }
        Some(entry.response.clone())
    }

    async fn insert(&self, key: CacheKey, response: SearchResponse) {
        let mut entries = self.entries.lock().await;
        if entries.len() >= self.capacity {
            let ttl = self.ttl;
            entries.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
            if entries.len() >= self.capacity {
                tracing::debug!(len = entries.len(), "search cache full of fresh entries");
            }
        }
        entries.insert(
            key,
            CacheEntry {
                inserted_at: Instant::now(),
                response,
            },
        );
    }
}

#[derive(Debug, Deserialize)]
struct VolumesPage {
    #[serde(rename = "totalItems")]
    total_items: Option<u64>,
    items: Option<Vec<VolumeSummary>>,
}

#[derive(Debug, Deserialize)]
struct VolumeSummary {
    id: String,
    #[serde(rename = "volumeInfo")]
    volume_info: Option<crate::catalog::VolumeInfo>,
}

#[derive(Debug, Deserialize)]
struct OpenLibraryPage {
    #[serde(rename = "numFound")]
    num_found: Option<u64>,
    docs: Option<Vec<OpenLibraryDoc>>,
}

#[derive(Debug, Deserialize)]
struct OpenLibraryDoc {
    key: Option<String>,
    title: Option<String>,
    author_name: Option<Vec<String>>,
    cover_i: Option<i64>,
}

pub async fn run(args: SearchArgs) -> anyhow::Result<()> {
    let config = Config::from_env();
    let proxy = SearchProxy::from_config(&config)?;

    let response = proxy
        .search(&args.query, args.limit)
        .await
        .map_err(|err| anyhow::anyhow!("{err}"))?;

    tracing::info!(
        total = response.total_count,
        returned = response.items.len(),
        "search completed"
    );
    for item in &response.items {
        println!(
            "{}  {}  by {}",
            item.id,
            item.title.as_deref().unwrap_or(crate::catalog::UNKNOWN_TITLE),
            if item.authors.is_empty() {
                crate::catalog::UNKNOWN_AUTHOR.to_string()
            } else {
                item.authors.join(", ")
            }
        );
    }
    Ok(())
}
