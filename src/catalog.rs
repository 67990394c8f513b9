use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;

pub const UNKNOWN_TITLE: &str = "Unknown title";
pub const UNKNOWN_AUTHOR: &str = "Unknown";

/// Ids with this prefix are eligible for the secondary-source fallback.
const SECONDARY_ID_PREFIX: &str = "OL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub authors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_image_url: Option<String>,
}

impl BookRecord {
    pub fn title_or_unknown(&self) -> &str {
        self.title.as_deref().unwrap_or(UNKNOWN_TITLE)
    }

    pub fn authors_or_unknown(&self) -> String {
        if self.authors.is_empty() {
            UNKNOWN_AUTHOR.to_string()
        } else {
            self.authors.join(", ")
        }
    }
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("no catalog source returned a usable record for {0:?}")]
    NotFound(String),
}

pub struct MetadataResolver {
    client: reqwest::Client,
    books_base_url: String,
    openlibrary_base_url: String,
    covers_base_url: String,
}

impl MetadataResolver {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("build catalog http client")?;
        Ok(Self {
            client,
            books_base_url: config.books_base_url.clone(),
            openlibrary_base_url: config.openlibrary_base_url.clone(),
            covers_base_url: config.covers_base_url.clone(),
        })
    }

    /// Primary catalog first; Open Library work then edition shapes for
    /// `OL…` ids. Transient transport failures at this layer are folded into
    /// the fallback path, never retried.
    pub async fn resolve(&self, id: &str) -> Result<BookRecord, MetadataError> {
        if let Some(record) = self.lookup_primary(id).await {
            return Ok(record);
        }

        if !id.starts_with(SECONDARY_ID_PREFIX) {
            return Err(MetadataError::NotFound(id.to_string()));
        }

        if let Some(record) = self.lookup_work(id).await {
            return Ok(record);
        }
        if let Some(record) = self.lookup_edition(id).await {
            return Ok(record);
        }

        Err(MetadataError::NotFound(id.to_string()))
    }

    async fn lookup_primary(&self, id: &str) -> Option<BookRecord> {
        let url = format!("{}/volumes/{id}", self.books_base_url);
        let volume: Volume = self.fetch_json(&url).await?;
        let info = volume.volume_info?;
        // A primary record is only usable when the nested info carries a title.
        info.title.as_ref()?;
        Some(record_from_volume_info(info))
    }

    async fn lookup_work(&self, id: &str) -> Option<BookRecord> {
        let url = format!("{}/works/{id}.json", self.openlibrary_base_url);
        let work: WorkDoc = self.fetch_json(&url).await?;

        let author_keys: Vec<String> = work
            .authors
            .unwrap_or_default()
            .iter()
            .filter_map(author_key)
            .collect();
        let authors = self.resolve_author_names(author_keys).await;

        Some(BookRecord {
            title: work.title,
            authors,
            cover_image_url: first_cover(&work.covers)
                .map(|cover| cover_url(&self.covers_base_url, cover, "L")),
        })
    }

    async fn lookup_edition(&self, id: &str) -> Option<BookRecord> {
        let url = format!("{}/books/{id}.json", self.openlibrary_base_url);
        let edition: EditionDoc = self.fetch_json(&url).await?;

        let authors = edition
            .authors
            .unwrap_or_default()
            .into_iter()
            .filter_map(|author| author.name)
            .collect();

        Some(BookRecord {
            title: edition.title,
            authors,
            cover_image_url: first_cover(&edition.covers)
                .map(|cover| cover_url(&self.covers_base_url, cover, "M")),
        })
    }

    /// Fan-out author lookups concurrently, preserving input order. A failed
    /// lookup drops that author only.
    async fn resolve_author_names(&self, keys: Vec<String>) -> Vec<String> {
        let mut join_set = tokio::task::JoinSet::new();
        let total = keys.len();
        for (idx, key) in keys.into_iter().enumerate() {
            let client = self.client.clone();
            let url = format!("{}{}.json", self.openlibrary_base_url, key);
            join_set.spawn(async move { (idx, fetch_author_name(&client, &url).await) });
        }

        let mut names: Vec<Option<String>> = vec![None; total];
        while let Some(joined) = join_set.join_next().await {
            let Ok((idx, name)) = joined else {
                continue;
            };
            names[idx] = name;
        }
        names.into_iter().flatten().collect()
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Option<T> {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!(url, error = %err, "catalog request failed");
                return None;
            }
        };
        if !response.status().is_success() {
            tracing::debug!(url, status = %response.status(), "catalog request returned non-success");
            return None;
        }
        match response.json::<T>().await {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::debug!(url, error = %err, "catalog response was not parseable");
                None
            }
        }
    }
}

async fn fetch_author_name(client: &reqwest::Client, url: &str) -> Option<String> {
    let response = match client.get(url).send().await {
        Ok(response) => response,
        Err(err) => {
            tracing::debug!(url, error = %err, "author lookup failed");
            return None;
        }
    };
    if !response.status().is_success() {
        return None;
    }
    let author: AuthorDoc = response.json().await.ok()?;
    author.name
}

pub(crate) fn record_from_volume_info(info: VolumeInfo) -> BookRecord {
    BookRecord {
        title: info.title,
        authors: info.authors.unwrap_or_default(),
        cover_image_url: info.image_links.and_then(|links| links.thumbnail),
    }
}

pub(crate) fn cover_url(covers_base_url: &str, cover_id: i64, variant: &str) -> String {
    format!("{covers_base_url}/b/id/{cover_id}-{variant}.jpg")
}

fn first_cover(covers: &Option<Vec<i64>>) -> Option<i64> {
    covers.as_ref().and_then(|covers| covers.first().copied())
}

/// Work author references come in three shapes: `{"author": {"key": …}}`,
/// `{"key": …}`, or a bare key string.
fn author_key(value: &serde_json::Value) -> Option<String> {
    value
        .pointer("/author/key")
        .or_else(|| value.get("key"))
        .and_then(|v| v.as_str())
        .or_else(|| value.as_str())
        .map(|key| key.to_string())
}

#[derive(Debug, Deserialize)]
pub(crate) struct Volume {
    #[serde(rename = "volumeInfo")]
    pub(crate) volume_info: Option<VolumeInfo>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VolumeInfo {
    pub(crate) title: Option<String>,
    pub(crate) authors: Option<Vec<String>>,
    #[serde(rename = "imageLinks")]
    pub(crate) image_links: Option<ImageLinks>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ImageLinks {
    pub(crate) thumbnail: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorkDoc {
    title: Option<String>,
    covers: Option<Vec<i64>>,
    authors: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct EditionDoc {
    title: Option<String>,
    covers: Option<Vec<i64>>,
    authors: Option<Vec<EditionAuthor>>,
}

#[derive(Debug, Deserialize)]
struct EditionAuthor {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthorDoc {
    name: Option<String>,
}
