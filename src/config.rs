use std::time::Duration;

pub const DEFAULT_BOOKS_BASE_URL: &str = "https://www.googleapis.com/books/v1";
pub const DEFAULT_OPENLIBRARY_BASE_URL: &str = "https://openlibrary.org";
pub const DEFAULT_COVERS_BASE_URL: &str = "https://covers.openlibrary.org";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash";

const DEFAULT_SEARCH_CACHE_TTL: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct Config {
    /// Primary search credential. Absent means search routes to Open Library.
    pub books_api_key: Option<String>,
    /// Generative-AI credential. Absent is fatal for generation only.
    pub gemini_api_key: Option<String>,
    /// First candidate in the model fallback list.
    pub default_model: String,

    pub books_base_url: String,
    pub openlibrary_base_url: String,
    pub covers_base_url: String,
    pub gemini_base_url: String,

    pub search_cache_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let search_cache_ttl = non_empty("BOOKBRIEF_SEARCH_CACHE_TTL_SECS")
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|secs| (1..=3600).contains(secs))
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_SEARCH_CACHE_TTL);

        Self {
            books_api_key: non_empty("GOOGLE_BOOKS_API_KEY"),
            gemini_api_key: non_empty("GEMINI_API_KEY"),
            default_model: non_empty("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            books_base_url: base_url_or_default(
                non_empty("BOOKBRIEF_BOOKS_BASE_URL"),
                DEFAULT_BOOKS_BASE_URL,
            ),
            openlibrary_base_url: base_url_or_default(
                non_empty("BOOKBRIEF_OPENLIBRARY_BASE_URL"),
                DEFAULT_OPENLIBRARY_BASE_URL,
            ),
            covers_base_url: base_url_or_default(
                non_empty("BOOKBRIEF_COVERS_BASE_URL"),
                DEFAULT_COVERS_BASE_URL,
            ),
            gemini_base_url: base_url_or_default(
                non_empty("BOOKBRIEF_GEMINI_BASE_URL"),
                DEFAULT_GEMINI_BASE_URL,
            ),
            search_cache_ttl,
        }
    }
}

fn base_url_or_default(raw: Option<String>, default: &str) -> String {
    let Some(raw) = raw else {
        return default.to_string();
    };
    let trimmed = raw.trim_end_matches('/').to_string();
    match url::Url::parse(&trimmed) {
        Ok(_) => trimmed,
        Err(err) => {
            tracing::warn!(url = %raw, error = %err, "ignoring invalid base URL override");
            default.to_string()
        }
    }
}
