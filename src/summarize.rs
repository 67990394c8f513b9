use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{BookRecord, MetadataError, MetadataResolver};
use crate::cli::SummarizeArgs;
use crate::config::Config;
use crate::gemini::GeminiClient;

/// Alternates tried, in order, after the configured default model.
const FALLBACK_MODELS: [&str; 4] = [
    "models/gemini-2.5-pro",
    "models/gemini-2.5-flash-lite",
    "models/gemini-2.0-flash",
    "models/gemini-flash-latest",
];

const MAX_ATTEMPTS_PER_MODEL: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SummaryMode {
    Short,
    Medium,
    Long,
    Insights,
}

impl SummaryMode {
    pub fn page_target(self) -> u32 {
        match self {
            SummaryMode::Short => 5,
            SummaryMode::Medium => 10,
            SummaryMode::Long => 20,
            // Conceptual only; the insights prompt does not mention pages.
            SummaryMode::Insights => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub text: String,
    pub model: String,
    pub attempt: u32,
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("Could not fetch book info")]
    BookNotFound,
    #[error("GEMINI_API_KEY is not set in environment")]
    ConfigMissing,
    #[error("All models failed after retries")]
    AllModelsFailed {
        attempted: Vec<String>,
        errors: BTreeMap<String, String>,
        models: serde_json::Value,
    },
}

#[async_trait]
pub trait BookResolver: Send + Sync {
    async fn resolve(&self, id: &str) -> Result<BookRecord, MetadataError>;
}

#[async_trait]
impl BookResolver for MetadataResolver {
    async fn resolve(&self, id: &str) -> Result<BookRecord, MetadataError> {
        MetadataResolver::resolve(self, id).await
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, model: &str, prompt: &str) -> anyhow::Result<String>;
    async fn list_models(&self) -> serde_json::Value;
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, model: &str, prompt: &str) -> anyhow::Result<String> {
        GeminiClient::generate(self, model, prompt).await
    }

    async fn list_models(&self) -> serde_json::Value {
        GeminiClient::list_models(self).await
    }
}

pub struct SummaryOrchestrator {
    resolver: Arc<dyn BookResolver>,
    generator: Option<Arc<dyn TextGenerator>>,
    default_model: String,
}

impl SummaryOrchestrator {
    pub fn new(
        resolver: Arc<dyn BookResolver>,
        generator: Option<Arc<dyn TextGenerator>>,
        default_model: String,
    ) -> Self {
        Self {
            resolver,
            generator,
            default_model,
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let resolver: Arc<dyn BookResolver> = Arc::new(MetadataResolver::from_config(config)?);
        let generator = GeminiClient::from_config(config)?
            .map(|client| Arc::new(client) as Arc<dyn TextGenerator>);
        Ok(Self::new(resolver, generator, config.default_model.clone()))
    }

    pub fn candidate_models(&self) -> Vec<String> {
        std::iter::once(self.default_model.clone())
            .chain(FALLBACK_MODELS.iter().map(|model| model.to_string()))
            .collect()
    }

    /// Sequential model fallback: up to 3 attempts per model with exponential
    /// backoff for transient errors, immediate move to the next candidate on a
    /// permanent error, first success wins.
    pub async fn generate(&self, id: &str, mode: SummaryMode) -> Result<Summary, GenerateError> {
        let record = self
            .resolver
            .resolve(id)
            .await
            .map_err(|MetadataError::NotFound(_)| GenerateError::BookNotFound)?;
        let prompt = build_prompt(&record, mode);

        let Some(generator) = &self.generator else {
            return Err(GenerateError::ConfigMissing);
        };

        let candidates = self.candidate_models();
        let mut errors = BTreeMap::new();

        for model in &candidates {
            let mut attempt = 0u32;
            while attempt < MAX_ATTEMPTS_PER_MODEL {
                attempt += 1;
                match generator.generate(model, &prompt).await {
                    Ok(text) => {
                        tracing::info!(model, attempt, "summary generated");
                        return Ok(Summary {
                            text,
                            model: model.clone(),
                            attempt,
                        });
                    }
                    Err(err) => {
                        let message = format!("{err:#}");
                        errors.insert(format!("{model}@{attempt}"), message.clone());
                        if !is_transient(&message) {
                            tracing::warn!(
                                model,
                                attempt,
                                error = %message,
                                "permanent generation error; moving to next model"
                            );
                            break;
                        }
                        let delay = backoff_delay(attempt);
                        tracing::warn!(
                            model,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %message,
                            "transient generation error; backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        // Best-effort diagnostics; listing failures are embedded, not raised.
        let models = generator.list_models().await;
        Err(GenerateError::AllModelsFailed {
            attempted: candidates,
            errors,
            models,
        })
    }
}

pub fn build_prompt(record: &BookRecord, mode: SummaryMode) -> String {
    let title = record.title_or_unknown();
    let author = record.authors_or_unknown();

    if mode == SummaryMode::Insights {
        return format!(
            "You are an expert summarizer. Produce 8-12 concise insights for the book \
\"{title}\" by {author}. Format the output as numbered or bulleted items. For each \
insight include a short heading (3-6 words) followed by 1-2 short sentences explaining \
the insight and why it matters. Keep each item skimmable and actionable; use simple \
language and include a brief concrete example where helpful."
        );
    }

    format!(
        "Generate a {pages}-page detailed book summary.\n\nTitle: {title}\nAuthor: {author}\n\n\
Include:\n- Chapter breakdown\n- Key ideas\n- Major themes\n- Important lessons\n\
- Quotes (if known)\n- Real examples and explanations",
        pages = mode.page_target()
    )
}

/// Case-insensitive substring classification: service-unavailable, timeout,
/// connection-reset, and name-resolution failures are worth retrying;
/// everything else is permanent for the current model.
pub fn is_transient(message: &str) -> bool {
    const TRANSIENT_PATTERNS: [&str; 6] = [
        "503",
        "service unavailable",
        "timed out",
        "timeout",
        "connection reset",
        "failed to lookup address",
    ];
    let lower = message.to_ascii_lowercase();
    TRANSIENT_PATTERNS
        .iter()
        .any(|pattern| lower.contains(pattern))
}

pub fn backoff_delay(attempt: u32) -> Duration {
    BACKOFF_BASE * 2u32.saturating_pow(attempt.saturating_sub(1))
}

pub async fn run(args: SummarizeArgs) -> anyhow::Result<()> {
    let config = Config::from_env();
    let orchestrator = SummaryOrchestrator::from_config(&config)?;

    match orchestrator.generate(&args.id, args.mode).await {
        Ok(summary) => {
            tracing::info!(model = %summary.model, attempt = summary.attempt, "summary ready");
            println!("{}", summary.text);
            Ok(())
        }
        Err(GenerateError::AllModelsFailed {
            attempted, errors, ..
        }) => {
            tracing::error!(attempted = ?attempted, "all candidate models failed");
            for (key, message) in &errors {
                tracing::error!(attempt = %key, error = %message, "model attempt failed");
            }
            anyhow::bail!("All models failed after retries")
        }
        Err(err) => Err(err.into()),
    }
}
