use std::time::Duration;

use anyhow::Context as _;

use crate::config::Config;

#[derive(Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(base_url: &str, api_key: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .context("build generative http client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Option<Self>> {
        match &config.gemini_api_key {
            Some(key) => Ok(Some(Self::new(&config.gemini_base_url, key.clone())?)),
            None => Ok(None),
        }
    }

    pub async fn generate(&self, model: &str, prompt: &str) -> anyhow::Result<String> {
        let endpoint = generate_endpoint(&self.base_url, model);
        let body = serde_json::json!({
            "contents": [
                { "role": "user", "parts": [ { "text": prompt } ] }
            ],
        });

        let response = self
            .client
            .post(&endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {endpoint}"))?;

        let status = response.status();
        let raw = response.text().await.context("read Gemini response body")?;
        if !status.is_success() {
            let message = parse_error_message(&raw).unwrap_or_else(|| raw.clone());
            anyhow::bail!("Gemini API error ({status}): {message}");
        }

        let value: serde_json::Value =
            serde_json::from_str(&raw).context("parse Gemini response")?;
        extract_candidate_text(&value).context("extract candidate text")
    }

    /// Probes both API versions and never fails: per-endpoint failures are
    /// embedded in the returned value so the listing stays usable as a
    /// diagnostic attachment.
    pub async fn list_models(&self) -> serde_json::Value {
        let (v1, v1beta) = tokio::join!(
            self.list_models_for_version("v1"),
            self.list_models_for_version("v1beta"),
        );
        serde_json::json!({ "v1": v1, "v1beta": v1beta })
    }

    async fn list_models_for_version(&self, version: &str) -> serde_json::Value {
        let endpoint = format!("{}/{version}/models", self.base_url);
        let response = match self
            .client
            .get(&endpoint)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                return serde_json::json!({ "error": format!("Could not list models: {err}") });
            }
        };

        let status = response.status().as_u16();
        let raw = match response.text().await {
            Ok(raw) => raw,
            Err(err) => {
                return serde_json::json!({ "error": format!("Could not list models: {err}") });
            }
        };

        match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(body) => serde_json::json!({ "status": status, "body": body }),
            Err(_) => serde_json::json!({ "status": status, "bodyText": raw }),
        }
    }
}

fn generate_endpoint(base_url: &str, model: &str) -> String {
    // Candidate lists carry fully-qualified names ("models/…"); tolerate the
    // short form so a bare GEMINI_MODEL override still resolves.
    let model = model.trim_start_matches('/');
    if model.starts_with("models/") {
        format!("{base_url}/v1beta/{model}:generateContent")
    } else {
        format!("{base_url}/v1beta/models/{model}:generateContent")
    }
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let message = value.get("error")?.get("message")?.as_str()?.to_owned();
    Some(message)
}

fn extract_candidate_text(value: &serde_json::Value) -> anyhow::Result<String> {
    let candidates = value
        .get("candidates")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow::anyhow!("missing `candidates` array in response"))?;

    let mut text = String::new();
    for candidate in candidates {
        let parts = match candidate
            .get("content")
            .and_then(|v| v.get("parts"))
            .and_then(|v| v.as_array())
        {
            Some(parts) => parts,
            None => continue,
        };
        for part in parts {
            let Some(part_text) = part.get("text").and_then(|v| v.as_str()) else {
                continue;
            };
            text.push_str(part_text);
        }
        if !text.trim().is_empty() {
            break;
        }
    }

    if text.trim().is_empty() {
        anyhow::bail!("Gemini candidate text is empty");
    }
    Ok(text)
}

pub async fn run_models() -> anyhow::Result<()> {
    let config = Config::from_env();
    let Some(client) = GeminiClient::from_config(&config)? else {
        anyhow::bail!("GEMINI_API_KEY is not set");
    };

    let listing = client.list_models().await;
    println!("{}", serde_json::to_string_pretty(&listing).context("render model listing")?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_endpoint_keeps_qualified_model_names() {
        assert_eq!(
            generate_endpoint("https://api.example", "models/gemini-2.5-flash"),
            "https://api.example/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn generate_endpoint_qualifies_short_model_names() {
        assert_eq!(
            generate_endpoint("https://api.example", "gemini-2.5-pro"),
            "https://api.example/v1beta/models/gemini-2.5-pro:generateContent"
        );
    }

    #[test]
    fn parse_error_message_reads_provider_shape() {
        let raw = r#"{"error":{"code":503,"message":"The model is overloaded.","status":"UNAVAILABLE"}}"#;
        assert_eq!(
            parse_error_message(raw).as_deref(),
            Some("The model is overloaded.")
        );
        assert_eq!(parse_error_message("not json"), None);
    }

    #[test]
    fn extract_candidate_text_concatenates_parts() {
        let value = serde_json::json!({
            "candidates": [
                { "content": { "parts": [ { "text": "Part one. " }, { "text": "Part two." } ] } }
            ]
        });
        assert_eq!(
            extract_candidate_text(&value).unwrap(),
            "Part one. Part two."
        );
    }

    #[test]
    fn extract_candidate_text_rejects_empty_candidates() {
        let value = serde_json::json!({ "candidates": [] });
        assert!(extract_candidate_text(&value).is_err());

        let value = serde_json::json!({ "candidates": [ { "content": { "parts": [] } } ] });
        assert!(extract_candidate_text(&value).is_err());
    }
}
