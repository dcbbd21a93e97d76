//! Gemini-backed detail extractor. Asks for JSON matching
//! `ExtractedDetails` and tolerates the usual LLM response wrappers
//! (markdown fences, stray prose around the object).

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::DetailExtractorError;
use crate::traits::{DetailExtractor, ExtractHints, ExtractedDetails};

const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const REQUEST_DEADLINE: Duration = Duration::from_secs(60);

pub struct GeminiExtractor {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl GeminiExtractor {
    pub fn new(api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!(
                "https://generativelanguage.googleapis.com/v1beta/models/{DEFAULT_MODEL}:generateContent"
            ),
            api_key: api_key.to_string(),
        }
    }

    /// Point the client at a different endpoint (tests).
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    fn build_prompt(text: &str, hints: &ExtractHints) -> String {
        let date = hints
            .date_start
            .map(|d| d.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        format!(
            "You are reading the website of an endurance ride. Extract logistics \
             for THIS event only.\n\
             Event: {name}\nLocation: {location}\nStart date: {date}\n\n\
             Return a single JSON object with these keys (omit a key when the \
             page says nothing about it):\n\
             - directions: string, driving directions to ride camp\n\
             - amenities: array of strings, camp amenities\n\
             - hazards: array of strings, trail hazards or cautions\n\
             - veterinarians: array of strings, named vets or control staff\n\
             - entry_fees: string\n\
             - awards: string\n\
             - camping: string\n\n\
             Page text:\n---\n{text}",
            name = hints.event_name,
            location = hints.location.as_deref().unwrap_or("unknown"),
        )
    }
}

#[async_trait]
impl DetailExtractor for GeminiExtractor {
    async fn extract(
        &self,
        text: &str,
        hints: &ExtractHints,
    ) -> Result<ExtractedDetails, DetailExtractorError> {
        info!(event = %hints.event_name, bytes = text.len(), "extracting details");

        let body = serde_json::json!({
            "contents": [{
                "parts": [{"text": Self::build_prompt(text, hints)}]
            }],
            "generationConfig": {
                "temperature": 0.0,
                "responseMimeType": "application/json"
            }
        });

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", &self.api_key)])
            .json(&body)
            .timeout(REQUEST_DEADLINE)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DetailExtractorError::Timeout
                } else {
                    DetailExtractorError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(DetailExtractorError::Transport(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(DetailExtractorError::Provider(format!("HTTP {status}")));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| DetailExtractorError::Transport(e.to_string()))?;

        let answer = data["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .ok_or_else(|| {
                DetailExtractorError::Malformed("no text part in response".to_string())
            })?;

        let details: ExtractedDetails = serde_json::from_str(strip_fences(answer))
            .map_err(|e| {
                warn!(event = %hints.event_name, error = %e, "extractor returned unparseable JSON");
                DetailExtractorError::Malformed(e.to_string())
            })?;

        Ok(details)
    }
}

/// Strip a ```json ... ``` wrapper if the model added one.
fn strip_fences(answer: &str) -> &str {
    let trimmed = answer.trim();
    let Some(without_open) = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
    else {
        return trimmed;
    };
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}
