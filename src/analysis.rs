//! Report analysis through an OpenAI-compatible chat completions endpoint.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::debug;

use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::gateway::AnalysisGateway;
use crate::report::{Submission, format_submission};

const SYSTEM_PROMPT: &str = "You review weekly status reports written by team members. \
Summarise the week in two or three sentences, point out risks or blockers that need a \
manager's attention, and suggest one concrete improvement. Be brief and factual.";

/// HTTP analysis client.
pub struct HttpAnalysis {
    config: AnalysisConfig,
    client: reqwest::Client,
}

impl HttpAnalysis {
    pub fn new(config: AnalysisConfig) -> Result<Self, AnalysisError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AnalysisError::RequestFailed {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { config, client })
    }
}

#[derive(Deserialize)]
struct Message {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[async_trait]
impl AnalysisGateway for HttpAnalysis {
    async fn analyze(&self, submission: &Submission) -> Result<String, AnalysisError> {
        let body = serde_json::json!({
            "model": &self.config.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": format_submission(submission, None)}
            ],
            "temperature": 0.3
        });

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalysisError::RequestFailed {
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::RequestFailed {
                reason: format!("API error {status}: {body}"),
            });
        }

        let parsed: ChatResponse =
            response
                .json()
                .await
                .map_err(|e| AnalysisError::InvalidResponse {
                    reason: e.to_string(),
                })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AnalysisError::InvalidResponse {
                reason: "no choices returned".to_string(),
            })?;

        debug!(model = %self.config.model, chars = text.len(), "Analysis received");
        Ok(text)
    }
}

/// Used when no API key is configured.
pub struct DisabledAnalysis;

#[async_trait]
impl AnalysisGateway for DisabledAnalysis {
    async fn analyze(&self, _submission: &Submission) -> Result<String, AnalysisError> {
        Err(AnalysisError::Unavailable)
    }
}
