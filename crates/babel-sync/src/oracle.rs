use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::OracleError;

/// Best-effort text translation. Output may be empty or identical to the
/// input; callers treat both as valid answers.
#[async_trait]
pub trait TranslationOracle: Send + Sync {
    async fn translate(&self, text: &str, source: &str, target: &str) -> Result<String, OracleError>;
}

const GENERATION_API_VERSION: &str = "2025-02-11";

/// Upper bound on one generation request, connect to last byte.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct WatsonxConfig {
    pub base_url: String,
    pub api_key: String,
    pub project_id: String,
    pub model_id: String,
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl WatsonxConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            project_id: project_id.into(),
            model_id: "ibm/granite-3-2-8b-instruct".into(),
            max_new_tokens: 60,
            temperature: 0.2,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Translation through an instruction-tuned model on IBM watsonx.
pub struct WatsonxOracle {
    client: reqwest::Client,
    config: WatsonxConfig,
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    results: Vec<GenerationResult>,
}

#[derive(Debug, Deserialize)]
struct GenerationResult {
    #[serde(default)]
    generated_text: String,
}

impl WatsonxOracle {
    /// A request that outlives `config.timeout` fails with
    /// [`OracleError::Http`], so a stalled model only costs its own target.
    pub fn new(config: WatsonxConfig) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/ml/v1/text/generate?version={}",
            self.config.base_url.trim_end_matches('/'),
            GENERATION_API_VERSION
        )
    }
}

fn prompt(text: &str, source: &str, target: &str) -> String {
    format!("Translate the following text from {} to {}: \"{}\"", source, target, text)
}

/// First generation, trimmed. A response without results is an empty answer.
fn generated_text(response: GenerationResponse) -> String {
    response
        .results
        .into_iter()
        .next()
        .map(|r| r.generated_text.trim().to_string())
        .unwrap_or_default()
}

#[async_trait]
impl TranslationOracle for WatsonxOracle {
    async fn translate(&self, text: &str, source: &str, target: &str) -> Result<String, OracleError> {
        let body = serde_json::json!({
            "model_id": self.config.model_id,
            "input": prompt(text, source, target),
            "parameters": {
                "max_new_tokens": self.config.max_new_tokens,
                "temperature": self.config.temperature,
            },
            "project_id": self.config.project_id,
        });

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let generated = generated_text(response.json::<GenerationResponse>().await?);
        debug!("watsonx {} -> {}: {:?}", source, target, generated);
        Ok(generated)
    }
}
