//! Vision provider client
//!
//! Calls the configured vision model to transcribe a rendered chart. When no
//! credential is configured the provider degrades to a deterministic stub so
//! the reporting pipeline stays functional in credential-less environments.

use chartscribe_common::{Error, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Upper bound on provider completion size
pub const MAX_COMPLETION_TOKENS: u32 = 300;

/// Fixed, minimal system prompt for chart transcription
const SYSTEM_PROMPT: &str = "You transcribe charts for reporting and accessibility. \
    Describe the chart type, axes, series, and notable values concisely.";

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Chart content forwarded to the vision model
#[derive(Debug, Clone)]
pub enum ChartSource {
    /// Rendered chart image (data URL or https URL)
    ImageUrl(String),
    /// Raw chart data, sent inline when no rendering is available
    Data(Value),
}

/// Vision provider, selected at construction from credential presence
pub enum VisionProvider {
    OpenAi(OpenAiClient),
    Stub,
}

impl VisionProvider {
    /// Select the provider from resolved settings.
    ///
    /// A present, non-blank API key selects the real client; anything else
    /// selects the stub.
    pub fn from_settings(api_key: Option<String>, model: String) -> Self {
        match api_key {
            Some(key) if !key.trim().is_empty() => Self::OpenAi(OpenAiClient::new(key, model)),
            _ => {
                tracing::warn!(
                    "No vision provider credential configured; chart transcription will use stub output"
                );
                Self::Stub
            }
        }
    }

    pub fn is_stub(&self) -> bool {
        matches!(self, Self::Stub)
    }

    /// Model name recorded alongside cached transcriptions
    pub fn model(&self) -> &str {
        match self {
            Self::OpenAi(client) => &client.model,
            Self::Stub => "stub",
        }
    }

    /// Transcribe a chart with the given (already truncated) context.
    ///
    /// # Errors
    /// Only the real provider can fail; the stub always succeeds.
    pub async fn transcribe(&self, chart: &ChartSource, context: &str) -> Result<String> {
        match self {
            Self::OpenAi(client) => client.transcribe(chart, context).await,
            Self::Stub => Ok(stub_transcription(context)),
        }
    }
}

/// Deterministic templated transcription used when the provider is
/// unconfigured or unavailable
pub fn stub_transcription(context: &str) -> String {
    if context.trim().is_empty() {
        "Chart Analysis: chart data is available, but no vision model is configured to transcribe it."
            .to_string()
    } else {
        format!(
            "Chart Analysis: a chart related to \"{}\". No vision model is configured to transcribe it.",
            context
        )
    }
}

/// OpenAI-compatible chat completions client
pub struct OpenAiClient {
    /// HTTP client with configured timeouts
    client: Client,
    /// Provider API key
    api_key: String,
    /// Model to request
    model: String,
    /// Base URL for the API (overridable for self-hosted gateways)
    base_url: String,
}

/// Chat completions response (only the fields this pipeline reads)
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
    code: Option<String>,
}

impl OpenAiClient {
    /// Create a new client.
    ///
    /// # Panics
    /// Panics if the HTTP client cannot be built (should not happen with
    /// valid config)
    pub fn new(api_key: String, model: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Override the API base URL (self-hosted gateways, tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Request a transcription for the chart.
    ///
    /// # Errors
    /// Returns `Error::Provider` carrying the HTTP status and, when the
    /// provider supplies one, its machine-readable error code. These are the
    /// fields the retrier classifies rate limits from.
    pub async fn transcribe(&self, chart: &ChartSource, context: &str) -> Result<String> {
        let user_content = match chart {
            ChartSource::ImageUrl(url) => json!([
                { "type": "text", "text": context },
                { "type": "image_url", "image_url": { "url": url } }
            ]),
            ChartSource::Data(data) => json!([
                {
                    "type": "text",
                    "text": format!("{}\n\nChart data (JSON):\n{}", context, data)
                }
            ]),
        };

        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user_content }
            ],
            "max_tokens": MAX_COMPLETION_TOKENS,
        });

        tracing::debug!(model = %self.model, "Requesting chart transcription");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Provider {
                message: format!("vision request failed: {}", e),
                status: None,
                code: None,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let (message, code) = parse_error_body(&body_text);
            return Err(Error::Provider {
                message: message
                    .unwrap_or_else(|| format!("vision provider returned status {}", status)),
                status: Some(status.as_u16()),
                code,
            });
        }

        let completion: ChatCompletionResponse =
            response.json().await.map_err(|e| Error::Provider {
                message: format!("failed to parse vision response: {}", e),
                status: None,
                code: None,
            })?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|text| text.trim().to_string())
            .ok_or_else(|| Error::Provider {
                message: "vision provider returned no completion".to_string(),
                status: None,
                code: None,
            })
    }
}

/// Extract the provider's error message and code from a failure body, when
/// the body is the usual `{"error": {...}}` shape
fn parse_error_body(body: &str) -> (Option<String>, Option<String>) {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody { error: Some(detail) }) => (detail.message, detail.code),
        _ => (None, None),
    }
}
