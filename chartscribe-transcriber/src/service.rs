//! Chart transcription service
//!
//! Composes the signature generator, dispatch queue, backoff retrier and
//! vision provider. The service never fails its caller: provider failures are
//! logged with their diagnostic fields and answered with the deterministic
//! stub.

use crate::cache::CacheGateway;
use crate::dispatch::{DispatchConfig, DispatchQueue};
use crate::provider::{stub_transcription, ChartSource, VisionProvider};
use crate::retry::{with_retry, DEFAULT_MAX_ATTEMPTS};
use crate::signature::chart_signature;
use chartscribe_common::Error;
use serde_json::Value;
use std::sync::Arc;

/// Upper bound on forwarded context length, capping outbound payload size
pub const MAX_CONTEXT_CHARS: usize = 500;

/// Transcription service: provider access behind the dispatch queue
pub struct TranscriptionService {
    provider: Arc<VisionProvider>,
    queue: DispatchQueue,
}

impl TranscriptionService {
    /// Create a service with the default queue configuration
    /// (sequential dispatch, 800ms spacing)
    pub fn new(provider: VisionProvider) -> Self {
        Self::with_queue(provider, DispatchQueue::new(DispatchConfig::default()))
    }

    /// Create a service sharing an existing dispatch queue
    pub fn with_queue(provider: VisionProvider, queue: DispatchQueue) -> Self {
        Self {
            provider: Arc::new(provider),
            queue,
        }
    }

    /// Model name recorded alongside transcriptions
    pub fn model(&self) -> String {
        self.provider.model().to_string()
    }

    /// Transcribe a chart. Always returns a usable string.
    ///
    /// The context is truncated before forwarding. With no provider
    /// configured the stub answers immediately, without a queue round-trip.
    /// Provider failures (after retries) are logged and answered with the
    /// stub as well.
    pub async fn transcribe(&self, chart: ChartSource, context: &str) -> String {
        let context = truncate_context(context, MAX_CONTEXT_CHARS);

        if self.provider.is_stub() {
            return stub_transcription(&context);
        }

        let provider = Arc::clone(&self.provider);
        let task_chart = chart;
        let task_context = context.clone();

        let handle = self.queue.enqueue(move || async move {
            with_retry("chart transcription", DEFAULT_MAX_ATTEMPTS, || {
                provider.transcribe(&task_chart, &task_context)
            })
            .await
        });

        match handle.settled().await {
            Ok(text) => text,
            Err(Error::Provider {
                message,
                status,
                code,
            }) => {
                tracing::error!(
                    message = %message,
                    status = ?status,
                    code = ?code,
                    "Chart transcription failed, falling back to stub"
                );
                stub_transcription(&context)
            }
            Err(err) => {
                tracing::error!(error = %err, "Chart transcription failed, falling back to stub");
                stub_transcription(&context)
            }
        }
    }
}

/// Truncate context to a character bound (never splits a code point)
fn truncate_context(context: &str, max_chars: usize) -> String {
    if context.chars().count() <= max_chars {
        context.to_string()
    } else {
        context.chars().take(max_chars).collect()
    }
}

/// One chart to transcribe
#[derive(Debug, Clone)]
pub struct ChartRequest {
    /// Correlation key: the chart's slot in a report (upsert key)
    pub chart_id: String,
    /// Chart data payload; drives the content signature
    pub data: Value,
    /// Rendered chart image, when one is available
    pub image_url: Option<String>,
    /// Report topic, forwarded as provider context only
    pub topic: Option<String>,
}

/// Result of a pipeline run
#[derive(Debug, Clone)]
pub struct Transcription {
    pub chart_id: String,
    pub signature: String,
    pub model: String,
    pub text: String,
    /// Whether the result is backed by a cache row (served from or written to)
    pub cached: bool,
}

/// Full pipeline: signature → cache consult → transcribe → upsert.
///
/// Cache problems are logged and never block the primary response; callers
/// always get a transcription back.
pub struct TranscriptionPipeline {
    service: TranscriptionService,
    cache: Option<CacheGateway>,
}

impl TranscriptionPipeline {
    pub fn new(service: TranscriptionService, cache: Option<CacheGateway>) -> Self {
        Self { service, cache }
    }

    pub async fn transcribe(&self, request: &ChartRequest) -> Transcription {
        let signature = chart_signature(Some(&request.data));
        let model = self.service.model();

        // Serve the cached row when it still matches this chart's content
        // and the configured model
        if let Some(cache) = &self.cache {
            match cache.get(&request.chart_id).await {
                Ok(Some(existing))
                    if existing.chart_signature == signature && existing.model == model =>
                {
                    tracing::debug!(chart_id = %request.chart_id, "Serving cached chart transcription");
                    return Transcription {
                        chart_id: request.chart_id.clone(),
                        signature,
                        model,
                        text: existing.transcription_text,
                        cached: true,
                    };
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(
                        chart_id = %request.chart_id,
                        error = %err,
                        "Cache lookup failed, transcribing without cache"
                    );
                }
            }
        }

        let chart = match &request.image_url {
            Some(url) => ChartSource::ImageUrl(url.clone()),
            None => ChartSource::Data(request.data.clone()),
        };
        let topic = request.topic.as_deref().unwrap_or("");

        let text = self.service.transcribe(chart, topic).await;

        let mut cached = false;
        if let Some(cache) = &self.cache {
            match cache
                .upsert(&request.chart_id, &signature, &model, &text)
                .await
            {
                Ok(()) => cached = true,
                Err(err) => {
                    tracing::warn!(
                        chart_id = %request.chart_id,
                        error = %err,
                        "Failed to cache chart transcription"
                    );
                }
            }
        }

        Transcription {
            chart_id: request.chart_id.clone(),
            signature,
            model,
            text,
            cached,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::OpenAiClient;
    use serde_json::json;

    fn stub_service() -> TranscriptionService {
        TranscriptionService::new(VisionProvider::Stub)
    }

    #[tokio::test]
    async fn credential_less_transcribe_returns_chart_analysis_stub() {
        let service = stub_service();

        let text = service
            .transcribe(ChartSource::Data(json!({"labels": ["Q1"]})), "Q3 revenue")
            .await;

        assert!(text.contains("Chart Analysis"));
        assert!(text.contains("Q3 revenue"));
    }

    #[tokio::test]
    async fn context_is_truncated_to_the_bound() {
        let service = stub_service();
        let long_context = "a".repeat(MAX_CONTEXT_CHARS + 100);

        let text = service
            .transcribe(ChartSource::Data(json!({})), &long_context)
            .await;

        assert!(text.contains(&"a".repeat(MAX_CONTEXT_CHARS)));
        assert!(!text.contains(&"a".repeat(MAX_CONTEXT_CHARS + 1)));
    }

    #[tokio::test]
    async fn unreachable_provider_falls_back_to_stub() {
        // Nothing listens on this port; the request fails fast with a
        // connection error, which is not rate-limit classified, so no
        // backoff is taken before the fallback.
        let client = OpenAiClient::new("sk-test".to_string(), "gpt-4o-mini".to_string())
            .with_base_url("http://127.0.0.1:9/v1");
        let service = TranscriptionService::new(VisionProvider::OpenAi(client));

        let text = service
            .transcribe(ChartSource::Data(json!({"labels": []})), "Q3 revenue")
            .await;

        assert!(text.contains("Chart Analysis"));
    }

    #[tokio::test]
    async fn pipeline_signature_ignores_topic() {
        let pipeline = TranscriptionPipeline::new(stub_service(), None);
        let data = json!({"type": "bar", "values": [1, 2, 3]});

        let a = pipeline
            .transcribe(&ChartRequest {
                chart_id: "report-1:chart-0".to_string(),
                data: data.clone(),
                image_url: None,
                topic: Some("Q3 revenue".to_string()),
            })
            .await;
        let b = pipeline
            .transcribe(&ChartRequest {
                chart_id: "report-2:chart-5".to_string(),
                data,
                image_url: None,
                topic: Some("enrollment by cohort".to_string()),
            })
            .await;

        assert_eq!(a.signature, b.signature);
    }

    #[tokio::test]
    async fn pipeline_without_cache_reports_uncached() {
        let pipeline = TranscriptionPipeline::new(stub_service(), None);

        let result = pipeline
            .transcribe(&ChartRequest {
                chart_id: "report-1:chart-0".to_string(),
                data: json!({"values": [1]}),
                image_url: None,
                topic: None,
            })
            .await;

        assert!(!result.cached);
        assert_eq!(result.model, "stub");
        assert!(result.text.contains("Chart Analysis"));
    }
}
