//! Chart transcription pipeline
//!
//! The systems core of the ChartScribe reporting backend:
//! - Content signatures for chart data (cache identity)
//! - Rate-limited dispatch of outbound vision model calls
//! - Bounded exponential-backoff retry on rate limits
//! - Transcription service with stub fallback
//! - Content-addressed transcription cache
//! - Cache write-access self-heal check

pub mod cache;
pub mod dispatch;
pub mod provider;
pub mod retry;
pub mod selfheal;
pub mod service;
pub mod signature;

pub use cache::CacheGateway;
pub use dispatch::{DispatchConfig, DispatchHandle, DispatchQueue};
pub use provider::{ChartSource, OpenAiClient, VisionProvider};
pub use retry::with_retry;
pub use selfheal::{PermissionCheck, PermissionStatus, SelfHealOutcome};
pub use service::{ChartRequest, Transcription, TranscriptionPipeline, TranscriptionService};
pub use signature::chart_signature;
