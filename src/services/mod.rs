// src/services/mod.rs
//! Capabilities the pipeline needs from the outside world.
//!
//! Clients are injected as trait objects so batches can run against
//! in-memory doubles.

use async_trait::async_trait;
use std::path::Path;

use crate::error::{PipelineResult, ServiceError};
use crate::types::Transcript;

pub mod retry;

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` with `voice`, returning encoded audio bytes (MP3).
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, ServiceError>;

    fn name(&self) -> &'static str;
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_path: &Path) -> Result<Transcript, ServiceError>;
}

/// Measures the duration of an audio file.
#[async_trait]
pub trait AudioProbe: Send + Sync {
    async fn duration(&self, audio_path: &Path) -> PipelineResult<f64>;
}

/// Classify an HTTP failure from a speech service.
///
/// 429 and 5xx are throttling unless the body names a hard cap; 401/403 only
/// count as quota when the body says so.
pub fn classify_http_failure(status: u16, body: &str) -> ServiceError {
    let detail = format!("HTTP {}: {}", status, truncate(body, 300));
    let hard_cap = mentions_hard_cap(body);
    match status {
        429 | 500 | 502 | 503 | 504 if hard_cap => ServiceError::QuotaExceeded(detail),
        429 | 500 | 502 | 503 | 504 => ServiceError::RateLimited(detail),
        401 | 403 if hard_cap => ServiceError::QuotaExceeded(detail),
        _ => ServiceError::Failed(detail),
    }
}

fn mentions_hard_cap(body: &str) -> bool {
    let lower = body.to_lowercase();
    ["quota_exceeded", "quota exceeded", "per day", "daily", "billing", "insufficient_quota"]
        .iter()
        .any(|needle| lower.contains(needle))
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

/// Network failures (timeouts, resets) are worth retrying.
pub fn classify_transport_error(err: &reqwest::Error) -> ServiceError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        ServiceError::RateLimited(format!("transport: {}", err))
    } else {
        ServiceError::Failed(format!("transport: {}", err))
    }
}
