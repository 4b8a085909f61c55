//! Recognizer capability: submits a window to one external provider and
//! returns a normalized result or a typed failure.
//!
//! Grounded on the teacher's `#[async_trait]` capability-trait idiom
//! (`sonos/traits.rs`): a small trait implemented once per provider, no
//! reflection or dynamic dispatch beyond `Arc<dyn Recognizer>`.

pub mod acoustid;
pub mod audd;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::audio::wav::{repair_or_validate, WavFormat};
use crate::error::RecognizerError;

/// Stable identity of a recognized track within one provider's catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackIdentity {
    pub provider: String,
    pub provider_track_id: String,
}

/// A normalized positive match from a provider.
#[derive(Debug, Clone)]
pub struct RecognitionMatch {
    pub identity: TrackIdentity,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub isrc: Option<String>,
    pub artwork_url: Option<String>,
    pub confidence: f64,
    pub latency_ms: u64,
    pub raw_response: Value,
}

/// Typed failure kinds a [`Recognizer`] can return, per the header-repair
/// and provider-adapter contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidAudio,
    Timeout,
    Transport,
    RateLimited,
    ProviderError,
    Internal,
}

/// Result of one recognize call.
pub enum RecognitionOutcome {
    Match(RecognitionMatch),
    NoMatch { latency_ms: u64 },
    Error {
        kind: ErrorKind,
        message: String,
        latency_ms: u64,
    },
}

/// A single external music-recognition provider.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Stable identifier used as the provider column in the store and as
    /// the per-provider semaphore key.
    fn name(&self) -> &str;

    /// Submits `wav_bytes` (already header-validated/repaired by the
    /// caller) and returns a normalized outcome within `timeout`.
    async fn recognize(&self, wav_bytes: &[u8], timeout: Duration) -> RecognitionOutcome;
}

/// Applies the header-repair contract and, on success, calls through to the
/// concrete `submit` closure, converting transport/parse errors into the
/// normalized [`RecognitionOutcome`] shape. Shared by every HTTP-based
/// provider to avoid duplicating the validation/timeout/latency bookkeeping.
pub(crate) async fn recognize_with_repair<F, Fut>(
    payload: &[u8],
    expected_format: WavFormat,
    timeout: Duration,
    submit: F,
) -> RecognitionOutcome
where
    F: FnOnce(Vec<u8>) -> Fut,
    Fut: std::future::Future<Output = Result<Option<RecognitionMatch>, RecognizerError>>,
{
    let start = std::time::Instant::now();

    let wav = match repair_or_validate(payload, expected_format) {
        Ok(wav) => wav,
        Err(err) => {
            return RecognitionOutcome::Error {
                kind: ErrorKind::InvalidAudio,
                message: err.to_string(),
                latency_ms: start.elapsed().as_millis() as u64,
            }
        }
    };

    match tokio::time::timeout(timeout, submit(wav.to_vec())).await {
        Ok(Ok(Some(matched))) => RecognitionOutcome::Match(RecognitionMatch {
            latency_ms: start.elapsed().as_millis() as u64,
            ..matched
        }),
        Ok(Ok(None)) => RecognitionOutcome::NoMatch {
            latency_ms: start.elapsed().as_millis() as u64,
        },
        Ok(Err(err)) => RecognitionOutcome::Error {
            kind: error_kind_for(&err),
            message: err.to_string(),
            latency_ms: start.elapsed().as_millis() as u64,
        },
        Err(_) => RecognitionOutcome::Error {
            kind: ErrorKind::Timeout,
            message: "recognize call timed out".into(),
            latency_ms: start.elapsed().as_millis() as u64,
        },
    }
}

fn error_kind_for(err: &RecognizerError) -> ErrorKind {
    match err {
        RecognizerError::Http(e) if e.is_timeout() => ErrorKind::Timeout,
        RecognizerError::Http(_) => ErrorKind::Transport,
        RecognizerError::HttpStatus(429) => ErrorKind::RateLimited,
        RecognizerError::HttpStatus(_) => ErrorKind::ProviderError,
        RecognizerError::Parse(_) => ErrorKind::Internal,
        RecognizerError::Timeout => ErrorKind::Timeout,
    }
}
