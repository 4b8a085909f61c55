//! Row types returned by the embedded store.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Attributes supplied to [`crate::store::Store::upsert_track`].
#[derive(Debug, Clone)]
pub struct TrackAttrs {
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub isrc: Option<String>,
    pub artwork_url: Option<String>,
    pub metadata: Option<Value>,
}

/// Result of [`crate::store::Store::insert_play_idempotent`].
#[derive(Debug, Clone, Copy)]
pub struct PlayInsertResult {
    pub inserted: bool,
    pub play_id: i64,
}

/// Input to [`crate::store::Store::insert_recognition`].
#[derive(Debug, Clone)]
pub struct RecognitionInput {
    pub stream_id: i64,
    pub provider: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub recognized_at: DateTime<Utc>,
    pub track_id: Option<i64>,
    pub confidence: Option<f64>,
    pub latency_ms: i64,
    pub raw_response: Option<Value>,
    pub error_message: Option<String>,
}
