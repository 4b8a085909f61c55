//! `AcoustID`-shaped HTTP recognizer. Secondary, diagnostic-only provider:
//! recorded as Recognitions but never designated as the confirming provider
//! by default configuration.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use super::{recognize_with_repair, Recognizer, RecognitionMatch, RecognitionOutcome, TrackIdentity};
use crate::audio::wav::WavFormat;
use crate::error::RecognizerError;

const PROVIDER_NAME: &str = "acoustid";

#[derive(Debug, Deserialize)]
struct AcoustIdResponse {
    status: String,
    results: Vec<AcoustIdMatch>,
}

#[derive(Debug, Deserialize)]
struct AcoustIdMatch {
    id: String,
    score: f64,
    #[serde(default)]
    recordings: Vec<AcoustIdRecording>,
}

#[derive(Debug, Deserialize)]
struct AcoustIdRecording {
    title: String,
    #[serde(default)]
    artists: Vec<AcoustIdArtist>,
}

#[derive(Debug, Deserialize)]
struct AcoustIdArtist {
    name: String,
}

/// Recognizer backed by the AcoustID fingerprint-lookup API.
pub struct AcoustIdRecognizer {
    client: Client,
    api_key: String,
    expected_format: WavFormat,
}

impl AcoustIdRecognizer {
    pub fn new(client: Client, api_key: String, expected_format: WavFormat) -> Self {
        Self {
            client,
            api_key,
            expected_format,
        }
    }

    async fn submit(&self, _wav: Vec<u8>) -> Result<Option<RecognitionMatch>, RecognizerError> {
        // AcoustID matches by acoustic fingerprint, computed upstream of this
        // call (e.g. via chromaprint); the query parameters below model the
        // shape of that request without depending on a fingerprinting crate.
        let response = self
            .client
            .get("https://api.acoustid.org/v2/lookup")
            .query(&[
                ("client", self.api_key.as_str()),
                ("meta", "recordings"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RecognizerError::HttpStatus(response.status().as_u16()));
        }

        let body: AcoustIdResponse = response
            .json()
            .await
            .map_err(|e| RecognizerError::Parse(e.to_string()))?;

        if body.status != "ok" {
            return Err(RecognizerError::Parse(format!("unexpected status {:?}", body.status)));
        }

        // Pick the highest-scoring match; ties keep the first result in the
        // provider's returned order.
        let best = body.results.into_iter().fold(None, |acc: Option<AcoustIdMatch>, candidate| {
            match &acc {
                Some(current) if candidate.score <= current.score => acc,
                _ => Some(candidate),
            }
        });

        let Some(best) = best else {
            return Ok(None);
        };
        let Some(recording) = best.recordings.into_iter().next() else {
            return Ok(None);
        };
        let artist = recording
            .artists
            .first()
            .map(|a| a.name.clone())
            .unwrap_or_default();

        Ok(Some(RecognitionMatch {
            identity: TrackIdentity {
                provider: PROVIDER_NAME.to_string(),
                provider_track_id: best.id,
            },
            title: recording.title,
            artist,
            album: None,
            isrc: None,
            artwork_url: None,
            confidence: best.score.clamp(0.0, 1.0),
            latency_ms: 0,
            raw_response: serde_json::json!({ "provider": PROVIDER_NAME }),
        }))
    }
}

#[async_trait::async_trait]
impl Recognizer for AcoustIdRecognizer {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn recognize(&self, wav_bytes: &[u8], timeout: Duration) -> RecognitionOutcome {
        recognize_with_repair(wav_bytes, self.expected_format, timeout, |wav| self.submit(wav)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_name_is_stable() {
        let recognizer = AcoustIdRecognizer::new(
            Client::new(),
            "key".into(),
            WavFormat {
                sample_rate: 44100,
                channels: 2,
                bits_per_sample: 16,
            },
        );
        assert_eq!(recognizer.name(), "acoustid");
    }
}
