//! `AudD`-shaped HTTP recognizer. Default designated confirming provider.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;

use super::{recognize_with_repair, ErrorKind, Recognizer, RecognitionMatch, RecognitionOutcome, TrackIdentity};
use crate::audio::wav::WavFormat;
use crate::error::RecognizerError;

const PROVIDER_NAME: &str = "audd";

#[derive(Debug, Deserialize)]
struct AuddResponse {
    status: String,
    result: Option<AuddResult>,
}

#[derive(Debug, Deserialize)]
struct AuddResult {
    artist: String,
    title: String,
    album: Option<String>,
    #[serde(default)]
    isrc: Option<String>,
    #[serde(default)]
    song_link: Option<String>,
}

/// Recognizer backed by the AudD audio-fingerprinting API.
pub struct AudDRecognizer {
    client: Client,
    api_token: String,
    expected_format: WavFormat,
}

impl AudDRecognizer {
    pub fn new(client: Client, api_token: String, expected_format: WavFormat) -> Self {
        Self {
            client,
            api_token,
            expected_format,
        }
    }

    async fn submit(&self, wav: Vec<u8>) -> Result<Option<RecognitionMatch>, RecognizerError> {
        let form = Form::new()
            .text("api_token", self.api_token.clone())
            .text("return", "apple_music,spotify")
            .part("file", Part::bytes(wav).file_name("window.wav"));

        let response = self
            .client
            .post("https://api.audd.io/")
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RecognizerError::HttpStatus(response.status().as_u16()));
        }

        let body: AuddResponse = response
            .json()
            .await
            .map_err(|e| RecognizerError::Parse(e.to_string()))?;

        if body.status != "success" {
            return Err(RecognizerError::Parse(format!("unexpected status {:?}", body.status)));
        }

        let Some(result) = body.result else {
            return Ok(None);
        };

        let provider_track_id = result
            .isrc
            .clone()
            .unwrap_or_else(|| format!("{}::{}", result.artist, result.title));

        Ok(Some(RecognitionMatch {
            identity: TrackIdentity {
                provider: PROVIDER_NAME.to_string(),
                provider_track_id,
            },
            title: result.title,
            artist: result.artist,
            album: result.album,
            isrc: result.isrc,
            artwork_url: result.song_link,
            confidence: 1.0,
            latency_ms: 0,
            raw_response: serde_json::json!({ "provider": PROVIDER_NAME }),
        }))
    }
}

#[async_trait::async_trait]
impl Recognizer for AudDRecognizer {
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
        let client = Client::new();
        let recognizer = AudDRecognizer::new(
            client,
            "token".into(),
            WavFormat {
                sample_rate: 44100,
                channels: 2,
                bits_per_sample: 16,
            },
        );
        assert_eq!(recognizer.name(), "audd");
    }

    #[tokio::test]
    async fn invalid_audio_never_reaches_the_network() {
        let client = Client::new();
        let recognizer = AudDRecognizer::new(
            client,
            "token".into(),
            WavFormat {
                sample_rate: 44100,
                channels: 2,
                bits_per_sample: 16,
            },
        );
        // Odd length, no header: fails header-repair before any HTTP call.
        let outcome = recognizer.recognize(&[0u8; 7], Duration::from_secs(1)).await;
        assert!(matches!(
            outcome,
            RecognitionOutcome::Error {
                kind: ErrorKind::InvalidAudio,
                ..
            }
        ));
    }
}
