//! Stream Worker: glues Audio Source → Scheduler → Fan-out → Aggregator →
//! Store for one stream, and manages its own lifecycle and restarts.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::aggregator::{Observation, TwoHitAggregator};
use crate::audio::source::{AudioSource, AudioSourceError, SubprocessAudioSource};
use crate::audio::wav::WavFormat;
use crate::clock::Clock;
use crate::config::{AudioSourceConfig, StreamConfig, WindowingConfig};
use crate::error::{TrackwatchError, TrackwatchResult};
use crate::fanout::{FanoutOutcome, ProviderFanout};
use crate::recognizer::RecognitionOutcome;
use crate::scheduler::{TickOutcome, WindowScheduler};
use crate::store::models::{RecognitionInput, TrackAttrs};
use crate::store::Store;

/// Observable lifecycle state of a [`StreamWorker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Running,
    Restarting,
    Stopping,
    Stopped,
    Failed,
}

/// Runs the ingest→window→recognize→confirm→persist pipeline for one stream
/// until cancelled or until restart attempts are exhausted.
pub struct StreamWorker {
    stream: StreamConfig,
    windowing: WindowingConfig,
    audio_source_config: AudioSourceConfig,
    ffmpeg_path: String,
    confirming_provider: String,
    fanout: Arc<ProviderFanout>,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    state: RwLock<WorkerState>,
    restart_attempts: AtomicU32,
}

impl StreamWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stream: StreamConfig,
        windowing: WindowingConfig,
        audio_source_config: AudioSourceConfig,
        ffmpeg_path: String,
        confirming_provider: String,
        fanout: Arc<ProviderFanout>,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            stream,
            windowing,
            audio_source_config,
            ffmpeg_path,
            confirming_provider,
            fanout,
            store,
            clock,
            cancel,
            state: RwLock::new(WorkerState::Starting),
            restart_attempts: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.read()
    }

    fn set_state(&self, state: WorkerState) {
        *self.state.write() = state;
    }

    /// Runs the worker loop until the cancellation token fires or the
    /// Audio Source exhausts its restart budget.
    pub async fn run(&self) -> TrackwatchResult<()> {
        let stream_id = self
            .store
            .ensure_stream(&self.stream.name, &self.stream.url, self.stream.enabled)
            .await?;

        let aggregator = TwoHitAggregator::new(self.windowing.two_hit_hop_tolerance);
        let format = WavFormat {
            sample_rate: self.stream.sample_rate,
            channels: self.stream.channels,
            bits_per_sample: 16,
        };

        // Built once and resynced (never recreated) across restarts, so a
        // restart resumes at the next aligned hop instead of re-emitting a
        // boundary that already passed.
        let mut scheduler = WindowScheduler::new(self.clock.as_ref(), self.windowing.clone(), format);

        'restart: loop {
            if self.cancel.is_cancelled() {
                self.set_state(WorkerState::Stopped);
                return Ok(());
            }

            let mut source = SubprocessAudioSource::new(
                self.stream.clone(),
                self.audio_source_config,
                self.ffmpeg_path.clone(),
            );

            if let Err(err) = source.start().await {
                if !self.backoff_and_retry(&err).await {
                    self.set_state(WorkerState::Failed);
                    return Err(TrackwatchError::AudioSource {
                        stream: self.stream.name.clone(),
                        message: err.to_string(),
                    });
                }
                scheduler.resync();
                continue 'restart;
            }

            self.set_state(WorkerState::Running);

            loop {
                if self.cancel.is_cancelled() {
                    source.stop().await;
                    self.set_state(WorkerState::Stopped);
                    return Ok(());
                }

                match scheduler.tick(&mut source).await {
                    TickOutcome::Emitted(window) => {
                        self.restart_attempts.store(0, Ordering::SeqCst);
                        let wav = Arc::new(window.wav.to_vec());
                        let outcomes = self.fanout.dispatch(wav).await;

                        for outcome in outcomes {
                            let FanoutOutcome::Recognized { provider, outcome } = outcome else {
                                continue;
                            };
                            self.handle_recognition(
                                stream_id,
                                &aggregator,
                                &provider,
                                window.hop_index,
                                window.window_start,
                                window.window_end,
                                outcome,
                            )
                            .await?;
                        }
                    }
                    TickOutcome::Skipped { .. } => {}
                    TickOutcome::SourceError(err) => {
                        source.stop().await;
                        self.set_state(WorkerState::Restarting);
                        if !self.backoff_and_retry(&err).await {
                            self.set_state(WorkerState::Failed);
                            return Err(TrackwatchError::AudioSource {
                                stream: self.stream.name.clone(),
                                message: err.to_string(),
                            });
                        }
                        scheduler.resync();
                        continue 'restart;
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_recognition(
        &self,
        stream_id: i64,
        aggregator: &TwoHitAggregator,
        provider: &str,
        hop_index: u64,
        window_start: chrono::DateTime<chrono::Utc>,
        window_end: chrono::DateTime<chrono::Utc>,
        outcome: RecognitionOutcome,
    ) -> TrackwatchResult<()> {
        let recognized_at = self.clock.now();

        let (track_id, confidence, latency_ms, raw_response, error_message, observation) = match outcome
        {
            RecognitionOutcome::Match(m) => {
                let track_id = self
                    .store
                    .upsert_track(
                        &m.identity.provider,
                        &m.identity.provider_track_id,
                        TrackAttrs {
                            title: m.title.clone(),
                            artist: m.artist.clone(),
                            album: m.album.clone(),
                            isrc: m.isrc.clone(),
                            artwork_url: m.artwork_url.clone(),
                            metadata: None,
                        },
                    )
                    .await?;
                let observation = Observation::Match {
                    identity: m.identity.clone(),
                    confidence: m.confidence,
                };
                (
                    Some(track_id),
                    Some(m.confidence),
                    m.latency_ms as i64,
                    Some(m.raw_response.clone()),
                    None,
                    observation,
                )
            }
            RecognitionOutcome::NoMatch { latency_ms } => {
                (None, None, latency_ms as i64, None, None, Observation::NoMatch)
            }
            RecognitionOutcome::Error { kind, message, latency_ms } => (
                None,
                None,
                latency_ms as i64,
                None,
                Some(format!("{kind:?}: {message}")),
                Observation::Error,
            ),
        };

        self.store
            .insert_recognition(RecognitionInput {
                stream_id,
                provider: provider.to_string(),
                window_start,
                window_end,
                recognized_at,
                track_id,
                confidence,
                latency_ms,
                raw_response,
                error_message,
            })
            .await?;

        if provider != self.confirming_provider {
            return Ok(());
        }

        if let Some(candidate) = aggregator.observe(
            &self.stream.name,
            provider,
            hop_index,
            recognized_at,
            observation,
        ) {
            let Some(track_id) = track_id else {
                tracing::warn!(stream = %self.stream.name, "aggregator confirmed without a track id, clearing");
                return Ok(());
            };
            self.store
                .insert_play_idempotent(
                    stream_id,
                    track_id,
                    candidate.recognized_at,
                    candidate.confidence,
                    self.windowing.dedup_seconds,
                )
                .await?;
        }

        Ok(())
    }

    /// Returns `true` if the worker should retry after backing off, `false`
    /// if restart attempts are exhausted and the worker should fail.
    async fn backoff_and_retry(&self, err: &AudioSourceError) -> bool {
        let attempt = self.restart_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > self.audio_source_config.max_restart_attempts {
            tracing::error!(
                stream = %self.stream.name,
                error = %err,
                attempts = attempt,
                "audio source exhausted restart attempts"
            );
            return false;
        }

        let exp = self.audio_source_config.backoff_base.as_millis() as u64 * 2u64.saturating_pow(attempt);
        let delay = Duration::from_millis(exp.min(self.audio_source_config.backoff_cap.as_millis() as u64));
        tracing::warn!(stream = %self.stream.name, error = %err, attempt, delay_ms = delay.as_millis() as u64, "restarting audio source");
        self.clock.sleep(delay).await;
        true
    }
}
