//! Window Scheduler: buffers raw PCM and emits fixed-length, epoch-aligned
//! windows on a hop schedule, driven entirely through the [`Clock`]
//! abstraction so tests never depend on real time.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::audio::source::{AudioSource, AudioSourceError, ReadOutcome};
use crate::audio::wav::{create_wav_header, WavFormat};
use crate::clock::Clock;
use crate::config::WindowingConfig;

/// A complete, self-contained window ready to hand to the Fan-out.
pub struct Window {
    pub hop_index: u64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub wav: Bytes,
}

/// Outcome of one scheduler tick.
pub enum TickOutcome {
    Emitted(Window),
    /// The window was late past tolerance, or the input had a continuity
    /// gap; no window was produced for this hop.
    Skipped { hop_index: u64 },
    /// The Audio Source reported end-of-stream or a read error; the caller
    /// should treat this as a worker-level Audio Source failure.
    SourceError(AudioSourceError),
}

pub struct WindowScheduler<'a> {
    clock: &'a dyn Clock,
    config: WindowingConfig,
    format: WavFormat,
    ring: VecDeque<u8>,
    t0: DateTime<Utc>,
    hop_index: u64,
    bytes_per_second: u64,
}

impl<'a> WindowScheduler<'a> {
    /// Creates a scheduler aligned to `clock.now()` at construction time.
    pub fn new(clock: &'a dyn Clock, config: WindowingConfig, format: WavFormat) -> Self {
        let now = clock.now();
        let t0 = align_floor(now, config.hop_seconds);
        let bytes_per_second =
            format.sample_rate as u64 * format.channels as u64 * format.bytes_per_sample() as u64;

        Self {
            clock,
            config,
            format,
            ring: VecDeque::with_capacity(
                ((config.window_seconds + config.hop_seconds) * bytes_per_second.max(1)) as usize,
            ),
            t0,
            hop_index: 0,
            bytes_per_second,
        }
    }

    fn window_bytes(&self) -> usize {
        (self.config.window_seconds * self.bytes_per_second) as usize
    }

    fn ring_capacity_bytes(&self) -> usize {
        ((self.config.window_seconds + self.config.hop_seconds) * self.bytes_per_second) as usize
    }

    fn boundary_for(&self, hop_index: u64) -> DateTime<Utc> {
        self.t0 + chrono::Duration::seconds((hop_index * self.config.hop_seconds) as i64)
    }

    /// Drops any partial window state and advances to the next aligned hop
    /// strictly after the current time. Called after an Audio Source restart
    /// so the scheduler resumes at the next upcoming boundary rather than
    /// re-emitting a boundary that has already passed. `t0` is never moved:
    /// boundaries stay pinned to the original epoch-aligned grid.
    pub fn resync(&mut self) {
        self.ring.clear();
        let now = self.clock.now();
        let hop = self.config.hop_seconds.max(1) as i64;
        let elapsed = (now - self.t0).num_seconds();
        self.hop_index = (elapsed.div_euclid(hop) + 1).max(0) as u64;
    }

    /// Drives one hop: sleeps until the aligned boundary, fills the ring
    /// from `source` up to that point, and emits a window or a skip.
    pub async fn tick(&mut self, source: &mut dyn AudioSource) -> TickOutcome {
        let target = self.boundary_for(self.hop_index);
        let now = self.clock.now();
        if target > now {
            self.clock.sleep((target - now).to_std().unwrap_or(Duration::ZERO)).await;
        }

        let now = self.clock.now();
        let late = now - target;
        let half_hop = chrono::Duration::milliseconds((self.config.hop_seconds as i64 * 1000) / 2);

        if late > half_hop {
            self.hop_index += 1;
            return TickOutcome::Skipped {
                hop_index: self.hop_index - 1,
            };
        }

        let needed = self.window_bytes();
        let read_budget = self.config.window_seconds.max(1);
        let deadline = self.clock.now() + chrono::Duration::seconds(read_budget as i64);

        while self.ring.len() < needed {
            if self.clock.now() > deadline {
                // Continuity gap: no data arrived within the expected window.
                self.hop_index += 1;
                return TickOutcome::Skipped {
                    hop_index: self.hop_index - 1,
                };
            }
            match source.read_chunk(65536).await {
                Ok(ReadOutcome::Chunk(chunk)) => {
                    self.ring.extend(chunk);
                    let cap = self.ring_capacity_bytes();
                    while self.ring.len() > cap {
                        self.ring.pop_front();
                    }
                }
                Ok(ReadOutcome::EndOfStream) => {
                    return TickOutcome::SourceError(AudioSourceError::EndOfStream)
                }
                Err(err) => return TickOutcome::SourceError(err),
            }
        }

        let pcm: Vec<u8> = self.ring.iter().take(needed).copied().collect();
        let mut wav = create_wav_header(
            self.format.sample_rate,
            self.format.channels,
            self.format.bits_per_sample,
        )
        .to_vec();
        wav.extend_from_slice(&pcm);

        let window = Window {
            hop_index: self.hop_index,
            window_start: target,
            window_end: target + chrono::Duration::seconds(self.config.window_seconds as i64),
            wav: Bytes::from(wav),
        };
        self.hop_index += 1;
        TickOutcome::Emitted(window)
    }
}

fn align_floor(now: DateTime<Utc>, hop_seconds: u64) -> DateTime<Utc> {
    let epoch_seconds = now.timestamp();
    let hop = hop_seconds.max(1) as i64;
    let floored = (epoch_seconds / hop) * hop;
    DateTime::from_timestamp(floored, 0).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::source::ReadOutcome;
    use crate::clock::ManualClock;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::VecDeque as Deque;

    struct FakeSource {
        chunks: Deque<Vec<u8>>,
    }

    #[async_trait]
    impl AudioSource for FakeSource {
        async fn start(&mut self) -> Result<(), AudioSourceError> {
            Ok(())
        }

        async fn read_chunk(&mut self, _max_bytes: usize) -> Result<ReadOutcome, AudioSourceError> {
            match self.chunks.pop_front() {
                Some(chunk) => Ok(ReadOutcome::Chunk(chunk)),
                None => Ok(ReadOutcome::EndOfStream),
            }
        }

        async fn stop(&mut self) {}
    }

    fn format() -> WavFormat {
        WavFormat {
            sample_rate: 8000,
            channels: 1,
            bits_per_sample: 16,
        }
    }

    fn windowing() -> WindowingConfig {
        WindowingConfig {
            window_seconds: 1,
            hop_seconds: 2,
            dedup_seconds: 300,
            decision_policy: crate::config::DecisionPolicy::TwoHit,
            two_hit_hop_tolerance: 1,
        }
    }

    #[tokio::test]
    async fn emits_monotone_aligned_windows() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let config = windowing();
        let bytes_per_window = (config.window_seconds * 8000 * 2) as usize;

        let mut source = FakeSource {
            chunks: Deque::from(vec![vec![0u8; bytes_per_window * 4]]),
        };

        let mut scheduler = WindowScheduler::new(&clock, config.clone(), format());

        let mut starts = Vec::new();
        for _ in 0..2 {
            clock.advance(Duration::from_secs(2));
            match scheduler.tick(&mut source).await {
                TickOutcome::Emitted(window) => starts.push(window.window_start),
                TickOutcome::Skipped { .. } => {}
                TickOutcome::SourceError(_) => panic!("unexpected source error"),
            }
        }

        assert_eq!(starts.len(), 2);
        let diff = (starts[1] - starts[0]).num_seconds();
        assert_eq!(diff % config.hop_seconds as i64, 0);
        assert!(diff > 0);
    }

    #[test]
    fn resync_advances_to_next_aligned_hop_strictly_after_now_and_drops_buffer() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let t0 = start;
        let mut scheduler = WindowScheduler::new(&clock, windowing(), format());
        scheduler.ring.extend(vec![1u8; 16]);
        clock.advance(Duration::from_secs(150));
        scheduler.resync();
        assert!(scheduler.ring.is_empty());

        let boundary = scheduler.boundary_for(scheduler.hop_index);
        assert!(boundary > t0 + chrono::Duration::seconds(150));
        let prior_boundary = scheduler.boundary_for(scheduler.hop_index - 1);
        assert!(prior_boundary <= t0 + chrono::Duration::seconds(150));
    }

    // S6 — restart resumes at the next aligned hop, not a stale one.
    #[test]
    fn resync_after_restart_resumes_at_next_aligned_hop() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(t0);
        let config = WindowingConfig {
            window_seconds: 12,
            hop_seconds: 120,
            dedup_seconds: 300,
            decision_policy: crate::config::DecisionPolicy::TwoHit,
            two_hit_hop_tolerance: 1,
        };
        let mut scheduler = WindowScheduler::new(&clock, config, format());

        // Audio Source fails at t0+150; restart completes at t0+170.
        clock.advance(Duration::from_secs(170));
        scheduler.resync();

        assert_eq!(scheduler.boundary_for(scheduler.hop_index), t0 + chrono::Duration::seconds(240));
    }
}
