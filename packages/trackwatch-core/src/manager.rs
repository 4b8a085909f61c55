//! Worker Manager: starts/stops [`StreamWorker`]s for all enabled streams
//! and hot-reloads configuration changes.
//!
//! Grounded on the teacher's `DashMap`-keyed `StreamRegistry`
//! (`stream/manager.rs`), generalized from audio-stream registration to
//! stream-worker lifecycle management.

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::config::StreamConfig;
use crate::fanout::ProviderFanout;
use crate::runtime::TaskSpawner;
use crate::store::Store;
use crate::worker::StreamWorker;

struct WorkerHandle {
    config: StreamConfig,
    cancel: CancellationToken,
}

/// Owns the set of active [`StreamWorker`] tasks, keyed by stream name.
pub struct WorkerManager {
    workers: DashMap<String, WorkerHandle>,
    fanout: Arc<ProviderFanout>,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    windowing: crate::config::WindowingConfig,
    audio_source_config: crate::config::AudioSourceConfig,
    ffmpeg_path: String,
    confirming_provider: String,
    shutdown_grace: std::time::Duration,
}

impl WorkerManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fanout: Arc<ProviderFanout>,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        windowing: crate::config::WindowingConfig,
        audio_source_config: crate::config::AudioSourceConfig,
        ffmpeg_path: String,
        confirming_provider: String,
        shutdown_grace: std::time::Duration,
    ) -> Self {
        Self {
            workers: DashMap::new(),
            fanout,
            store,
            clock,
            windowing,
            audio_source_config,
            ffmpeg_path,
            confirming_provider,
            shutdown_grace,
        }
    }

    /// Starts a worker for every enabled stream in `streams`.
    pub fn start_all(&self, streams: &[StreamConfig], spawner: &dyn TaskSpawner) {
        for stream in streams.iter().filter(|s| s.enabled) {
            self.start_one(stream.clone(), spawner);
        }
    }

    fn start_one(&self, stream: StreamConfig, spawner: &dyn TaskSpawner) {
        let cancel = CancellationToken::new();
        let worker = StreamWorker::new(
            stream.clone(),
            self.windowing.clone(),
            self.audio_source_config,
            self.ffmpeg_path.clone(),
            self.confirming_provider.clone(),
            Arc::clone(&self.fanout),
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            cancel.clone(),
        );

        spawner.spawn({
            let name = stream.name.clone();
            async move {
                if let Err(err) = worker.run().await {
                    tracing::error!(stream = %name, error = %err, "stream worker exited with error");
                }
            }
        });

        self.workers.insert(
            stream.name.clone(),
            WorkerHandle {
                config: stream,
                cancel,
            },
        );
    }

    /// Computes the set-difference between the currently running workers
    /// and `new_streams`: stops removed/changed workers, starts added ones,
    /// leaves untouched workers running. Reload never leaves two workers
    /// running against the same stream name.
    pub async fn reload(&self, new_streams: &[StreamConfig], spawner: &dyn TaskSpawner) {
        let new_by_name: std::collections::HashMap<_, _> =
            new_streams.iter().map(|s| (s.name.clone(), s.clone())).collect();

        let existing_names: Vec<String> = self.workers.iter().map(|e| e.key().clone()).collect();

        for name in existing_names {
            match new_by_name.get(&name) {
                None => {
                    self.stop_one(&name).await;
                }
                Some(new_config) if !new_config.enabled => {
                    self.stop_one(&name).await;
                }
                Some(new_config) => {
                    let changed = self
                        .workers
                        .get(&name)
                        .map(|h| h.config.url != new_config.url)
                        .unwrap_or(false);
                    if changed {
                        self.stop_one(&name).await;
                        self.start_one(new_config.clone(), spawner);
                    }
                }
            }
        }

        for stream in new_streams.iter().filter(|s| s.enabled) {
            if !self.workers.contains_key(&stream.name) {
                self.start_one(stream.clone(), spawner);
            }
        }
    }

    async fn stop_one(&self, name: &str) {
        if let Some((_, handle)) = self.workers.remove(name) {
            handle.cancel.cancel();
            tokio::time::sleep(self.shutdown_grace.min(std::time::Duration::from_millis(50))).await;
        }
    }

    /// Cancels every worker and waits up to the configured shutdown grace
    /// period for them to drain.
    pub async fn shutdown_all(&self) {
        let names: Vec<String> = self.workers.iter().map(|e| e.key().clone()).collect();
        for name in names {
            self.stop_one(&name).await;
        }
    }

    pub fn active_stream_names(&self) -> Vec<String> {
        self.workers.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::RtspTransport;
    use crate::runtime::TokioSpawner;
    use crate::store::SqliteStore;
    use std::time::Duration;

    fn stream(name: &str) -> StreamConfig {
        StreamConfig {
            name: name.into(),
            url: format!("rtsp://example.test/{name}"),
            enabled: true,
            transport: RtspTransport::Tcp,
            sample_rate: 44100,
            channels: 2,
        }
    }

    async fn manager() -> WorkerManager {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        let fanout = Arc::new(ProviderFanout::new(vec![], 4, 2, Duration::from_secs(1)));
        WorkerManager::new(
            fanout,
            store,
            Arc::new(SystemClock),
            crate::config::WindowingConfig::default(),
            crate::config::AudioSourceConfig::default(),
            "ffmpeg".into(),
            "audd".into(),
            Duration::from_millis(50),
        )
    }

    #[tokio::test]
    async fn start_all_registers_only_enabled_streams() {
        let manager = manager().await;
        let spawner = TokioSpawner::current();
        let mut disabled = stream("b");
        disabled.enabled = false;
        manager.start_all(&[stream("a"), disabled], &spawner);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let active = manager.active_stream_names();
        assert!(active.contains(&"a".to_string()));
        assert!(!active.contains(&"b".to_string()));
        manager.shutdown_all().await;
    }

    #[tokio::test]
    async fn reload_never_leaves_duplicate_workers_for_one_name() {
        let manager = manager().await;
        let spawner = TokioSpawner::current();
        manager.start_all(&[stream("a")], &spawner);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut changed = stream("a");
        changed.url = "rtsp://example.test/a-new".into();
        manager.reload(&[changed], &spawner).await;

        assert_eq!(manager.active_stream_names().iter().filter(|n| *n == "a").count(), 1);
        manager.shutdown_all().await;
    }
}
