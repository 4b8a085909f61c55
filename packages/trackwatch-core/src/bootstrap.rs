//! Application bootstrap and dependency wiring.
//!
//! This module is the composition root - the single place where all
//! services are instantiated and wired together, so every dependency
//! relationship is visible in one place and swappable in tests.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{TrackwatchError, TrackwatchResult};
use crate::fanout::ProviderFanout;
use crate::manager::WorkerManager;
use crate::recognizer::acoustid::AcoustIdRecognizer;
use crate::recognizer::audd::AudDRecognizer;
use crate::recognizer::Recognizer;
use crate::runtime::TokioSpawner;
use crate::store::{SqliteStore, Store};

/// Container for all bootstrapped services.
pub struct BootstrappedServices {
    pub manager: Arc<WorkerManager>,
    pub store: Arc<dyn Store>,
    pub spawner: TokioSpawner,
    pub cancel_token: CancellationToken,
    config: Config,
}

impl BootstrappedServices {
    /// Initiates graceful shutdown of all workers.
    pub async fn shutdown(&self) {
        tracing::info!("beginning graceful shutdown");
        self.cancel_token.cancel();
        self.manager.shutdown_all().await;
        tracing::info!("shutdown complete");
    }

    /// Starts a worker for every enabled stream in the loaded configuration.
    pub fn start_workers(&self) {
        self.manager.start_all(&self.config.streams, &self.spawner);
    }
}

/// Creates the shared HTTP client used by every recognizer, for connection
/// pooling across repeated recognize calls.
fn create_http_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .expect("failed to build HTTP client")
}

fn build_recognizers(
    config: &Config,
    http_client: &Client,
) -> TrackwatchResult<Vec<Arc<dyn Recognizer>>> {
    let format = crate::audio::wav::WavFormat {
        sample_rate: config.streams.first().map(|s| s.sample_rate).unwrap_or(44100),
        channels: config.streams.first().map(|s| s.channels).unwrap_or(2),
        bits_per_sample: 16,
    };

    let mut recognizers: Vec<Arc<dyn Recognizer>> = Vec::new();

    if let Ok(token) = std::env::var("AUDD_API_TOKEN") {
        recognizers.push(Arc::new(AudDRecognizer::new(http_client.clone(), token, format)));
    }
    if let Ok(key) = std::env::var("ACOUSTID_API_KEY") {
        recognizers.push(Arc::new(AcoustIdRecognizer::new(http_client.clone(), key, format)));
    }

    if recognizers.is_empty() {
        return Err(TrackwatchError::Configuration(
            "no recognition providers configured: set AUDD_API_TOKEN and/or ACOUSTID_API_KEY".into(),
        ));
    }

    if !recognizers.iter().any(|r| r.name() == config.confirming_provider) {
        return Err(TrackwatchError::Configuration(format!(
            "confirming provider {:?} is not among the configured recognizers",
            config.confirming_provider
        )));
    }

    Ok(recognizers)
}

/// Bootstraps all application services in dependency order:
///
/// 1. Task spawner and cancellation token.
/// 2. Shared HTTP client (connection pooling for recognizer calls).
/// 3. Recognizer set (from configured provider credentials).
/// 4. Provider Fan-out (depends on recognizers + admission config).
/// 5. Store (opens the database file, applies migrations).
/// 6. Worker Manager (depends on fan-out, store, clock).
///
/// # Errors
///
/// Returns an error if no recognizer is configured, the confirming provider
/// is not among them, or the store fails to open/migrate.
pub async fn bootstrap_services(config: Config) -> TrackwatchResult<BootstrappedServices> {
    let spawner = TokioSpawner::current();
    let cancel_token = CancellationToken::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let http_client = create_http_client(config.fanout.recognize_timeout);
    let recognizers = build_recognizers(&config, &http_client)?;

    let fanout = Arc::new(ProviderFanout::new(
        recognizers,
        config.fanout.global_max_inflight,
        config.fanout.per_provider_max_inflight,
        config.fanout.recognize_timeout,
    ));

    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&config.db_path).await?);

    let manager = Arc::new(WorkerManager::new(
        Arc::clone(&fanout),
        Arc::clone(&store),
        Arc::clone(&clock),
        config.windowing.clone(),
        config.audio_source,
        config.ffmpeg_path.clone(),
        config.confirming_provider.clone(),
        config.shutdown_grace,
    ));

    Ok(BootstrappedServices {
        manager,
        store,
        spawner,
        cancel_token,
        config,
    })
}
