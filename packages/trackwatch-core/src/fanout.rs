//! Provider Fan-out: runs enabled recognizers in parallel per window,
//! subject to global and per-provider admission limits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::recognizer::{Recognizer, RecognitionOutcome};

/// Outcome of dispatching one provider for one window.
pub enum FanoutOutcome {
    Recognized {
        provider: String,
        outcome: RecognitionOutcome,
    },
    /// Capacity was exhausted at dispatch time; not an error, no Recognition
    /// row is written for this provider/window.
    Skipped { provider: String },
}

/// Parallel dispatcher over a fixed set of recognizers with global and
/// per-provider admission control via non-blocking semaphore acquisition.
pub struct ProviderFanout {
    providers: Vec<Arc<dyn Recognizer>>,
    global: Arc<Semaphore>,
    per_provider: HashMap<String, Arc<Semaphore>>,
    round_robin_cursor: AtomicUsize,
    recognize_timeout: Duration,
}

impl ProviderFanout {
    pub fn new(
        providers: Vec<Arc<dyn Recognizer>>,
        global_max_inflight: usize,
        per_provider_max_inflight: usize,
        recognize_timeout: Duration,
    ) -> Self {
        let per_provider = providers
            .iter()
            .map(|p| (p.name().to_string(), Arc::new(Semaphore::new(per_provider_max_inflight))))
            .collect();

        Self {
            providers,
            global: Arc::new(Semaphore::new(global_max_inflight)),
            per_provider,
            round_robin_cursor: AtomicUsize::new(0),
            recognize_timeout,
        }
    }

    /// Dispatches `wav` to every enabled provider in round-robin order,
    /// returning one outcome per provider once all have either completed,
    /// timed out, or been skipped for lack of capacity.
    pub async fn dispatch(&self, wav: Arc<Vec<u8>>) -> Vec<FanoutOutcome> {
        let order = self.round_robin_order();
        let mut tasks = Vec::with_capacity(order.len());

        for idx in order {
            let provider = Arc::clone(&self.providers[idx]);
            let name = provider.name().to_string();
            let per_provider_sem = self
                .per_provider
                .get(&name)
                .cloned()
                .expect("every provider has a semaphore registered at construction");

            let global_permit = match Arc::clone(&self.global).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    tasks.push(tokio::spawn(async move { FanoutOutcome::Skipped { provider: name } }));
                    continue;
                }
            };
            let provider_permit = match per_provider_sem.try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    drop(global_permit);
                    tasks.push(tokio::spawn(async move { FanoutOutcome::Skipped { provider: name } }));
                    continue;
                }
            };

            let wav = Arc::clone(&wav);
            let timeout = self.recognize_timeout;
            tasks.push(tokio::spawn(async move {
                // Permits are held for the lifetime of this task and
                // released automatically on completion, timeout, or abort.
                let _global_permit = global_permit;
                let _provider_permit = provider_permit;
                let outcome = provider.recognize(&wav, timeout).await;
                FanoutOutcome::Recognized {
                    provider: provider.name().to_string(),
                    outcome,
                }
            }));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            match task.await {
                Ok(outcome) => results.push(outcome),
                Err(_join_err) => {
                    // Panicked or was aborted; the permit was released when
                    // the task's future dropped. Nothing else to record.
                }
            }
        }
        results
    }

    fn round_robin_order(&self) -> Vec<usize> {
        let len = self.providers.len();
        if len == 0 {
            return Vec::new();
        }
        let start = self.round_robin_cursor.fetch_add(1, Ordering::Relaxed) % len;
        (0..len).map(|offset| (start + offset) % len).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::{ErrorKind, RecognitionOutcome};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct SlowRecognizer {
        name: String,
        started: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Recognizer for SlowRecognizer {
        fn name(&self) -> &str {
            &self.name
        }

        async fn recognize(&self, _wav: &[u8], _timeout: Duration) -> RecognitionOutcome {
            self.started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            RecognitionOutcome::NoMatch { latency_ms: 50 }
        }
    }

    #[tokio::test]
    async fn global_capacity_skips_excess_providers() {
        let started = Arc::new(AtomicU32::new(0));
        let providers: Vec<Arc<dyn Recognizer>> = vec![
            Arc::new(SlowRecognizer { name: "a".into(), started: started.clone() }),
            Arc::new(SlowRecognizer { name: "b".into(), started: started.clone() }),
        ];
        let fanout = ProviderFanout::new(providers, 1, 2, Duration::from_secs(1));

        let outcomes = fanout.dispatch(Arc::new(vec![0u8; 16])).await;
        let skipped = outcomes
            .iter()
            .filter(|o| matches!(o, FanoutOutcome::Skipped { .. }))
            .count();
        assert_eq!(skipped, 1);
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    struct InvalidAudioRecognizer;

    #[async_trait]
    impl Recognizer for InvalidAudioRecognizer {
        fn name(&self) -> &str {
            "invalid"
        }

        async fn recognize(&self, _wav: &[u8], _timeout: Duration) -> RecognitionOutcome {
            RecognitionOutcome::Error {
                kind: ErrorKind::InvalidAudio,
                message: "bad audio".into(),
                latency_ms: 0,
            }
        }
    }

    #[tokio::test]
    async fn dispatch_preserves_per_provider_identity() {
        let providers: Vec<Arc<dyn Recognizer>> = vec![Arc::new(InvalidAudioRecognizer)];
        let fanout = ProviderFanout::new(providers, 4, 2, Duration::from_secs(1));
        let outcomes = fanout.dispatch(Arc::new(vec![0u8; 16])).await;
        assert_eq!(outcomes.len(), 1);
        match &outcomes[0] {
            FanoutOutcome::Recognized { provider, .. } => assert_eq!(provider, "invalid"),
            FanoutOutcome::Skipped { .. } => panic!("expected a recognized outcome"),
        }
    }
}
