//! Two-Hit Aggregator: per-`(stream, provider)` state machine that confirms
//! a track when the same identity appears in consecutive hops within
//! tolerance.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::recognizer::TrackIdentity;

/// A pending (unconfirmed) observation awaiting corroboration.
#[derive(Debug, Clone)]
struct Pending {
    identity: TrackIdentity,
    hop_index: u64,
    confidence: f64,
    recognized_at: DateTime<Utc>,
}

/// A confirmed candidate ready for `insert_play_idempotent`.
#[derive(Debug, Clone)]
pub struct PlayCandidate {
    pub identity: TrackIdentity,
    pub recognized_at: DateTime<Utc>,
    pub confidence: f64,
}

/// One observation fed into the aggregator for a given hop.
pub enum Observation {
    Match {
        identity: TrackIdentity,
        confidence: f64,
    },
    NoMatch,
    Error,
}

/// Per-`(stream, provider)` two-hit confirmation state machine. State is
/// bounded by `streams × providers` regardless of history (testable
/// invariant 6).
#[derive(Default)]
pub struct TwoHitAggregator {
    pending: DashMap<(String, String), Pending>,
    hop_tolerance: u32,
}

impl TwoHitAggregator {
    pub fn new(hop_tolerance: u32) -> Self {
        Self {
            pending: DashMap::new(),
            hop_tolerance,
        }
    }

    /// Feeds one hop's observation for `(stream, provider)` and returns a
    /// confirmed [`PlayCandidate`] if this observation completes a two-hit
    /// match.
    pub fn observe(
        &self,
        stream: &str,
        provider: &str,
        hop_index: u64,
        recognized_at: DateTime<Utc>,
        observation: Observation,
    ) -> Option<PlayCandidate> {
        let key = (stream.to_string(), provider.to_string());
        let max_gap = 1 + self.hop_tolerance as u64;

        let existing = self.pending.get(&key).map(|entry| entry.value().clone());

        match (existing, observation) {
            (None, Observation::Match { identity, confidence }) => {
                self.pending.insert(
                    key,
                    Pending {
                        identity,
                        hop_index,
                        confidence,
                        recognized_at,
                    },
                );
                None
            }
            (None, Observation::NoMatch | Observation::Error) => None,
            (Some(prior), Observation::Match { identity, confidence }) => {
                let gap = hop_index.saturating_sub(prior.hop_index);
                if gap > max_gap {
                    // Rule 4: evict stale pending, then apply rule 1 to the new outcome.
                    self.pending.insert(
                        key,
                        Pending {
                            identity,
                            hop_index,
                            confidence,
                            recognized_at,
                        },
                    );
                    return None;
                }
                if identity == prior.identity {
                    // Rule 2: confirm.
                    self.pending.remove(&key);
                    Some(PlayCandidate {
                        identity,
                        recognized_at,
                        confidence: confidence.max(prior.confidence),
                    })
                } else {
                    // Rule 3: different identity overwrites pending.
                    self.pending.insert(
                        key,
                        Pending {
                            identity,
                            hop_index,
                            confidence,
                            recognized_at,
                        },
                    );
                    None
                }
            }
            (Some(prior), Observation::NoMatch | Observation::Error) => {
                let gap = hop_index.saturating_sub(prior.hop_index);
                if gap >= max_gap {
                    // No confirming hit can arrive within tolerance anymore.
                    self.pending.remove(&key);
                }
                // Otherwise: NoMatch/Error within tolerance does not clear
                // pending; the next positive hit is still checked against it.
                None
            }
        }
    }

    /// Number of live `(stream, provider)` pending entries. Exercises
    /// invariant 6: this never grows with history, only with the number of
    /// distinct streams and providers.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn identity(name: &str) -> TrackIdentity {
        TrackIdentity {
            provider: "audd".into(),
            provider_track_id: name.into(),
        }
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    // S1 — confirmation within tolerance.
    #[test]
    fn confirms_within_tolerance() {
        let aggregator = TwoHitAggregator::new(1);
        let t = identity("T");

        assert!(aggregator
            .observe("kitchen", "audd", 0, at(0), Observation::Match { identity: t.clone(), confidence: 0.8 })
            .is_none());
        assert!(aggregator
            .observe("kitchen", "audd", 1, at(120), Observation::NoMatch)
            .is_none());
        let play = aggregator
            .observe("kitchen", "audd", 2, at(240), Observation::Match { identity: t.clone(), confidence: 0.9 })
            .expect("hop 2 within tolerance of hop 0 confirms");
        assert_eq!(play.identity, t);
        assert_eq!(play.confidence, 0.9);
    }

    // S2 — no confirmation past tolerance.
    #[test]
    fn does_not_confirm_past_tolerance() {
        let aggregator = TwoHitAggregator::new(1);
        let t = identity("T");

        aggregator.observe("kitchen", "audd", 0, at(0), Observation::Match { identity: t.clone(), confidence: 0.8 });
        aggregator.observe("kitchen", "audd", 1, at(120), Observation::NoMatch);
        aggregator.observe("kitchen", "audd", 2, at(240), Observation::NoMatch);
        assert_eq!(aggregator.pending_count(), 0);

        let play = aggregator.observe(
            "kitchen",
            "audd",
            3,
            at(360),
            Observation::Match { identity: t, confidence: 0.9 },
        );
        assert!(play.is_none());
    }

    // S3 — different identity resets.
    #[test]
    fn different_identity_resets_pending() {
        let aggregator = TwoHitAggregator::new(1);
        let t = identity("T");
        let u = identity("U");

        assert!(aggregator
            .observe("kitchen", "audd", 0, at(0), Observation::Match { identity: t, confidence: 0.8 })
            .is_none());
        assert!(aggregator
            .observe("kitchen", "audd", 1, at(120), Observation::Match { identity: u.clone(), confidence: 0.7 })
            .is_none());
        let play = aggregator
            .observe("kitchen", "audd", 2, at(240), Observation::Match { identity: u.clone(), confidence: 0.85 })
            .expect("U confirms at hop 2");
        assert_eq!(play.identity, u);
    }

    #[test]
    fn pending_state_is_bounded_by_stream_provider_pairs() {
        let aggregator = TwoHitAggregator::new(1);
        for hop in 0..50u64 {
            aggregator.observe(
                "kitchen",
                "audd",
                hop,
                at(hop as i64 * 120),
                Observation::Match { identity: identity("T"), confidence: 0.5 },
            );
        }
        assert!(aggregator.pending_count() <= 1);
    }
}
