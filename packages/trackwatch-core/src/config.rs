//! Typed, validated configuration read from environment variables.
//!
//! Follows the teacher's `Config`/`StreamingConfig` split: a small struct per
//! concern, each with a `Default` and a `validate()` that fails fast with a
//! descriptive message rather than panicking deep inside a worker.

use std::time::Duration;

use crate::error::TrackwatchError;

/// Transport used when opening the RTSP source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtspTransport {
    Tcp,
    Udp,
}

impl RtspTransport {
    fn parse(raw: &str) -> Result<Self, TrackwatchError> {
        match raw.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            other => Err(TrackwatchError::Configuration(format!(
                "invalid RTSP transport {other:?}, expected \"tcp\" or \"udp\""
            ))),
        }
    }
}

/// Configuration for a single monitored stream.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub name: String,
    pub url: String,
    pub enabled: bool,
    pub transport: RtspTransport,
    pub sample_rate: u32,
    pub channels: u16,
}

impl StreamConfig {
    fn validate(&self) -> Result<(), TrackwatchError> {
        if self.name.trim().is_empty() {
            return Err(TrackwatchError::Configuration(
                "stream name must not be empty".into(),
            ));
        }
        if self.url.trim().is_empty() {
            return Err(TrackwatchError::Configuration(format!(
                "stream {:?} is missing a source URL",
                self.name
            )));
        }
        if !matches!(self.channels, 1 | 2) {
            return Err(TrackwatchError::Configuration(format!(
                "stream {:?} has unsupported channel count {}",
                self.name, self.channels
            )));
        }
        Ok(())
    }
}

/// Decision policy for the two-hit aggregator. Reserved for future policies;
/// only `two_hit` is currently accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionPolicy {
    TwoHit,
}

impl DecisionPolicy {
    fn parse(raw: &str) -> Result<Self, TrackwatchError> {
        match raw {
            "two_hit" => Ok(Self::TwoHit),
            other => Err(TrackwatchError::Configuration(format!(
                "unsupported DECISION_POLICY {other:?}, only \"two_hit\" is implemented"
            ))),
        }
    }
}

/// Scheduling/windowing configuration shared by every stream worker.
#[derive(Debug, Clone)]
pub struct WindowingConfig {
    pub window_seconds: u64,
    pub hop_seconds: u64,
    pub dedup_seconds: i64,
    pub decision_policy: DecisionPolicy,
    pub two_hit_hop_tolerance: u32,
}

impl Default for WindowingConfig {
    fn default() -> Self {
        Self {
            window_seconds: 12,
            hop_seconds: 120,
            dedup_seconds: 300,
            decision_policy: DecisionPolicy::TwoHit,
            two_hit_hop_tolerance: 1,
        }
    }
}

impl WindowingConfig {
    fn validate(&self) -> Result<(), TrackwatchError> {
        if self.window_seconds == 0 || self.hop_seconds == 0 {
            return Err(TrackwatchError::Configuration(
                "WINDOW_SECONDS and HOP_SECONDS must be positive".into(),
            ));
        }
        if self.window_seconds > self.hop_seconds {
            tracing::warn!(
                window_seconds = self.window_seconds,
                hop_seconds = self.hop_seconds,
                "windows overlap: window_seconds exceeds hop_seconds"
            );
        }
        Ok(())
    }

    pub fn hop_duration(&self) -> Duration {
        Duration::from_secs(self.hop_seconds)
    }

    pub fn window_duration(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// Fan-out admission control configuration.
#[derive(Debug, Clone, Copy)]
pub struct FanoutConfig {
    pub global_max_inflight: usize,
    pub per_provider_max_inflight: usize,
    pub recognize_timeout: Duration,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            global_max_inflight: 4,
            per_provider_max_inflight: 2,
            recognize_timeout: Duration::from_millis(8000),
        }
    }
}

impl FanoutConfig {
    fn validate(&self) -> Result<(), TrackwatchError> {
        if self.global_max_inflight == 0 || self.per_provider_max_inflight == 0 {
            return Err(TrackwatchError::Configuration(
                "GLOBAL_MAX_INFLIGHT_RECOGNITIONS and PER_PROVIDER_MAX_INFLIGHT must be positive"
                    .into(),
            ));
        }
        Ok(())
    }
}

/// Audio Source restart policy.
#[derive(Debug, Clone, Copy)]
pub struct AudioSourceConfig {
    pub open_timeout: Duration,
    pub read_timeout: Duration,
    pub max_restart_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for AudioSourceConfig {
    fn default() -> Self {
        Self {
            open_timeout: Duration::from_millis(5000),
            read_timeout: Duration::from_millis(15000),
            max_restart_attempts: 10,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_millis(30_000),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub streams: Vec<StreamConfig>,
    pub windowing: WindowingConfig,
    pub fanout: FanoutConfig,
    pub audio_source: AudioSourceConfig,
    pub confirming_provider: String,
    pub db_path: String,
    pub ffmpeg_path: String,
    pub shutdown_grace: Duration,
}

impl Config {
    /// Loads configuration from the process environment, per the
    /// `STREAM_COUNT` / `STREAM_i_*` / global-key layout.
    pub fn from_env() -> Result<Self, TrackwatchError> {
        Self::from_env_source(&std::env::vars().collect::<std::collections::HashMap<_, _>>())
    }

    /// Testable variant of [`Config::from_env`] taking an explicit key/value map.
    pub fn from_env_source(
        vars: &std::collections::HashMap<String, String>,
    ) -> Result<Self, TrackwatchError> {
        let get = |key: &str| vars.get(key).cloned();
        let get_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let stream_count: usize = get_or("STREAM_COUNT", "1")
            .parse()
            .map_err(|_| TrackwatchError::Configuration("STREAM_COUNT must be an integer".into()))?;
        if !(1..=5).contains(&stream_count) {
            return Err(TrackwatchError::Configuration(format!(
                "STREAM_COUNT must be between 1 and 5, got {stream_count}"
            )));
        }

        let mut streams = Vec::with_capacity(stream_count);
        for i in 1..=stream_count {
            let name = get(&format!("STREAM_{i}_NAME")).ok_or_else(|| {
                TrackwatchError::Configuration(format!("missing STREAM_{i}_NAME"))
            })?;
            let url = get(&format!("STREAM_{i}_URL")).ok_or_else(|| {
                TrackwatchError::Configuration(format!("missing STREAM_{i}_URL"))
            })?;
            let enabled = get_or(&format!("STREAM_{i}_ENABLED"), "true")
                .parse()
                .map_err(|_| {
                    TrackwatchError::Configuration(format!("STREAM_{i}_ENABLED must be true/false"))
                })?;
            let transport = RtspTransport::parse(&get_or(&format!("STREAM_{i}_TRANSPORT"), "tcp"))?;
            let sample_rate: u32 = get_or(&format!("STREAM_{i}_SAMPLE_RATE"), "44100")
                .parse()
                .map_err(|_| {
                    TrackwatchError::Configuration(format!("STREAM_{i}_SAMPLE_RATE must be an integer"))
                })?;
            let channels: u16 = get_or(&format!("STREAM_{i}_CHANNELS"), "2")
                .parse()
                .map_err(|_| {
                    TrackwatchError::Configuration(format!("STREAM_{i}_CHANNELS must be an integer"))
                })?;

            let stream = StreamConfig {
                name,
                url,
                enabled,
                transport,
                sample_rate,
                channels,
            };
            stream.validate()?;
            streams.push(stream);
        }

        let windowing = WindowingConfig {
            window_seconds: parse_or(vars, "WINDOW_SECONDS", 12)?,
            hop_seconds: parse_or(vars, "HOP_SECONDS", 120)?,
            dedup_seconds: parse_or(vars, "DEDUP_SECONDS", 300)?,
            decision_policy: DecisionPolicy::parse(&get_or("DECISION_POLICY", "two_hit"))?,
            two_hit_hop_tolerance: parse_or(vars, "TWO_HIT_HOP_TOLERANCE", 1)?,
        };
        windowing.validate()?;

        let fanout = FanoutConfig {
            global_max_inflight: parse_or(vars, "GLOBAL_MAX_INFLIGHT_RECOGNITIONS", 4)?,
            per_provider_max_inflight: parse_or(vars, "PER_PROVIDER_MAX_INFLIGHT", 2)?,
            recognize_timeout: Duration::from_millis(parse_or(vars, "RECOGNIZE_TIMEOUT_MS", 8000)?),
        };
        fanout.validate()?;

        let audio_source = AudioSourceConfig {
            open_timeout: Duration::from_millis(parse_or(vars, "OPEN_TIMEOUT_MS", 5000)?),
            read_timeout: Duration::from_millis(parse_or(vars, "READ_TIMEOUT_MS", 15000)?),
            max_restart_attempts: parse_or(vars, "MAX_RESTART_ATTEMPTS", 10)?,
            backoff_base: Duration::from_millis(parse_or(vars, "BACKOFF_BASE_MS", 500)?),
            backoff_cap: Duration::from_millis(parse_or(vars, "BACKOFF_CAP_MS", 30_000)?),
        };

        let confirming_provider = get_or("CONFIRMING_PROVIDER", "audd");
        let db_path = get_or("DB_PATH", "trackwatch.db");
        let ffmpeg_path = get_or("FFMPEG_PATH", "ffmpeg");
        let shutdown_grace = Duration::from_secs(parse_or(vars, "SHUTDOWN_GRACE_SECONDS", 10)?);

        Ok(Self {
            streams,
            windowing,
            fanout,
            audio_source,
            confirming_provider,
            db_path,
            ffmpeg_path,
            shutdown_grace,
        })
    }
}

fn parse_or<T>(
    vars: &std::collections::HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, TrackwatchError>
where
    T: std::str::FromStr,
{
    match vars.get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| TrackwatchError::Configuration(format!("{key} has an invalid value"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("STREAM_COUNT".into(), "1".into());
        vars.insert("STREAM_1_NAME".into(), "kitchen".into());
        vars.insert("STREAM_1_URL".into(), "rtsp://example.test/kitchen".into());
        vars
    }

    #[test]
    fn loads_minimal_config_with_defaults() {
        let config = Config::from_env_source(&base_env()).unwrap();
        assert_eq!(config.streams.len(), 1);
        assert_eq!(config.streams[0].name, "kitchen");
        assert!(config.streams[0].enabled);
        assert_eq!(config.windowing.window_seconds, 12);
        assert_eq!(config.windowing.hop_seconds, 120);
    }

    #[test]
    fn rejects_stream_count_out_of_range() {
        let mut vars = base_env();
        vars.insert("STREAM_COUNT".into(), "6".into());
        let err = Config::from_env_source(&vars).unwrap_err();
        assert_eq!(err.to_string(), "configuration error: STREAM_COUNT must be between 1 and 5, got 6");
    }

    #[test]
    fn rejects_missing_stream_url() {
        let mut vars = base_env();
        vars.remove("STREAM_1_URL");
        assert!(Config::from_env_source(&vars).is_err());
    }

    #[test]
    fn rejects_unknown_decision_policy() {
        let mut vars = base_env();
        vars.insert("DECISION_POLICY".into(), "weighted".into());
        assert!(Config::from_env_source(&vars).is_err());
    }
}
