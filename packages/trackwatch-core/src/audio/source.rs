//! The Audio Source: a subprocess-backed producer of PCM-WAV bytes from an
//! RTSP URL, with kill-on-drop process ownership and backoff-on-restart.
//!
//! Grounded on the teacher's subprocess-ownership idiom (a thin wrapper that
//! guarantees the child is killed on every exit path) generalized here from
//! a pipe-output audio reader to an RTSP decoder.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};

use crate::config::{AudioSourceConfig, RtspTransport, StreamConfig};

/// A chunk of raw bytes read from the decoder's standard output.
pub type AudioChunk = Vec<u8>;

/// Errors surfaced by an [`AudioSource`].
#[derive(Debug, Error)]
pub enum AudioSourceError {
    #[error("failed to launch decoder process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("read from decoder timed out")]
    ReadTimeout,
    #[error("decoder read failed: {0}")]
    Read(#[source] std::io::Error),
    #[error("decoder process exited")]
    EndOfStream,
}

/// Outcome of a single read attempt.
pub enum ReadOutcome {
    Chunk(AudioChunk),
    EndOfStream,
}

/// Abstraction over a running audio feed, decoupling the Window Scheduler
/// from the concrete decoder subprocess so it can be driven by a fake in
/// tests.
#[async_trait]
pub trait AudioSource: Send {
    /// Launches the underlying decoder.
    async fn start(&mut self) -> Result<(), AudioSourceError>;

    /// Reads the next chunk of audio, honoring the configured read timeout.
    async fn read_chunk(&mut self, max_bytes: usize) -> Result<ReadOutcome, AudioSourceError>;

    /// Gracefully terminates the decoder, killing it if it does not exit
    /// within the grace period.
    async fn stop(&mut self);
}

/// RAII wrapper guaranteeing the decoder subprocess is killed if dropped
/// without an explicit `stop()`.
struct ChildGuard(Child);

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Err(err) = self.0.start_kill() {
            tracing::warn!(error = %err, "failed to signal decoder subprocess on drop");
        }
    }
}

/// Production audio source: launches `ffmpeg` to transcode an RTSP feed into
/// PCM-WAV on stdout.
pub struct SubprocessAudioSource {
    stream: StreamConfig,
    config: AudioSourceConfig,
    ffmpeg_path: String,
    child: Option<ChildGuard>,
    stdout: Option<BufReader<ChildStdout>>,
    restart_attempt: u32,
}

impl SubprocessAudioSource {
    pub fn new(stream: StreamConfig, config: AudioSourceConfig, ffmpeg_path: String) -> Self {
        Self {
            stream,
            config,
            ffmpeg_path,
            child: None,
            stdout: None,
            restart_attempt: 0,
        }
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.arg("-rtsp_transport")
            .arg(match self.stream.transport {
                RtspTransport::Tcp => "tcp",
                RtspTransport::Udp => "udp",
            })
            .arg("-i")
            .arg(&self.stream.url)
            .arg("-f")
            .arg("wav")
            .arg("-ar")
            .arg(self.stream.sample_rate.to_string())
            .arg("-ac")
            .arg(self.stream.channels.to_string())
            .arg("-acodec")
            .arg("pcm_s16le")
            .arg("pipe:1")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Computes the full-jitter backoff delay for the current restart attempt.
    pub fn backoff_delay(&self) -> Duration {
        let exp = self.config.backoff_base.as_millis() as u64
            * 2u64.saturating_pow(self.restart_attempt);
        let cap = exp.min(self.config.backoff_cap.as_millis() as u64);
        let jittered = rand::thread_rng().gen_range(0..=cap.max(1));
        Duration::from_millis(jittered)
    }

    fn spawn_stderr_logger(&self, child: &mut Child) {
        if let Some(stderr) = child.stderr.take() {
            let stream_name = self.stream.name.clone();
            tokio::spawn(async move {
                use tokio::io::{AsyncBufReadExt, BufReader as AsyncBufReader};
                let mut lines = AsyncBufReader::new(stderr).lines();
                let mut suppressed = 0u32;
                while let Ok(Some(line)) = lines.next_line().await {
                    if suppressed < 20 {
                        tracing::warn!(stream = %stream_name, "decoder: {line}");
                    } else if suppressed == 20 {
                        tracing::warn!(stream = %stream_name, "decoder stderr rate-limited, suppressing further lines");
                    }
                    suppressed += 1;
                }
            });
        }
    }
}

#[async_trait]
impl AudioSource for SubprocessAudioSource {
    async fn start(&mut self) -> Result<(), AudioSourceError> {
        let mut cmd = self.build_command();
        let mut child = tokio::time::timeout(self.config.open_timeout, async {
            cmd.spawn()
        })
        .await
        .map_err(|_| AudioSourceError::Spawn(std::io::Error::from(std::io::ErrorKind::TimedOut)))?
        .map_err(AudioSourceError::Spawn)?;

        self.spawn_stderr_logger(&mut child);
        let stdout = child.stdout.take().ok_or_else(|| {
            AudioSourceError::Spawn(std::io::Error::new(
                std::io::ErrorKind::Other,
                "decoder did not provide a stdout pipe",
            ))
        })?;

        self.stdout = Some(BufReader::new(stdout));
        self.child = Some(ChildGuard(child));
        self.restart_attempt = self.restart_attempt.saturating_add(1);
        Ok(())
    }

    async fn read_chunk(&mut self, max_bytes: usize) -> Result<ReadOutcome, AudioSourceError> {
        let stdout = self
            .stdout
            .as_mut()
            .ok_or(AudioSourceError::EndOfStream)?;

        let mut buf = vec![0u8; max_bytes];
        let read = tokio::time::timeout(self.config.read_timeout, stdout.read(&mut buf))
            .await
            .map_err(|_| AudioSourceError::ReadTimeout)?
            .map_err(AudioSourceError::Read)?;

        if read == 0 {
            return Ok(ReadOutcome::EndOfStream);
        }
        buf.truncate(read);
        Ok(ReadOutcome::Chunk(buf))
    }

    async fn stop(&mut self) {
        if let Some(mut guard) = self.child.take() {
            let _ = guard.0.start_kill();
            let _ = tokio::time::timeout(Duration::from_secs(5), guard.0.wait()).await;
        }
        self.stdout = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RtspTransport;

    fn stream() -> StreamConfig {
        StreamConfig {
            name: "kitchen".into(),
            url: "rtsp://example.test/kitchen".into(),
            enabled: true,
            transport: RtspTransport::Tcp,
            sample_rate: 44100,
            channels: 2,
        }
    }

    #[test]
    fn backoff_delay_never_exceeds_cap() {
        let mut config = AudioSourceConfig::default();
        config.backoff_base = Duration::from_millis(500);
        config.backoff_cap = Duration::from_millis(2000);
        let mut source = SubprocessAudioSource::new(stream(), config, "ffmpeg".into());
        source.restart_attempt = 10;
        for _ in 0..50 {
            assert!(source.backoff_delay() <= Duration::from_millis(2000));
        }
    }

    #[test]
    fn build_command_includes_transport_and_format_flags() {
        let source = SubprocessAudioSource::new(stream(), AudioSourceConfig::default(), "ffmpeg".into());
        let cmd = source.build_command();
        let rendered = format!("{:?}", cmd.as_std());
        assert!(rendered.contains("rtsp_transport"));
        assert!(rendered.contains("pcm_s16le"));
    }
}
