//! Audio ingestion: the RTSP-to-WAV decoder subprocess and WAV framing helpers.

pub mod source;
pub mod wav;

pub use source::{AudioChunk, AudioSource, AudioSourceError, SubprocessAudioSource};
pub use wav::{create_wav_header, repair_or_validate, WavFormat, WavValidationError};
