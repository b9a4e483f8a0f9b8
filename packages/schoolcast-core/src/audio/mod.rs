//! Audio collaborators: speech synthesis / conversion and playback.
//!
//! The broadcast engine only depends on the [`AudioSynthesizer`] and
//! [`AudioPlayback`] traits. [`CommandAudioBackend`] and [`CommandPlayer`]
//! implement them by shelling out to configured external tools.

mod command;

pub use command::{AudioConfig, CommandAudioBackend, CommandPlayer};

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

use crate::services::model::JobParams;

/// Errors raised by audio collaborators.
#[derive(Debug, Error)]
pub enum AudioError {
    /// Synthesis or conversion produced no usable audio.
    #[error("audio generation failed: {0}")]
    Generation(String),

    /// The player failed or exited abnormally.
    #[error("playback failed: {0}")]
    Playback(String),

    /// Filesystem or process spawn failure.
    #[error("audio I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenient Result alias for audio operations.
pub type AudioResult<T> = Result<T, AudioError>;

/// Handle to a materialized, playable audio file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioArtifact {
    pub path: PathBuf,
}

impl AudioArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Output of a synthesis/conversion request.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub artifact: AudioArtifact,
    /// Estimated playback length in seconds.
    pub duration_secs: f64,
}

/// Turns job parameters into a normalized audio artifact.
#[async_trait]
pub trait AudioSynthesizer: Send + Sync {
    /// Synthesizes speech for text jobs or converts an uploaded file for
    /// audio jobs.
    async fn synthesize_or_convert(&self, params: &JobParams) -> AudioResult<SynthesizedAudio>;

    /// Deletes an artifact that will never be played.
    async fn discard(&self, artifact: &AudioArtifact);

    /// Stores uploaded audio bytes and returns the upload id that audio jobs
    /// reference.
    async fn store_upload(&self, file_name: &str, data: Bytes) -> AudioResult<String>;
}

/// Plays an artifact on the speaker output.
#[async_trait]
pub trait AudioPlayback: Send + Sync {
    /// Resolves once playback has finished.
    ///
    /// Dropping the returned future must stop playback; the orchestrator
    /// relies on this to enforce its hard timeout.
    async fn play(&self, artifact: &AudioArtifact) -> AudioResult<()>;
}
