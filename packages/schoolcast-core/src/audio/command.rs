//! External-tool audio backend.
//!
//! Speech synthesis, conversion, probing and playback are delegated to
//! command-line tools configured as argument templates. Placeholders of the
//! form `{name}` are substituted per invocation.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use uuid::Uuid;

use super::{
    AudioArtifact, AudioError, AudioPlayback, AudioResult, AudioSynthesizer, SynthesizedAudio,
};
use crate::protocol_constants::{
    DEFAULT_AUDIO_DURATION_SECS, DEFAULT_SIGNAL_DURATION_SECS, MIN_TEXT_DURATION_SECS,
    TEXT_SECS_PER_CHAR, UPLOAD_ID_PREFIX,
};
use crate::services::model::{generate_id, JobParams};
use crate::utils::is_safe_identifier;

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Audio tool configuration.
///
/// Every command is a program followed by its arguments. Supported
/// placeholders: `{text}`, `{language}`, `{input}`, `{output}`, `{file}`,
/// `{list}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Directory for generated artifacts; uploads live in `uploads/` below it.
    pub artifact_dir: PathBuf,
    /// Speech synthesis. Must write a WAV file to `{output}`.
    pub tts_command: Vec<String>,
    /// Normalizes `{input}` into `{output}`. Empty copies the upload as-is.
    pub convert_command: Vec<String>,
    /// Prints the duration of `{input}` in seconds. Empty disables probing.
    pub probe_command: Vec<String>,
    /// Plays `{file}` and exits when done.
    pub player_command: Vec<String>,
    /// Chime played before every broadcast. Skipped if the file is missing.
    pub start_signal: Option<PathBuf>,
    /// Chime played after every broadcast. Skipped if the file is missing.
    pub end_signal: Option<PathBuf>,
    /// Joins the files named in the concat list `{list}` into `{output}`.
    pub concat_command: Vec<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            artifact_dir: PathBuf::from("data/audio"),
            tts_command: args(&["espeak-ng", "-v", "{language}", "-w", "{output}", "{text}"]),
            convert_command: args(&[
                "ffmpeg", "-y", "-loglevel", "error", "-i", "{input}", "-ac", "1", "-ar", "44100",
                "{output}",
            ]),
            probe_command: args(&[
                "ffprobe",
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
                "{input}",
            ]),
            player_command: args(&["ffplay", "-nodisp", "-autoexit", "-loglevel", "quiet", "{file}"]),
            start_signal: None,
            end_signal: None,
            concat_command: args(&[
                "ffmpeg", "-y", "-loglevel", "error", "-f", "concat", "-safe", "0", "-i", "{list}",
                "-ac", "1", "-ar", "44100", "{output}",
            ]),
        }
    }
}

/// Substitutes `{name}` placeholders in every argument.
fn expand(template: &[String], vars: &[(&str, &str)]) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |acc, (name, value)| {
                acc.replace(&format!("{{{}}}", name), value)
            })
        })
        .collect()
}

fn command_for(argv: &[String]) -> Option<Command> {
    let (program, rest) = argv.split_first()?;
    let mut command = Command::new(program);
    command.args(rest).stdin(Stdio::null());
    Some(command)
}

/// Runs a configured tool to completion and returns its stdout.
async fn run_tool(name: &str, template: &[String], vars: &[(&str, &str)]) -> AudioResult<String> {
    let argv = expand(template, vars);
    let mut command = command_for(&argv)
        .ok_or_else(|| AudioError::Generation(format!("{} command not configured", name)))?;

    let output = command.kill_on_drop(true).output().await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AudioError::Generation(format!(
            "{} exited with {}: {}",
            name,
            output.status,
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Body of an ffmpeg concat-demuxer list naming `parts` in order.
fn concat_list(parts: &[PathBuf]) -> String {
    parts
        .iter()
        .map(|part| {
            let path = part.to_string_lossy().replace('\'', "'\\''");
            format!("file '{}'\n", path)
        })
        .collect()
}

/// Speech length estimate used when probing is unavailable.
pub fn estimate_text_duration(text: &str) -> f64 {
    (text.chars().count() as f64 * TEXT_SECS_PER_CHAR).max(MIN_TEXT_DURATION_SECS)
}

/// [`AudioSynthesizer`] backed by external tools.
pub struct CommandAudioBackend {
    config: AudioConfig,
}

impl CommandAudioBackend {
    pub fn new(config: AudioConfig) -> Self {
        Self { config }
    }

    fn uploads_dir(&self) -> PathBuf {
        self.config.artifact_dir.join("uploads")
    }

    async fn ensure_dir(path: &Path) -> AudioResult<()> {
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }

    fn artifact_path(&self, prefix: &str) -> PathBuf {
        self.config
            .artifact_dir
            .join(format!("{}_{}.wav", prefix, Uuid::new_v4().simple()))
    }

    /// Probed duration in seconds, if the probe is configured and succeeds.
    async fn probe(&self, path: &Path) -> Option<f64> {
        if self.config.probe_command.is_empty() {
            return None;
        }
        let input = path.to_string_lossy();
        match run_tool("probe", &self.config.probe_command, &[("input", &input)]).await {
            Ok(stdout) => stdout
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|secs| secs.is_finite() && *secs > 0.0),
            Err(e) => {
                log::debug!("[Audio] Duration probe failed for {}: {}", path.display(), e);
                None
            }
        }
    }

    /// A configured signal file, if it exists.
    async fn signal(path: Option<&Path>) -> Option<PathBuf> {
        let path = path?;
        match tokio::fs::canonicalize(path).await {
            Ok(path) => Some(path),
            Err(e) => {
                log::warn!("[Audio] Signal {} unavailable: {}", path.display(), e);
                None
            }
        }
    }

    /// Wraps `body` in the configured start and end signals.
    ///
    /// Returns the artifact to play and the fallback duration of the signals
    /// it contains, used when the combined file cannot be probed. `body` is
    /// returned unchanged when no signal is available.
    async fn add_signals(&self, body: PathBuf) -> AudioResult<(PathBuf, f64)> {
        let start = Self::signal(self.config.start_signal.as_deref()).await;
        let end = Self::signal(self.config.end_signal.as_deref()).await;
        if start.is_none() && end.is_none() {
            return Ok((body, 0.0));
        }
        if self.config.concat_command.is_empty() {
            log::warn!("[Audio] No concat command configured, broadcasting without signals");
            return Ok((body, 0.0));
        }

        let mut signal_secs = 0.0;
        for signal in start.iter().chain(end.iter()) {
            signal_secs += self
                .probe(signal)
                .await
                .unwrap_or(DEFAULT_SIGNAL_DURATION_SECS);
        }

        let mut parts: Vec<PathBuf> = start.into_iter().collect();
        parts.push(tokio::fs::canonicalize(&body).await?);
        parts.extend(end);

        let output = self.artifact_path("broadcast");
        let list = output.with_extension("txt");
        tokio::fs::write(&list, concat_list(&parts)).await?;

        let list_str = list.to_string_lossy();
        let output_str = output.to_string_lossy();
        let joined = run_tool(
            "concat",
            &self.config.concat_command,
            &[("list", &list_str), ("output", &output_str)],
        )
        .await;

        for leftover in [&list, &body] {
            if let Err(e) = tokio::fs::remove_file(leftover).await {
                log::debug!("[Audio] Failed to remove {}: {}", leftover.display(), e);
            }
        }
        joined?;
        Ok((output, signal_secs))
    }

    async fn synthesize_text(&self, text: &str, language: &str) -> AudioResult<SynthesizedAudio> {
        if text.trim().is_empty() {
            return Err(AudioError::Generation("text is empty".into()));
        }
        Self::ensure_dir(&self.config.artifact_dir).await?;

        let output = self.artifact_path("tts");
        let output_str = output.to_string_lossy();
        run_tool(
            "tts",
            &self.config.tts_command,
            &[("text", text), ("language", language), ("output", &output_str)],
        )
        .await?;

        if tokio::fs::metadata(&output).await.is_err() {
            return Err(AudioError::Generation(
                "tts command produced no output file".into(),
            ));
        }

        let (output, signal_secs) = self.add_signals(output).await?;
        let duration_secs = match self.probe(&output).await {
            Some(secs) => secs,
            None => estimate_text_duration(text) + signal_secs,
        };
        log::info!(
            "[Audio] Synthesized {} chars ({}) -> {} ({:.1}s)",
            text.chars().count(),
            language,
            output.display(),
            duration_secs
        );
        Ok(SynthesizedAudio {
            artifact: AudioArtifact::new(output),
            duration_secs,
        })
    }

    async fn convert_upload(&self, upload_id: &str) -> AudioResult<SynthesizedAudio> {
        if !is_safe_identifier(upload_id) {
            return Err(AudioError::Generation(format!(
                "invalid upload id: {}",
                upload_id
            )));
        }
        let input = self.uploads_dir().join(upload_id);
        if tokio::fs::metadata(&input).await.is_err() {
            return Err(AudioError::Generation(format!(
                "upload not found: {}",
                upload_id
            )));
        }

        let output = self.artifact_path("audio");
        if self.config.convert_command.is_empty() {
            tokio::fs::copy(&input, &output).await?;
        } else {
            let input_str = input.to_string_lossy();
            let output_str = output.to_string_lossy();
            run_tool(
                "convert",
                &self.config.convert_command,
                &[("input", &input_str), ("output", &output_str)],
            )
            .await?;
        }

        let (output, signal_secs) = self.add_signals(output).await?;
        let duration_secs = match self.probe(&output).await {
            Some(secs) => secs,
            None => DEFAULT_AUDIO_DURATION_SECS + signal_secs,
        };
        log::info!(
            "[Audio] Converted upload {} -> {} ({:.1}s)",
            upload_id,
            output.display(),
            duration_secs
        );
        Ok(SynthesizedAudio {
            artifact: AudioArtifact::new(output),
            duration_secs,
        })
    }
}

#[async_trait]
impl AudioSynthesizer for CommandAudioBackend {
    async fn synthesize_or_convert(&self, params: &JobParams) -> AudioResult<SynthesizedAudio> {
        match params {
            JobParams::Text { text, language } => self.synthesize_text(text, language).await,
            JobParams::Audio { upload_id } => self.convert_upload(upload_id).await,
        }
    }

    async fn discard(&self, artifact: &AudioArtifact) {
        match tokio::fs::remove_file(&artifact.path).await {
            Ok(()) => log::debug!("[Audio] Discarded {}", artifact.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                "[Audio] Failed to discard {}: {}",
                artifact.path.display(),
                e
            ),
        }
    }

    async fn store_upload(&self, file_name: &str, data: Bytes) -> AudioResult<String> {
        if data.is_empty() {
            return Err(AudioError::Generation("upload is empty".into()));
        }
        let dir = self.uploads_dir();
        Self::ensure_dir(&dir).await?;

        let upload_id = generate_id(UPLOAD_ID_PREFIX);
        tokio::fs::write(dir.join(&upload_id), &data).await?;
        log::info!(
            "[Audio] Stored upload {} ({}, {} bytes)",
            upload_id,
            file_name,
            data.len()
        );
        Ok(upload_id)
    }
}

/// [`AudioPlayback`] that runs the configured player to completion.
///
/// The child is killed if the `play` future is dropped.
pub struct CommandPlayer {
    command: Vec<String>,
}

impl CommandPlayer {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            command: config.player_command.clone(),
        }
    }
}

#[async_trait]
impl AudioPlayback for CommandPlayer {
    async fn play(&self, artifact: &AudioArtifact) -> AudioResult<()> {
        let file = artifact.path.to_string_lossy();
        let argv = expand(&self.command, &[("file", &file)]);
        let mut command = command_for(&argv)
            .ok_or_else(|| AudioError::Playback("player command not configured".into()))?;

        let mut child = command
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        log::debug!("[Audio] Playing {}", artifact.path.display());

        let status = child.wait().await?;
        if status.success() {
            Ok(())
        } else {
            Err(AudioError::Playback(format!("player exited with {}", status)))
        }
    }
}
