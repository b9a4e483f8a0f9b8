//! Preview and job records shared by the stores and the orchestrator.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audio::AudioArtifact;
use crate::devices::DeviceSet;
use crate::protocol_constants::{DEFAULT_TEXT_LANGUAGE, JOB_ID_PREFIX};
use crate::utils::now_millis;

/// Kind of broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Audio,
    Text,
}

pub(crate) fn default_language() -> String {
    DEFAULT_TEXT_LANGUAGE.to_string()
}

/// What to play.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JobParams {
    /// Synthesized speech.
    Text {
        text: String,
        #[serde(default = "default_language")]
        language: String,
    },
    /// A previously uploaded audio file.
    Audio {
        #[serde(rename = "uploadId")]
        upload_id: String,
    },
}

impl JobParams {
    pub fn job_type(&self) -> JobType {
        match self {
            Self::Text { .. } => JobType::Text,
            Self::Audio { .. } => JobType::Audio,
        }
    }
}

/// Preview lifecycle. `Approved` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewStatus {
    Pending,
    Approved,
    Rejected,
}

/// A generated broadcast awaiting approval.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Preview {
    pub id: String,
    pub job_type: JobType,
    pub target_devices: DeviceSet,
    /// Devices powered off or restored after playback.
    pub end_devices: DeviceSet,
    pub params: JobParams,
    pub artifact: AudioArtifact,
    pub duration_secs: f64,
    /// Per-broadcast override of the process-wide restore flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_restore: Option<bool>,
    /// Unix timestamp in milliseconds.
    pub created_at: u64,
    pub status: PreviewStatus,
}

/// Job lifecycle. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Playing,
    Completed,
    Failed,
}

/// An approved broadcast in the queue.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastJob {
    pub id: String,
    pub preview_id: String,
    pub job_type: JobType,
    pub target_devices: DeviceSet,
    pub end_devices: DeviceSet,
    pub params: JobParams,
    pub artifact: AudioArtifact,
    pub duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_restore: Option<bool>,
    /// Unix timestamp in milliseconds.
    pub created_at: u64,
    pub status: JobStatus,
}

impl BroadcastJob {
    /// Promotes an approved preview into a queued job.
    pub fn from_preview(preview: Preview) -> Self {
        Self {
            id: generate_id(JOB_ID_PREFIX),
            preview_id: preview.id,
            job_type: preview.job_type,
            target_devices: preview.target_devices,
            end_devices: preview.end_devices,
            params: preview.params,
            artifact: preview.artifact,
            duration_secs: preview.duration_secs,
            auto_restore: preview.auto_restore,
            created_at: now_millis(),
            status: JobStatus::Queued,
        }
    }

    /// Target and end devices combined.
    pub fn all_devices(&self) -> DeviceSet {
        self.target_devices
            .union(&self.end_devices)
            .cloned()
            .collect()
    }
}

/// Generates `{prefix}_{unix millis}_{8 hex chars}`.
pub(crate) fn generate_id(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", prefix, now_millis(), &suffix[..8])
}
