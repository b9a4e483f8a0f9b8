//! Event system for real-time client notification.
//!
//! This module provides:
//! - [`EventEmitter`] trait for domain services to emit events
//! - [`BroadcastEventBridge`] for the server-sent events transport
//! - Event types for previews, jobs and devices

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

use crate::devices::{DeviceId, PowerState};
use crate::services::model::JobType;

/// Events broadcast to clients.
///
/// Each category has its own inner event type with specific variants.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum BroadcastEvent {
    /// Preview lifecycle.
    Preview(PreviewEvent),

    /// Queue and playback lifecycle.
    Job(JobEvent),

    /// Device power and restore-feature changes.
    Device(DeviceEvent),
}

impl BroadcastEvent {
    /// Event name used for the SSE `event:` field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Preview(_) => "preview",
            Self::Job(_) => "job",
            Self::Device(_) => "device",
        }
    }
}

/// Events related to preview creation and resolution.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PreviewEvent {
    /// A preview was generated and awaits approval.
    Created {
        #[serde(rename = "previewId")]
        preview_id: String,
        #[serde(rename = "jobType")]
        job_type: JobType,
        #[serde(rename = "durationSecs")]
        duration_secs: f64,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A preview was approved and promoted to a job.
    Approved {
        #[serde(rename = "previewId")]
        preview_id: String,
        #[serde(rename = "jobId")]
        job_id: String,
        timestamp: u64,
    },
    /// A preview was rejected and its audio discarded.
    Rejected {
        #[serde(rename = "previewId")]
        preview_id: String,
        timestamp: u64,
    },
}

/// Events related to queued and playing jobs.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum JobEvent {
    Queued {
        #[serde(rename = "jobId")]
        job_id: String,
        position: usize,
        #[serde(rename = "estimatedStartMillis")]
        estimated_start_millis: u64,
        timestamp: u64,
    },
    Started {
        #[serde(rename = "jobId")]
        job_id: String,
        timestamp: u64,
    },
    Completed {
        #[serde(rename = "jobId")]
        job_id: String,
        timestamp: u64,
    },
    /// The job failed. Device cleanup has already run.
    Failed {
        #[serde(rename = "jobId")]
        job_id: String,
        reason: String,
        timestamp: u64,
    },
    /// A queued job was removed before it started.
    Removed {
        #[serde(rename = "jobId")]
        job_id: String,
        timestamp: u64,
    },
}

/// Events related to device state.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DeviceEvent {
    /// A power command was delivered.
    PowerChanged {
        #[serde(rename = "deviceId")]
        device_id: DeviceId,
        power: PowerState,
        timestamp: u64,
    },
    /// A command to the device could not be sent.
    Unreachable {
        #[serde(rename = "deviceId")]
        device_id: DeviceId,
        reason: String,
        timestamp: u64,
    },
    /// Every device was switched off with one frame.
    AllOff { timestamp: u64 },
    /// The process-wide restore flag changed.
    RestoreToggled { enabled: bool, timestamp: u64 },
    /// Retained snapshots were discarded.
    BackupsCleared { count: usize, timestamp: u64 },
}

impl From<PreviewEvent> for BroadcastEvent {
    fn from(event: PreviewEvent) -> Self {
        BroadcastEvent::Preview(event)
    }
}

impl From<JobEvent> for BroadcastEvent {
    fn from(event: JobEvent) -> Self {
        BroadcastEvent::Job(event)
    }
}

impl From<DeviceEvent> for BroadcastEvent {
    fn from(event: DeviceEvent) -> Self {
        BroadcastEvent::Device(event)
    }
}
