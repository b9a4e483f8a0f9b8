//! Application services layer.
//!
//! This module contains the broadcast engine: the preview and queue stores
//! and the orchestrator that drives devices and playback through them.

pub mod broadcast_queue;
pub mod model;
pub mod orchestrator;
pub mod preview_store;

pub use broadcast_queue::{
    BroadcastQueue, CurrentJob, FinishedJob, JobExecutor, PendingJob, QueueStatus, QueueTicket,
};
pub use model::{BroadcastJob, JobParams, JobStatus, JobType, Preview, PreviewStatus};
pub use orchestrator::{
    ApprovalReceipt, BroadcastRequest, Collaborators, DeviceStatus, FrameReport, Orchestrator,
    PowerReport, PowerSwitch,
};
pub use preview_store::{NewPreview, PreviewStore};
