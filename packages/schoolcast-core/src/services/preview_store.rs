//! Pending previews awaiting operator approval.
//!
//! Approve and reject remove the record under the same lock that checks it,
//! so each preview resolves exactly once. Resolved ids are remembered in a
//! bounded list so a late second call reports `InvalidState` rather than
//! `NotFound`.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

use crate::audio::AudioArtifact;
use crate::devices::DeviceSet;
use crate::error::{BroadcastError, BroadcastResult};
use crate::protocol_constants::{PREVIEW_ID_PREFIX, RESOLVED_PREVIEW_MEMORY};
use crate::services::model::{generate_id, JobParams, Preview, PreviewStatus};
use crate::utils::now_millis;

/// Everything needed to register a preview.
#[derive(Debug, Clone)]
pub struct NewPreview {
    pub target_devices: DeviceSet,
    pub end_devices: DeviceSet,
    pub params: JobParams,
    pub artifact: AudioArtifact,
    pub duration_secs: f64,
    pub auto_restore: Option<bool>,
}

#[derive(Default)]
struct Inner {
    pending: HashMap<String, Preview>,
    resolved: VecDeque<(String, PreviewStatus)>,
}

impl Inner {
    fn remember(&mut self, id: String, status: PreviewStatus) {
        if self.resolved.len() >= RESOLVED_PREVIEW_MEMORY {
            self.resolved.pop_front();
        }
        self.resolved.push_back((id, status));
    }

    fn resolved_status(&self, id: &str) -> Option<PreviewStatus> {
        self.resolved
            .iter()
            .rev()
            .find(|(resolved, _)| resolved == id)
            .map(|(_, status)| *status)
    }
}

/// In-memory preview storage.
#[derive(Default)]
pub struct PreviewStore {
    inner: RwLock<Inner>,
}

impl PreviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new pending preview under a generated id.
    pub fn create(&self, new: NewPreview) -> Preview {
        let preview = Preview {
            id: generate_id(PREVIEW_ID_PREFIX),
            job_type: new.params.job_type(),
            target_devices: new.target_devices,
            end_devices: new.end_devices,
            params: new.params,
            artifact: new.artifact,
            duration_secs: new.duration_secs,
            auto_restore: new.auto_restore,
            created_at: now_millis(),
            status: PreviewStatus::Pending,
        };
        self.inner
            .write()
            .pending
            .insert(preview.id.clone(), preview.clone());
        preview
    }

    pub fn get(&self, id: &str) -> BroadcastResult<Preview> {
        self.inner
            .read()
            .pending
            .get(id)
            .cloned()
            .ok_or_else(|| BroadcastError::NotFound(format!("preview {}", id)))
    }

    /// Removes a pending preview and returns it marked approved.
    pub fn approve(&self, id: &str) -> BroadcastResult<Preview> {
        self.resolve(id, PreviewStatus::Approved)
    }

    /// Removes a pending preview and returns it marked rejected. The caller
    /// owns discarding its artifact.
    pub fn reject(&self, id: &str) -> BroadcastResult<Preview> {
        self.resolve(id, PreviewStatus::Rejected)
    }

    fn resolve(&self, id: &str, status: PreviewStatus) -> BroadcastResult<Preview> {
        let mut inner = self.inner.write();
        match inner.pending.remove(id) {
            Some(mut preview) => {
                preview.status = status;
                inner.remember(preview.id.clone(), status);
                Ok(preview)
            }
            None => Err(match inner.resolved_status(id) {
                Some(previous) => BroadcastError::InvalidState(format!(
                    "preview {} is already {:?}",
                    id, previous
                )),
                None => BroadcastError::NotFound(format!("preview {}", id)),
            }),
        }
    }

    /// Pending previews, oldest first.
    pub fn list_pending(&self) -> Vec<Preview> {
        let mut previews: Vec<Preview> = self.inner.read().pending.values().cloned().collect();
        previews.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        previews
    }

    pub fn len(&self) -> usize {
        self.inner.read().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
