//! Broadcast orchestration service.
//!
//! Responsibilities:
//! - Resolve targets and materialize previews through the audio collaborator
//! - Promote approved previews into queued jobs
//! - Execute dequeued jobs: power on, play with a hard timeout, then restore
//!   or power off
//! - Manual device control (power, all-off, state sync)
//! - Broadcast lifecycle events to SSE clients
//!
//! Every hardware send goes through one async lock, so a job's power-on or
//! cleanup batch never interleaves with another batch.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::audio::{AudioPlayback, AudioSynthesizer};
use crate::devices::{
    CommandPacket, CommandTransport, DeviceGroup, DeviceId, DeviceRegistry, DeviceSet,
    DeviceStateStore, GridPosition, PacketBuilder, PowerCommand, PowerState, RestoreInfo,
    SendOutcome,
};
use crate::error::{BroadcastError, BroadcastResult};
use crate::events::{DeviceEvent, EventEmitter, JobEvent, PreviewEvent};
use crate::protocol_constants::MAX_BROADCAST_DURATION_SECS;
use crate::services::broadcast_queue::{BroadcastQueue, JobExecutor, QueueStatus};
use crate::services::model::{BroadcastJob, JobParams, JobStatus, Preview};
use crate::services::preview_store::{NewPreview, PreviewStore};
use crate::utils::{now_millis, secs_f64_to_duration};

/// A request to generate a broadcast preview.
#[derive(Debug, Clone)]
pub struct BroadcastRequest {
    pub params: JobParams,
    /// Device ids, group names or `all`; comma-separated lists are accepted.
    pub targets: Vec<String>,
    /// Devices to power off or restore afterwards. Defaults to `targets`.
    pub end_targets: Option<Vec<String>>,
    /// Overrides the process-wide restore flag for this broadcast.
    pub auto_restore: Option<bool>,
}

/// Result of approving a preview.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalReceipt {
    pub job_id: String,
    pub queue_position: usize,
    pub estimated_start_millis: u64,
}

/// Per-device delivery result of a command batch.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerReport {
    pub sent: Vec<DeviceId>,
    pub failed: Vec<DeviceId>,
}

/// Delivery result of a full-grid frame.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameReport {
    pub delivered: bool,
    /// Devices encoded as on in the frame.
    pub powered_on: Vec<DeviceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Device view for operators.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub id: DeviceId,
    pub position: GridPosition,
    pub power: PowerState,
    pub online: bool,
}

/// Manual power target from operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerSwitch {
    On,
    Off,
}

impl From<PowerSwitch> for PowerCommand {
    fn from(switch: PowerSwitch) -> Self {
        match switch {
            PowerSwitch::On => PowerCommand::PowerOn,
            PowerSwitch::Off => PowerCommand::PowerOff,
        }
    }
}

/// External collaborators the orchestrator drives.
pub struct Collaborators {
    pub transport: Arc<dyn CommandTransport>,
    pub synthesizer: Arc<dyn AudioSynthesizer>,
    pub playback: Arc<dyn AudioPlayback>,
}

/// Façade over the registry, stores, queue and collaborators.
pub struct Orchestrator {
    registry: Arc<DeviceRegistry>,
    packets: PacketBuilder,
    states: DeviceStateStore,
    previews: PreviewStore,
    queue: Arc<BroadcastQueue>,
    collaborators: Collaborators,
    emitter: Arc<dyn EventEmitter>,
    timeout_factor: f64,
    hardware: tokio::sync::Mutex<()>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        packets: PacketBuilder,
        collaborators: Collaborators,
        emitter: Arc<dyn EventEmitter>,
        restore_enabled: bool,
        timeout_factor: f64,
    ) -> Self {
        Self {
            registry,
            packets,
            states: DeviceStateStore::new(restore_enabled),
            previews: PreviewStore::new(),
            queue: Arc::new(BroadcastQueue::new()),
            collaborators,
            emitter,
            timeout_factor,
            hardware: tokio::sync::Mutex::new(()),
        }
    }

    /// Drains the broadcast queue until `cancel` fires.
    pub async fn run_queue(self: Arc<Self>, cancel: CancellationToken) {
        let queue = Arc::clone(&self.queue);
        queue.run(self, cancel).await;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Previews
    // ─────────────────────────────────────────────────────────────────────────

    /// Resolves targets, generates audio and stores a pending preview.
    ///
    /// # Errors
    ///
    /// - [`BroadcastError::UnknownTarget`] for an unresolvable token
    /// - [`BroadcastError::InvalidRequest`] if no device is targeted
    /// - [`BroadcastError::PreviewGeneration`] if the audio collaborator fails
    ///   or reports a duration outside `(0, MAX_BROADCAST_DURATION_SECS]`
    pub async fn create_preview(&self, request: BroadcastRequest) -> BroadcastResult<Preview> {
        let target_devices = self.registry.resolve(request.targets.as_slice())?;
        if target_devices.is_empty() {
            return Err(BroadcastError::InvalidRequest(
                "at least one target device is required".into(),
            ));
        }
        let end_devices = match &request.end_targets {
            Some(tokens) => self.registry.resolve(tokens.as_slice())?,
            None => target_devices.clone(),
        };
        self.ensure_addressable(&target_devices)?;
        self.ensure_addressable(&end_devices)?;

        let audio = self
            .collaborators
            .synthesizer
            .synthesize_or_convert(&request.params)
            .await?;
        if !(audio.duration_secs.is_finite()
            && audio.duration_secs > 0.0
            && audio.duration_secs <= MAX_BROADCAST_DURATION_SECS)
        {
            self.collaborators.synthesizer.discard(&audio.artifact).await;
            return Err(BroadcastError::PreviewGeneration(format!(
                "invalid duration estimate: {}",
                audio.duration_secs
            )));
        }

        let preview = self.previews.create(NewPreview {
            target_devices,
            end_devices,
            params: request.params,
            artifact: audio.artifact,
            duration_secs: audio.duration_secs,
            auto_restore: request.auto_restore,
        });
        log::info!(
            "[Orchestrator] Preview {} created: {:?}, {} targets, {:.1}s",
            preview.id,
            preview.job_type,
            preview.target_devices.len(),
            preview.duration_secs
        );
        self.emitter.emit_preview(PreviewEvent::Created {
            preview_id: preview.id.clone(),
            job_type: preview.job_type,
            duration_secs: preview.duration_secs,
            timestamp: now_millis(),
        });
        Ok(preview)
    }

    /// Promotes a pending preview into a queued job.
    pub fn approve_preview(&self, id: &str) -> BroadcastResult<ApprovalReceipt> {
        let preview = self.previews.approve(id)?;
        let job = BroadcastJob::from_preview(preview);
        let job_id = job.id.clone();
        let ticket = self.queue.enqueue(job);

        log::info!(
            "[Orchestrator] Preview {} approved as {} (position {})",
            id,
            job_id,
            ticket.position
        );
        let timestamp = now_millis();
        self.emitter.emit_preview(PreviewEvent::Approved {
            preview_id: id.to_string(),
            job_id: job_id.clone(),
            timestamp,
        });
        self.emitter.emit_job(JobEvent::Queued {
            job_id: job_id.clone(),
            position: ticket.position,
            estimated_start_millis: ticket.estimated_start_millis,
            timestamp,
        });

        Ok(ApprovalReceipt {
            job_id,
            queue_position: ticket.position,
            estimated_start_millis: ticket.estimated_start_millis,
        })
    }

    /// Drops a pending preview and discards its audio.
    pub async fn reject_preview(&self, id: &str) -> BroadcastResult<Preview> {
        let preview = self.previews.reject(id)?;
        self.collaborators
            .synthesizer
            .discard(&preview.artifact)
            .await;
        log::info!("[Orchestrator] Preview {} rejected", id);
        self.emitter.emit_preview(PreviewEvent::Rejected {
            preview_id: preview.id.clone(),
            timestamp: now_millis(),
        });
        Ok(preview)
    }

    pub fn get_preview(&self, id: &str) -> BroadcastResult<Preview> {
        self.previews.get(id)
    }

    pub fn list_previews(&self) -> Vec<Preview> {
        self.previews.list_pending()
    }

    /// Stores uploaded audio for later audio previews.
    pub async fn upload_audio(&self, file_name: &str, data: Bytes) -> BroadcastResult<String> {
        if data.is_empty() {
            return Err(BroadcastError::InvalidRequest("upload body is empty".into()));
        }
        Ok(self
            .collaborators
            .synthesizer
            .store_upload(file_name, data)
            .await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queue
    // ─────────────────────────────────────────────────────────────────────────

    pub fn queue_status(&self) -> QueueStatus {
        self.queue.status()
    }

    /// Removes a job that has not started playing and discards its audio.
    pub async fn remove_queued_job(&self, job_id: &str) -> BroadcastResult<BroadcastJob> {
        let job = self.queue.remove_queued(job_id)?;
        self.collaborators.synthesizer.discard(&job.artifact).await;
        log::info!("[Orchestrator] Queued job {} removed", job_id);
        self.emitter.emit_job(JobEvent::Removed {
            job_id: job.id.clone(),
            timestamp: now_millis(),
        });
        Ok(job)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Restore Feature
    // ─────────────────────────────────────────────────────────────────────────

    pub fn set_restore_enabled(&self, enabled: bool) -> RestoreInfo {
        self.states.set_restore_enabled(enabled);
        log::info!("[Orchestrator] Restore after broadcast: {}", enabled);
        self.emitter.emit_device(DeviceEvent::RestoreToggled {
            enabled,
            timestamp: now_millis(),
        });
        self.states.restore_info()
    }

    pub fn restore_info(&self) -> RestoreInfo {
        self.states.restore_info()
    }

    /// Discards every retained snapshot. Returns how many were discarded.
    pub fn clear_restore_backups(&self) -> usize {
        let count = self.states.clear_all();
        log::info!("[Orchestrator] Cleared {} restore backups", count);
        self.emitter.emit_device(DeviceEvent::BackupsCleared {
            count,
            timestamp: now_millis(),
        });
        count
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Manual Device Control
    // ─────────────────────────────────────────────────────────────────────────

    /// Powers the resolved devices on or off.
    pub async fn set_power<S: AsRef<str>>(
        &self,
        targets: &[S],
        command: PowerCommand,
    ) -> BroadcastResult<PowerReport> {
        let devices = self.registry.resolve(targets)?;
        if devices.is_empty() {
            return Err(BroadcastError::InvalidRequest(
                "at least one target device is required".into(),
            ));
        }
        self.send_power(&devices, command).await
    }

    /// Sends one frame with every device off.
    pub async fn all_off(&self) -> BroadcastResult<FrameReport> {
        let packet = self.packets.build_frame(&[])?;
        let report = self.send_frame(&packet, Vec::new()).await;
        if report.delivered {
            self.states.mark_all_off();
            self.emitter.emit_device(DeviceEvent::AllOff {
                timestamp: now_millis(),
            });
        }
        Ok(report)
    }

    /// Re-sends the last known on-set as one absolute frame.
    pub async fn sync_devices(&self) -> BroadcastResult<FrameReport> {
        let powered_on = self.states.powered_on();
        let packet = self.packets.build_frame(&self.positions(&powered_on)?)?;
        Ok(self
            .send_frame(&packet, powered_on.into_iter().collect())
            .await)
    }

    /// Every device in grid order with its last known state.
    pub fn device_states(&self) -> Vec<DeviceStatus> {
        self.registry
            .devices()
            .iter()
            .map(|device| DeviceStatus {
                id: device.id.clone(),
                position: device.position,
                power: self.states.power(&device.id),
                online: self.states.is_online(&device.id),
            })
            .collect()
    }

    pub fn groups(&self) -> Vec<DeviceGroup> {
        self.registry.groups().cloned().collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Hardware
    // ─────────────────────────────────────────────────────────────────────────

    fn ensure_addressable(&self, ids: &DeviceSet) -> BroadcastResult<()> {
        for device in self.registry.devices_for(ids)? {
            if !self.packets.supports(device.position) {
                return Err(BroadcastError::UnsupportedDevice(device.id.to_string()));
            }
        }
        Ok(())
    }

    async fn send_power(
        &self,
        ids: &DeviceSet,
        command: PowerCommand,
    ) -> BroadcastResult<PowerReport> {
        self.send_commands(ids.iter().map(|id| (id.clone(), command)).collect())
            .await
    }

    /// Sends one frame carrying the last known on-set with the commanded
    /// devices switched, and records every device from that single outcome.
    ///
    /// The frame is built under the hardware lock so the on-set cannot change
    /// between build and send. Build failures abort before anything is sent.
    /// A send failure marks the batch unreachable and never aborts the caller.
    async fn send_commands(
        &self,
        commands: Vec<(DeviceId, PowerCommand)>,
    ) -> BroadcastResult<PowerReport> {
        let mut report = PowerReport::default();
        if commands.is_empty() {
            return Ok(report);
        }

        let _hardware = self.hardware.lock().await;
        let current = self.states.powered_on();
        let packet = match commands.as_slice() {
            [(id, command)] => {
                let device = self
                    .registry
                    .device(id.as_str())
                    .ok_or_else(|| BroadcastError::UnknownTarget(id.to_string()))?;
                let mut others = current;
                others.remove(id);
                self.packets
                    .build(device, *command, &self.positions(&others)?)?
            }
            _ => {
                let mut next = current;
                for (id, command) in &commands {
                    match command {
                        PowerCommand::PowerOn => next.insert(id.clone()),
                        PowerCommand::PowerOff => next.remove(id),
                    };
                }
                self.packets.build_frame(&self.positions(&next)?)?
            }
        };

        match self.collaborators.transport.send(&packet).await {
            SendOutcome::Sent => {
                log::debug!("[Orchestrator] Sent {}", packet.target);
                for (id, command) in commands {
                    let power = PowerState::from(command);
                    self.states.record_power(&id, power);
                    self.emitter.emit_device(DeviceEvent::PowerChanged {
                        device_id: id.clone(),
                        power,
                        timestamp: now_millis(),
                    });
                    report.sent.push(id);
                }
            }
            SendOutcome::Failed(reason) => {
                log::warn!("[Orchestrator] {} not sent: {}", packet.target, reason);
                for (id, _) in commands {
                    self.states.record_unreachable(&id);
                    self.emitter.emit_device(DeviceEvent::Unreachable {
                        device_id: id.clone(),
                        reason: reason.clone(),
                        timestamp: now_millis(),
                    });
                    report.failed.push(id);
                }
            }
        }
        Ok(report)
    }

    fn positions(&self, ids: &DeviceSet) -> BroadcastResult<Vec<GridPosition>> {
        Ok(self
            .registry
            .devices_for(ids)?
            .iter()
            .map(|d| d.position)
            .collect())
    }

    async fn send_frame(&self, packet: &CommandPacket, powered_on: Vec<DeviceId>) -> FrameReport {
        let _hardware = self.hardware.lock().await;
        match self.collaborators.transport.send(packet).await {
            SendOutcome::Sent => {
                log::info!("[Orchestrator] Sent {}", packet.target);
                FrameReport {
                    delivered: true,
                    powered_on,
                    error: None,
                }
            }
            SendOutcome::Failed(reason) => {
                log::warn!("[Orchestrator] {} not sent: {}", packet.target, reason);
                FrameReport {
                    delivered: false,
                    powered_on,
                    error: Some(reason),
                }
            }
        }
    }

    /// Powers targets on and plays the artifact within the hard timeout.
    async fn power_on_and_play(&self, job: &BroadcastJob) -> Result<(), String> {
        let report = self
            .send_power(&job.target_devices, PowerCommand::PowerOn)
            .await
            .map_err(|e| format!("power-on failed: {}", e))?;
        if !report.failed.is_empty() {
            log::warn!(
                "[Orchestrator] Job {}: {} of {} targets unreachable",
                job.id,
                report.failed.len(),
                job.target_devices.len()
            );
        }

        let limit = secs_f64_to_duration(job.duration_secs * self.timeout_factor);
        match tokio::time::timeout(limit, self.collaborators.playback.play(&job.artifact)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "playback exceeded {:.1}s hard timeout",
                limit.as_secs_f64()
            )),
        }
    }
}

#[async_trait]
impl JobExecutor for Orchestrator {
    async fn execute(&self, job: &BroadcastJob) -> JobStatus {
        self.emitter.emit_job(JobEvent::Started {
            job_id: job.id.clone(),
            timestamp: now_millis(),
        });

        let restore = job
            .auto_restore
            .unwrap_or_else(|| self.states.is_restore_enabled());
        let snapshot = restore.then(|| self.states.snapshot(&job.all_devices()));

        let mut failure = self.power_on_and_play(job).await.err();

        let cleanup = match &snapshot {
            Some(snapshot) => {
                let commands = self.states.restore(snapshot);
                self.send_commands(commands).await
            }
            None => self.send_power(&job.end_devices, PowerCommand::PowerOff).await,
        };
        if let Err(e) = cleanup {
            log::error!("[Orchestrator] Job {} cleanup failed: {}", job.id, e);
            failure.get_or_insert_with(|| format!("cleanup failed: {}", e));
        }

        self.collaborators.synthesizer.discard(&job.artifact).await;

        match failure {
            None => {
                log::info!("[Orchestrator] Job {} completed", job.id);
                self.emitter.emit_job(JobEvent::Completed {
                    job_id: job.id.clone(),
                    timestamp: now_millis(),
                });
                JobStatus::Completed
            }
            Some(reason) => {
                log::error!("[Orchestrator] Job {} failed: {}", job.id, reason);
                self.emitter.emit_job(JobEvent::Failed {
                    job_id: job.id.clone(),
                    reason,
                    timestamp: now_millis(),
                });
                JobStatus::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioArtifact, AudioError, AudioResult, SynthesizedAudio};
    use crate::devices::{GridConfig, PacketLayout, PacketTarget};
    use crate::events::NoopEventEmitter;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Records every packet; fails every send while `offline` is set.
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<CommandPacket>>,
        offline: AtomicBool,
    }

    #[async_trait]
    impl CommandTransport for RecordingTransport {
        async fn send(&self, packet: &CommandPacket) -> SendOutcome {
            self.sent.lock().push(packet.clone());
            if self.offline.load(Ordering::SeqCst) {
                SendOutcome::Failed("host unreachable".into())
            } else {
                SendOutcome::Sent
            }
        }
    }

    /// Returns a fixed duration; counts discards.
    struct FakeSynth {
        duration_secs: f64,
        fail: bool,
        discarded: Mutex<Vec<AudioArtifact>>,
    }

    impl FakeSynth {
        fn new(duration_secs: f64) -> Self {
            Self {
                duration_secs,
                fail: false,
                discarded: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AudioSynthesizer for FakeSynth {
        async fn synthesize_or_convert(&self, _params: &JobParams) -> AudioResult<SynthesizedAudio> {
            if self.fail {
                return Err(AudioError::Generation("tts offline".into()));
            }
            Ok(SynthesizedAudio {
                artifact: AudioArtifact::new("/tmp/fake.wav"),
                duration_secs: self.duration_secs,
            })
        }

        async fn discard(&self, artifact: &AudioArtifact) {
            self.discarded.lock().push(artifact.clone());
        }

        async fn store_upload(&self, _file_name: &str, _data: Bytes) -> AudioResult<String> {
            Ok("upload_0_00000000".into())
        }
    }

    enum PlayMode {
        Finish(Duration),
        Hang,
        Fail,
    }

    struct FakePlayer {
        mode: PlayMode,
    }

    #[async_trait]
    impl AudioPlayback for FakePlayer {
        async fn play(&self, _artifact: &AudioArtifact) -> AudioResult<()> {
            match self.mode {
                PlayMode::Finish(d) => {
                    tokio::time::sleep(d).await;
                    Ok(())
                }
                PlayMode::Hang => std::future::pending().await,
                PlayMode::Fail => Err(AudioError::Playback("device busy".into())),
            }
        }
    }

    struct Harness {
        orchestrator: Arc<Orchestrator>,
        transport: Arc<RecordingTransport>,
        synth: Arc<FakeSynth>,
    }

    impl Harness {
        /// Decodes every sent frame into the device ids it leaves on.
        fn on_sets(&self) -> Vec<Vec<String>> {
            let orchestrator = &self.orchestrator;
            self.transport
                .sent
                .lock()
                .iter()
                .map(|packet| {
                    orchestrator
                        .packets
                        .decode_frame(&packet.bytes)
                        .unwrap()
                        .into_iter()
                        .map(|position| {
                            orchestrator
                                .registry
                                .devices()
                                .iter()
                                .find(|d| d.position == position)
                                .unwrap()
                                .id
                                .to_string()
                        })
                        .collect()
                })
                .collect()
        }

        fn last_on_set(&self) -> Vec<String> {
            self.on_sets().pop().unwrap_or_default()
        }

        fn stored_on_set(&self) -> Vec<String> {
            self.orchestrator
                .states
                .powered_on()
                .iter()
                .map(ToString::to_string)
                .collect()
        }
    }

    fn harness_with(
        restore: bool,
        synth: FakeSynth,
        mode: PlayMode,
        transport: RecordingTransport,
    ) -> Harness {
        let registry = Arc::new(DeviceRegistry::from_grid(&GridConfig::default()).unwrap());
        let packets =
            PacketBuilder::new(PacketLayout::default(), "127.0.0.1:22000".parse().unwrap())
                .unwrap();
        let transport = Arc::new(transport);
        let synth = Arc::new(synth);
        let orchestrator = Arc::new(Orchestrator::new(
            registry,
            packets,
            Collaborators {
                transport: transport.clone(),
                synthesizer: synth.clone(),
                playback: Arc::new(FakePlayer { mode }),
            },
            Arc::new(NoopEventEmitter),
            restore,
            2.0,
        ));
        Harness {
            orchestrator,
            transport,
            synth,
        }
    }

    fn harness(restore: bool, duration_secs: f64, mode: PlayMode) -> Harness {
        harness_with(
            restore,
            FakeSynth::new(duration_secs),
            mode,
            RecordingTransport::default(),
        )
    }

    fn text_request(targets: &[&str]) -> BroadcastRequest {
        BroadcastRequest {
            params: JobParams::Text {
                text: "Please gather in the auditorium".into(),
                language: "en".into(),
            },
            targets: targets.iter().map(|t| t.to_string()).collect(),
            end_targets: None,
            auto_restore: None,
        }
    }

    async fn run_one(h: &Harness, request: BroadcastRequest) -> JobStatus {
        let preview = h.orchestrator.create_preview(request).await.unwrap();
        h.orchestrator.approve_preview(&preview.id).unwrap();
        let job = h.orchestrator.queue.try_start().unwrap();
        h.orchestrator.execute(&job).await
    }

    #[tokio::test]
    async fn preview_resolves_comma_separated_targets() {
        let h = harness(false, 8.5, PlayMode::Finish(Duration::ZERO));
        let preview = h
            .orchestrator
            .create_preview(text_request(&["1-1,1-2"]))
            .await
            .unwrap();

        let targets: Vec<&str> = preview.target_devices.iter().map(DeviceId::as_str).collect();
        assert_eq!(targets, vec!["1-1", "1-2"]);
        assert_eq!(preview.end_devices, preview.target_devices);
        assert_eq!(h.orchestrator.list_previews().len(), 1);
    }

    #[tokio::test]
    async fn unknown_target_is_rejected_before_synthesis() {
        let h = harness(false, 8.5, PlayMode::Finish(Duration::ZERO));
        let err = h
            .orchestrator
            .create_preview(text_request(&["1-1", "gym"]))
            .await
            .unwrap_err();
        assert!(matches!(err, BroadcastError::UnknownTarget(t) if t == "gym"));
        assert!(h.orchestrator.list_previews().is_empty());
    }

    #[tokio::test]
    async fn synthesis_failure_is_preview_generation_error() {
        let mut synth = FakeSynth::new(5.0);
        synth.fail = true;
        let h = harness_with(
            false,
            synth,
            PlayMode::Finish(Duration::ZERO),
            RecordingTransport::default(),
        );
        let err = h
            .orchestrator
            .create_preview(text_request(&["1-1"]))
            .await
            .unwrap_err();
        assert!(matches!(err, BroadcastError::PreviewGeneration(_)));
    }

    #[tokio::test]
    async fn approve_on_idle_queue_is_first_in_line() {
        let h = harness(false, 8.5, PlayMode::Finish(Duration::ZERO));
        let preview = h
            .orchestrator
            .create_preview(text_request(&["1-1,1-2"]))
            .await
            .unwrap();

        let before = now_millis();
        let receipt = h.orchestrator.approve_preview(&preview.id).unwrap();
        assert_eq!(receipt.queue_position, 1);
        assert!(receipt.estimated_start_millis.abs_diff(before) < 1_000);
        assert!(h.orchestrator.list_previews().is_empty());
    }

    #[tokio::test]
    async fn preview_resolves_exactly_once() {
        let h = harness(false, 3.0, PlayMode::Finish(Duration::ZERO));
        let a = h
            .orchestrator
            .create_preview(text_request(&["1-1"]))
            .await
            .unwrap();
        let b = h
            .orchestrator
            .create_preview(text_request(&["1-2"]))
            .await
            .unwrap();

        h.orchestrator.approve_preview(&a.id).unwrap();
        assert!(matches!(
            h.orchestrator.approve_preview(&a.id),
            Err(BroadcastError::InvalidState(_))
        ));

        h.orchestrator.reject_preview(&b.id).await.unwrap();
        assert!(matches!(
            h.orchestrator.reject_preview(&b.id).await,
            Err(BroadcastError::InvalidState(_))
        ));
        assert_eq!(h.synth.discarded.lock().len(), 1);
        assert!(matches!(
            h.orchestrator.get_preview("preview_1_nothere"),
            Err(BroadcastError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn restore_disabled_powers_off_end_devices() {
        let h = harness(false, 4.0, PlayMode::Finish(Duration::from_secs(4)));
        h.orchestrator
            .set_power(&["1-1"], PowerCommand::PowerOn)
            .await
            .unwrap();

        let status = run_one(&h, text_request(&["1-1", "1-2"])).await;
        assert_eq!(status, JobStatus::Completed);

        assert_eq!(
            h.on_sets(),
            vec![vec!["1-1"], vec!["1-1", "1-2"], vec![]]
        );
        for id in ["1-1", "1-2"] {
            assert_eq!(
                h.orchestrator.states.power(&DeviceId::new(id)),
                PowerState::Off
            );
        }
        assert_eq!(h.synth.discarded.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restore_enabled_returns_devices_to_prior_state() {
        let h = harness(true, 2.0, PlayMode::Finish(Duration::from_secs(1)));
        h.orchestrator
            .set_power(&["1-1", "3-1"], PowerCommand::PowerOn)
            .await
            .unwrap();

        let status = run_one(&h, text_request(&["1-1", "1-2"])).await;
        assert_eq!(status, JobStatus::Completed);

        assert_eq!(
            h.on_sets(),
            vec![
                vec!["1-1", "3-1"],
                vec!["1-1", "1-2", "3-1"],
                vec!["1-1", "3-1"],
            ]
        );
        let states = &h.orchestrator.states;
        assert_eq!(states.power(&DeviceId::new("1-1")), PowerState::On);
        assert_eq!(states.power(&DeviceId::new("1-2")), PowerState::Off);
        assert_eq!(h.stored_on_set(), h.last_on_set());
        assert_eq!(h.orchestrator.restore_info().backup_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn per_request_restore_overrides_global_flag() {
        let h = harness(true, 2.0, PlayMode::Finish(Duration::from_secs(1)));
        h.orchestrator
            .set_power(&["1-1"], PowerCommand::PowerOn)
            .await
            .unwrap();

        let mut request = text_request(&["1-1"]);
        request.auto_restore = Some(false);
        run_one(&h, request).await;

        assert_eq!(
            h.orchestrator.states.power(&DeviceId::new("1-1")),
            PowerState::Off
        );
        assert!(h.last_on_set().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_playback_fails_after_hard_timeout_and_still_cleans_up() {
        let h = harness(false, 5.0, PlayMode::Hang);
        let started = tokio::time::Instant::now();

        let status = run_one(&h, text_request(&["1-1", "1-2"])).await;

        assert_eq!(status, JobStatus::Failed);
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_secs(11));
        assert_eq!(h.on_sets(), vec![vec!["1-1", "1-2"], vec![]]);
    }

    #[tokio::test(start_paused = true)]
    async fn playback_error_fails_job_but_restores() {
        let h = harness(true, 3.0, PlayMode::Fail);
        let status = run_one(&h, text_request(&["1-1"])).await;
        assert_eq!(status, JobStatus::Failed);
        assert_eq!(h.on_sets(), vec![vec!["1-1"], vec![]]);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_device_does_not_abort_job() {
        let transport = RecordingTransport {
            offline: AtomicBool::new(true),
            ..Default::default()
        };
        let h = harness_with(
            false,
            FakeSynth::new(1.0),
            PlayMode::Finish(Duration::from_millis(500)),
            transport,
        );

        let status = run_one(&h, text_request(&["1-1", "1-2"])).await;
        assert_eq!(status, JobStatus::Completed);
        assert_eq!(h.transport.sent.lock().len(), 2);
        for id in ["1-1", "1-2"] {
            let id = DeviceId::new(id);
            assert!(!h.orchestrator.states.is_online(&id));
            assert_eq!(h.orchestrator.states.power(&id), PowerState::Off);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn end_devices_may_differ_from_targets() {
        let h = harness(false, 1.0, PlayMode::Finish(Duration::from_millis(100)));
        let mut request = text_request(&["1-1"]);
        request.end_targets = Some(vec!["1-1".into(), "auditorium".into()]);
        run_one(&h, request).await;

        assert_eq!(h.on_sets(), vec![vec!["1-1"], vec![]]);
        assert_eq!(
            h.orchestrator.states.power(&DeviceId::new("auditorium")),
            PowerState::Off
        );
    }

    #[tokio::test(start_paused = true)]
    async fn queue_consumer_executes_approved_jobs() {
        let h = harness(false, 2.0, PlayMode::Finish(Duration::from_secs(2)));
        let cancel = CancellationToken::new();
        let consumer = tokio::spawn(Arc::clone(&h.orchestrator).run_queue(cancel.clone()));

        for target in ["1-1", "2-1"] {
            let preview = h
                .orchestrator
                .create_preview(text_request(&[target]))
                .await
                .unwrap();
            h.orchestrator.approve_preview(&preview.id).unwrap();
        }

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(
            h.on_sets(),
            vec![vec!["1-1"], vec![], vec!["2-1"], vec![]]
        );
        let status = h.orchestrator.queue_status();
        assert!(!status.is_playing);
        assert_eq!(
            status.last_finished.map(|f| f.job.status),
            Some(JobStatus::Completed)
        );

        cancel.cancel();
        consumer.await.unwrap();
    }

    #[tokio::test]
    async fn remove_queued_job_discards_audio() {
        let h = harness(false, 2.0, PlayMode::Finish(Duration::ZERO));
        let preview = h
            .orchestrator
            .create_preview(text_request(&["1-1"]))
            .await
            .unwrap();
        let receipt = h.orchestrator.approve_preview(&preview.id).unwrap();

        h.orchestrator
            .remove_queued_job(&receipt.job_id)
            .await
            .unwrap();
        assert!(h.orchestrator.queue_status().pending.is_empty());
        assert_eq!(h.synth.discarded.lock().len(), 1);
    }

    #[tokio::test]
    async fn all_off_and_sync_send_full_frames() {
        let h = harness(false, 2.0, PlayMode::Finish(Duration::ZERO));
        h.orchestrator
            .set_power(&["grade1"], PowerCommand::PowerOn)
            .await
            .unwrap();

        let sync = h.orchestrator.sync_devices().await.unwrap();
        assert!(sync.delivered);
        assert_eq!(sync.powered_on.len(), 4);

        let off = h.orchestrator.all_off().await.unwrap();
        assert!(off.delivered);
        assert!(h
            .orchestrator
            .device_states()
            .iter()
            .all(|d| d.power == PowerState::Off));
        assert!(matches!(
            h.transport.sent.lock().last().map(|p| &p.target),
            Some(PacketTarget::Frame { powered_on: 0 })
        ));
        assert!(h.last_on_set().is_empty());
    }

    #[tokio::test]
    async fn power_commands_keep_unrelated_devices_on() {
        let h = harness(false, 2.0, PlayMode::Finish(Duration::ZERO));
        h.orchestrator
            .set_power(&["2-1"], PowerCommand::PowerOn)
            .await
            .unwrap();
        h.orchestrator
            .set_power(&["1-1", "1-2"], PowerCommand::PowerOn)
            .await
            .unwrap();

        assert_eq!(h.last_on_set(), vec!["1-1", "1-2", "2-1"]);
        assert_eq!(h.stored_on_set(), h.last_on_set());

        h.orchestrator
            .set_power(&["1-2"], PowerCommand::PowerOff)
            .await
            .unwrap();
        assert_eq!(h.last_on_set(), vec!["1-1", "2-1"]);
        assert!(matches!(
            h.transport.sent.lock().last().map(|p| &p.target),
            Some(PacketTarget::Device {
                command: PowerCommand::PowerOff,
                ..
            })
        ));
        assert_eq!(h.stored_on_set(), h.last_on_set());
    }

    #[tokio::test(start_paused = true)]
    async fn job_leaves_devices_outside_its_targets_untouched() {
        let h = harness(false, 1.0, PlayMode::Finish(Duration::from_millis(200)));
        h.orchestrator
            .set_power(&["2-1"], PowerCommand::PowerOn)
            .await
            .unwrap();

        let status = run_one(&h, text_request(&["1-1", "1-2"])).await;
        assert_eq!(status, JobStatus::Completed);

        assert_eq!(
            h.on_sets(),
            vec![vec!["2-1"], vec!["1-1", "1-2", "2-1"], vec!["2-1"]]
        );
        assert_eq!(h.stored_on_set(), vec!["2-1"]);
    }

    #[tokio::test]
    async fn unrepresentable_duration_is_rejected() {
        let h = harness(false, 1e20, PlayMode::Finish(Duration::ZERO));
        let err = h
            .orchestrator
            .create_preview(text_request(&["1-1"]))
            .await
            .unwrap_err();

        assert!(matches!(err, BroadcastError::PreviewGeneration(_)));
        assert!(h.orchestrator.list_previews().is_empty());
        assert_eq!(h.synth.discarded.lock().len(), 1);
        assert!(h.transport.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn restore_controls() {
        let h = harness(true, 2.0, PlayMode::Finish(Duration::ZERO));
        assert!(h.orchestrator.restore_info().restore_enabled);
        assert!(!h.orchestrator.set_restore_enabled(false).restore_enabled);
        assert_eq!(h.orchestrator.clear_restore_backups(), 0);
        assert!(h.orchestrator.groups().iter().any(|g| g.name == "all"));
    }
}
