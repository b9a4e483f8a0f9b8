//! Last-known device power state and pre-broadcast snapshots.
//!
//! The receiver has no read-back, so "state" here is whatever this process
//! last commanded. Snapshots are retained until restored or cleared; a
//! snapshot can be restored at most once.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::devices::packet::PowerCommand;
use crate::devices::registry::{DeviceId, DeviceSet};
use crate::utils::now_millis;

/// Last observed power state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    On,
    #[default]
    Off,
}

impl PowerState {
    /// The command that puts a device into this state.
    pub const fn command(self) -> PowerCommand {
        match self {
            Self::On => PowerCommand::PowerOn,
            Self::Off => PowerCommand::PowerOff,
        }
    }
}

impl From<PowerCommand> for PowerState {
    fn from(command: PowerCommand) -> Self {
        match command {
            PowerCommand::PowerOn => Self::On,
            PowerCommand::PowerOff => Self::Off,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct DeviceRecord {
    power: PowerState,
    online: bool,
}

impl Default for DeviceRecord {
    fn default() -> Self {
        Self {
            power: PowerState::Off,
            online: true,
        }
    }
}

/// Identifier of a retained snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SnapshotId(u64);

/// Power states captured immediately before a job powers its devices on.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStateSnapshot {
    pub id: SnapshotId,
    pub states: BTreeMap<DeviceId, PowerState>,
    pub taken_at: u64,
}

/// Restore-feature summary for operators.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreInfo {
    pub restore_enabled: bool,
    pub backup_count: usize,
    pub backup_devices: Vec<DeviceId>,
    pub backup_states: BTreeMap<DeviceId, PowerState>,
}

/// In-memory device state cache with snapshot/restore.
pub struct DeviceStateStore {
    states: DashMap<DeviceId, DeviceRecord>,
    snapshots: Mutex<BTreeMap<SnapshotId, DeviceStateSnapshot>>,
    next_snapshot: AtomicU64,
    restore_enabled: AtomicBool,
}

impl DeviceStateStore {
    pub fn new(restore_enabled: bool) -> Self {
        Self {
            states: DashMap::new(),
            snapshots: Mutex::new(BTreeMap::new()),
            next_snapshot: AtomicU64::new(1),
            restore_enabled: AtomicBool::new(restore_enabled),
        }
    }

    /// Last known power state; devices never commanded are off.
    pub fn power(&self, id: &DeviceId) -> PowerState {
        self.states.get(id).map(|r| r.power).unwrap_or_default()
    }

    /// Last known reachability; devices never commanded are online.
    pub fn is_online(&self, id: &DeviceId) -> bool {
        self.states.get(id).map(|r| r.online).unwrap_or(true)
    }

    /// Records a successfully delivered power command.
    pub fn record_power(&self, id: &DeviceId, power: PowerState) {
        let mut record = self.states.entry(id.clone()).or_default();
        record.power = power;
        record.online = true;
    }

    /// Records that a command to the device could not be delivered.
    pub fn record_unreachable(&self, id: &DeviceId) {
        self.states.entry(id.clone()).or_default().online = false;
    }

    /// Ids of every device currently believed to be on.
    pub fn powered_on(&self) -> DeviceSet {
        self.states
            .iter()
            .filter(|r| r.power == PowerState::On)
            .map(|r| r.key().clone())
            .collect()
    }

    /// Marks every known device off (after an all-off frame).
    pub fn mark_all_off(&self) {
        for mut record in self.states.iter_mut() {
            record.power = PowerState::Off;
        }
    }

    /// Captures the current state of exactly `devices` and retains it.
    pub fn snapshot(&self, devices: &DeviceSet) -> DeviceStateSnapshot {
        let snapshot = DeviceStateSnapshot {
            id: SnapshotId(self.next_snapshot.fetch_add(1, Ordering::Relaxed)),
            states: devices
                .iter()
                .map(|id| (id.clone(), self.power(id)))
                .collect(),
            taken_at: now_millis(),
        };
        self.snapshots.lock().insert(snapshot.id, snapshot.clone());
        log::debug!(
            "[DeviceState] Snapshot {:?} captured for {} devices",
            snapshot.id,
            snapshot.states.len()
        );
        snapshot
    }

    /// Returns the commands that return each snapshotted device to its
    /// captured state, and discards the snapshot.
    ///
    /// Restoring a snapshot that was already restored or cleared returns no
    /// commands.
    pub fn restore(&self, snapshot: &DeviceStateSnapshot) -> Vec<(DeviceId, PowerCommand)> {
        let Some(retained) = self.snapshots.lock().remove(&snapshot.id) else {
            log::debug!(
                "[DeviceState] Snapshot {:?} already restored or cleared",
                snapshot.id
            );
            return Vec::new();
        };
        retained
            .states
            .into_iter()
            .map(|(id, state)| (id, state.command()))
            .collect()
    }

    /// Discards every retained snapshot without restoring. Returns how many
    /// were discarded.
    pub fn clear_all(&self) -> usize {
        let mut snapshots = self.snapshots.lock();
        let count = snapshots.len();
        snapshots.clear();
        count
    }

    pub fn is_restore_enabled(&self) -> bool {
        self.restore_enabled.load(Ordering::SeqCst)
    }

    pub fn set_restore_enabled(&self, enabled: bool) {
        self.restore_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn restore_info(&self) -> RestoreInfo {
        let snapshots = self.snapshots.lock();
        let backup_states: BTreeMap<DeviceId, PowerState> = snapshots
            .values()
            .flat_map(|s| s.states.iter().map(|(id, state)| (id.clone(), *state)))
            .collect();
        RestoreInfo {
            restore_enabled: self.is_restore_enabled(),
            backup_count: snapshots.len(),
            backup_devices: backup_states.keys().cloned().collect(),
            backup_states,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> DeviceSet {
        ids.iter().map(|id| DeviceId::new(*id)).collect()
    }

    #[test]
    fn unknown_devices_default_to_off_and_online() {
        let store = DeviceStateStore::new(true);
        let id = DeviceId::new("1-1");
        assert_eq!(store.power(&id), PowerState::Off);
        assert!(store.is_online(&id));
    }

    #[test]
    fn snapshot_captures_exactly_requested_devices() {
        let store = DeviceStateStore::new(true);
        store.record_power(&DeviceId::new("1-1"), PowerState::On);
        store.record_power(&DeviceId::new("1-3"), PowerState::On);

        let snap = store.snapshot(&set(&["1-1", "1-2"]));
        assert_eq!(snap.states.len(), 2);
        assert_eq!(snap.states[&DeviceId::new("1-1")], PowerState::On);
        assert_eq!(snap.states[&DeviceId::new("1-2")], PowerState::Off);
    }

    #[test]
    fn restore_emits_commands_for_captured_states() {
        let store = DeviceStateStore::new(true);
        store.record_power(&DeviceId::new("1-1"), PowerState::On);
        let snap = store.snapshot(&set(&["1-1", "1-2"]));

        store.record_power(&DeviceId::new("1-2"), PowerState::On);

        let commands = store.restore(&snap);
        assert_eq!(
            commands,
            vec![
                (DeviceId::new("1-1"), PowerCommand::PowerOn),
                (DeviceId::new("1-2"), PowerCommand::PowerOff),
            ]
        );
    }

    #[test]
    fn restore_is_idempotent() {
        let store = DeviceStateStore::new(true);
        let snap = store.snapshot(&set(&["1-1"]));
        assert_eq!(store.restore(&snap).len(), 1);
        assert!(store.restore(&snap).is_empty());
        assert_eq!(store.restore_info().backup_count, 0);
    }

    #[test]
    fn clear_all_discards_without_restoring() {
        let store = DeviceStateStore::new(true);
        let a = store.snapshot(&set(&["1-1"]));
        let _b = store.snapshot(&set(&["2-1"]));
        assert_eq!(store.restore_info().backup_count, 2);

        assert_eq!(store.clear_all(), 2);
        assert!(store.restore(&a).is_empty());
    }

    #[test]
    fn restore_info_lists_backed_up_devices() {
        let store = DeviceStateStore::new(false);
        store.record_power(&DeviceId::new("1-2"), PowerState::On);
        store.snapshot(&set(&["1-2", "1-1"]));

        let info = store.restore_info();
        assert!(!info.restore_enabled);
        assert_eq!(
            info.backup_devices,
            vec![DeviceId::new("1-1"), DeviceId::new("1-2")]
        );
        assert_eq!(info.backup_states[&DeviceId::new("1-2")], PowerState::On);
    }

    #[test]
    fn unreachable_device_recovers_on_delivery() {
        let store = DeviceStateStore::new(true);
        let id = DeviceId::new("1-1");
        store.record_unreachable(&id);
        assert!(!store.is_online(&id));
        store.record_power(&id, PowerState::On);
        assert!(store.is_online(&id));
        assert_eq!(store.powered_on(), set(&["1-1"]));
        store.mark_all_off();
        assert!(store.powered_on().is_empty());
    }
}
