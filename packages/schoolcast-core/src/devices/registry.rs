//! Static device grid, derived groups and target resolution.
//!
//! The grid is parsed exactly once at startup into a [`DeviceRegistry`].
//! Request handlers only ever resolve symbolic targets against the
//! pre-built lookup tables; the grid is never re-read.

use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{BroadcastError, BroadcastResult};
use crate::protocol_constants::ALL_GROUP;

/// Identifier of a device, e.g. `"1-1"` or a named special room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl Borrow<str> for DeviceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Ordered, de-duplicated set of device identifiers.
pub type DeviceSet = BTreeSet<DeviceId>;

/// Zero-based position of a device in the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GridPosition {
    pub row: usize,
    pub column: usize,
}

impl GridPosition {
    pub const fn new(row: usize, column: usize) -> Self {
        Self { row, column }
    }
}

/// A device with an immutable identity and grid position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub id: DeviceId,
    pub position: GridPosition,
}

/// One cell of the configured grid.
///
/// Serialized as a nullable string: `null` or a blank string marks an unused
/// placeholder cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum GridCell {
    Device(DeviceId),
    Empty,
}

impl From<Option<String>> for GridCell {
    fn from(value: Option<String>) -> Self {
        match value {
            Some(id) if !id.trim().is_empty() => Self::Device(DeviceId::new(id.trim())),
            _ => Self::Empty,
        }
    }
}

impl From<GridCell> for Option<String> {
    fn from(cell: GridCell) -> Self {
        match cell {
            GridCell::Device(id) => Some(id.0),
            GridCell::Empty => None,
        }
    }
}

/// A configured grid row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridRow {
    /// Group this row belongs to (grade level, special rooms, ...).
    /// Rows sharing a category form one group.
    #[serde(default)]
    pub category: Option<String>,
    pub cells: Vec<GridCell>,
}

impl GridRow {
    fn new(category: Option<&str>, cells: &[Option<&str>]) -> Self {
        Self {
            category: category.map(str::to_string),
            cells: cells
                .iter()
                .map(|c| GridCell::from(c.map(str::to_string)))
                .collect(),
        }
    }
}

/// Device grid layout plus explicitly named groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    pub rows: Vec<GridRow>,
    /// Additional groups by name, listing device ids.
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<String>>,
}

impl Default for GridConfig {
    /// The school's installed 4x16 receiver layout.
    fn default() -> Self {
        let rows = vec![
            GridRow::new(
                None,
                &[
                    Some("1-1"), Some("1-2"), Some("1-3"), Some("1-4"),
                    None, None, None, None,
                    Some("2-1"), Some("2-2"), Some("2-3"), Some("2-4"),
                    None, None, None, None,
                ],
            ),
            GridRow::new(
                Some("grade3"),
                &[
                    Some("3-1"), Some("3-2"), Some("3-3"), Some("3-4"),
                    None, None, None, None, None, None, None, None, None, None, None, None,
                ],
            ),
            GridRow::new(
                Some("special-rooms"),
                &[
                    Some("staff-meeting"), Some("faculty-lab"), Some("co-op"), Some("health-room"),
                    Some("computer-12"), Some("science-prep"), Some("maker-prep"), Some("lounge"),
                    Some("main-office"), Some("cafeteria"), Some("wee-class"), Some("plaza-12"),
                    Some("admin-office"), Some("career-lab"), Some("module-12"), Some("maker-lab"),
                ],
            ),
            GridRow::new(
                Some("buildings"),
                &[
                    Some("main-1f"), Some("fusion-1f"), Some("main-2f"), Some("fusion-2f"),
                    Some("fusion-3f"), Some("auditorium"), Some("broadcast-room"), Some("annex-11"),
                    Some("annex-12"), Some("annex-13"), Some("annex-21"), Some("annex-22"),
                    None, None, Some("playground"), Some("outdoor"),
                ],
            ),
        ];

        let mut groups = BTreeMap::new();
        groups.insert(
            "grade1".to_string(),
            ["1-1", "1-2", "1-3", "1-4"].map(String::from).to_vec(),
        );
        groups.insert(
            "grade2".to_string(),
            ["2-1", "2-2", "2-3", "2-4"].map(String::from).to_vec(),
        );
        Self { rows, groups }
    }
}

/// A named, ordered set of device identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceGroup {
    pub name: String,
    pub members: Vec<DeviceId>,
}

/// Immutable registry of devices and groups derived from the grid.
#[derive(Debug)]
pub struct DeviceRegistry {
    /// Devices in grid order (row-major).
    devices: Vec<Device>,
    index: HashMap<DeviceId, usize>,
    groups: BTreeMap<String, DeviceGroup>,
}

impl DeviceRegistry {
    /// Walks the grid once and builds the device and group tables.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::Configuration`] for duplicate device ids,
    /// group names shadowing a device id or the reserved `all` group, and
    /// explicit group members that are not in the grid.
    pub fn from_grid(grid: &GridConfig) -> BroadcastResult<Self> {
        let mut devices = Vec::new();
        let mut index = HashMap::new();
        let mut row_groups: BTreeMap<String, Vec<DeviceId>> = BTreeMap::new();

        for (row, grid_row) in grid.rows.iter().enumerate() {
            for (column, cell) in grid_row.cells.iter().enumerate() {
                let GridCell::Device(id) = cell else {
                    continue;
                };
                if index.insert(id.clone(), devices.len()).is_some() {
                    return Err(BroadcastError::Configuration(format!(
                        "duplicate device id '{}' in grid",
                        id
                    )));
                }
                devices.push(Device {
                    id: id.clone(),
                    position: GridPosition::new(row, column),
                });
                if let Some(category) = &grid_row.category {
                    row_groups
                        .entry(category.clone())
                        .or_default()
                        .push(id.clone());
                }
            }
        }

        if devices.is_empty() {
            return Err(BroadcastError::Configuration(
                "device grid contains no devices".into(),
            ));
        }

        let mut groups = BTreeMap::new();
        let named = row_groups.into_iter().chain(grid.groups.iter().map(|(name, ids)| {
            (name.clone(), ids.iter().map(|id| DeviceId::new(id.trim())).collect())
        }));

        for (name, members) in named {
            validate_group_name(&name, &index)?;
            if let Some(missing) = members.iter().find(|id| !index.contains_key(*id)) {
                return Err(BroadcastError::Configuration(format!(
                    "group '{}' references unknown device '{}'",
                    name, missing
                )));
            }
            let group = groups.entry(name.clone()).or_insert_with(|| DeviceGroup {
                name,
                members: Vec::new(),
            });
            for id in members {
                if !group.members.contains(&id) {
                    group.members.push(id);
                }
            }
        }

        groups.insert(
            ALL_GROUP.to_string(),
            DeviceGroup {
                name: ALL_GROUP.to_string(),
                members: devices.iter().map(|d| d.id.clone()).collect(),
            },
        );

        log::info!(
            "[Registry] Loaded {} devices in {} rows, {} groups",
            devices.len(),
            grid.rows.len(),
            groups.len()
        );

        Ok(Self {
            devices,
            index,
            groups,
        })
    }

    /// Resolves target tokens into a de-duplicated set of device ids.
    ///
    /// Each token is a device id, a group name, or `all`. A token may also be
    /// a comma-separated list of those (`"1-1,1-2"`). Order of tokens does not
    /// matter.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::UnknownTarget`] naming the first token that
    /// matches neither a device nor a group.
    pub fn resolve<S: AsRef<str>>(&self, targets: &[S]) -> BroadcastResult<DeviceSet> {
        let mut resolved = DeviceSet::new();
        for token in targets
            .iter()
            .flat_map(|t| t.as_ref().split(','))
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            if let Some(&i) = self.index.get(token) {
                resolved.insert(self.devices[i].id.clone());
            } else if let Some(group) = self.groups.get(token) {
                resolved.extend(group.members.iter().cloned());
            } else {
                return Err(BroadcastError::UnknownTarget(token.to_string()));
            }
        }
        Ok(resolved)
    }

    /// Looks up every id in `ids`, failing on the first unknown one.
    pub fn devices_for(&self, ids: &DeviceSet) -> BroadcastResult<Vec<Device>> {
        ids.iter()
            .map(|id| {
                self.device(id.as_str())
                    .cloned()
                    .ok_or_else(|| BroadcastError::UnknownTarget(id.to_string()))
            })
            .collect()
    }

    pub fn device(&self, id: &str) -> Option<&Device> {
        self.index.get(id).map(|&i| &self.devices[i])
    }

    /// All devices in grid order.
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// All groups ordered by name, including `all`.
    pub fn groups(&self) -> impl Iterator<Item = &DeviceGroup> {
        self.groups.values()
    }
}

fn validate_group_name(name: &str, index: &HashMap<DeviceId, usize>) -> BroadcastResult<()> {
    if name.trim().is_empty() || name.contains(',') {
        return Err(BroadcastError::Configuration(format!(
            "invalid group name '{}'",
            name
        )));
    }
    if name == ALL_GROUP {
        return Err(BroadcastError::Configuration(format!(
            "group name '{}' is reserved",
            ALL_GROUP
        )));
    }
    if index.contains_key(name) {
        return Err(BroadcastError::Configuration(format!(
            "group name '{}' shadows a device id",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> DeviceRegistry {
        DeviceRegistry::from_grid(&GridConfig::default()).unwrap()
    }

    fn ids(set: &DeviceSet) -> Vec<&str> {
        set.iter().map(DeviceId::as_str).collect()
    }

    #[test]
    fn default_grid_loads() {
        let reg = registry();
        assert_eq!(reg.devices().len(), 12 + 16 + 14);
        assert_eq!(
            reg.device("3-2").unwrap().position,
            GridPosition::new(1, 1)
        );
        assert_eq!(
            reg.device("outdoor").unwrap().position,
            GridPosition::new(3, 15)
        );
    }

    #[test]
    fn group_resolution_contains_only_group_members() {
        let reg = registry();
        let set = reg.resolve(&["grade1"]).unwrap();
        assert_eq!(ids(&set), vec!["1-1", "1-2", "1-3", "1-4"]);
        assert!(!set.contains("2-1"));
        assert!(!set.contains("3-1"));
    }

    #[test]
    fn row_category_becomes_group() {
        let reg = registry();
        let size = |name: &str| {
            reg.groups()
                .find(|g| g.name == name)
                .map(|g| g.members.len())
        };
        assert_eq!(size("grade3"), Some(4));
        assert_eq!(size("special-rooms"), Some(16));
    }

    #[test]
    fn all_excludes_placeholders() {
        let reg = registry();
        let all = reg.resolve(&["all"]).unwrap();
        assert_eq!(all.len(), reg.devices().len());
    }

    #[test]
    fn resolution_deduplicates_and_ignores_order() {
        let reg = registry();
        let a = reg.resolve(&["1-1", "grade1", "1-1,1-2"]).unwrap();
        let b = reg.resolve(&["1-2", "grade1"]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 4);
    }

    #[test]
    fn comma_separated_token() {
        let reg = registry();
        let set = reg.resolve(&["1-1, 1-2"]).unwrap();
        assert_eq!(ids(&set), vec!["1-1", "1-2"]);
    }

    #[test]
    fn unknown_token_fails_regardless_of_position() {
        let reg = registry();
        for targets in [
            vec!["9-9", "1-1", "grade1"],
            vec!["1-1", "9-9", "grade1"],
            vec!["1-1", "grade1", "9-9"],
        ] {
            match reg.resolve(&targets) {
                Err(BroadcastError::UnknownTarget(token)) => assert_eq!(token, "9-9"),
                other => panic!("expected UnknownTarget, got {:?}", other),
            }
        }
    }

    #[test]
    fn empty_cell_strings_are_placeholders() {
        let cell: GridCell = serde_json::from_str("\"  \"").unwrap();
        assert_eq!(cell, GridCell::Empty);
        let cell: GridCell = serde_json::from_str("null").unwrap();
        assert_eq!(cell, GridCell::Empty);
    }

    #[test]
    fn duplicate_device_rejected() {
        let grid = GridConfig {
            rows: vec![GridRow::new(None, &[Some("a"), Some("a")])],
            groups: BTreeMap::new(),
        };
        assert!(matches!(
            DeviceRegistry::from_grid(&grid),
            Err(BroadcastError::Configuration(_))
        ));
    }

    #[test]
    fn reserved_and_shadowing_group_names_rejected() {
        let mut grid = GridConfig {
            rows: vec![GridRow::new(Some("all"), &[Some("a")])],
            groups: BTreeMap::new(),
        };
        assert!(DeviceRegistry::from_grid(&grid).is_err());

        grid.rows = vec![GridRow::new(None, &[Some("a"), Some("b")])];
        grid.groups.insert("a".into(), vec!["b".into()]);
        assert!(DeviceRegistry::from_grid(&grid).is_err());
    }

    #[test]
    fn group_with_unknown_member_rejected() {
        let mut grid = GridConfig {
            rows: vec![GridRow::new(None, &[Some("a")])],
            groups: BTreeMap::new(),
        };
        grid.groups.insert("g".into(), vec!["zz".into()]);
        assert!(matches!(
            DeviceRegistry::from_grid(&grid),
            Err(BroadcastError::Configuration(_))
        ));
    }
}
