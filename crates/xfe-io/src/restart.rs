use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IoError, Result};

pub const RESTART_SCHEMA_VERSION: u32 = 1;

/// Numeric state of one object keyed by small integer slot identifiers.
///
/// Every mutable numeric field of a node, an integration point or an
/// integrator is stored in its own slot, so the owning type decides the
/// layout and this crate never needs to know it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSlots {
    slots: BTreeMap<u16, Vec<f64>>,
}

impl DataSlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, slot: u16, values: impl Into<Vec<f64>>) {
        self.slots.insert(slot, values.into());
    }

    pub fn put_scalar(&mut self, slot: u16, value: f64) {
        self.slots.insert(slot, vec![value]);
    }

    pub fn get(&self, slot: u16) -> Option<&[f64]> {
        self.slots.get(&slot).map(Vec::as_slice)
    }

    /// Slot contents, which must hold exactly `len` values.
    pub fn require(&self, slot: u16, len: usize) -> Result<&[f64]> {
        let values = self.get(slot).ok_or(IoError::MissingSlot { slot })?;
        if values.len() != len {
            return Err(IoError::SlotLength {
                slot,
                expected: len,
                actual: values.len(),
            });
        }
        Ok(values)
    }

    /// Slot contents of any length (internal variable vectors).
    pub fn require_any(&self, slot: u16) -> Result<&[f64]> {
        self.get(slot).ok_or(IoError::MissingSlot { slot })
    }

    pub fn scalar(&self, slot: u16) -> Result<f64> {
        Ok(self.require(slot, 1)?[0])
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Checkpoint of a whole analysis: nodes by tag, element integration
/// points by element tag, the integrator and the analysis clock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RestartState {
    pub schema_version: u32,
    pub step: usize,
    pub time: f64,
    pub committed_time: f64,
    pub nodes: BTreeMap<i32, DataSlots>,
    pub elements: BTreeMap<i32, Vec<DataSlots>>,
    pub integrator: DataSlots,
    pub metadata: BTreeMap<String, String>,
}

impl Default for RestartState {
    fn default() -> Self {
        Self {
            schema_version: RESTART_SCHEMA_VERSION,
            step: 0,
            time: 0.0,
            committed_time: 0.0,
            nodes: BTreeMap::new(),
            elements: BTreeMap::new(),
            integrator: DataSlots::new(),
            metadata: BTreeMap::new(),
        }
    }
}

pub fn save_restart(path: impl AsRef<Path>, state: &RestartState) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let bytes = serde_json::to_vec_pretty(state)?;
    fs::write(path, bytes)?;
    Ok(())
}

pub fn load_restart(path: impl AsRef<Path>) -> Result<RestartState> {
    let bytes = fs::read(path)?;
    let state: RestartState = serde_json::from_slice(&bytes)?;
    if state.schema_version != RESTART_SCHEMA_VERSION {
        return Err(IoError::SchemaVersion(state.schema_version));
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> RestartState {
        let mut node = DataSlots::new();
        node.put(0, vec![0.1, -2.3]);
        node.put(1, vec![0.0, 0.0]);

        let mut point = DataSlots::new();
        point.put(0, vec![1e-3, 0.0, 0.0, 0.0, 0.0, 0.0]);
        point.put_scalar(9, 0.25);

        let mut metadata = BTreeMap::new();
        metadata.insert("integrator".to_string(), "LoadControl".to_string());

        let mut state = RestartState {
            step: 3,
            time: 1.25,
            committed_time: 1.25,
            metadata,
            ..Default::default()
        };
        state.nodes.insert(7, node);
        state.elements.insert(2, vec![point.clone(), point]);
        state
    }

    #[test]
    fn restart_roundtrip_preserves_state() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("restart.json");

        let state = sample_state();
        save_restart(&path, &state).expect("save should succeed");
        let loaded = load_restart(&path).expect("load should succeed");
        assert_eq!(loaded, state);
    }

    #[test]
    fn load_restart_fails_for_missing_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = load_restart(dir.path().join("missing.json")).expect_err("missing file");
        assert!(matches!(err, IoError::Io(ref e) if e.kind() == std::io::ErrorKind::NotFound));
    }

    #[test]
    fn load_restart_fails_for_invalid_payload() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("bad.json");
        fs::write(&path, "{invalid json").expect("write invalid payload");
        let err = load_restart(&path).expect_err("invalid JSON should fail");
        assert!(matches!(err, IoError::Json(_)));
    }

    #[test]
    fn load_restart_rejects_unknown_schema() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("future.json");
        let state = RestartState {
            schema_version: 99,
            ..Default::default()
        };
        save_restart(&path, &state).expect("save");
        let err = load_restart(&path).expect_err("schema mismatch");
        assert!(matches!(err, IoError::SchemaVersion(99)));
    }

    #[test]
    fn slots_enforce_length() {
        let mut slots = DataSlots::new();
        slots.put(4, vec![1.0, 2.0, 3.0]);
        assert_eq!(slots.require(4, 3).unwrap(), &[1.0, 2.0, 3.0]);
        assert!(matches!(
            slots.require(4, 6),
            Err(IoError::SlotLength { slot: 4, expected: 6, actual: 3 })
        ));
        assert!(matches!(slots.scalar(5), Err(IoError::MissingSlot { slot: 5 })));
    }
}
