//! Saved node positions.
//!
//! Each lab keeps up to [`MAX_SAVED_LAYOUTS`] named snapshots (newest first)
//! and one working layout that is re-applied whenever the lab is rendered.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{labs_dir, FlowNode, LabError, Position};

pub const MAX_SAVED_LAYOUTS: usize = 5;

pub type LayoutPositions = BTreeMap<String, Position>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SavedLayout {
    pub id: String,
    pub name: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub positions: LayoutPositions,
}

/// Storage port for raw layout blobs, keyed by logical name.
pub trait LayoutStore {
    /// Returns `Ok(None)` when nothing is stored under `key`.
    fn load_raw(&self, key: &str) -> Result<Option<Vec<u8>>, LabError>;
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), LabError>;
    fn remove(&self, key: &str) -> Result<(), LabError>;
}

/// Layout blobs as JSON files under `<labs dir>/layouts/`.
pub struct FsLayoutStore {
    base: PathBuf,
}

impl FsLayoutStore {
    pub fn new() -> Self {
        Self::at(labs_dir().join("layouts"))
    }

    pub fn at(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base.join(format!("{}.json", key))
    }
}

impl Default for FsLayoutStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LayoutStore for FsLayoutStore {
    fn load_raw(&self, key: &str) -> Result<Option<Vec<u8>>, LabError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(LabError::Io(err)),
        }
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), LabError> {
        fs::create_dir_all(&self.base)?;
        fs::write(self.path_for(key), data)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), LabError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(LabError::Io(err)),
        }
    }
}

/// In-process store, handy for tests and for clients that persist elsewhere.
#[derive(Default)]
pub struct MemoryLayoutStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryLayoutStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn blobs(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>, LabError> {
        self.blobs
            .lock()
            .map_err(|_| LabError::Other("layout store lock poisoned".into()))
    }
}

impl LayoutStore for MemoryLayoutStore {
    fn load_raw(&self, key: &str) -> Result<Option<Vec<u8>>, LabError> {
        Ok(self.blobs()?.get(key).cloned())
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), LabError> {
        self.blobs()?.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), LabError> {
        self.blobs()?.remove(key);
        Ok(())
    }
}

/// Saved layouts of one lab.
pub struct LayoutBook<'s, S> {
    store: &'s S,
    lab: String,
}

impl<'s, S> LayoutBook<'s, S>
where
    S: LayoutStore,
{
    pub fn new(store: &'s S, lab: impl Into<String>) -> Self {
        Self {
            store,
            lab: lab.into(),
        }
    }

    fn saved_key(&self) -> String {
        format!("{}.layouts", self.lab)
    }

    fn current_key(&self) -> String {
        format!("{}.current", self.lab)
    }

    /// Saved layouts, newest first.
    pub fn list(&self) -> Result<Vec<SavedLayout>, LabError> {
        match self.store.load_raw(&self.saved_key())? {
            Some(bytes) if !bytes.is_empty() => Ok(serde_json::from_slice(&bytes)?),
            _ => Ok(Vec::new()),
        }
    }

    fn write_list(&self, layouts: &[SavedLayout]) -> Result<(), LabError> {
        let data = serde_json::to_vec_pretty(layouts)?;
        self.store.save_raw(&self.saved_key(), &data)
    }

    /// Snapshot the positions of `nodes` under `name`. The oldest entries are
    /// dropped beyond [`MAX_SAVED_LAYOUTS`].
    pub fn save(
        &self,
        name: &str,
        nodes: &[FlowNode],
        timestamp: u64,
    ) -> Result<SavedLayout, LabError> {
        let mut layouts = self.list()?;

        let mut stamp = timestamp;
        while layouts.iter().any(|l| l.id == layout_id(stamp)) {
            stamp += 1;
        }
        let layout = SavedLayout {
            id: layout_id(stamp),
            name: name.to_string(),
            timestamp,
            positions: capture_positions(nodes),
        };

        layouts.insert(0, layout.clone());
        if layouts.len() > MAX_SAVED_LAYOUTS {
            for evicted in layouts.drain(MAX_SAVED_LAYOUTS..) {
                debug!(lab = %self.lab, id = %evicted.id, "evicting oldest saved layout");
            }
        }
        self.write_list(&layouts)?;
        Ok(layout)
    }

    pub fn load(&self, id: &str) -> Result<SavedLayout, LabError> {
        self.list()?
            .into_iter()
            .find(|l| l.id == id)
            .ok_or_else(|| LabError::LayoutNotFound(id.to_string()))
    }

    pub fn delete(&self, id: &str) -> Result<(), LabError> {
        let mut layouts = self.list()?;
        let before = layouts.len();
        layouts.retain(|l| l.id != id);
        if layouts.len() == before {
            return Err(LabError::LayoutNotFound(id.to_string()));
        }
        self.write_list(&layouts)
    }

    /// Overwrite the working layout with the positions of `nodes`.
    pub fn save_current(&self, nodes: &[FlowNode]) -> Result<(), LabError> {
        let data = serde_json::to_vec_pretty(&capture_positions(nodes))?;
        self.store.save_raw(&self.current_key(), &data)
    }

    /// The working layout, or `None` if there is none or it cannot be parsed.
    pub fn load_current(&self) -> Result<Option<LayoutPositions>, LabError> {
        let Some(bytes) = self.store.load_raw(&self.current_key())? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(positions) => Ok(Some(positions)),
            Err(e) => {
                debug!(lab = %self.lab, error = %e, "ignoring unreadable working layout");
                Ok(None)
            }
        }
    }

    pub fn clear_current(&self) -> Result<(), LabError> {
        self.store.remove(&self.current_key())
    }
}

fn layout_id(timestamp: u64) -> String {
    format!("layout-{}", timestamp)
}

/// Milliseconds since the Unix epoch, for stamping new layouts.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub fn capture_positions(nodes: &[FlowNode]) -> LayoutPositions {
    nodes.iter().map(|n| (n.id.clone(), n.position)).collect()
}

/// Overwrite computed positions with saved ones. Nodes without a saved
/// position keep theirs.
pub fn apply_positions(nodes: &mut [FlowNode], positions: &LayoutPositions) {
    for node in nodes {
        if let Some(saved) = positions.get(&node.id) {
            node.position = *saved;
        }
    }
}
