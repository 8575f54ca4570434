//! Encrypted key/value store for secrets (credentials, tokens)
//!
//! Values are arbitrary JSON documents addressed by `(data_type, data_id)`.
//! The whole map is read once when the store is opened and rewritten on
//! [`ProtectedStore::save`], and on drop when it holds unsaved changes. A
//! store opened over a missing file is written on drop as well.

use crate::encryption::SealedData;
use crate::error::ProtectedDataError;
use crate::machine_id::MachineId;
use crate::storage::{read_optional, write_atomic};
use log::{debug, info, warn};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub type ProtectedData = BTreeMap<String, BTreeMap<String, Value>>;

pub struct ProtectedStore {
    path: PathBuf,
    machine: Arc<MachineId>,
    data: ProtectedData,
    dirty: bool,
}

impl ProtectedStore {
    /// Opens the store at `path`; a missing file gives an empty store
    pub fn open(path: impl Into<PathBuf>, machine: Arc<MachineId>) -> Result<Self, ProtectedDataError> {
        Self::open_with_fallback(path, machine, None)
    }

    /// Like [`ProtectedStore::open`], retrying with `legacy` when the primary id cannot decrypt
    ///
    /// A store recovered with the legacy id is re-keyed with the primary id on
    /// the next save.
    pub fn open_with_fallback(
        path: impl Into<PathBuf>,
        machine: Arc<MachineId>,
        legacy: Option<&MachineId>,
    ) -> Result<Self, ProtectedDataError> {
        let path = path.into();
        let bytes = read_optional(&path).map_err(|source| ProtectedDataError::Io {
            path: path.clone(),
            source,
        })?;
        let mut dirty = false;
        let data = match bytes {
            None => {
                debug!("Protected data {} does not exist", path.display());
                dirty = true;
                ProtectedData::new()
            }
            Some(bytes) => {
                let sealed = SealedData::deserialize(&bytes)?;
                let plaintext = match (sealed.open(&machine), legacy) {
                    (Ok(plaintext), _) => plaintext,
                    (Err(ProtectedDataError::Decrypt), Some(legacy)) => {
                        let plaintext = sealed.open(legacy)?;
                        info!("Protected data {} decrypted with the legacy machine id", path.display());
                        dirty = true;
                        plaintext
                    }
                    (Err(e), _) => return Err(e),
                };
                serde_json::from_slice(&plaintext)?
            }
        };
        Ok(Self {
            path,
            machine,
            data,
            dirty,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, data_type: &str, data_id: &str) -> Option<Value> {
        self.data.get(data_type)?.get(data_id).cloned()
    }

    pub fn set(&mut self, data_type: &str, data_id: &str, value: Value) {
        self.data
            .entry(data_type.to_string())
            .or_default()
            .insert(data_id.to_string(), value);
        self.dirty = true;
    }

    pub fn delete(&mut self, data_type: &str, data_id: &str) -> Option<Value> {
        let entries = self.data.get_mut(data_type)?;
        let removed = entries.remove(data_id);
        if entries.is_empty() {
            self.data.remove(data_type);
        }
        self.dirty |= removed.is_some();
        removed
    }

    /// Identifiers stored under `data_type`
    pub fn data_ids(&self, data_type: &str) -> Vec<String> {
        self.data
            .get(data_type)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Sets `key` inside the map stored at `(data_type, data_id)`, creating the map
    pub fn add_to_map(&mut self, data_type: &str, data_id: &str, key: &str, value: Value) {
        let slot = self
            .data
            .entry(data_type.to_string())
            .or_default()
            .entry(data_id.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        if let Value::Object(map) = slot {
            map.insert(key.to_string(), value);
        }
        self.dirty = true;
    }

    /// Removes `key` from the map at `(data_type, data_id)`; an emptied map is deleted
    pub fn remove_from_map(&mut self, data_type: &str, data_id: &str, key: &str) -> Option<Value> {
        let Value::Object(map) = self.data.get_mut(data_type)?.get_mut(data_id)? else {
            return None;
        };
        let removed = map.remove(key);
        if map.is_empty() {
            self.delete(data_type, data_id);
        }
        self.dirty |= removed.is_some();
        removed
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Encrypts and atomically writes the whole store
    pub fn save(&mut self) -> Result<(), ProtectedDataError> {
        let plaintext = serde_json::to_vec(&self.data)?;
        let sealed = SealedData::seal(&plaintext, &self.machine)?;
        write_atomic(&self.path, &sealed.serialize()).map_err(|source| ProtectedDataError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!("Protected data written to {}", self.path.display());
        self.dirty = false;
        Ok(())
    }
}

impl Drop for ProtectedStore {
    fn drop(&mut self) {
        if !self.dirty {
            return;
        }
        if let Err(e) = self.save() {
            warn!("Failed to write protected data {}: {}", self.path.display(), e);
        }
    }
}

impl std::fmt::Debug for ProtectedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectedStore")
            .field("path", &self.path)
            .field("data_types", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}
