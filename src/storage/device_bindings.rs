// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Remembered peer devices.
//!
//! Maps an application-level key (payment token or device name) to the id of
//! the peer last selected for it, so the chooser is skipped next time. Every
//! operation is best-effort: storage failures are logged and read as a miss.

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Prefix applied to every stored key.
pub const KEY_PREFIX: &str = "ble-remember-";

const FILE_NAME: &str = "device_bindings.json";

/// Persistent key -> device id association.
pub trait BindingStore: Send + Sync {
    /// Remembered device id for `key`, if any.
    fn get(&self, key: &str) -> Option<String>;

    /// Remember `device_id` for `key`, replacing any previous id.
    /// Empty keys or ids are ignored.
    fn set(&self, key: &str, device_id: &str);

    /// Forget `key`.
    fn clear(&self, key: &str);
}

/// A remembered binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RememberedBinding {
    /// Prefixed storage key.
    pub key: String,
    pub device_id: String,
    /// ISO 8601 timestamp of the last selection.
    pub updated_at: String,
}

impl RememberedBinding {
    /// Key without the storage prefix.
    pub fn app_key(&self) -> &str {
        self.key.strip_prefix(KEY_PREFIX).unwrap_or(&self.key)
    }
}

/// Bindings file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BindingsFile {
    /// File format version.
    version: u32,
    bindings: Vec<RememberedBinding>,
}

impl Default for BindingsFile {
    fn default() -> Self {
        Self {
            version: 1,
            bindings: Vec::new(),
        }
    }
}

fn storage_key(key: &str) -> String {
    format!("{}{}", KEY_PREFIX, key)
}

/// Bindings persisted as JSON in the data directory.
pub struct FileBindingStore {
    file_path: PathBuf,
    bindings: Mutex<Vec<RememberedBinding>>,
}

impl FileBindingStore {
    /// Open the store in `data_dir`.
    ///
    /// A missing file starts empty. So does an unreadable or corrupt one, after
    /// a warning, since the chooser is always available as a fallback.
    pub fn new(data_dir: &Path) -> Self {
        let file_path = data_dir.join(FILE_NAME);

        let bindings = match Self::load(&file_path) {
            Ok(bindings) => bindings,
            Err(e) => {
                warn!("Ignoring device bindings in {:?}: {:#}", file_path, e);
                Vec::new()
            }
        };

        info!(
            "Loaded {} device binding(s) from {:?}",
            bindings.len(),
            file_path
        );

        Self {
            file_path,
            bindings: Mutex::new(bindings),
        }
    }

    /// All remembered bindings.
    pub fn list(&self) -> Vec<RememberedBinding> {
        self.bindings.lock().clone()
    }

    fn load(path: &Path) -> Result<Vec<RememberedBinding>> {
        if !path.exists() {
            debug!("Device bindings file doesn't exist, starting with empty list");
            return Ok(Vec::new());
        }

        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;

        let file: BindingsFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", FILE_NAME))?;

        Ok(file.bindings)
    }

    fn save(&self, bindings: &[RememberedBinding]) -> Result<()> {
        let file = BindingsFile {
            bindings: bindings.to_vec(),
            ..Default::default()
        };

        if let Some(parent) = self.file_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory {:?}", parent))?;
        }

        let content = serde_json::to_string_pretty(&file)?;
        std::fs::write(&self.file_path, content)
            .with_context(|| format!("Failed to write {:?}", self.file_path))?;

        debug!("Saved {} device binding(s)", bindings.len());
        Ok(())
    }

    fn persist(&self, bindings: &[RememberedBinding]) {
        if let Err(e) = self.save(bindings) {
            warn!("Failed to persist device bindings: {:#}", e);
        }
    }
}

impl BindingStore for FileBindingStore {
    fn get(&self, key: &str) -> Option<String> {
        if key.is_empty() {
            return None;
        }
        let key = storage_key(key);
        self.bindings
            .lock()
            .iter()
            .find(|b| b.key == key)
            .map(|b| b.device_id.clone())
    }

    fn set(&self, key: &str, device_id: &str) {
        if key.is_empty() || device_id.is_empty() {
            return;
        }
        let key = storage_key(key);
        let now = Utc::now().to_rfc3339();

        let mut bindings = self.bindings.lock();
        if let Some(binding) = bindings.iter_mut().find(|b| b.key == key) {
            binding.device_id = device_id.to_string();
            binding.updated_at = now;
            debug!("Updated device binding: {} -> {}", key, device_id);
        } else {
            bindings.push(RememberedBinding {
                key,
                device_id: device_id.to_string(),
                updated_at: now,
            });
            info!("Remembered new device: {}", device_id);
        }
        self.persist(&bindings);
    }

    fn clear(&self, key: &str) {
        if key.is_empty() {
            return;
        }
        let key = storage_key(key);
        let mut bindings = self.bindings.lock();
        let before = bindings.len();
        bindings.retain(|b| b.key != key);
        if bindings.len() != before {
            debug!("Cleared device binding: {}", key);
            self.persist(&bindings);
        }
    }
}

/// Process-local bindings.
#[derive(Default)]
pub struct MemoryBindingStore {
    bindings: Mutex<HashMap<String, String>>,
}

impl MemoryBindingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bindings.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.lock().is_empty()
    }
}

impl BindingStore for MemoryBindingStore {
    fn get(&self, key: &str) -> Option<String> {
        if key.is_empty() {
            return None;
        }
        self.bindings.lock().get(&storage_key(key)).cloned()
    }

    fn set(&self, key: &str, device_id: &str) {
        if key.is_empty() || device_id.is_empty() {
            return;
        }
        self.bindings
            .lock()
            .insert(storage_key(key), device_id.to_string());
    }

    fn clear(&self, key: &str) {
        self.bindings.lock().remove(&storage_key(key));
    }
}

/// Store used when remembering devices is switched off.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledBindings;

impl BindingStore for DisabledBindings {
    fn get(&self, _key: &str) -> Option<String> {
        None
    }

    fn set(&self, _key: &str, _device_id: &str) {}

    fn clear(&self, _key: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_new_store_empty() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileBindingStore::new(temp_dir.path());
        assert!(store.list().is_empty());
        assert_eq!(store.get("tok1"), None);
        Ok(())
    }

    #[test]
    fn test_set_and_get() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileBindingStore::new(temp_dir.path());

        store.set("tok1", "AA:BB:CC:DD:EE:FF");

        assert_eq!(store.get("tok1").as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(store.get("tok2"), None);
        assert_eq!(store.list()[0].key, "ble-remember-tok1");
        assert_eq!(store.list()[0].app_key(), "tok1");
        Ok(())
    }

    #[test]
    fn test_last_selection_wins() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileBindingStore::new(temp_dir.path());

        store.set("tok1", "device-1");
        store.set("tok1", "device-2");

        assert_eq!(store.list().len(), 1);
        assert_eq!(store.get("tok1").as_deref(), Some("device-2"));
        Ok(())
    }

    #[test]
    fn test_empty_key_or_id_ignored() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileBindingStore::new(temp_dir.path());

        store.set("", "device-1");
        store.set("tok1", "");

        assert!(store.list().is_empty());
        assert!(!temp_dir.path().join(FILE_NAME).exists());
        Ok(())
    }

    #[test]
    fn test_clear() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileBindingStore::new(temp_dir.path());

        store.set("tok1", "device-1");
        store.clear("tok1");
        store.clear("never-set");

        assert_eq!(store.get("tok1"), None);
        Ok(())
    }

    #[test]
    fn test_persistence() -> Result<()> {
        let temp_dir = TempDir::new()?;

        {
            let store = FileBindingStore::new(temp_dir.path());
            store.set("tok1", "device-1");
        }

        let store = FileBindingStore::new(temp_dir.path());
        assert_eq!(store.get("tok1").as_deref(), Some("device-1"));
        Ok(())
    }

    #[test]
    fn test_corrupt_file_is_a_miss() -> Result<()> {
        let temp_dir = TempDir::new()?;
        std::fs::write(temp_dir.path().join(FILE_NAME), "{ not json")?;

        let store = FileBindingStore::new(temp_dir.path());
        assert_eq!(store.get("tok1"), None);

        store.set("tok1", "device-1");
        let reopened = FileBindingStore::new(temp_dir.path());
        assert_eq!(reopened.get("tok1").as_deref(), Some("device-1"));
        Ok(())
    }

    #[test]
    fn test_unwritable_location_is_swallowed() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let blocker = temp_dir.path().join("not-a-dir");
        std::fs::write(&blocker, "")?;

        let store = FileBindingStore::new(&blocker);
        store.set("tok1", "device-1");

        // Still served from memory for this process.
        assert_eq!(store.get("tok1").as_deref(), Some("device-1"));
        Ok(())
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryBindingStore::new();
        store.set("Alice", "device-1");
        store.set("", "device-2");
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("Alice").as_deref(), Some("device-1"));
        store.clear("Alice");
        assert!(store.is_empty());
    }

    #[test]
    fn test_disabled_store_never_remembers() {
        let store = DisabledBindings;
        store.set("Alice", "device-1");
        assert_eq!(store.get("Alice"), None);
    }
}
