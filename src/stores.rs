// src/stores.rs
//
// Persistent stores for macros and connection profiles.
// Each store is one pretty-printed JSON array in a fixed file under the
// data directory, loaded once at startup and rewritten synchronously after
// every mutation. Writes replace the whole file via temp-then-rename.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::channel::config::PortConfigInput;
use crate::channel::now_ms;
use crate::error::{MonitorError, Result};
use crate::macros::{Macro, MacroInput};

/// A named connection preset: a sparse port config a client can recall
/// instead of retyping parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub config: PortConfigInput,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Caller-editable profile fields.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileInput {
    pub name: String,
    #[serde(default)]
    pub config: PortConfigInput,
}

// ============================================================================
// File-backed JSON array persistence
// ============================================================================

fn load_items<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)
        .map_err(|e| MonitorError::StoreFailure(format!("read {}: {}", path.display(), e)))?;
    serde_json::from_str(&content)
        .map_err(|e| MonitorError::StoreFailure(format!("parse {}: {}", path.display(), e)))
}

/// Atomic whole-file replacement: write a temp file, then rename over.
fn save_items<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    let json = serde_json::to_string_pretty(items)
        .map_err(|e| MonitorError::StoreFailure(format!("serialise: {}", e)))?;

    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, &json)
        .map_err(|e| MonitorError::StoreFailure(format!("write {}: {}", temp_path.display(), e)))?;
    fs::rename(&temp_path, path)
        .map_err(|e| MonitorError::StoreFailure(format!("rename {}: {}", path.display(), e)))?;
    Ok(())
}

// ============================================================================
// Macro store
// ============================================================================

pub struct MacroStore {
    path: PathBuf,
    items: RwLock<Vec<Macro>>,
}

impl MacroStore {
    /// Load the store, creating the data directory if missing. A missing
    /// file is an empty store; a corrupt file is an error at startup.
    pub fn load(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)
            .map_err(|e| MonitorError::StoreFailure(format!("create {}: {}", data_dir.display(), e)))?;
        let path = data_dir.join("macros.json");
        let items = load_items(&path)?;
        tlog!("[stores] Loaded {} macro(s) from {}", items.len(), path.display());
        Ok(MacroStore {
            path,
            items: RwLock::new(items),
        })
    }

    pub fn list(&self) -> Vec<Macro> {
        self.items
            .read()
            .map(|items| items.clone())
            .unwrap_or_default()
    }

    pub fn get(&self, id: &str) -> Result<Macro> {
        self.items
            .read()
            .ok()
            .and_then(|items| items.iter().find(|m| m.id == id).cloned())
            .ok_or_else(|| MonitorError::NotFound(format!("macro '{}'", id)))
    }

    pub fn create(&self, input: MacroInput) -> Result<Macro> {
        let item = Macro::from_input(input);
        let mut items = self
            .items
            .write()
            .map_err(|_| MonitorError::StoreFailure("macro store lock poisoned".to_string()))?;
        items.push(item.clone());
        save_items(&self.path, &items)?;
        Ok(item)
    }

    pub fn update(&self, id: &str, input: MacroInput) -> Result<Macro> {
        let mut items = self
            .items
            .write()
            .map_err(|_| MonitorError::StoreFailure("macro store lock poisoned".to_string()))?;
        let item = items
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| MonitorError::NotFound(format!("macro '{}'", id)))?;
        item.apply(input);
        let updated = item.clone();
        save_items(&self.path, &items)?;
        Ok(updated)
    }

    pub fn remove(&self, id: &str) -> Result<()> {
        let mut items = self
            .items
            .write()
            .map_err(|_| MonitorError::StoreFailure("macro store lock poisoned".to_string()))?;
        let before = items.len();
        items.retain(|m| m.id != id);
        if items.len() == before {
            return Err(MonitorError::NotFound(format!("macro '{}'", id)));
        }
        save_items(&self.path, &items)
    }
}

// ============================================================================
// Profile store
// ============================================================================

pub struct ProfileStore {
    path: PathBuf,
    items: RwLock<Vec<Profile>>,
}

impl ProfileStore {
    pub fn load(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)
            .map_err(|e| MonitorError::StoreFailure(format!("create {}: {}", data_dir.display(), e)))?;
        let path = data_dir.join("profiles.json");
        let items = load_items(&path)?;
        tlog!("[stores] Loaded {} profile(s) from {}", items.len(), path.display());
        Ok(ProfileStore {
            path,
            items: RwLock::new(items),
        })
    }

    pub fn list(&self) -> Vec<Profile> {
        self.items
            .read()
            .map(|items| items.clone())
            .unwrap_or_default()
    }

    pub fn get(&self, id: &str) -> Result<Profile> {
        self.items
            .read()
            .ok()
            .and_then(|items| items.iter().find(|p| p.id == id).cloned())
            .ok_or_else(|| MonitorError::NotFound(format!("profile '{}'", id)))
    }

    pub fn create(&self, input: ProfileInput) -> Result<Profile> {
        let now = now_ms();
        let item = Profile {
            id: uuid::Uuid::new_v4().to_string(),
            name: input.name,
            config: input.config,
            created_at: now,
            updated_at: now,
        };
        let mut items = self
            .items
            .write()
            .map_err(|_| MonitorError::StoreFailure("profile store lock poisoned".to_string()))?;
        items.push(item.clone());
        save_items(&self.path, &items)?;
        Ok(item)
    }

    pub fn update(&self, id: &str, input: ProfileInput) -> Result<Profile> {
        let mut items = self
            .items
            .write()
            .map_err(|_| MonitorError::StoreFailure("profile store lock poisoned".to_string()))?;
        let item = items
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| MonitorError::NotFound(format!("profile '{}'", id)))?;
        item.name = input.name;
        item.config = input.config;
        item.updated_at = now_ms();
        let updated = item.clone();
        save_items(&self.path, &items)?;
        Ok(updated)
    }

    pub fn remove(&self, id: &str) -> Result<()> {
        let mut items = self
            .items
            .write()
            .map_err(|_| MonitorError::StoreFailure("profile store lock poisoned".to_string()))?;
        let before = items.len();
        items.retain(|p| p.id != id);
        if items.len() == before {
            return Err(MonitorError::NotFound(format!("profile '{}'", id)));
        }
        save_items(&self.path, &items)
    }
}
