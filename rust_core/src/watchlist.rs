//! Persisted set of tracked player ids
//!
//! Stored as a JSON array in a single file. A missing file is an empty list.
//! The poll loop reads the current set once per cycle; `add`/`remove` write
//! through to disk before returning.

use crate::error::{Result, TrackerError};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct Watchlist {
    path: Option<PathBuf>,
    ids: RwLock<BTreeSet<String>>,
    // Serializes read-modify-write against the file
    write_lock: tokio::sync::Mutex<()>,
}

impl Watchlist {
    /// Load from `path`. A missing file yields an empty list; unreadable JSON
    /// or an invalid id is a configuration error.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let ids = read_ids(&path).await?;
        info!("Loaded {} tracked ids from {}", ids.len(), path.display());

        Ok(Self {
            path: Some(path),
            ids: RwLock::new(ids),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// In-memory list that is never persisted.
    pub fn from_ids<I, S>(ids: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = BTreeSet::new();
        for id in ids {
            let id = id.into();
            validate_entity_id(&id)?;
            set.insert(id);
        }

        Ok(Self {
            path: None,
            ids: RwLock::new(set),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Tracked ids in sorted order
    pub fn list(&self) -> Vec<String> {
        self.ids.read().iter().cloned().collect()
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.ids.read().contains(entity_id)
    }

    pub fn len(&self) -> usize {
        self.ids.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.read().is_empty()
    }

    /// Start tracking `entity_id`. Returns false if it was already tracked.
    pub async fn add(&self, entity_id: &str) -> Result<bool> {
        let entity_id = entity_id.trim();
        validate_entity_id(entity_id)?;

        let _guard = self.write_lock.lock().await;
        let snapshot = {
            let mut ids = self.ids.write();
            if !ids.insert(entity_id.to_string()) {
                return Ok(false);
            }
            ids.clone()
        };
        self.persist(&snapshot).await?;

        info!("Now tracking {}", entity_id);
        Ok(true)
    }

    /// Stop tracking `entity_id`. Returns false if it was not tracked.
    pub async fn remove(&self, entity_id: &str) -> Result<bool> {
        let entity_id = entity_id.trim();

        let _guard = self.write_lock.lock().await;
        let snapshot = {
            let mut ids = self.ids.write();
            if !ids.remove(entity_id) {
                return Ok(false);
            }
            ids.clone()
        };
        self.persist(&snapshot).await?;

        info!("Stopped tracking {}", entity_id);
        Ok(true)
    }

    /// Re-read the backing file. On error the current set is kept.
    pub async fn reload(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _guard = self.write_lock.lock().await;
        let ids = read_ids(path).await?;
        let mut current = self.ids.write();
        if *current != ids {
            debug!(
                "Tracked id list changed on disk: {} -> {} ids",
                current.len(),
                ids.len()
            );
            *current = ids;
        }
        Ok(())
    }

    async fn persist(&self, ids: &BTreeSet<String>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let list: Vec<&String> = ids.iter().collect();
        let body = serde_json::to_vec_pretty(&list)?;
        tokio::fs::write(path, body).await?;
        Ok(())
    }
}

impl std::fmt::Debug for Watchlist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchlist")
            .field("path", &self.path)
            .field("len", &self.len())
            .finish()
    }
}

/// Ids are upstream player ids: non-empty ASCII alphanumerics plus `-`/`_`.
pub fn validate_entity_id(entity_id: &str) -> Result<()> {
    if entity_id.is_empty() {
        return Err(TrackerError::Configuration("empty entity id".to_string()));
    }
    if !entity_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(TrackerError::Configuration(format!(
            "invalid entity id: {:?}",
            entity_id
        )));
    }
    Ok(())
}

async fn read_ids(path: &Path) -> Result<BTreeSet<String>> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(e) => return Err(e.into()),
    };

    if raw.trim().is_empty() {
        return Ok(BTreeSet::new());
    }

    // Accept both JSON strings and bare numbers, as ids are numeric upstream
    let values: Vec<serde_json::Value> = serde_json::from_str(&raw).map_err(|e| {
        TrackerError::Configuration(format!("{} is not a JSON id list: {}", path.display(), e))
    })?;

    let mut ids = BTreeSet::new();
    for value in values {
        let id = match value {
            serde_json::Value::String(s) => s.trim().to_string(),
            serde_json::Value::Number(n) => n.to_string(),
            other => {
                return Err(TrackerError::Configuration(format!(
                    "unexpected entry {} in {}",
                    other,
                    path.display()
                )))
            }
        };
        validate_entity_id(&id)?;
        ids.insert(id);
    }
    Ok(ids)
}
