//! Profile stores keyed by tax ID.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::RegistryError;
use crate::models::CachedProfile;

/// Cache of fetched profiles.
///
/// Reads and writes are whole entries under a lock, so a reader never sees
/// a partially written profile.
pub trait ProfileStore: Send + Sync {
    fn get(&self, tax_id: &str) -> Option<CachedProfile>;

    fn put(&self, entry: CachedProfile);

    /// Persist pending writes. A no-op for in-memory stores.
    fn flush(&self) -> Result<(), RegistryError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Store that lives for the process only.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, CachedProfile>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProfileStore for MemoryStore {
    fn get(&self, tax_id: &str) -> Option<CachedProfile> {
        self.entries.lock().ok()?.get(tax_id).cloned()
    }

    fn put(&self, entry: CachedProfile) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(entry.profile.tax_id.clone(), entry);
        }
    }

    fn flush(&self) -> Result<(), RegistryError> {
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }
}

/// JSON Lines file, one cached profile per line.
///
/// Malformed lines are skipped on open. Flushing rewrites the whole file
/// through a temporary file in the same directory and renames it over the
/// original.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, CachedProfile>>,
    dirty: Mutex<bool>,
}

impl JsonFileStore {
    /// Open (or start) a cache file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref().to_path_buf();
        let mut entries = BTreeMap::new();

        if path.exists() {
            let file = fs::File::open(&path).map_err(|e| RegistryError::Cache(format!("{}: {}", path.display(), e)))?;
            for (n, line) in BufReader::new(file).lines().enumerate() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("{}:{}: unreadable line: {}", path.display(), n + 1, e);
                        continue;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<CachedProfile>(&line) {
                    Ok(entry) => {
                        entries.insert(entry.profile.tax_id.clone(), entry);
                    }
                    Err(e) => warn!("{}:{}: skipping malformed cache entry: {}", path.display(), n + 1, e),
                }
            }
            debug!("Loaded {} cached profiles from {}", entries.len(), path.display());
        }

        Ok(Self {
            path,
            entries: Mutex::new(entries),
            dirty: Mutex::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_all(&self, entries: &BTreeMap<String, CachedProfile>) -> Result<(), RegistryError> {
        let err = |e: std::io::Error| RegistryError::Cache(format!("{}: {}", self.path.display(), e));

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(err)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(err)?;
        for entry in entries.values() {
            let line = serde_json::to_string(entry).map_err(|e| RegistryError::Cache(e.to_string()))?;
            writeln!(tmp, "{}", line).map_err(err)?;
        }
        tmp.as_file().sync_all().map_err(err)?;
        tmp.persist(&self.path).map_err(|e| err(e.error))?;
        Ok(())
    }
}

impl ProfileStore for JsonFileStore {
    fn get(&self, tax_id: &str) -> Option<CachedProfile> {
        self.entries.lock().ok()?.get(tax_id).cloned()
    }

    fn put(&self, entry: CachedProfile) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(entry.profile.tax_id.clone(), entry);
            if let Ok(mut dirty) = self.dirty.lock() {
                *dirty = true;
            }
        }
    }

    fn flush(&self) -> Result<(), RegistryError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| RegistryError::Cache("cache lock poisoned".to_string()))?;
        let mut dirty = self
            .dirty
            .lock()
            .map_err(|_| RegistryError::Cache("cache lock poisoned".to_string()))?;
        if !*dirty {
            return Ok(());
        }
        self.write_all(&entries)?;
        *dirty = false;
        debug!("Flushed {} cached profiles to {}", entries.len(), self.path.display());
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }
}
