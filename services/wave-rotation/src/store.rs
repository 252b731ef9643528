//! Record persistence
//!
//! Each record lives in its own JSON file and is replaced with a
//! write-temp-then-rename so a crash mid-write leaves the previous record
//! intact. The cycle journal is append-only JSON lines.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::StoreError;

/// Typed handle on one persisted record
#[derive(Debug, Clone)]
pub struct JsonStore<T> {
    path: PathBuf,
    _record: PhantomData<T>,
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the record, or its default when the file does not exist yet
    pub fn load(&self) -> Result<T, StoreError> {
        Ok(self.load_opt()?.unwrap_or_default())
    }

    pub fn load_opt(&self) -> Result<Option<T>, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_err(e)),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                path: self.path.display().to_string(),
                source,
            })
    }

    /// Atomically replace the record
    pub fn save(&self, record: &T) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(record).map_err(|source| StoreError::Corrupt {
            path: self.path.display().to_string(),
            source,
        })?;
        write_atomic(&self.path, json.as_bytes()).map_err(|e| self.io_err(e))?;
        debug!("Wrote {}", self.path.display());
        Ok(())
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

/// Write `bytes` to a sibling temp file, fsync it, then rename over `path`
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = tmp_path(path);
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Append-only JSON-lines journal
#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append<T: Serialize>(&self, entry: &T) -> anyhow::Result<()> {
        use anyhow::Context;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating journal dir {}", parent.display()))?;
        }
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening journal {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("appending to journal {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        value: u32,
        label: Option<String>,
    }

    #[test]
    fn test_missing_record_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonStore<Counter> = JsonStore::new(dir.path().join("counter.json"));
        assert_eq!(store.load().unwrap(), Counter::default());
        assert!(store.load_opt().unwrap().is_none());
    }

    #[test]
    fn test_save_replaces_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("counter.json");
        let store: JsonStore<Counter> = JsonStore::new(&path);

        store.save(&Counter { value: 1, label: None }).unwrap();
        store
            .save(&Counter {
                value: 2,
                label: Some("two".to_string()),
            })
            .unwrap();

        assert_eq!(store.load().unwrap().value, 2);
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn test_corrupt_record_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counter.json");
        fs::write(&path, "{not json").unwrap();
        let store: JsonStore<Counter> = JsonStore::new(&path);
        assert!(matches!(store.load(), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_journal_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path().join("journal").join("cycles.jsonl"));
        journal.append(&Counter { value: 1, label: None }).unwrap();
        journal.append(&Counter { value: 2, label: None }).unwrap();
        let raw = fs::read_to_string(journal.path()).unwrap();
        assert_eq!(raw.lines().count(), 2);
    }
}
