//! Persistent box records.
//!
//! Each box owns `<root>/box/<name>/`, holding its `config.json` record,
//! its detached output log and the mount point of its root filesystem.
//! There is no daemon; this directory tree is the only source of truth
//! between invocations.

use std::path::{Path, PathBuf};

use boxwood_common::constants::RECORD_FILE;
use boxwood_common::error::{BoxError, Result};
use boxwood_common::types::ContainerRecord;

/// Rejects names that cannot be used as a single path component.
///
/// # Errors
///
/// Returns [`BoxError::Config`] for empty, hidden or path-like names.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\0']) {
        return Err(BoxError::Config {
            message: format!("invalid box name `{name}`"),
        });
    }
    Ok(())
}

/// Directory-backed store of [`ContainerRecord`]s keyed by box name.
#[derive(Debug, Clone)]
pub struct ContainerStore {
    dir: PathBuf,
}

impl ContainerStore {
    /// Creates a store rooted at `dir` (usually `<root>/box`).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory owned by box `name`.
    #[must_use]
    pub fn box_dir(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.box_dir(name).join(RECORD_FILE)
    }

    /// Returns `true` if a record for `name` exists.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.record_path(name).is_file()
    }

    /// Persists `record` atomically under its name.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file
    /// cannot be written.
    pub fn save(&self, record: &ContainerRecord) -> Result<()> {
        validate_name(&record.name)?;
        let dir = self.box_dir(&record.name);
        std::fs::create_dir_all(&dir).map_err(|e| BoxError::io(&dir, e))?;

        let path = self.record_path(&record.name);
        let tmp = dir.join(format!(".{RECORD_FILE}.tmp"));
        let json = serde_json::to_vec_pretty(record)?;
        std::fs::write(&tmp, json).map_err(|e| BoxError::io(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| BoxError::io(&path, e))?;
        tracing::debug!(path = %path.display(), status = %record.status, "record saved");
        Ok(())
    }

    /// Loads the record of box `name`.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::NotFound`] if there is no such box, or an error if
    /// the record cannot be read or parsed.
    pub fn load(&self, name: &str) -> Result<ContainerRecord> {
        validate_name(name)?;
        let path = self.record_path(name);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BoxError::NotFound {
                    kind: "box",
                    id: name.to_string(),
                });
            }
            Err(e) => return Err(BoxError::io(&path, e)),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Lists every readable record, oldest first.
    ///
    /// Directories without a parseable record are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the store directory exists but cannot be read.
    pub fn list(&self) -> Result<Vec<ContainerRecord>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BoxError::io(&self.dir, e)),
        };

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| BoxError::io(&self.dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !entry.path().is_dir() {
                continue;
            }
            match self.load(&name) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(name = %name, error = %e, "skipping unreadable box record"),
            }
        }
        records.sort_by(|a, b| {
            a.created_time
                .cmp(&b.created_time)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(records)
    }

    /// Deletes the whole directory of box `name`. A missing box is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be removed.
    pub fn remove(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let dir = self.box_dir(name);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::debug!(path = %dir.display(), "box directory removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BoxError::io(&dir, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use boxwood_common::types::{ContainerId, ContainerStatus};

    use super::*;

    fn record(name: &str) -> ContainerRecord {
        ContainerRecord::running(
            ContainerId::new("abcdef0123"),
            name.to_string(),
            &["sleep".to_string(), "5".to_string()],
            4242,
        )
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ContainerStore::new(dir.path());
        let rec = record("web");
        store.save(&rec).expect("save");

        assert!(store.exists("web"));
        assert!(dir.path().join("web/config.json").is_file());
        assert_eq!(store.load("web").expect("load"), rec);
    }

    #[test]
    fn load_missing_box_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ContainerStore::new(dir.path());
        let err = store.load("ghost").unwrap_err();
        assert!(matches!(err, BoxError::NotFound { kind: "box", .. }));
    }

    #[test]
    fn list_skips_broken_records_and_hidden_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ContainerStore::new(dir.path());
        store.save(&record("a")).expect("save a");
        let mut stopped = record("b");
        stopped.status = ContainerStatus::Stopped;
        stopped.pid = None;
        store.save(&stopped).expect("save b");
        std::fs::create_dir_all(dir.path().join("broken")).expect("mkdir");
        std::fs::write(dir.path().join("broken/config.json"), "{").expect("write");
        std::fs::create_dir_all(dir.path().join(".staging")).expect("mkdir");

        let names: Vec<String> = store
            .list()
            .expect("list")
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn list_of_missing_store_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ContainerStore::new(dir.path().join("nope"));
        assert!(store.list().expect("list").is_empty());
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ContainerStore::new(dir.path());
        store.save(&record("gone")).expect("save");
        store.remove("gone").expect("remove");
        assert!(!store.box_dir("gone").exists());
        store.remove("gone").expect("remove again");
    }

    #[test]
    fn path_like_names_are_rejected() {
        for name in ["", ".hidden", "a/b"] {
            assert!(validate_name(name).is_err(), "{name:?} accepted");
        }
        assert!(validate_name("web-1").is_ok());
    }
}
