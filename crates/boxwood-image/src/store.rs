//! Local image catalog under `<root>/image/`.

use std::path::{Path, PathBuf};

use boxwood_common::error::{BoxError, Result};

use crate::{hash, layer};

/// One imported image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    /// Image name, also its directory name.
    pub name: String,
    /// Root filesystem directory.
    pub path: PathBuf,
}

/// Directory of unpacked images.
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    /// Opens the store at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| BoxError::io(&dir, e))?;
        tracing::debug!(path = %dir.display(), "image store opened");
        Ok(Self { dir })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn validate_name(name: &str) -> Result<()> {
        if name.is_empty() || name.starts_with('.') || name.contains(['/', ':', ' ']) {
            return Err(BoxError::Config {
                message: format!("invalid image name `{name}`"),
            });
        }
        Ok(())
    }

    /// Unpacks `archive` as image `name`.
    ///
    /// When `sha256` is given the archive is verified before anything is
    /// written. Extraction goes to a hidden staging directory that is renamed
    /// into place on success, so a failed import leaves nothing behind.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::AlreadyExists`] for a taken name,
    /// [`BoxError::HashMismatch`] for a digest mismatch, or any I/O error.
    pub fn import(&self, archive: &Path, name: &str, sha256: Option<&str>) -> Result<ImageInfo> {
        Self::validate_name(name)?;
        let path = self.dir.join(name);
        if path.exists() {
            return Err(BoxError::AlreadyExists {
                kind: "image",
                id: name.to_string(),
            });
        }
        if let Some(expected) = sha256 {
            hash::validate_hash(archive, expected)?;
        }

        let staging = self.dir.join(format!(".{name}.partial"));
        if staging.exists() {
            std::fs::remove_dir_all(&staging).map_err(|e| BoxError::io(&staging, e))?;
        }
        let extracted = layer::extract_layer(archive, &staging)
            .and_then(|layer| {
                std::fs::rename(&staging, &path).map_err(|e| BoxError::io(&path, e))?;
                Ok(layer)
            });
        let layer = match extracted {
            Ok(layer) => layer,
            Err(e) => {
                if let Err(cleanup) = std::fs::remove_dir_all(&staging) {
                    tracing::warn!(path = %staging.display(), error = %cleanup, "staging directory left behind");
                }
                return Err(e);
            }
        };

        tracing::info!(image = name, digest = %layer.digest, "image imported");
        Ok(ImageInfo {
            name: name.to_string(),
            path,
        })
    }

    /// Lists every image, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the store directory cannot be read.
    pub fn list(&self) -> Result<Vec<ImageInfo>> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| BoxError::io(&self.dir, e))?;
        let mut images = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| BoxError::io(&self.dir, e))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') || !entry.path().is_dir() {
                continue;
            }
            images.push(ImageInfo {
                path: entry.path(),
                name,
            });
        }
        images.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(images)
    }

    /// Resolves the root filesystem of image `name`.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::NotFound`] if no such image exists.
    pub fn path(&self, name: &str) -> Result<PathBuf> {
        Self::validate_name(name)?;
        let path = self.dir.join(name);
        if !path.is_dir() {
            return Err(BoxError::NotFound {
                kind: "image",
                id: name.to_string(),
            });
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::tests::rootfs_tar;

    #[test]
    fn import_then_list_and_resolve() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ImageStore::open(dir.path().join("image")).expect("open");
        let archive = rootfs_tar(dir.path(), true);

        let info = store.import(&archive, "busybox", None).expect("import");
        assert!(info.path.join("bin/hello").exists());
        assert_eq!(store.path("busybox").expect("path"), info.path);
        assert_eq!(store.list().expect("list"), vec![info]);
    }

    #[test]
    fn digest_mismatch_leaves_store_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ImageStore::open(dir.path().join("image")).expect("open");
        let archive = rootfs_tar(dir.path(), false);

        let err = store.import(&archive, "busybox", Some(&"0".repeat(64))).unwrap_err();
        assert!(matches!(err, BoxError::HashMismatch { .. }));
        assert!(store.list().expect("list").is_empty());
    }

    #[test]
    fn matching_digest_is_accepted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ImageStore::open(dir.path().join("image")).expect("open");
        let archive = rootfs_tar(dir.path(), false);
        let digest = hash::hash_file(&archive).expect("hash");
        let _ = store.import(&archive, "base", Some(&digest)).expect("import");
    }

    #[test]
    fn duplicate_names_and_unknown_images_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ImageStore::open(dir.path().join("image")).expect("open");
        let archive = rootfs_tar(dir.path(), false);
        let _ = store.import(&archive, "base", None).expect("import");
        assert!(matches!(
            store.import(&archive, "base", None),
            Err(BoxError::AlreadyExists { .. })
        ));
        assert!(matches!(store.path("nope"), Err(BoxError::NotFound { .. })));
        assert!(matches!(store.path("../etc"), Err(BoxError::Config { .. })));
    }
}
