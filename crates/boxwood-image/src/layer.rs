//! Root filesystem archive extraction.
//!
//! Compression is detected from the gzip magic bytes rather than the file
//! extension, so `rootfs.tar` exported by other tools works either way.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use boxwood_common::error::{BoxError, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Summary of an extracted archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    /// SHA-256 of the archive file.
    pub digest: String,
    /// Archive size in bytes.
    pub size_bytes: u64,
}

/// Returns `true` if `file` starts with the gzip magic. Rewinds the file.
fn is_gzip(file: &mut File, path: &Path) -> Result<bool> {
    let mut magic = [0u8; 2];
    let read = file.read(&mut magic).map_err(|e| BoxError::io(path, e))?;
    let _ = file
        .seek(SeekFrom::Start(0))
        .map_err(|e| BoxError::io(path, e))?;
    Ok(read == magic.len() && magic == GZIP_MAGIC)
}

fn unpack<R: Read>(reader: R, target: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.unpack(target).map_err(|e| BoxError::io(target, e))
}

/// Extracts a tar or tar.gz archive into `target`, creating it if needed.
///
/// # Errors
///
/// Returns an error if the archive cannot be read or unpacked.
pub fn extract_layer(archive_path: &Path, target: &Path) -> Result<Layer> {
    tracing::info!(
        archive = %archive_path.display(),
        target = %target.display(),
        "extracting archive"
    );
    std::fs::create_dir_all(target).map_err(|e| BoxError::io(target, e))?;

    let mut file = File::open(archive_path).map_err(|e| BoxError::io(archive_path, e))?;
    let size_bytes = file
        .metadata()
        .map_err(|e| BoxError::io(archive_path, e))?
        .len();

    if is_gzip(&mut file, archive_path)? {
        unpack(flate2::read::GzDecoder::new(BufReader::new(file)), target)?;
    } else {
        unpack(BufReader::new(file), target)?;
    }

    let digest = crate::hash::hash_file(archive_path)?;
    tracing::info!(digest = %digest, size = size_bytes, "archive extracted");
    Ok(Layer { digest, size_bytes })
}
