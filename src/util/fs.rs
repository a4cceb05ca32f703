//! Filesystem helpers for staging and atomic promotion

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Recursively copies `src` into `dst`, creating `dst`
pub fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Writes `data` to `dest` via a sibling temp file and a rename
pub fn atomic_write(dest: &Path, data: &[u8]) -> io::Result<()> {
    let tmp = sibling(dest, &format!("tmp-{}", uuid::Uuid::new_v4().simple()));
    fs::write(&tmp, data)?;
    if let Err(e) = fs::rename(&tmp, dest) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Moves a fully prepared directory into place at `dest`
///
/// `staged` and `dest` must be on the same filesystem. A previous `dest` is
/// moved aside first and removed only after the new directory is in place;
/// if the swap fails the previous directory is restored.
pub fn promote_dir(staged: &Path, dest: &Path) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    if !dest.exists() {
        return fs::rename(staged, dest);
    }

    let retired = sibling(dest, &format!("old-{}", uuid::Uuid::new_v4().simple()));
    fs::rename(dest, &retired)?;

    if let Err(e) = fs::rename(staged, dest) {
        if let Err(restore) = fs::rename(&retired, dest) {
            warn!(
                dest = %dest.display(),
                error = %restore,
                "Failed to restore previous directory after aborted promotion"
            );
        }
        return Err(e);
    }

    if let Err(e) = fs::remove_dir_all(&retired) {
        warn!(path = %retired.display(), error = %e, "Failed to remove retired directory");
    }
    Ok(())
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}", name, suffix))
}
