//! Crash-safe file writes
//!
//! Cache files and the ETag map are replaced by writing a sibling temp
//! file, syncing it, and renaming it over the target. A crash at any point
//! leaves either the old or the new content, never a partial file.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::Result;

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Atomically replace `path` with `bytes`
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp = temp_path(path);
    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)?;
    Ok(())
}

/// Update a file's modification time to now without changing its content
pub fn touch(path: &Path) -> Result<()> {
    let file = OpenOptions::new().append(true).open(path)?;
    let now = std::time::SystemTime::now();
    file.set_times(fs::FileTimes::new().set_accessed(now).set_modified(now))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_creates_and_replaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub").join("data.json");

        atomic_write(&path, b"first").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"first");

        atomic_write(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");

        // No temp file left behind.
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_touch_updates_mtime() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stale.json");
        fs::write(&path, b"{}").unwrap();

        let old = fs::metadata(&path).unwrap().modified().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        touch(&path).unwrap();
        let new = fs::metadata(&path).unwrap().modified().unwrap();
        assert!(new > old);
        assert_eq!(fs::read(&path).unwrap(), b"{}");
    }
}
