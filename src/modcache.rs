//! Content-addressed cache for downloaded mod archives
//!
//! Installation proper (unzipping, file placement) is out of scope, but
//! the plan's downloads land here: one file per release, keyed by the
//! leading bytes of its SHA256 so renamed uploads never collide. Every
//! download is verified against the metadata checksum before it is
//! admitted; a mismatch is an integrity failure, not a warning.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use sha2::{Digest, Sha256};

use crate::downloader::{DownloadTarget, Downloader};
use crate::release::Release;
use crate::txfile::atomic_write;
use crate::user::User;
use crate::{Error, Result};

#[derive(Debug)]
pub struct ModCache {
    dir: PathBuf,
}

impl ModCache {
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(ModCache {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where `release`'s archive lives (or would live) in the cache
    pub fn archive_path(&self, release: &Release) -> PathBuf {
        let key = release
            .download_hash
            .sha256
            .as_deref()
            .map(|hash| hash[..hash.len().min(8)].to_lowercase())
            .unwrap_or_else(|| "nohash".to_string());
        self.dir
            .join(format!("{}-{}-{}.zip", key, release.identifier, release.version))
    }

    pub fn is_cached(&self, release: &Release) -> bool {
        self.archive_path(release).exists()
    }

    /// Verify `bytes` against the release's declared SHA256
    ///
    /// Releases without a declared hash pass; the repository simply gave
    /// us nothing to check against.
    pub fn verify(&self, release: &Release, bytes: &[u8]) -> Result<()> {
        let Some(expected) = release.download_hash.sha256.as_deref() else {
            return Ok(());
        };
        let actual = hex::encode(Sha256::digest(bytes));
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(Error::Integrity {
                path: self.archive_path(release),
            });
        }
        Ok(())
    }

    /// Store verified bytes for `release`, returning the cache path
    pub fn store(&self, release: &Release, bytes: &[u8]) -> Result<PathBuf> {
        self.verify(release, bytes)?;
        let path = self.archive_path(release);
        atomic_write(&path, bytes)?;
        Ok(path)
    }

    /// Ensure every release's archive is cached, downloading what is missing
    ///
    /// Returns cache paths in the order of `releases`. Metapackages and
    /// DLC have nothing to download and are skipped with a `None`.
    pub fn fetch_all(
        &self,
        releases: &[Release],
        downloader: &dyn Downloader,
        user: &dyn User,
    ) -> Result<Vec<Option<PathBuf>>> {
        let mut paths: Vec<Option<PathBuf>> = vec![None; releases.len()];
        let mut targets = Vec::new();
        let mut target_release: Vec<usize> = Vec::new();

        for (i, release) in releases.iter().enumerate() {
            let Some(download) = &release.download else {
                continue;
            };
            if self.is_cached(release) {
                debug!("{} already cached", release);
                paths[i] = Some(self.archive_path(release));
                continue;
            }
            targets.push(DownloadTarget {
                urls: vec![download.clone()],
                size: release.download_size,
                etag: None,
            });
            target_release.push(i);
        }

        if targets.is_empty() {
            user.raise_message("All downloads already cached");
            return Ok(paths);
        }

        let total = targets.len();
        let mut completed = 0usize;
        let mut first_error: Option<Error> = None;

        downloader.download_and_wait(&targets, &mut |outcome| {
            let release = &releases[target_release[outcome.index]];
            completed += 1;
            let percent = ((completed * 100) / total).min(100) as u8;

            if let Some(error) = outcome.error {
                user.raise_error(&format!("Failed to download {}: {}", release, error));
                if first_error.is_none() {
                    first_error = Some(error);
                }
                return;
            }

            match self.store(release, &outcome.data) {
                Ok(path) => {
                    user.raise_progress(&format!("Downloaded {}", release), percent);
                    paths[target_release[outcome.index]] = Some(path);
                }
                Err(error) => {
                    user.raise_error(&format!("Failed to store {}: {}", release, error));
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
            }
        })?;

        match first_error {
            Some(error) => Err(error),
            None => {
                user.raise_message("All downloads complete");
                Ok(paths)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::Release;
    use tempfile::TempDir;

    fn release_with_hash(bytes: &[u8]) -> Release {
        let mut release = Release::for_test("Hashy", "1.0");
        release.download_hash.sha256 = Some(hex::encode(Sha256::digest(bytes)));
        release
    }

    #[test]
    fn test_store_and_hit() {
        let dir = TempDir::new().unwrap();
        let cache = ModCache::new(dir.path()).unwrap();
        let release = release_with_hash(b"archive contents");

        assert!(!cache.is_cached(&release));
        let path = cache.store(&release, b"archive contents").unwrap();
        assert!(cache.is_cached(&release));
        assert_eq!(fs::read(path).unwrap(), b"archive contents");
    }

    #[test]
    fn test_checksum_mismatch_is_integrity_error() {
        let dir = TempDir::new().unwrap();
        let cache = ModCache::new(dir.path()).unwrap();
        let release = release_with_hash(b"expected");

        let err = cache.store(&release, b"tampered").unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));
        assert!(!cache.is_cached(&release));
    }

    #[test]
    fn test_no_declared_hash_is_accepted() {
        let dir = TempDir::new().unwrap();
        let cache = ModCache::new(dir.path()).unwrap();
        let release = Release::for_test("NoHash", "1.0");
        cache.store(&release, b"whatever").unwrap();
    }

    #[test]
    fn test_paths_differ_per_hash() {
        let dir = TempDir::new().unwrap();
        let cache = ModCache::new(dir.path()).unwrap();
        let a = release_with_hash(b"one");
        let b = release_with_hash(b"two");
        assert_ne!(cache.archive_path(&a), cache.archive_path(&b));
    }
}
