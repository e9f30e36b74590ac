//! Multi-repository metadata store and update pipeline
//!
//! [`RepoDataManager`] owns the local metadata cache: one JSON file per
//! repository plus `etags.json`, mirrored by in-memory [`RepositoryIndex`]es.
//! `prepopulate` loads whatever is already on disk; `update` talks to the
//! network with ETag-conditional bookkeeping, swaps refreshed indexes in,
//! and persists everything crash-safely.
//!
//! Ordering guarantees: an index is swapped into memory only after its cache
//! file has been written, and `etags.json` is persisted only after all
//! swaps. A crash between the last swap and the ETag save leaves ETags
//! stale, which merely costs a redundant re-download next time.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::Duration;
use log::{debug, warn};

use crate::downloader::{DownloadTarget, Downloader};
use crate::etag::EtagStore;
use crate::events::{Publisher, SubscriptionToken};
use crate::game::Game;
use crate::idarena::{IdArena, TrackedId};
use crate::release::Release;
use crate::repository::{precedence_order, Repository, RepositoryIndex};
use crate::txfile::{atomic_write, touch};
use crate::user::User;
use crate::{Error, Result};

/// Age after which a repository starts counting as stale for UI nagging
pub const TIME_TILL_STALE_DAYS: i64 = 3;

/// Age after which the UI should nag loudly
pub const TIME_TILL_VERY_STALE_DAYS: i64 = 14;

pub fn time_till_stale() -> Duration {
    Duration::days(TIME_TILL_STALE_DAYS)
}

pub fn time_till_very_stale() -> Duration {
    Duration::days(TIME_TILL_VERY_STALE_DAYS)
}

/// What an update call accomplished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateResult {
    /// At least one repository was refreshed
    Updated,
    /// Everything was current; no downloads were issued
    NoChanges,
    /// Refreshed, but some metadata uses a spec newer than this client
    OutdatedClient,
}

/// An "endorsed by" edge from a repository's metadata
#[derive(Debug, Clone, PartialEq)]
pub struct RepoReference {
    pub referrer: String,
    pub repository: Repository,
}

/// Owns cached repository metadata and its on-disk representation
pub struct RepoDataManager {
    cache_dir: PathBuf,
    /// In-memory indexes keyed by repository URL
    indexes: HashMap<String, Arc<RepositoryIndex>>,
    etags: EtagStore,
    repo_references: Vec<RepoReference>,
    ids: IdArena<String>,
    updated: Publisher<Vec<Repository>>,
}

impl RepoDataManager {
    pub fn new(cache_dir: &Path) -> Result<Self> {
        fs::create_dir_all(cache_dir)?;
        let etags = EtagStore::load(&cache_dir.join("etags.json"));
        Ok(RepoDataManager {
            cache_dir: cache_dir.to_path_buf(),
            indexes: HashMap::new(),
            etags,
            repo_references: Vec::new(),
            ids: IdArena::new(),
            updated: Publisher::new(),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn etags_path(&self) -> &Path {
        self.etags.path()
    }

    /// Copy of the in-memory ETag map, for diagnostics
    pub fn etags_snapshot(&self) -> HashMap<String, String> {
        self.etags.snapshot()
    }

    pub fn cache_file(&self, repo: &Repository) -> PathBuf {
        self.cache_dir.join(repo.cache_basename())
    }

    pub fn is_loaded(&self, repo: &Repository) -> bool {
        self.indexes.contains_key(repo.uri.as_str())
    }

    pub fn index(&self, repo: &Repository) -> Option<Arc<RepositoryIndex>> {
        self.indexes.get(repo.uri.as_str()).cloned()
    }

    /// Load cached repository files that are on disk but not yet in memory
    ///
    /// Progress is reported as a single 0..100 scalar weighted by file size.
    pub fn prepopulate(&mut self, repos: &[Repository], user: &dyn User) {
        let pending: Vec<(&Repository, PathBuf, u64)> = distinct_by_url(repos)
            .into_iter()
            .filter(|repo| !self.is_loaded(repo))
            .filter_map(|repo| {
                let path = self.cache_file(repo);
                let size = fs::metadata(&path).ok()?.len();
                Some((repo, path, size))
            })
            .collect();

        let total: u64 = pending.iter().map(|(_, _, size)| size).sum();
        let mut done: u64 = 0;

        for (repo, path, size) in pending {
            user.raise_progress(
                &format!("Loading cached metadata for {}", repo.name),
                weighted_percent(done, total),
            );
            match fs::read(&path).map_err(Error::from).and_then(|bytes| {
                RepositoryIndex::from_slice(&bytes)
            }) {
                Ok(index) => {
                    install_index(
                        &mut self.indexes,
                        &mut self.repo_references,
                        repo,
                        index,
                    );
                }
                Err(e) => {
                    warn!("discarding unreadable cache file {}: {}", path.display(), e);
                }
            }
            done += size;
        }
        user.raise_progress("Loading cached metadata", 100);
    }

    /// Refresh repositories from the network
    ///
    /// Only repositories that are actually stale (per ETag comparison) are
    /// downloaded, unless `skip_etags` forces the issue; `file://`
    /// repositories are always refreshed. On any failure every pending ETag
    /// change is rolled back by re-reading `etags.json`, so a retry
    /// re-downloads everything this call attempted. Index swaps completed
    /// before the failure are deliberately left in place.
    pub fn update(
        &mut self,
        repos: &[Repository],
        game: &dyn Game,
        skip_etags: bool,
        downloader: &dyn Downloader,
        user: &dyn User,
        user_agent: &str,
    ) -> Result<UpdateResult> {
        if let Err(e) = game.refresh_versions(user_agent) {
            warn!("could not refresh {} versions: {}", game.short_name(), e);
        }

        let distinct = distinct_by_url(repos);
        let to_update: Vec<&Repository> = distinct
            .iter()
            .filter(|repo| {
                repo.uri.scheme() == "file" || skip_etags || self.is_stale(repo, downloader)
            })
            .copied()
            .collect();

        if to_update.is_empty() {
            for repo in &distinct {
                let path = self.cache_file(repo);
                if path.exists() {
                    if let Err(e) = touch(&path) {
                        warn!("could not touch {}: {}", path.display(), e);
                    }
                }
            }
            user.raise_message("All repositories already up to date");
            return Ok(UpdateResult::NoChanges);
        }

        user.raise_message(&format!("Updating {} repositories", to_update.len()));

        let targets: Vec<DownloadTarget> = to_update
            .iter()
            .map(|repo| DownloadTarget {
                urls: vec![repo.uri.clone()],
                size: None,
                etag: self.etags.get(repo.uri.as_str()).map(str::to_string),
            })
            .collect();

        let mut pending_etags = self.etags.snapshot();
        let mut outcomes: Vec<Option<crate::downloader::DownloadOutcome>> =
            (0..targets.len()).map(|_| None).collect();
        let mut completed = 0usize;
        let total = targets.len();

        let download_result = downloader.download_and_wait(&targets, &mut |outcome| {
            let url = to_update[outcome.index].uri.as_str();
            match &outcome.etag {
                Some(etag) => {
                    pending_etags.insert(url.to_string(), etag.clone());
                }
                // An empty or ETag-less response clears the recorded tag so
                // the repo counts as stale next time.
                None => {
                    pending_etags.remove(url);
                }
            }
            completed += 1;
            user.raise_progress(
                &format!("Downloaded {}", to_update[outcome.index].name),
                weighted_percent(completed as u64, total as u64),
            );
            let idx = outcome.index;
            outcomes[idx] = Some(outcome);
        });

        if let Err(e) = download_result {
            self.etags.reload();
            return Err(e);
        }

        let failures: Vec<(String, Box<Error>)> = outcomes
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| {
                let outcome = slot.as_mut()?;
                outcome
                    .error
                    .take()
                    .map(|e| (to_update[i].uri.to_string(), Box::new(e)))
            })
            .collect();
        if !failures.is_empty() {
            self.etags.reload();
            return Err(Error::DownloadErrors { failures });
        }

        for (i, repo) in to_update.iter().enumerate() {
            let outcome = outcomes[i]
                .as_ref()
                .expect("downloader reported completion for every target");

            let index = match RepositoryIndex::from_slice(&outcome.data) {
                Ok(index) => index,
                Err(e) => {
                    // Roll back every pending ETag change; swaps already
                    // performed this call stay in place.
                    self.etags.reload();
                    return Err(Error::DownloadErrors {
                        failures: vec![(repo.uri.to_string(), Box::new(e))],
                    });
                }
            };

            // Disk before memory: readers observing the new index may rely
            // on the cache file existing.
            let path = self.cache_file(repo);
            if let Err(e) = atomic_write(&path, &outcome.data) {
                self.etags.reload();
                return Err(e);
            }
            debug!(
                "installed {} ({} modules, {} releases)",
                repo.name,
                index.module_count(),
                index.release_count()
            );
            install_index(&mut self.indexes, &mut self.repo_references, repo, index);
        }

        self.etags.replace(pending_etags);
        if let Err(e) = self.etags.save() {
            self.etags.reload();
            return Err(e);
        }

        // Every swap invalidates outstanding GUI handles.
        self.ids.bump_generation();

        let changed: Vec<Repository> = to_update.iter().map(|r| (*r).clone()).collect();
        self.updated.emit(&changed);

        if self.indexes.values().any(|index| index.unsupported_spec) {
            user.raise_message(
                "Some repository metadata is newer than this client understands; please upgrade",
            );
            return Ok(UpdateResult::OutdatedClient);
        }
        Ok(UpdateResult::Updated)
    }

    fn is_stale(&self, repo: &Repository, downloader: &dyn Downloader) -> bool {
        let url = repo.uri.as_str();
        let Some(recorded) = self.etags.get(url) else {
            return true;
        };
        if !self.cache_file(repo).exists() {
            return true;
        }
        match downloader.etag(&repo.uri) {
            Ok(remote) => remote.as_deref() != Some(recorded),
            Err(e) => {
                warn!("HEAD {} failed, treating as stale: {}", url, e);
                true
            }
        }
    }

    /// All releases of `identifier` across `repos`
    ///
    /// Repositories contribute in precedence order (priority ascending,
    /// name ascending); within one repository releases come newest first.
    pub fn available_modules<'a>(
        &'a self,
        repos: &[Repository],
        identifier: &str,
    ) -> Vec<&'a Release> {
        let mut out = Vec::new();
        for repo in precedence_order(repos) {
            if let Some(index) = self.indexes.get(repo.uri.as_str()) {
                out.extend(index.releases(identifier));
            }
        }
        out
    }

    /// Releases across `repos` whose `provides` contains `identifier`
    pub fn provided_by<'a>(&'a self, repos: &[Repository], identifier: &str) -> Vec<&'a Release> {
        let mut out = Vec::new();
        for repo in precedence_order(repos) {
            if let Some(index) = self.indexes.get(repo.uri.as_str()) {
                out.extend(index.provided_by(identifier));
            }
        }
        out
    }

    /// First non-zero download count in precedence order
    pub fn download_count(&self, repos: &[Repository], identifier: &str) -> Option<u64> {
        precedence_order(repos)
            .into_iter()
            .filter_map(|repo| self.indexes.get(repo.uri.as_str()))
            .filter_map(|index| index.download_counts.get(identifier))
            .find(|count| **count > 0)
            .copied()
    }

    /// Minimum age since mtime across stale repositories; zero if none stale
    pub fn last_update(&self, repos: &[Repository]) -> Duration {
        let now = SystemTime::now();
        distinct_by_url(repos)
            .into_iter()
            .filter_map(|repo| {
                let mtime = fs::metadata(self.cache_file(repo)).ok()?.modified().ok()?;
                let age = now.duration_since(mtime).ok()?;
                Duration::from_std(age).ok()
            })
            .filter(|age| *age > time_till_stale())
            .min()
            .unwrap_or_else(Duration::zero)
    }

    pub fn repository_references(&self) -> &[RepoReference] {
        &self.repo_references
    }

    pub fn subscribe_updated<F: Fn(&Vec<Repository>) + 'static>(
        &mut self,
        callback: F,
    ) -> SubscriptionToken {
        self.updated.subscribe(callback)
    }

    pub fn unsubscribe_updated(&mut self, token: SubscriptionToken) -> bool {
        self.updated.unsubscribe(token)
    }

    /// GUI handle for a module identifier; invalidated on every update
    pub fn track_module(&mut self, identifier: &str) -> TrackedId {
        self.ids.lookup_or_register(&identifier.to_string())
    }

    pub fn lookup_module(&self, id: TrackedId) -> Option<&str> {
        self.ids.lookup(id).map(String::as_str)
    }

    /// Identifiers of every module loaded across `repos`
    pub fn all_identifiers(&self, repos: &[Repository]) -> Vec<String> {
        let mut identifiers: HashSet<String> = HashSet::new();
        for repo in distinct_by_url(repos) {
            if let Some(index) = self.indexes.get(repo.uri.as_str()) {
                identifiers.extend(index.catalog.keys().cloned());
            }
        }
        let mut out: Vec<String> = identifiers.into_iter().collect();
        out.sort();
        out
    }
}

impl std::fmt::Debug for RepoDataManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoDataManager")
            .field("cache_dir", &self.cache_dir)
            .field("loaded", &self.indexes.len())
            .finish()
    }
}

fn install_index(
    indexes: &mut HashMap<String, Arc<RepositoryIndex>>,
    references: &mut Vec<RepoReference>,
    repo: &Repository,
    index: RepositoryIndex,
) {
    if let Some(referenced) = &index.repositories {
        references.retain(|edge| edge.referrer != repo.name);
        for referenced_repo in referenced {
            references.push(RepoReference {
                referrer: repo.name.clone(),
                repository: referenced_repo.clone(),
            });
        }
    }
    indexes.insert(repo.uri.as_str().to_string(), Arc::new(index));
}

fn distinct_by_url(repos: &[Repository]) -> Vec<&Repository> {
    let mut seen = HashSet::new();
    repos
        .iter()
        .filter(|repo| seen.insert(repo.uri.as_str()))
        .collect()
}

fn weighted_percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        100
    } else {
        ((done * 100) / total).min(100) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::HttpDownloader;
    use crate::game::KerbalGame;
    use crate::user::NullUser;
    use tempfile::TempDir;
    use url::Url;

    fn file_repo(dir: &Path, name: &str, priority: i32, body: &str) -> Repository {
        let path = dir.join(format!("{}.json", name));
        fs::write(&path, body).unwrap();
        let mut repo = Repository::new(name, Url::from_file_path(&path).unwrap());
        repo.priority = priority;
        repo
    }

    fn offline_game() -> KerbalGame {
        KerbalGame::new(
            "TEST",
            "https://example.com/repos.json".parse().unwrap(),
            "https://example.com/default.json".parse().unwrap(),
            None,
        )
    }

    const REPO_A: &str = r#"[
        { "identifier": "Widget", "version": "1.0",
          "download": "https://example.com/w1.zip" },
        { "identifier": "Widget", "version": "2.0",
          "download": "https://example.com/w2.zip" }
    ]"#;

    const REPO_B: &str = r#"{
        "modules": [
            { "identifier": "Widget", "version": "1.5",
              "download": "https://example.org/w15.zip" }
        ],
        "download_counts": { "Widget": 42 }
    }"#;

    #[test]
    fn test_update_then_query_file_repos() {
        let source = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();

        let a = file_repo(source.path(), "alpha", 0, REPO_A);
        let b = file_repo(source.path(), "beta", 1, REPO_B);
        let repos = vec![a.clone(), b.clone()];

        let mut store = RepoDataManager::new(cache.path()).unwrap();
        let downloader = HttpDownloader::new("kerbpm-test").unwrap();
        let result = store
            .update(
                &repos,
                &offline_game(),
                false,
                &downloader,
                &NullUser,
                "kerbpm-test",
            )
            .unwrap();
        assert_eq!(result, UpdateResult::Updated);

        // Priority order: alpha's releases (newest first) then beta's.
        let available = store.available_modules(&repos, "Widget");
        let versions: Vec<String> = available.iter().map(|r| r.version.to_string()).collect();
        assert_eq!(versions, vec!["2.0", "1.0", "1.5"]);

        assert_eq!(store.download_count(&repos, "Widget"), Some(42));
        assert!(store.cache_file(&a).exists());
        assert!(store.cache_file(&b).exists());
    }

    #[test]
    fn test_prepopulate_reads_cache_files() {
        let source = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let repo = file_repo(source.path(), "alpha", 0, REPO_A);
        let repos = vec![repo.clone()];

        {
            let mut store = RepoDataManager::new(cache.path()).unwrap();
            let downloader = HttpDownloader::new("kerbpm-test").unwrap();
            store
                .update(
                    &repos,
                    &offline_game(),
                    false,
                    &downloader,
                    &NullUser,
                    "kerbpm-test",
                )
                .unwrap();
        }

        // Fresh store, no network: prepopulate loads from disk.
        let mut store = RepoDataManager::new(cache.path()).unwrap();
        assert!(!store.is_loaded(&repo));
        store.prepopulate(&repos, &NullUser);
        assert!(store.is_loaded(&repo));
        assert_eq!(store.available_modules(&repos, "Widget").len(), 2);
    }

    #[test]
    fn test_parse_failure_rolls_back_etags() {
        let source = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();

        let good = file_repo(source.path(), "good", 0, REPO_A);
        let bad = file_repo(source.path(), "bad", 1, "{ not json");
        let repos = vec![good.clone(), bad.clone()];

        let mut store = RepoDataManager::new(cache.path()).unwrap();
        let downloader = HttpDownloader::new("kerbpm-test").unwrap();
        let err = store
            .update(
                &repos,
                &offline_game(),
                false,
                &downloader,
                &NullUser,
                "kerbpm-test",
            )
            .unwrap_err();
        assert!(matches!(err, Error::DownloadErrors { .. }));

        // Rollback: no ETag state survives the failed call. The good repo's
        // in-memory swap, if it happened before the failure, stays.
        assert!(store.etags.snapshot().is_empty());
    }

    #[test]
    fn test_updated_event_fires_once_per_call() {
        let source = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let repo = file_repo(source.path(), "alpha", 0, REPO_A);
        let repos = vec![repo];

        let mut store = RepoDataManager::new(cache.path()).unwrap();
        let fired = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let sink = fired.clone();
        store.subscribe_updated(move |changed| {
            sink.borrow_mut().push(changed.len());
        });

        let downloader = HttpDownloader::new("kerbpm-test").unwrap();
        store
            .update(
                &repos,
                &offline_game(),
                false,
                &downloader,
                &NullUser,
                "kerbpm-test",
            )
            .unwrap();
        assert_eq!(*fired.borrow(), vec![1]);
    }

    #[test]
    fn test_tracked_ids_dangle_after_update() {
        let source = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let repo = file_repo(source.path(), "alpha", 0, REPO_A);
        let repos = vec![repo];

        let mut store = RepoDataManager::new(cache.path()).unwrap();
        let id = store.track_module("Widget");
        assert_eq!(store.lookup_module(id), Some("Widget"));

        let downloader = HttpDownloader::new("kerbpm-test").unwrap();
        store
            .update(
                &repos,
                &offline_game(),
                false,
                &downloader,
                &NullUser,
                "kerbpm-test",
            )
            .unwrap();
        assert_eq!(store.lookup_module(id), None);
    }

    #[test]
    fn test_repository_references_recorded() {
        let source = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let body = r#"{
            "modules": [],
            "repositories": [
                { "name": "extras", "uri": "https://example.com/extras.json", "priority": 5 }
            ]
        }"#;
        let repo = file_repo(source.path(), "main", 0, body);
        let repos = vec![repo];

        let mut store = RepoDataManager::new(cache.path()).unwrap();
        let downloader = HttpDownloader::new("kerbpm-test").unwrap();
        store
            .update(
                &repos,
                &offline_game(),
                false,
                &downloader,
                &NullUser,
                "kerbpm-test",
            )
            .unwrap();

        let refs = store.repository_references();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].referrer, "main");
        assert_eq!(refs[0].repository.name, "extras");
    }

    #[test]
    fn test_unsupported_spec_reports_outdated_client() {
        let source = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let body = r#"[
            { "spec_version": "v99.9", "identifier": "Future", "version": "1.0",
              "download": "https://example.com/f.zip" }
        ]"#;
        let repo = file_repo(source.path(), "future", 0, body);
        let repos = vec![repo];

        let mut store = RepoDataManager::new(cache.path()).unwrap();
        let downloader = HttpDownloader::new("kerbpm-test").unwrap();
        let result = store
            .update(
                &repos,
                &offline_game(),
                false,
                &downloader,
                &NullUser,
                "kerbpm-test",
            )
            .unwrap();
        assert_eq!(result, UpdateResult::OutdatedClient);
    }
}
