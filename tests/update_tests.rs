//! HTTP pipeline tests against a local mock server
//!
//! These cover the ETag bookkeeping and rollback behavior that the
//! file://-based unit tests cannot: conditional staleness via HEAD,
//! short-circuiting a fresh mirror, and partial-failure rollback.


use std::collections::HashMap;
use std::fs;

use kerbpm::user::test_support::RecordingUser;
use kerbpm::{
    Error, HttpDownloader, NullUser, RepoDataManager, Repository, UpdateResult,
};
use tempfile::TempDir;

use test_utils::{offline_game, MockMod};

const GOOD_REPO: &str = r#"[
    { "identifier": "Widget", "version": "1.0",
      "download": "https://example.com/widget-1.0.zip" }
]"#;

fn http_repo(server: &mockito::Server, name: &str, path: &str) -> Repository {
    Repository::new(name, format!("{}{}", server.url(), path).parse().unwrap())
}

fn run_update(
    store: &mut RepoDataManager,
    repos: &[Repository],
    skip_etags: bool,
) -> kerbpm::Result<UpdateResult> {
    let downloader = HttpDownloader::new("kerbpm-tests").unwrap();
    store.update(
        repos,
        &offline_game(),
        skip_etags,
        &downloader,
        &NullUser,
        "kerbpm-tests",
    )
}

#[test]
fn test_etag_short_circuit_issues_no_second_download() {
    let mut server = mockito::Server::new();
    let get = server
        .mock("GET", "/r.json")
        .with_header("etag", "\"v1\"")
        .with_body(GOOD_REPO)
        .expect(1)
        .create();
    let head = server
        .mock("HEAD", "/r.json")
        .with_header("etag", "\"v1\"")
        .create();

    let cache = TempDir::new().unwrap();
    let mut store = RepoDataManager::new(cache.path()).unwrap();
    let repos = vec![http_repo(&server, "main", "/r.json")];

    // First call downloads and records the ETag.
    assert_eq!(run_update(&mut store, &repos, false).unwrap(), UpdateResult::Updated);
    let etags_path = store.etags_path().to_path_buf();
    let first_bytes = fs::read(&etags_path).unwrap();

    // On-disk map matches the in-memory map exactly.
    let on_disk: HashMap<String, String> = serde_json::from_slice(&first_bytes).unwrap();
    assert_eq!(on_disk, store.etags_snapshot());
    assert_eq!(on_disk.get(repos[0].uri.as_str()).map(String::as_str), Some("\"v1\""));

    // Second call HEADs, sees the same ETag, and downloads nothing.
    assert_eq!(
        run_update(&mut store, &repos, false).unwrap(),
        UpdateResult::NoChanges
    );
    get.assert();
    head.assert();
    assert_eq!(fs::read(&etags_path).unwrap(), first_bytes);
}

#[test]
fn test_changed_etag_triggers_redownload() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/r.json")
        .with_header("etag", "\"v2\"")
        .with_body(GOOD_REPO)
        .expect(2)
        .create();
    server
        .mock("HEAD", "/r.json")
        .with_header("etag", "\"v-changed\"")
        .create();

    let cache = TempDir::new().unwrap();
    let mut store = RepoDataManager::new(cache.path()).unwrap();
    let repos = vec![http_repo(&server, "main", "/r.json")];

    run_update(&mut store, &repos, false).unwrap();
    // The HEAD reports a different tag than the recorded "v2", so the
    // repository counts as stale and is fetched again.
    assert_eq!(
        run_update(&mut store, &repos, false).unwrap(),
        UpdateResult::Updated
    );
}

#[test]
fn test_skip_etags_forces_download() {
    let mut server = mockito::Server::new();
    let get = server
        .mock("GET", "/r.json")
        .with_header("etag", "\"v1\"")
        .with_body(GOOD_REPO)
        .expect(2)
        .create();
    server
        .mock("HEAD", "/r.json")
        .with_header("etag", "\"v1\"")
        .create();

    let cache = TempDir::new().unwrap();
    let mut store = RepoDataManager::new(cache.path()).unwrap();
    let repos = vec![http_repo(&server, "main", "/r.json")];

    run_update(&mut store, &repos, false).unwrap();
    assert_eq!(
        run_update(&mut store, &repos, true).unwrap(),
        UpdateResult::Updated
    );
    get.assert();
}

#[test]
fn test_no_changes_touches_cache_file_mtime() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/r.json")
        .with_header("etag", "\"v1\"")
        .with_body(GOOD_REPO)
        .create();
    server
        .mock("HEAD", "/r.json")
        .with_header("etag", "\"v1\"")
        .create();

    let cache = TempDir::new().unwrap();
    let mut store = RepoDataManager::new(cache.path()).unwrap();
    let repos = vec![http_repo(&server, "main", "/r.json")];

    run_update(&mut store, &repos, false).unwrap();
    let cache_file = store.cache_file(&repos[0]);
    let before = fs::metadata(&cache_file).unwrap().modified().unwrap();

    std::thread::sleep(std::time::Duration::from_millis(20));
    assert_eq!(
        run_update(&mut store, &repos, false).unwrap(),
        UpdateResult::NoChanges
    );
    let after = fs::metadata(&cache_file).unwrap().modified().unwrap();
    assert!(after > before);
}

#[test]
fn test_partial_failure_rolls_back_all_etags() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/good.json")
        .with_header("etag", "\"g1\"")
        .with_body(GOOD_REPO)
        .create();
    server
        .mock("GET", "/bad.json")
        .with_header("etag", "\"b1\"")
        .with_body("{ this is not json")
        .create();

    let cache = TempDir::new().unwrap();
    let mut store = RepoDataManager::new(cache.path()).unwrap();
    let repos = vec![
        http_repo(&server, "good", "/good.json"),
        http_repo(&server, "bad", "/bad.json"),
    ];

    let err = run_update(&mut store, &repos, false).unwrap_err();
    match err {
        Error::DownloadErrors { failures } => {
            assert_eq!(failures.len(), 1);
            assert!(failures[0].0.contains("/bad.json"));
        }
        other => panic!("expected DownloadErrors, got {}", other),
    }

    // No ETag survives the failed call, not even the good repo's, so a
    // retry re-downloads both.
    assert!(!store.etags_path().exists());
    assert!(store.etags_snapshot().is_empty());

    // The good repo's swap happened before the failure and stays: the
    // in-memory index is queryable even though its ETag was rolled back.
    assert_eq!(store.available_modules(&repos, "Widget").len(), 1);
    assert!(store.cache_file(&repos[0]).exists());
    assert!(!store.cache_file(&repos[1]).exists());
}

#[test]
fn test_http_error_is_reported_per_repo() {
    let mut server = mockito::Server::new();
    server.mock("GET", "/gone.json").with_status(404).create();

    let cache = TempDir::new().unwrap();
    let mut store = RepoDataManager::new(cache.path()).unwrap();
    let repos = vec![http_repo(&server, "gone", "/gone.json")];

    let err = run_update(&mut store, &repos, false).unwrap_err();
    match err {
        Error::DownloadErrors { failures } => {
            assert_eq!(failures.len(), 1);
            assert!(matches!(*failures[0].1, Error::Network { .. }));
        }
        other => panic!("expected DownloadErrors, got {}", other),
    }
}

#[test]
fn test_mirror_urls_fall_back() {
    let mut server = mockito::Server::new();
    server.mock("GET", "/primary.json").with_status(500).create();
    server
        .mock("GET", "/mirror.json")
        .with_body(GOOD_REPO)
        .create();

    let downloader = HttpDownloader::new("kerbpm-tests").unwrap();

    let targets = vec![kerbpm::DownloadTarget {
        urls: vec![
            format!("{}/primary.json", server.url()).parse().unwrap(),
            format!("{}/mirror.json", server.url()).parse().unwrap(),
        ],
        size: None,
        etag: None,
    }];
    let mut outcomes = Vec::new();
    use kerbpm::Downloader;
    downloader
        .download_and_wait(&targets, &mut |o| outcomes.push(o))
        .unwrap();

    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].error.is_none());
    assert_eq!(outcomes[0].data, GOOD_REPO.as_bytes());
}

#[test]
fn test_duplicate_urls_are_fetched_once() {
    let mut server = mockito::Server::new();
    let get = server
        .mock("GET", "/r.json")
        .with_header("etag", "\"v1\"")
        .with_body(GOOD_REPO)
        .expect(1)
        .create();

    let cache = TempDir::new().unwrap();
    let mut store = RepoDataManager::new(cache.path()).unwrap();
    // Same URL listed twice under different names.
    let repos = vec![
        http_repo(&server, "main", "/r.json"),
        http_repo(&server, "alias", "/r.json"),
    ];

    run_update(&mut store, &repos, false).unwrap();
    get.assert();
}

#[test]
fn test_prepopulate_reports_weighted_progress() {
    let source = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let repos = vec![
        test_utils::write_repo(
            source.path(),
            "alpha",
            0,
            vec![MockMod::new("A", "1.0").build()],
        ),
        test_utils::write_repo(
            source.path(),
            "beta",
            1,
            vec![MockMod::new("B", "1.0").build()],
        ),
    ];
    let store = test_utils::updated_store(cache.path(), &repos);
    drop(store);

    let mut fresh = RepoDataManager::new(cache.path()).unwrap();
    let user = RecordingUser::default();
    fresh.prepopulate(&repos, &user);

    let progress = user.progress.borrow();
    assert!(!progress.is_empty());
    // Monotonically non-decreasing, ending at 100.
    for pair in progress.windows(2) {
        assert!(pair[0].1 <= pair[1].1);
    }
    assert_eq!(progress.last().unwrap().1, 100);
    assert_eq!(fresh.available_modules(&repos, "A").len(), 1);
}

#[test]
fn test_fetch_repository_list() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/repositories.json")
        .with_body(
            r#"{ "repositories": [
                { "name": "default", "uri": "https://example.com/registry.json", "priority": 0 },
                { "name": "mirror", "uri": "https://mirror.example.com/registry.json",
                  "priority": 1, "x_mirror": true, "x_comment": "EU mirror" }
            ] }"#,
        )
        .create();

    let game = kerbpm::KerbalGame::new(
        "TEST",
        format!("{}/repositories.json", server.url()).parse().unwrap(),
        "https://example.com/default.json".parse().unwrap(),
        None,
    );
    let repos = kerbpm::fetch_repository_list(&game, "kerbpm-tests").unwrap();
    assert_eq!(repos.len(), 2);
    assert_eq!(repos[0].name, "default");
    assert!(repos[1].x_mirror);
    assert_eq!(repos[1].x_comment.as_deref(), Some("EU mirror"));
}

#[test]
fn test_refresh_versions_from_builds_document() {
    use kerbpm::Game;

    let mut server = mockito::Server::new();
    server
        .mock("GET", "/builds.json")
        .with_body(r#"{ "builds": { "3190": "1.12.5", "3110": "1.12.2", "junk": "nope" } }"#)
        .create();

    let game = kerbpm::KerbalGame::new(
        "TEST",
        "https://example.invalid/repos.json".parse().unwrap(),
        "https://example.invalid/default.json".parse().unwrap(),
        Some(format!("{}/builds.json", server.url()).parse().unwrap()),
    );
    game.refresh_versions("kerbpm-tests").unwrap();

    let versions: Vec<String> = game
        .known_versions()
        .iter()
        .map(|v| v.to_string())
        .collect();
    // Unparseable build entries are skipped with a warning.
    assert_eq!(versions, vec!["1.12.5", "1.12.2"]);
}

#[test]
fn test_last_update_zero_when_fresh() {
    let source = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let repos = vec![test_utils::write_repo(
        source.path(),
        "alpha",
        0,
        vec![MockMod::new("A", "1.0").build()],
    )];
    let store = test_utils::updated_store(cache.path(), &repos);
    assert_eq!(store.last_update(&repos), chrono::Duration::zero());
}
