//! Repositories and their parsed metadata indexes
//!
//! A [`Repository`] is a named, prioritized metadata source. Its downloaded
//! contents parse into a [`RepositoryIndex`]: every release keyed by
//! identifier and version, plus download counts and compatibility hints.
//! Indexes are immutable once built; the store swaps whole indexes in and
//! out.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use url::Url;

use crate::gameversion::GameVersion;
use crate::release::Release;
use crate::version::ModVersion;
use crate::{Error, Result};

/// All releases of all modules in one repository
pub type ModuleCatalog = HashMap<String, BTreeMap<ModVersion, Release>>;

/// A metadata source, as configured locally or referenced by another repo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub uri: Url,

    /// Lower values take precedence; ties break by name ascending
    #[serde(default)]
    pub priority: i32,

    /// Mirrors are listed but never picked as a default
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub x_mirror: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_comment: Option<String>,
}

impl Repository {
    pub fn new(name: &str, uri: Url) -> Self {
        Repository {
            name: name.to_string(),
            uri,
            priority: 0,
            x_mirror: false,
            x_comment: None,
        }
    }

    /// Basename of this repository's cache file:
    /// the first 16 hex chars of the SHA1 of the URL, then the name.
    pub fn cache_basename(&self) -> String {
        let digest = Sha1::digest(self.uri.as_str().as_bytes());
        let full = hex::encode(digest);
        format!("{}-{}.json", &full[..16], self.name)
    }
}

impl Ord for Repository {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for Repository {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The repository list document served at a game's repository list URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryList {
    pub repositories: Vec<Repository>,
}

/// Parsed, in-memory contents of one repository
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RepositoryIndex {
    pub catalog: ModuleCatalog,

    pub download_counts: HashMap<String, u64>,

    /// Repositories this repository endorses
    pub repositories: Option<Vec<Repository>>,

    pub supported_game_versions: Option<Vec<GameVersion>>,

    /// Set when any release uses a metadata spec newer than this reader
    /// understands; derived on parse, never persisted.
    pub unsupported_spec: bool,
}

/// Wire shape of a repository metadata file
///
/// Either a bare array of releases or an object wrapping the array together
/// with counts and hints.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RepositoryFile {
    Modules(Vec<Release>),
    Full {
        modules: Vec<Release>,
        #[serde(default)]
        download_counts: HashMap<String, u64>,
        #[serde(default)]
        repositories: Option<Vec<Repository>>,
        #[serde(default)]
        supported_game_versions: Option<Vec<GameVersion>>,
    },
}

impl RepositoryIndex {
    /// Parse a downloaded repository file
    pub fn from_slice(bytes: &[u8]) -> Result<RepositoryIndex> {
        let file: RepositoryFile = serde_json::from_slice(bytes)?;
        let (modules, download_counts, repositories, supported_game_versions) = match file {
            RepositoryFile::Modules(modules) => (modules, HashMap::new(), None, None),
            RepositoryFile::Full {
                modules,
                download_counts,
                repositories,
                supported_game_versions,
            } => (modules, download_counts, repositories, supported_game_versions),
        };

        let mut index = RepositoryIndex {
            catalog: ModuleCatalog::new(),
            download_counts,
            repositories,
            supported_game_versions,
            unsupported_spec: false,
        };

        for release in modules {
            release.validate()?;
            if !release.spec_version.is_supported() {
                index.unsupported_spec = true;
            }
            let by_version = index.catalog.entry(release.identifier.clone()).or_default();
            if let Some(previous) = by_version.get(&release.version) {
                return Err(Error::Metadata(format!(
                    "duplicate release {} {}",
                    previous.identifier, previous.version
                )));
            }
            by_version.insert(release.version.clone(), release);
        }

        Ok(index)
    }

    /// Serialize back to the wrapped wire shape
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct Out<'a> {
            modules: Vec<&'a Release>,
            #[serde(skip_serializing_if = "HashMap::is_empty")]
            download_counts: &'a HashMap<String, u64>,
            #[serde(skip_serializing_if = "Option::is_none")]
            repositories: &'a Option<Vec<Repository>>,
            #[serde(skip_serializing_if = "Option::is_none")]
            supported_game_versions: &'a Option<Vec<GameVersion>>,
        }

        let mut modules: Vec<&Release> = self
            .catalog
            .values()
            .flat_map(|by_version| by_version.values())
            .collect();
        modules.sort_by(|a, b| {
            a.identifier
                .cmp(&b.identifier)
                .then_with(|| a.version.cmp(&b.version))
        });

        Ok(serde_json::to_vec_pretty(&Out {
            modules,
            download_counts: &self.download_counts,
            repositories: &self.repositories,
            supported_game_versions: &self.supported_game_versions,
        })?)
    }

    /// All releases of `identifier`, newest first
    pub fn releases<'a>(&'a self, identifier: &str) -> impl Iterator<Item = &'a Release> {
        self.catalog
            .get(identifier)
            .into_iter()
            .flat_map(|by_version| by_version.values().rev())
    }

    pub fn latest(&self, identifier: &str) -> Option<&Release> {
        self.releases(identifier).next()
    }

    /// Releases whose `provides` contains `identifier`
    pub fn provided_by(&self, identifier: &str) -> Vec<&Release> {
        self.catalog
            .values()
            .flat_map(|by_version| by_version.values().rev())
            .filter(|release| release.provides.iter().any(|p| p == identifier))
            .collect()
    }

    pub fn module_count(&self) -> usize {
        self.catalog.len()
    }

    pub fn release_count(&self) -> usize {
        self.catalog.values().map(BTreeMap::len).sum()
    }
}

/// Sort repositories into precedence order: priority ascending, then name
pub fn precedence_order(repos: &[Repository]) -> Vec<&Repository> {
    let mut ordered: Vec<&Repository> = repos.iter().collect();
    ordered.sort();
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(name: &str, uri: &str, priority: i32) -> Repository {
        let mut r = Repository::new(name, uri.parse().unwrap());
        r.priority = priority;
        r
    }

    #[test]
    fn test_precedence_order() {
        let repos = vec![
            repo("zeta", "https://example.com/z", 0),
            repo("alpha", "https://example.com/a", 0),
            repo("main", "https://example.com/m", -10),
        ];
        let ordered = precedence_order(&repos);
        let names: Vec<&str> = ordered.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["main", "alpha", "zeta"]);
    }

    #[test]
    fn test_cache_basename_is_stable() {
        let r = repo("default", "https://example.com/registry.json", 0);
        let name = r.cache_basename();
        assert!(name.ends_with("-default.json"));
        assert_eq!(name.find('-'), Some(16));
        assert_eq!(name, r.cache_basename());

        // Different URLs hash differently even with the same name.
        let other = repo("default", "https://example.org/registry.json", 0);
        assert_ne!(name, other.cache_basename());
    }

    #[test]
    fn test_parse_bare_array() {
        let json = r#"[
            { "identifier": "A", "version": "1.0",
              "download": "https://example.com/a.zip" },
            { "identifier": "A", "version": "2.0",
              "download": "https://example.com/a2.zip" }
        ]"#;
        let index = RepositoryIndex::from_slice(json.as_bytes()).unwrap();
        assert_eq!(index.module_count(), 1);
        assert_eq!(index.release_count(), 2);
        let versions: Vec<String> = index.releases("A").map(|r| r.version.to_string()).collect();
        assert_eq!(versions, vec!["2.0", "1.0"]);
    }

    #[test]
    fn test_parse_wrapped_object() {
        let json = r#"{
            "modules": [
                { "identifier": "A", "version": "1.0",
                  "download": "https://example.com/a.zip" }
            ],
            "download_counts": { "A": 1234 },
            "repositories": [
                { "name": "extras", "uri": "https://example.com/extras.json", "priority": 5 }
            ],
            "supported_game_versions": ["1.12"]
        }"#;
        let index = RepositoryIndex::from_slice(json.as_bytes()).unwrap();
        assert_eq!(index.download_counts.get("A"), Some(&1234));
        assert_eq!(index.repositories.as_ref().unwrap().len(), 1);
        assert!(!index.unsupported_spec);
    }

    #[test]
    fn test_newer_spec_sets_flag_but_parses() {
        let json = r#"[
            { "spec_version": "v99.0", "identifier": "A", "version": "1.0",
              "download": "https://example.com/a.zip" }
        ]"#;
        let index = RepositoryIndex::from_slice(json.as_bytes()).unwrap();
        assert!(index.unsupported_spec);
        assert_eq!(index.release_count(), 1);
    }

    #[test]
    fn test_duplicate_release_rejected() {
        let json = r#"[
            { "identifier": "A", "version": "1.0",
              "download": "https://example.com/a.zip" },
            { "identifier": "A", "version": "1.0",
              "download": "https://example.com/other.zip" }
        ]"#;
        assert!(RepositoryIndex::from_slice(json.as_bytes()).is_err());
    }

    #[test]
    fn test_round_trip_equality() {
        let json = r#"{
            "modules": [
                { "identifier": "B", "version": "0.5",
                  "download": "https://example.com/b.zip",
                  "depends": [ { "name": "A" } ] },
                { "identifier": "A", "version": "1.0",
                  "download": "https://example.com/a.zip",
                  "provides": ["virtual-a"] }
            ],
            "download_counts": { "A": 7 }
        }"#;
        let index = RepositoryIndex::from_slice(json.as_bytes()).unwrap();
        let bytes = index.to_vec().unwrap();
        let again = RepositoryIndex::from_slice(&bytes).unwrap();
        assert_eq!(index, again);
    }

    #[test]
    fn test_provided_by() {
        let json = r#"[
            { "identifier": "Toolbar", "version": "1.8",
              "download": "https://example.com/t.zip",
              "provides": ["virtual-toolbar"] },
            { "identifier": "Other", "version": "1.0",
              "download": "https://example.com/o.zip" }
        ]"#;
        let index = RepositoryIndex::from_slice(json.as_bytes()).unwrap();
        let providers: Vec<&str> = index
            .provided_by("virtual-toolbar")
            .iter()
            .map(|r| r.identifier.as_str())
            .collect();
        assert_eq!(providers, vec!["Toolbar"]);
    }
}
