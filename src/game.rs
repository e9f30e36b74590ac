//! The game being modded
//!
//! The core is game-agnostic; everything it needs to know about the game
//! (where its repository list lives, how to parse its version strings,
//! which builds exist) comes through the [`Game`] trait. [`KerbalGame`] is
//! the stock implementation.

use std::cell::RefCell;
use std::collections::HashMap;

use log::{debug, warn};
use serde::Deserialize;
use url::Url;

use crate::gameversion::GameVersion;
use crate::repository::{Repository, RepositoryList};
use crate::{Error, Result};

/// Game-specific knowledge consumed by the metadata pipeline
pub trait Game {
    fn short_name(&self) -> &str;

    /// Where the canonical list of metadata repositories is published
    fn repository_list_url(&self) -> &Url;

    /// The repository used when the user has configured none
    fn default_repository_url(&self) -> &Url;

    /// Refresh the known build-to-version map from the network
    fn refresh_versions(&self, user_agent: &str) -> Result<()>;

    fn parse_game_version(&self, s: &str) -> Result<GameVersion>;

    /// Game versions known to exist, newest first
    fn known_versions(&self) -> Vec<GameVersion>;
}

/// The builds document published alongside the game
///
/// Keys are build numbers, values the version each build shipped as.
#[derive(Debug, Deserialize)]
struct BuildMap {
    builds: HashMap<String, String>,
}

/// Stock KSP-style game definition
#[derive(Debug)]
pub struct KerbalGame {
    short_name: String,
    repository_list_url: Url,
    default_repository_url: Url,
    builds_url: Option<Url>,
    versions: RefCell<Vec<GameVersion>>,
}

impl KerbalGame {
    pub fn new(
        short_name: &str,
        repository_list_url: Url,
        default_repository_url: Url,
        builds_url: Option<Url>,
    ) -> Self {
        KerbalGame {
            short_name: short_name.to_string(),
            repository_list_url,
            default_repository_url,
            builds_url,
            versions: RefCell::new(Vec::new()),
        }
    }

    /// Seed the known versions without touching the network
    pub fn with_versions(self, versions: Vec<GameVersion>) -> Self {
        self.store_versions(versions);
        self
    }

    pub fn builds_url(&self) -> Option<&Url> {
        self.builds_url.as_ref()
    }

    fn store_versions(&self, mut versions: Vec<GameVersion>) {
        versions.sort();
        versions.dedup();
        versions.reverse();
        *self.versions.borrow_mut() = versions;
    }
}

impl Default for KerbalGame {
    fn default() -> Self {
        KerbalGame::new(
            "KSP",
            "https://meta.kerbpm.dev/repositories.json".parse().unwrap(),
            "https://meta.kerbpm.dev/registry/default.json".parse().unwrap(),
            Some("https://meta.kerbpm.dev/builds.json".parse().unwrap()),
        )
    }
}

impl Game for KerbalGame {
    fn short_name(&self) -> &str {
        &self.short_name
    }

    fn repository_list_url(&self) -> &Url {
        &self.repository_list_url
    }

    fn default_repository_url(&self) -> &Url {
        &self.default_repository_url
    }

    fn refresh_versions(&self, user_agent: &str) -> Result<()> {
        let Some(builds_url) = &self.builds_url else {
            debug!("no builds URL for {}, skipping version refresh", self.short_name);
            return Ok(());
        };

        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent.to_string())
            .build()?;
        let map: BuildMap = client
            .get(builds_url.clone())
            .send()
            .map_err(|e| Error::Network {
                url: builds_url.to_string(),
                reason: e.to_string(),
            })?
            .error_for_status()
            .map_err(|e| Error::Network {
                url: builds_url.to_string(),
                reason: e.to_string(),
            })?
            .json()
            .map_err(|e| Error::Network {
                url: builds_url.to_string(),
                reason: e.to_string(),
            })?;

        let mut versions = Vec::new();
        for (build, version) in &map.builds {
            match version.parse::<GameVersion>() {
                Ok(v) => versions.push(v),
                Err(e) => warn!("ignoring build {} with bad version: {}", build, e),
            }
        }
        debug!("refreshed {} known game versions", versions.len());
        self.store_versions(versions);
        Ok(())
    }

    fn parse_game_version(&self, s: &str) -> Result<GameVersion> {
        s.parse()
    }

    fn known_versions(&self) -> Vec<GameVersion> {
        self.versions.borrow().clone()
    }
}

/// Fetch and parse the game's published repository list
pub fn fetch_repository_list(game: &dyn Game, user_agent: &str) -> Result<Vec<Repository>> {
    let url = game.repository_list_url();
    let client = reqwest::blocking::Client::builder()
        .user_agent(user_agent.to_string())
        .build()?;
    let list: RepositoryList = client
        .get(url.clone())
        .send()
        .map_err(|e| Error::Network {
            url: url.to_string(),
            reason: e.to_string(),
        })?
        .error_for_status()
        .map_err(|e| Error::Network {
            url: url.to_string(),
            reason: e.to_string(),
        })?
        .json()
        .map_err(|e| Error::Network {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
    Ok(list.repositories)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_versions_sorted_newest_first() {
        let game = KerbalGame::default().with_versions(vec![
            "1.10.1".parse().unwrap(),
            "1.12.5".parse().unwrap(),
            "1.11.0".parse().unwrap(),
            "1.12.5".parse().unwrap(),
        ]);
        let versions: Vec<String> = game
            .known_versions()
            .iter()
            .map(|v| v.to_string())
            .collect();
        assert_eq!(versions, vec!["1.12.5", "1.11.0", "1.10.1"]);
    }

    #[test]
    fn test_refresh_without_builds_url_is_a_no_op() {
        let game = KerbalGame::new(
            "TEST",
            "https://example.com/repos.json".parse().unwrap(),
            "https://example.com/default.json".parse().unwrap(),
            None,
        );
        game.refresh_versions("kerbpm-test").unwrap();
        assert!(game.known_versions().is_empty());
    }

    #[test]
    fn test_parse_game_version_delegates() {
        let game = KerbalGame::default();
        assert_eq!(
            game.parse_game_version("1.12.3").unwrap(),
            GameVersion::new(1, 12, 3)
        );
        assert!(game.parse_game_version("not-a-version").is_err());
    }
}
