//! User configuration management
//!
//! Configuration is stored in TOML format at `~/.kerbpm/config.toml`.
//!
//! # Examples
//!
//! ```no_run
//! use kerbpm::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load()?;
//! println!("Cache directory: {}", config.cache_dir().display());
//! for repo in &config.repositories {
//!     println!("{} ({})", repo.name, repo.uri);
//! }
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::release::ReleaseStatus;
use crate::repository::Repository;
use crate::{Error, Result};

/// User configuration file (`~/.kerbpm/config.toml`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Metadata repositories to fetch, in addition to the game default
    #[serde(default)]
    pub repositories: Vec<Repository>,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub resolver: ResolverSettings,

    #[serde(default)]
    pub game: GameConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Override the metadata/archive cache location
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// User agent sent on every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Concurrent downloads
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_user_agent() -> String {
    format!("kerbpm/{}", env!("CARGO_PKG_VERSION"))
}

fn default_workers() -> usize {
    4
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            workers: default_workers(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolverSettings {
    /// Highest pre-release level to consider
    #[serde(default)]
    pub stability_tolerance: ReleaseStatus,

    /// Expand recommendations when installing
    #[serde(default = "default_true")]
    pub with_recommends: bool,

    /// Expand suggestions when installing
    #[serde(default)]
    pub with_suggests: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    /// The game version mods must be compatible with
    pub version: Option<crate::gameversion::GameVersion>,

    /// Override where the repository list is fetched from
    pub repository_list_url: Option<url::Url>,

    /// Override the builds document URL
    pub builds_url: Option<url::Url>,

    /// Fetch the build map during update; disable for air-gapped use
    #[serde(default = "default_true")]
    pub refresh_builds: bool,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            version: None,
            repository_list_url: None,
            builds_url: None,
            refresh_builds: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repositories: Vec::new(),
            cache: CacheConfig::default(),
            network: NetworkConfig::default(),
            resolver: ResolverSettings::default(),
            game: GameConfig::default(),
        }
    }
}

impl Config {
    /// Get the default config file path
    ///
    /// Uses KERBPM_CONFIG_DIR if set, otherwise ~/.kerbpm/config.toml
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(config_dir) = std::env::var("KERBPM_CONFIG_DIR") {
            return Ok(PathBuf::from(config_dir).join("config.toml"));
        }

        let home = dirs::home_dir()
            .ok_or_else(|| Error::Other("Could not find home directory".to_string()))?;
        Ok(home.join(".kerbpm").join("config.toml"))
    }

    /// Load config from file, or create default if it doesn't exist
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// Directory holding repository metadata, ETags and downloaded archives
    pub fn cache_dir(&self) -> PathBuf {
        if let Some(dir) = &self.cache.dir {
            return dir.clone();
        }
        if let Ok(config_dir) = std::env::var("KERBPM_CONFIG_DIR") {
            return PathBuf::from(config_dir).join("cache");
        }
        dirs::home_dir()
            .map(|home| home.join(".kerbpm").join("cache"))
            .unwrap_or_else(|| PathBuf::from(".kerbpm-cache"))
    }

    /// Where the installed-module state file lives
    pub fn instance_path(&self) -> PathBuf {
        if let Ok(config_dir) = std::env::var("KERBPM_CONFIG_DIR") {
            return PathBuf::from(config_dir).join("instance.json");
        }
        dirs::home_dir()
            .map(|home| home.join(".kerbpm").join("instance.json"))
            .unwrap_or_else(|| PathBuf::from(".kerbpm-instance.json"))
    }

    /// Configured repositories, falling back to the game's default
    pub fn effective_repositories(&self, game: &dyn crate::game::Game) -> Vec<Repository> {
        if !self.repositories.is_empty() {
            return self.repositories.clone();
        }
        vec![Repository::new(
            "default",
            game.default_repository_url().clone(),
        )]
    }

    pub fn add_repository(&mut self, repo: Repository) {
        self.repositories.retain(|r| r.name != repo.name);
        self.repositories.push(repo);
        self.repositories.sort();
    }

    /// Returns false if no repository with that name was configured
    pub fn remove_repository(&mut self, name: &str) -> bool {
        let before = self.repositories.len();
        self.repositories.retain(|r| r.name != name);
        self.repositories.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::KerbalGame;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.repositories.is_empty());
        assert_eq!(config.network.workers, 4);
        assert!(config.resolver.with_recommends);
        assert!(!config.resolver.with_suggests);
        assert_eq!(config.resolver.stability_tolerance, ReleaseStatus::Stable);
    }

    #[test]
    fn test_effective_repositories_falls_back_to_game_default() {
        let config = Config::default();
        let game = KerbalGame::default();
        let repos = config.effective_repositories(&game);
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].name, "default");
    }

    #[test]
    fn test_repository_management() {
        let mut config = Config::default();
        let repo = Repository::new("extras", "https://example.com/extras.json".parse().unwrap());
        config.add_repository(repo.clone());
        assert_eq!(config.repositories.len(), 1);

        // Re-adding under the same name replaces.
        config.add_repository(repo);
        assert_eq!(config.repositories.len(), 1);

        assert!(config.remove_repository("extras"));
        assert!(!config.remove_repository("extras"));
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = Config::default();
        config.add_repository(Repository::new(
            "extras",
            "https://example.com/extras.json".parse().unwrap(),
        ));
        config.game.version = Some("1.12.5".parse().unwrap());

        let text = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.repositories.len(), 1);
        assert_eq!(back.game.version, config.game.version);
    }
}
