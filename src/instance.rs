//! Installed-state tracking for a game instance
//!
//! The CLI records which releases it considers installed, plus the ambient
//! facts the resolver needs: plugin DLLs the user dropped in by hand and
//! the DLC the game owns. Real file placement is out of scope; this state
//! is what `install`, `remove` and `list` operate on.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::gameversion::{GameVersion, GameVersionCriteria};
use crate::release::Release;
use crate::txfile::atomic_write;
use crate::version::ModVersion;
use crate::Result;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Instance {
    /// Installed releases by identifier
    #[serde(default)]
    pub modules: HashMap<String, Release>,

    /// Ambient plugin DLLs, version-opaque
    #[serde(default)]
    pub dlls: HashSet<String>,

    /// Owned DLC and their versions
    #[serde(default)]
    pub dlc: HashMap<String, ModVersion>,

    /// The game version this instance runs
    #[serde(default)]
    pub game_version: Option<GameVersion>,
}

impl Instance {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Instance::default());
        }
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        atomic_write(path, &bytes)
    }

    pub fn criteria(&self) -> GameVersionCriteria {
        match self.game_version {
            Some(version) => GameVersionCriteria::single(version),
            None => GameVersionCriteria::any(),
        }
    }

    pub fn mark_installed(&mut self, release: &Release) {
        self.modules
            .insert(release.identifier.clone(), release.clone());
    }

    /// Returns the removed release, if it was installed
    pub fn mark_removed(&mut self, identifier: &str) -> Option<Release> {
        self.modules.remove(identifier)
    }

    pub fn is_installed(&self, identifier: &str) -> bool {
        self.modules.contains_key(identifier)
    }

    /// Installed releases that still need `identifier` if it were removed
    pub fn dependents_of(&self, identifier: &str) -> Vec<&Release> {
        self.modules
            .values()
            .filter(|release| {
                release.identifier != identifier
                    && release.depends.iter().any(|entry| {
                        entry
                            .descriptor
                            .flatten()
                            .iter()
                            .any(|direct| direct.name == identifier)
                    })
            })
            .collect()
    }
}
