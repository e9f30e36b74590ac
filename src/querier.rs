//! Read-only view across repositories and local installation state
//!
//! [`RegistryQuerier`] composes the metadata store with the set of
//! installed releases, the DLLs found in the game's plugin folders and the
//! DLC the game owns. Everything the sanity checker and the resolver ask
//! about the world goes through here.

use std::collections::{HashMap, HashSet};

use crate::gameversion::GameVersionCriteria;
use crate::relationship::DirectDescriptor;
use crate::release::{Release, ReleaseStatus};
use crate::repository::Repository;
use crate::store::RepoDataManager;

pub struct RegistryQuerier<'a> {
    store: &'a RepoDataManager,
    repos: &'a [Repository],
    installed: &'a HashMap<String, Release>,
    dlls: &'a HashSet<String>,
    dlc: &'a HashMap<String, crate::version::ModVersion>,
}

impl<'a> RegistryQuerier<'a> {
    pub fn new(
        store: &'a RepoDataManager,
        repos: &'a [Repository],
        installed: &'a HashMap<String, Release>,
        dlls: &'a HashSet<String>,
        dlc: &'a HashMap<String, crate::version::ModVersion>,
    ) -> Self {
        RegistryQuerier {
            store,
            repos,
            installed,
            dlls,
            dlc,
        }
    }

    pub fn installed(&self, identifier: &str) -> Option<&'a Release> {
        self.installed.get(identifier)
    }

    pub fn installed_modules(&self) -> impl Iterator<Item = &'a Release> + '_ {
        self.installed.values()
    }

    pub fn dlls(&self) -> &'a HashSet<String> {
        self.dlls
    }

    pub fn dlc(&self) -> &'a HashMap<String, crate::version::ModVersion> {
        self.dlc
    }

    /// All known releases of `identifier`, repo precedence then newest first
    pub fn all_releases(&self, identifier: &str) -> Vec<&'a Release> {
        self.store.available_modules(self.repos, identifier)
    }

    /// Newest compatible release of `identifier` within the tolerance
    pub fn latest_available(
        &self,
        identifier: &str,
        criteria: &GameVersionCriteria,
        tolerance: ReleaseStatus,
    ) -> Option<&'a Release> {
        self.all_releases(identifier)
            .into_iter()
            .find(|release| release.is_compatible(criteria) && release.release_status <= tolerance)
    }

    /// Releases that `provides` the identifier, same filtering as above
    pub fn provided_by(&self, identifier: &str) -> Vec<&'a Release> {
        self.store.provided_by(self.repos, identifier)
    }

    pub fn downloads(&self, identifier: &str) -> Option<u64> {
        self.store.download_count(self.repos, identifier)
    }

    /// Every module identifier known across the configured repositories
    pub fn all_identifiers(&self) -> Vec<String> {
        self.store.all_identifiers(self.repos)
    }

    /// The release that replaces an installed module, if one is declared
    /// and available
    pub fn replacement(
        &self,
        identifier: &str,
        criteria: &GameVersionCriteria,
        tolerance: ReleaseStatus,
    ) -> Option<&'a Release> {
        let replaced_by = self.installed(identifier)?.replaced_by.as_ref()?;
        self.candidates_for(replaced_by, criteria, tolerance)
            .into_iter()
            .next()
    }

    /// Everything in the registry that could satisfy `descriptor`
    ///
    /// Identifier-exact matches precede `provides` matches; within each
    /// group newer versions come first, download counts break version ties
    /// and identifiers order the rest. The ordering decides which provider
    /// the resolver tries first, so it must be stable.
    pub fn candidates_for(
        &self,
        descriptor: &DirectDescriptor,
        criteria: &GameVersionCriteria,
        tolerance: ReleaseStatus,
    ) -> Vec<&'a Release> {
        let bound = descriptor.bound();
        let admissible = |release: &&'a Release| {
            bound.satisfied_by(&release.version)
                && release.is_compatible(criteria)
                && release.release_status <= tolerance
        };

        let mut exact: Vec<&'a Release> = self
            .all_releases(&descriptor.name)
            .into_iter()
            .filter(admissible)
            .collect();

        let mut virtual_matches: Vec<&'a Release> = self
            .provided_by(&descriptor.name)
            .into_iter()
            .filter(admissible)
            .filter(|release| release.identifier != descriptor.name)
            .collect();

        let sort_key = |a: &&'a Release, b: &&'a Release| {
            b.version
                .cmp(&a.version)
                .then_with(|| {
                    self.downloads(&b.identifier)
                        .unwrap_or(0)
                        .cmp(&self.downloads(&a.identifier).unwrap_or(0))
                })
                .then_with(|| a.identifier.cmp(&b.identifier))
        };
        exact.sort_by(sort_key);
        exact.dedup_by(|a, b| a.identifier == b.identifier && a.version == b.version);
        virtual_matches.sort_by(sort_key);
        virtual_matches.dedup_by(|a, b| a.identifier == b.identifier && a.version == b.version);

        exact.extend(virtual_matches);
        exact
    }
}

impl std::fmt::Debug for RegistryQuerier<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryQuerier")
            .field("repos", &self.repos.len())
            .field("installed", &self.installed.len())
            .field("dlls", &self.dlls.len())
            .field("dlc", &self.dlc.len())
            .finish()
    }
}
