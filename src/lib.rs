//! kerbpm - A mod package manager core for Kerbal-style games
//!
//! kerbpm fetches mod metadata from multiple HTTP repositories, caches it
//! locally with transactional ETag bookkeeping, and computes consistent
//! installation plans from inter-mod relationships (`depends`,
//! `conflicts`, `recommends`, `suggests`, `supports`, `provides`,
//! `replaced_by`). It provides:
//!
//! - A multi-repository, ETag-aware metadata fetch/cache pipeline with
//!   crash-safe persistence and priority-ordered queries
//! - A recursive relationship resolver with provider backtracking,
//!   per-descriptor memoization and full explanatory failure traces
//! - Debian-style mod version ordering and game version range arithmetic
//! - A stateless sanity checker over candidate installation sets
//!
//! # Examples
//!
//! ```no_run
//! use kerbpm::{
//!     Config, HttpDownloader, KerbalGame, NullUser, RepoDataManager,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load()?;
//! let game = KerbalGame::default();
//! let repos = config.effective_repositories(&game);
//!
//! let mut store = RepoDataManager::new(&config.cache_dir())?;
//! store.prepopulate(&repos, &NullUser);
//!
//! let downloader = HttpDownloader::new(&config.network.user_agent)?;
//! store.update(&repos, &game, false, &downloader, &NullUser,
//!              &config.network.user_agent)?;
//!
//! for release in store.available_modules(&repos, "ModuleManager") {
//!     println!("{}", release);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`version`] - Mod version parsing, ordering and ranges
//! - [`gameversion`] - Game versions, ranges and compatibility criteria
//! - [`relationship`] - Relationship descriptors and their evaluation
//! - [`release`] - Module release records and the metadata wire format
//! - [`repository`] - Repositories and parsed metadata indexes
//! - [`store`] - The metadata fetch/cache pipeline
//! - [`querier`] - Unified read-only view across repos and installed state
//! - [`sanity`] - Stateless consistency checks
//! - [`resolver`] - The relationship resolver
//! - [`modcache`] - Content-addressed archive cache with SHA256 checks
//! - [`downloader`] - Parallel download collaborator
//! - [`game`] - Game-specific knowledge (versions, repository list)
//! - [`instance`] - Installed-state tracking
//! - [`config`] - User configuration
//! - [`error`] - Error types and result handling

pub mod config;
pub mod downloader;
pub mod error;
pub mod etag;
pub mod events;
pub mod game;
pub mod gameversion;
pub mod idarena;
pub mod instance;
pub mod modcache;
pub mod querier;
pub mod relationship;
pub mod release;
pub mod repository;
pub mod resolver;
pub mod sanity;
pub mod store;
pub mod txfile;
pub mod user;
pub mod version;

pub use config::Config;
pub use downloader::{DownloadOutcome, DownloadTarget, Downloader, HttpDownloader};
pub use error::{Error, InconsistencyKind, Result};
pub use events::{Publisher, SubscriptionToken};
pub use game::{fetch_repository_list, Game, KerbalGame};
pub use gameversion::{GameVersion, GameVersionCriteria, GameVersionRange};
pub use idarena::{IdArena, TrackedId};
pub use instance::Instance;
pub use modcache::ModCache;
pub use querier::RegistryQuerier;
pub use relationship::{
    AnyOfDescriptor, DescriptorMatch, DirectDescriptor, RelationshipDescriptor, RelationshipEntry,
};
pub use release::{DownloadHash, ModuleKind, Release, ReleaseStatus, SpecVersion, SUPPORTED_SPEC};
pub use repository::{ModuleCatalog, Repository, RepositoryIndex, RepositoryList};
pub use resolver::{
    ConflictPair, Recommendation, RelationshipCache, RelationshipResolver, ResolutionTrace,
    ResolvedRelationship, ResolverOptions, SelectionReason, Suggestion,
};
pub use sanity::{enforce_consistency, find_conflicts, find_unmet_depends, is_consistent};
pub use store::{
    RepoDataManager, RepoReference, UpdateResult, TIME_TILL_STALE_DAYS, TIME_TILL_VERY_STALE_DAYS,
};
pub use user::{ConsoleUser, NullUser, User};
pub use version::{ModVersion, VersionBound, VersionRange};
