use std::path::PathBuf;

use thiserror::Error;

use crate::resolver::{ConflictPair, ResolutionTrace};

pub type Result<T> = std::result::Result<T, Error>;

/// Which half of the sanity check failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InconsistencyKind {
    UnmetDepends,
    Conflict,
}

impl std::fmt::Display for InconsistencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InconsistencyKind::UnmetDepends => write!(f, "unmet dependencies"),
            InconsistencyKind::Conflict => write!(f, "conflicts"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid version: {0}")]
    Version(String),

    #[error("Invalid module metadata: {0}")]
    Metadata(String),

    #[error("Network error fetching {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("Download was cancelled")]
    Cancelled,

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Failed to update repositories:\n{}",
            .failures.iter()
                .map(|(url, e)| format!("  {}: {}", url, e))
                .collect::<Vec<_>>()
                .join("\n"))]
    DownloadErrors {
        failures: Vec<(String, Box<Error>)>,
    },

    #[error("Checksum mismatch for {}", .path.display())]
    Integrity { path: PathBuf },

    #[error("Could not resolve all dependencies:\n{}",
            .traces.iter()
                .map(|t| format!("  {}", t))
                .collect::<Vec<_>>()
                .join("\n"))]
    UnmetDependencies { traces: Vec<ResolutionTrace> },

    #[error("Conflicting modules requested:\n{}",
            .pairs.iter()
                .map(|p| format!("  {}", p))
                .collect::<Vec<_>>()
                .join("\n"))]
    Conflicts { pairs: Vec<ConflictPair> },

    #[error("Modules are not consistent ({kind}):\n{}",
            .details.iter()
                .map(|d| format!("  {}", d))
                .collect::<Vec<_>>()
                .join("\n"))]
    Inconsistent {
        kind: InconsistencyKind,
        details: Vec<String>,
    },

    #[error("{0}")]
    Other(String),
}
