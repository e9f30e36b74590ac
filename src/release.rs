//! Module release records as read from repository metadata
//!
//! A [`Release`] is the atomic unit of the whole system: one installable
//! version of one mod. Releases are created by deserialization and are
//! immutable afterwards; ownership lies with the repository index that
//! contains them.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use url::Url;

use crate::gameversion::{GameVersion, GameVersionCriteria, GameVersionRange};
use crate::relationship::{DirectDescriptor, RelationshipEntry};
use crate::version::ModVersion;
use crate::{Error, Result};

/// Highest metadata spec this reader fully understands
pub const SUPPORTED_SPEC: SpecVersion = SpecVersion { major: 1, minor: 34 };

/// Version of the metadata format a release was authored against
///
/// Encoded on the wire as `"vMAJOR.MINOR"` or as the bare integer `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpecVersion {
    pub major: u16,
    pub minor: u16,
}

impl SpecVersion {
    pub fn is_supported(&self) -> bool {
        *self <= SUPPORTED_SPEC
    }
}

impl Default for SpecVersion {
    fn default() -> Self {
        SpecVersion { major: 1, minor: 0 }
    }
}

impl fmt::Display for SpecVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}", self.major, self.minor)
    }
}

impl Serialize for SpecVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SpecVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u16),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(major) => Ok(SpecVersion { major, minor: 0 }),
            Raw::Text(s) => {
                let body = s.strip_prefix('v').unwrap_or(&s);
                let (major, minor) = body.split_once('.').unwrap_or((body, "0"));
                let parse = |part: &str| {
                    part.parse::<u16>().map_err(|_| {
                        serde::de::Error::custom(format!("invalid spec version '{}'", s))
                    })
                };
                Ok(SpecVersion {
                    major: parse(major)?,
                    minor: parse(minor)?,
                })
            }
        }
    }
}

/// What a release installs as
///
/// Unknown kinds are a hard parse failure: the repository file is rejected
/// rather than silently mishandled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    #[default]
    Package,
    Metapackage,
    Dlc,
}

/// Pre-release level of a release, also used as the user's tolerance
///
/// A release is visible when its status does not exceed the tolerance, so
/// `Testing` tolerance admits `Stable` and `Testing` releases.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStatus {
    #[default]
    Stable,
    Testing,
    Development,
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseStatus::Stable => write!(f, "stable"),
            ReleaseStatus::Testing => write!(f, "testing"),
            ReleaseStatus::Development => write!(f, "development"),
        }
    }
}

/// Checksums of the downloadable archive
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadHash {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// One installable version of one mod
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    #[serde(default)]
    pub spec_version: SpecVersion,

    pub identifier: String,

    /// Human-readable mod name; presentation only
    #[serde(default)]
    pub name: String,

    pub version: ModVersion,

    #[serde(default)]
    pub kind: ModuleKind,

    /// Short description; presentation only
    #[serde(rename = "abstract", default)]
    pub blurb: String,

    #[serde(default, with = "one_or_many")]
    pub author: Vec<String>,

    #[serde(default, with = "one_or_many")]
    pub license: Vec<String>,

    #[serde(default)]
    pub release_status: ReleaseStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download: Option<Url>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_size: Option<u64>,

    #[serde(default, skip_serializing_if = "DownloadHash::is_empty")]
    pub download_hash: DownloadHash,

    /// Exact compatible game version; mutually exclusive with min/max
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_version: Option<GameVersion>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_version_min: Option<GameVersion>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_version_max: Option<GameVersion>,

    /// Virtual identifiers this release satisfies
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provides: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<RelationshipEntry>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommends: Vec<RelationshipEntry>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggests: Vec<RelationshipEntry>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supports: Vec<RelationshipEntry>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<RelationshipEntry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaced_by: Option<DirectDescriptor>,
}

impl DownloadHash {
    fn is_empty(&self) -> bool {
        self.sha1.is_none() && self.sha256.is_none()
    }
}

impl Release {
    /// Reject metadata combinations the format forbids
    pub fn validate(&self) -> Result<()> {
        if self.game_version.is_some()
            && (self.game_version_min.is_some() || self.game_version_max.is_some())
        {
            return Err(Error::Metadata(format!(
                "{} {} specifies both game_version and game_version_min/max",
                self.identifier, self.version
            )));
        }
        if let Some(replaced_by) = &self.replaced_by {
            if replaced_by.max_version.is_some() {
                return Err(Error::Metadata(format!(
                    "{} {} specifies max_version in replaced_by",
                    self.identifier, self.version
                )));
            }
        }
        if self.kind == ModuleKind::Package && self.download.is_none() {
            return Err(Error::Metadata(format!(
                "{} {} is a package without a download",
                self.identifier, self.version
            )));
        }
        Ok(())
    }

    /// The game version ranges this release is compatible with
    pub fn game_version_ranges(&self) -> Vec<GameVersionRange> {
        if let Some(exact) = &self.game_version {
            vec![GameVersionRange::exact(*exact)]
        } else if self.game_version_min.is_some() || self.game_version_max.is_some() {
            vec![GameVersionRange::between(
                self.game_version_min,
                self.game_version_max,
            )]
        } else {
            vec![GameVersionRange::any()]
        }
    }

    pub fn is_compatible(&self, criteria: &GameVersionCriteria) -> bool {
        criteria.satisfied_by(&self.game_version_ranges())
    }

    /// Whether `identifier` names this release directly or via `provides`
    pub fn describes(&self, identifier: &str) -> bool {
        self.identifier == identifier || self.provides.iter().any(|p| p == identifier)
    }

    pub fn is_dlc(&self) -> bool {
        self.kind == ModuleKind::Dlc
    }

    pub fn is_metapackage(&self) -> bool {
        self.kind == ModuleKind::Metapackage
    }

    /// An unmanaged stand-in release for a DLC the game owns
    pub fn dlc_stub(identifier: &str, version: &ModVersion) -> Release {
        Release {
            spec_version: SpecVersion::default(),
            identifier: identifier.to_string(),
            name: identifier.to_string(),
            version: version.clone(),
            kind: ModuleKind::Dlc,
            blurb: String::new(),
            author: Vec::new(),
            license: Vec::new(),
            release_status: ReleaseStatus::Stable,
            download: None,
            download_size: None,
            download_hash: DownloadHash::default(),
            game_version: None,
            game_version_min: None,
            game_version_max: None,
            provides: Vec::new(),
            depends: Vec::new(),
            recommends: Vec::new(),
            suggests: Vec::new(),
            supports: Vec::new(),
            conflicts: Vec::new(),
            replaced_by: None,
        }
    }

    /// Minimal release for unit tests
    #[cfg(test)]
    pub fn for_test(identifier: &str, version: &str) -> Release {
        let mut release = Release::dlc_stub(identifier, &version.parse().unwrap());
        release.kind = ModuleKind::Package;
        release.download = Some(
            format!("https://example.com/{}-{}.zip", identifier, version)
                .parse()
                .unwrap(),
        );
        release
    }
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.identifier, self.version)
    }
}

/// Accept a bare value where the wire format allows value-or-array
pub(crate) mod one_or_many {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, T>(value: &[T], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        value.serialize(serializer)
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany<T> {
            One(T),
            Many(Vec<T>),
        }

        Ok(match OneOrMany::deserialize(deserializer)? {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        })
    }
}
