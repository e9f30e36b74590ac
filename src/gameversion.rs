//! Game version handling and compatibility ranges
//!
//! Game versions are dotted tuples (`1.12.5` or `1.12.5.3190`) where
//! trailing components may be left unset to mean "any". A release declares
//! its compatibility as a set of [`GameVersionRange`]s; an instance's
//! [`GameVersionCriteria`] is satisfied when every criterion falls inside at
//! least one of those ranges.

use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A game version with optional trailing components
///
/// `1.12` matches any `1.12.x`; a fully unset version (`any`) matches
/// everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GameVersion {
    pub major: Option<u32>,
    pub minor: Option<u32>,
    pub patch: Option<u32>,
    pub build: Option<u32>,
}

impl GameVersion {
    /// The fully unset version matching every game version
    pub fn any() -> Self {
        GameVersion::default()
    }

    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        GameVersion {
            major: Some(major),
            minor: Some(minor),
            patch: Some(patch),
            build: None,
        }
    }

    pub fn is_any(&self) -> bool {
        self.major.is_none()
    }

    /// Lowest concrete version described by this (unset components as 0)
    fn floor(&self) -> (u32, u32, u32, u32) {
        (
            self.major.unwrap_or(0),
            self.minor.unwrap_or(0),
            self.patch.unwrap_or(0),
            self.build.unwrap_or(0),
        )
    }

    /// Highest concrete version described by this (unset components maxed)
    fn ceiling(&self) -> (u32, u32, u32, u32) {
        (
            self.major.unwrap_or(u32::MAX),
            self.minor.unwrap_or(u32::MAX),
            self.patch.unwrap_or(u32::MAX),
            self.build.unwrap_or(u32::MAX),
        )
    }
}

impl Ord for GameVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.floor().cmp(&other.floor())
    }
}

impl PartialOrd for GameVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for GameVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() || s == "any" {
            return Ok(GameVersion::any());
        }

        let mut parts = s.split('.');
        let mut component = |name: &str| -> Result<Option<u32>> {
            match parts.next() {
                None => Ok(None),
                Some(p) => p
                    .parse::<u32>()
                    .map(Some)
                    .map_err(|_| Error::Version(format!("invalid game version {} in '{}'", name, s))),
            }
        };

        let version = GameVersion {
            major: component("major")?,
            minor: component("minor")?,
            patch: component("patch")?,
            build: component("build")?,
        };
        if parts.next().is_some() {
            return Err(Error::Version(format!(
                "too many components in game version '{}'",
                s
            )));
        }
        Ok(version)
    }
}

impl fmt::Display for GameVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        for component in [self.major, self.minor, self.patch, self.build] {
            match component {
                Some(c) => parts.push(c.to_string()),
                None => break,
            }
        }
        if parts.is_empty() {
            write!(f, "any")
        } else {
            write!(f, "{}", parts.join("."))
        }
    }
}

impl Serialize for GameVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for GameVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An inclusive range of game versions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameVersionRange {
    pub lower: GameVersion,
    pub upper: GameVersion,
}

impl GameVersionRange {
    pub fn any() -> Self {
        GameVersionRange {
            lower: GameVersion::any(),
            upper: GameVersion::any(),
        }
    }

    /// The range covering exactly the versions described by `version`
    ///
    /// A partially specified version spans all of its completions, so
    /// `1.12` becomes the range `[1.12.0.0, 1.12.*]`.
    pub fn exact(version: GameVersion) -> Self {
        GameVersionRange {
            lower: version,
            upper: version,
        }
    }

    pub fn between(lower: Option<GameVersion>, upper: Option<GameVersion>) -> Self {
        GameVersionRange {
            lower: lower.unwrap_or_else(GameVersion::any),
            upper: upper.unwrap_or_else(GameVersion::any),
        }
    }

    pub fn contains(&self, version: &GameVersion) -> bool {
        version.ceiling() >= self.lower.floor() && version.floor() <= self.upper.ceiling()
    }
}

impl fmt::Display for GameVersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.lower.is_any(), self.upper.is_any()) {
            (true, true) => write!(f, "any"),
            (false, true) => write!(f, ">= {}", self.lower),
            (true, false) => write!(f, "<= {}", self.upper),
            (false, false) if self.lower == self.upper => write!(f, "{}", self.lower),
            (false, false) => write!(f, "{} - {}", self.lower, self.upper),
        }
    }
}

/// The set of concrete game versions an instance wants modules for
///
/// Usually a single version, but instances configured for forward or
/// backward compatibility carry several.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GameVersionCriteria(pub Vec<GameVersion>);

impl GameVersionCriteria {
    /// Criteria matching everything (no versions to satisfy)
    pub fn any() -> Self {
        GameVersionCriteria(Vec::new())
    }

    pub fn single(version: GameVersion) -> Self {
        GameVersionCriteria(vec![version])
    }

    /// A release is compatible iff each criterion lies in at least one of
    /// its compatibility ranges.
    pub fn satisfied_by(&self, ranges: &[GameVersionRange]) -> bool {
        self.0
            .iter()
            .all(|criterion| ranges.iter().any(|range| range.contains(criterion)))
    }
}

impl fmt::Display for GameVersionCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "any");
        }
        let parts: Vec<String> = self.0.iter().map(|v| v.to_string()).collect();
        write!(f, "{}", parts.join(", "))
    }
}
