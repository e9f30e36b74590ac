//! Mod version parsing, ordering and range arithmetic
//!
//! Mod versions have the form `[epoch:]upstream[-release]`. Ordering is
//! lexicographic on `(epoch, upstream, release)` where the upstream and
//! release parts are compared segment-wise: runs of digits compare
//! numerically, runs of non-digits compare by codepoint with `~` sorting
//! before the empty string and the empty string before anything else.
//! A version without a release part sorts before the same version with one.
//!
//! # Examples
//!
//! ```
//! use kerbpm::ModVersion;
//!
//! let a: ModVersion = "1.2.0".parse().unwrap();
//! let b: ModVersion = "1.10.0".parse().unwrap();
//! assert!(a < b);
//!
//! let pre: ModVersion = "1.0~beta".parse().unwrap();
//! let rel: ModVersion = "1.0".parse().unwrap();
//! assert!(pre < rel);
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A mod version of the form `[epoch:]upstream[-release]`
///
/// The textual form the version was parsed from is preserved and used for
/// display and serialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModVersion {
    epoch: u32,
    upstream: String,
    release: Option<String>,
    original: String,
}

impl ModVersion {
    /// The epoch, or 0 if the version carries none
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// The upstream part, between the epoch and the release suffix
    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    /// The release suffix after the last `-`, if any
    pub fn release(&self) -> Option<&str> {
        self.release.as_deref()
    }

    /// The exact string this version was parsed from
    pub fn original(&self) -> &str {
        &self.original
    }
}

impl FromStr for ModVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::Version("empty version string".to_string()));
        }

        let (epoch, rest) = match s.split_once(':') {
            Some((e, rest)) if !e.is_empty() && e.bytes().all(|b| b.is_ascii_digit()) => {
                let epoch = e
                    .parse::<u32>()
                    .map_err(|_| Error::Version(format!("epoch out of range in '{}'", s)))?;
                (epoch, rest)
            }
            Some(_) => {
                return Err(Error::Version(format!("invalid epoch in '{}'", s)));
            }
            None => (0, s),
        };

        if rest.is_empty() {
            return Err(Error::Version(format!("missing upstream version in '{}'", s)));
        }

        // The release suffix starts at the last hyphen so upstream versions
        // may themselves contain hyphens.
        let (upstream, release) = match rest.rsplit_once('-') {
            Some((up, rel)) if !up.is_empty() => (up.to_string(), Some(rel.to_string())),
            _ => (rest.to_string(), None),
        };

        Ok(ModVersion {
            epoch,
            upstream,
            release,
            original: s.to_string(),
        })
    }
}

impl fmt::Display for ModVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

impl Serialize for ModVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.original)
    }
}

impl<'de> Deserialize<'de> for ModVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl Ord for ModVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| compare_fragment(&self.upstream, &other.upstream))
            .then_with(|| match (&self.release, &other.release) {
                (None, None) => Ordering::Equal,
                // A missing release sorts before any present release.
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(a), Some(b)) => compare_fragment(a, b),
            })
    }
}

impl PartialOrd for ModVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Sort key for a single character of a non-digit run
///
/// `~` sorts before the end of the string, and the end of the string sorts
/// before every other character.
fn alpha_key(c: Option<char>) -> u64 {
    match c {
        Some('~') => 0,
        None => 1,
        Some(c) => c as u64 + 2,
    }
}

/// Compare two version fragments segment by segment
///
/// Fragments are consumed as alternating non-digit and digit runs. Digit
/// runs compare numerically (leading zeros stripped, longer run of
/// significant digits wins); non-digit runs compare per [`alpha_key`].
fn compare_fragment(a: &str, b: &str) -> Ordering {
    let mut a = a.chars().peekable();
    let mut b = b.chars().peekable();

    loop {
        // Non-digit run.
        loop {
            let a_alpha = a.peek().copied().filter(|c| !c.is_ascii_digit());
            let b_alpha = b.peek().copied().filter(|c| !c.is_ascii_digit());
            if a_alpha.is_none() && b_alpha.is_none() {
                break;
            }
            match alpha_key(a_alpha).cmp(&alpha_key(b_alpha)) {
                Ordering::Equal => {}
                ord => return ord,
            }
            if a_alpha.is_some() {
                a.next();
            }
            if b_alpha.is_some() {
                b.next();
            }
        }

        if a.peek().is_none() && b.peek().is_none() {
            return Ordering::Equal;
        }

        // Digit run: strip leading zeros, then more significant digits win.
        let mut a_digits = String::new();
        while let Some(c) = a.peek().copied().filter(|c| c.is_ascii_digit()) {
            a_digits.push(c);
            a.next();
        }
        let mut b_digits = String::new();
        while let Some(c) = b.peek().copied().filter(|c| c.is_ascii_digit()) {
            b_digits.push(c);
            b.next();
        }
        let a_num = a_digits.trim_start_matches('0');
        let b_num = b_digits.trim_start_matches('0');
        match a_num
            .len()
            .cmp(&b_num.len())
            .then_with(|| a_num.cmp(b_num))
        {
            Ordering::Equal => {}
            ord => return ord,
        }
    }
}

/// A half-open or closed interval of mod versions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    pub min: Option<ModVersion>,
    pub max: Option<ModVersion>,
    pub min_inclusive: bool,
    pub max_inclusive: bool,
}

impl VersionRange {
    /// The range containing every version
    pub fn unbounded() -> Self {
        VersionRange {
            min: None,
            max: None,
            min_inclusive: true,
            max_inclusive: true,
        }
    }

    /// `[min, ∞)`
    pub fn at_least(min: ModVersion) -> Self {
        VersionRange {
            min: Some(min),
            max: None,
            min_inclusive: true,
            max_inclusive: true,
        }
    }

    /// `(-∞, max]`
    pub fn at_most(max: ModVersion) -> Self {
        VersionRange {
            min: None,
            max: Some(max),
            min_inclusive: true,
            max_inclusive: true,
        }
    }

    /// `[min, max]`
    pub fn between(min: ModVersion, max: ModVersion) -> Self {
        VersionRange {
            min: Some(min),
            max: Some(max),
            min_inclusive: true,
            max_inclusive: true,
        }
    }

    pub fn contains(&self, version: &ModVersion) -> bool {
        if let Some(min) = &self.min {
            match version.cmp(min) {
                Ordering::Less => return false,
                Ordering::Equal if !self.min_inclusive => return false,
                _ => {}
            }
        }
        if let Some(max) = &self.max {
            match version.cmp(max) {
                Ordering::Greater => return false,
                Ordering::Equal if !self.max_inclusive => return false,
                _ => {}
            }
        }
        true
    }

    /// Intersect two ranges; `None` means the ranges do not overlap
    pub fn intersect(&self, other: &VersionRange) -> Option<VersionRange> {
        let (min, min_inclusive) = match (&self.min, &other.min) {
            (None, None) => (None, true),
            (Some(m), None) => (Some(m.clone()), self.min_inclusive),
            (None, Some(m)) => (Some(m.clone()), other.min_inclusive),
            (Some(a), Some(b)) => match a.cmp(b) {
                Ordering::Greater => (Some(a.clone()), self.min_inclusive),
                Ordering::Less => (Some(b.clone()), other.min_inclusive),
                Ordering::Equal => (Some(a.clone()), self.min_inclusive && other.min_inclusive),
            },
        };
        let (max, max_inclusive) = match (&self.max, &other.max) {
            (None, None) => (None, true),
            (Some(m), None) => (Some(m.clone()), self.max_inclusive),
            (None, Some(m)) => (Some(m.clone()), other.max_inclusive),
            (Some(a), Some(b)) => match a.cmp(b) {
                Ordering::Less => (Some(a.clone()), self.max_inclusive),
                Ordering::Greater => (Some(b.clone()), other.max_inclusive),
                Ordering::Equal => (Some(a.clone()), self.max_inclusive && other.max_inclusive),
            },
        };

        if let (Some(lo), Some(hi)) = (&min, &max) {
            match lo.cmp(hi) {
                Ordering::Greater => return None,
                Ordering::Equal if !(min_inclusive && max_inclusive) => return None,
                _ => {}
            }
        }

        Some(VersionRange {
            min,
            max,
            min_inclusive,
            max_inclusive,
        })
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.min, &self.max) {
            (None, None) => write!(f, "any"),
            (Some(min), None) => write!(f, "{} {}", if self.min_inclusive { ">=" } else { ">" }, min),
            (None, Some(max)) => write!(f, "{} {}", if self.max_inclusive { "<=" } else { "<" }, max),
            (Some(min), Some(max)) => write!(
                f,
                "{} {}, {} {}",
                if self.min_inclusive { ">=" } else { ">" },
                min,
                if self.max_inclusive { "<=" } else { "<" },
                max
            ),
        }
    }
}

/// The version constraint carried by a relationship descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionBound {
    /// Any version satisfies the bound
    Any,
    /// Only this exact version satisfies the bound
    Exact(ModVersion),
    /// Any version inside the range satisfies the bound
    Range(VersionRange),
}

impl VersionBound {
    pub fn satisfied_by(&self, version: &ModVersion) -> bool {
        match self {
            VersionBound::Any => true,
            VersionBound::Exact(v) => version.cmp(v) == Ordering::Equal,
            VersionBound::Range(r) => r.contains(version),
        }
    }

    /// Whether the bound admits every version
    pub fn is_any(&self) -> bool {
        matches!(self, VersionBound::Any)
    }
}

impl fmt::Display for VersionBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionBound::Any => write!(f, "any"),
            VersionBound::Exact(v) => write!(f, "= {}", v),
            VersionBound::Range(r) => write!(f, "{}", r),
        }
    }
}
