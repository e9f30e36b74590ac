//! Relationship descriptors and their evaluation
//!
//! Modules relate to one another through descriptors: either a direct
//! reference to an identifier with an optional version constraint, or an
//! `any_of` alternation over further descriptors. A descriptor matches a
//! release when the release's identifier (or one of its `provides` virtual
//! identifiers) equals the descriptor's name and the release's version lies
//! inside the descriptor's bound.
//!
//! Descriptors can also be satisfied by a plugin DLL the user dropped into
//! the game directory (only when the descriptor carries no version bound,
//! since DLLs are version-opaque) or by a DLC with a known version.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::release::Release;
use crate::version::{ModVersion, VersionBound, VersionRange};

/// One relationship clause as it appears in module metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipEntry {
    #[serde(flatten)]
    pub descriptor: RelationshipDescriptor,

    /// Hide recommendations/suggestions of releases chosen to satisfy this
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub suppress_recommendations: bool,

    /// Free-form text shown when the user is asked to pick an alternative
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choice_help_text: Option<String>,
}

impl RelationshipEntry {
    pub fn direct(name: &str) -> Self {
        RelationshipEntry {
            descriptor: RelationshipDescriptor::Direct(DirectDescriptor {
                name: name.to_string(),
                version: None,
                min_version: None,
                max_version: None,
            }),
            suppress_recommendations: false,
            choice_help_text: None,
        }
    }

    /// A descriptor pinning `release` exactly, used for user requests
    pub fn exact(release: &Release) -> Self {
        RelationshipEntry {
            descriptor: RelationshipDescriptor::Direct(DirectDescriptor {
                name: release.identifier.clone(),
                version: Some(release.version.clone()),
                min_version: None,
                max_version: None,
            }),
            suppress_recommendations: false,
            choice_help_text: None,
        }
    }
}

impl fmt::Display for RelationshipEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.descriptor)
    }
}

/// Direct reference or `any_of` alternation
///
/// The untagged representation mirrors the wire format: a direct clause is
/// an object with a `name`, an alternation is an object with `any_of`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelationshipDescriptor {
    Direct(DirectDescriptor),
    AnyOf(AnyOfDescriptor),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectDescriptor {
    pub name: String,

    /// Exact version constraint, mutually exclusive with min/max
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<ModVersion>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_version: Option<ModVersion>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_version: Option<ModVersion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnyOfDescriptor {
    pub any_of: Vec<RelationshipEntry>,
}

/// What satisfied a descriptor
#[derive(Debug, Clone, PartialEq)]
pub enum DescriptorMatch<'a> {
    Module(&'a Release),
    Dll(String),
    Dlc(String),
}

impl DirectDescriptor {
    pub fn unversioned(name: &str) -> Self {
        DirectDescriptor {
            name: name.to_string(),
            version: None,
            min_version: None,
            max_version: None,
        }
    }

    /// The version constraint this descriptor expresses
    pub fn bound(&self) -> VersionBound {
        if let Some(version) = &self.version {
            VersionBound::Exact(version.clone())
        } else if self.min_version.is_some() || self.max_version.is_some() {
            VersionBound::Range(VersionRange {
                min: self.min_version.clone(),
                max: self.max_version.clone(),
                min_inclusive: true,
                max_inclusive: true,
            })
        } else {
            VersionBound::Any
        }
    }

    /// A descriptor matches a release iff the release's identifier equals
    /// the descriptor's name or its `provides` contains it, and the
    /// release's version lies in the bound.
    pub fn matches(&self, release: &Release) -> bool {
        let named = release.identifier == self.name
            || release.provides.iter().any(|p| p == &self.name);
        named && self.bound().satisfied_by(&release.version)
    }
}

impl fmt::Display for DirectDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bound = self.bound();
        if bound.is_any() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} ({})", self.name, bound)
        }
    }
}

impl RelationshipDescriptor {
    pub fn matches(&self, release: &Release) -> bool {
        match self {
            RelationshipDescriptor::Direct(d) => d.matches(release),
            RelationshipDescriptor::AnyOf(alt) => alt
                .any_of
                .iter()
                .any(|entry| entry.descriptor.matches(release)),
        }
    }

    /// The direct clauses of this descriptor, alternation flattened in order
    pub fn flatten(&self) -> Vec<&DirectDescriptor> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into<'a>(&'a self, out: &mut Vec<&'a DirectDescriptor>) {
        match self {
            RelationshipDescriptor::Direct(d) => out.push(d),
            RelationshipDescriptor::AnyOf(alt) => {
                for entry in &alt.any_of {
                    entry.descriptor.flatten_into(out);
                }
            }
        }
    }

    /// Find the first candidate satisfying this descriptor
    ///
    /// Candidates are tried before DLLs, DLLs before DLC. For `any_of` the
    /// alternatives are tried in order and the first match wins. A DLL can
    /// only satisfy a descriptor without a version bound.
    pub fn match_any<'a>(
        &self,
        candidates: &[&'a Release],
        dlls: &HashSet<String>,
        dlc: &HashMap<String, ModVersion>,
    ) -> Option<DescriptorMatch<'a>> {
        match self {
            RelationshipDescriptor::Direct(d) => {
                if let Some(found) = candidates.iter().find(|r| d.matches(r)) {
                    return Some(DescriptorMatch::Module(found));
                }
                if d.bound().is_any() && dlls.contains(&d.name) {
                    return Some(DescriptorMatch::Dll(d.name.clone()));
                }
                if let Some(version) = dlc.get(&d.name) {
                    if d.bound().satisfied_by(version) {
                        return Some(DescriptorMatch::Dlc(d.name.clone()));
                    }
                }
                None
            }
            RelationshipDescriptor::AnyOf(alt) => alt
                .any_of
                .iter()
                .find_map(|entry| entry.descriptor.match_any(candidates, dlls, dlc)),
        }
    }
}

impl fmt::Display for RelationshipDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationshipDescriptor::Direct(d) => write!(f, "{}", d),
            RelationshipDescriptor::AnyOf(alt) => {
                let parts: Vec<String> =
                    alt.any_of.iter().map(|e| e.descriptor.to_string()).collect();
                write!(f, "{}", parts.join(" OR "))
            }
        }
    }
}
