//! Stateless consistency checks over a set of releases
//!
//! Given the modules that would end up installed together (plus ambient
//! DLLs and DLC), report every dependency that nothing satisfies and every
//! conflict clause that another member triggers. The resolver's output must
//! always pass these checks; callers mutating installed state by hand use
//! them as a gate.

use std::collections::{HashMap, HashSet};

use crate::relationship::{DescriptorMatch, RelationshipEntry};
use crate::release::Release;
use crate::version::ModVersion;
use crate::{Error, InconsistencyKind, Result};

/// A dependency no module, DLL or DLC satisfies
#[derive(Debug, Clone, PartialEq)]
pub struct UnmetDepend<'a> {
    pub release: &'a Release,
    pub descriptor: &'a RelationshipEntry,
}

/// What a conflict clause matched
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictTarget<'a> {
    Module(&'a Release),
    Dll(String),
    Dlc(String),
}

/// A conflict clause that matched another member of the set
#[derive(Debug, Clone, PartialEq)]
pub struct SanityConflict<'a> {
    pub release: &'a Release,
    pub descriptor: &'a RelationshipEntry,
    pub with: ConflictTarget<'a>,
}

/// Dependencies of `modules` that nothing in `modules ∪ dlls ∪ dlc` meets
pub fn find_unmet_depends<'a>(
    modules: &[&'a Release],
    dlls: &HashSet<String>,
    dlc: &HashMap<String, ModVersion>,
) -> Vec<UnmetDepend<'a>> {
    let mut unmet = Vec::new();
    for release in modules {
        for entry in &release.depends {
            if entry.descriptor.match_any(modules, dlls, dlc).is_none() {
                unmet.push(UnmetDepend {
                    release,
                    descriptor: entry,
                });
            }
        }
    }
    unmet
}

/// Conflict clauses of `modules` matched by a distinct member of the set
///
/// A module never conflicts with itself: matches sharing the clause owner's
/// identifier are ignored.
pub fn find_conflicts<'a>(
    modules: &[&'a Release],
    dlls: &HashSet<String>,
    dlc: &HashMap<String, ModVersion>,
) -> Vec<SanityConflict<'a>> {
    let mut conflicts = Vec::new();
    for release in modules {
        for entry in &release.conflicts {
            let others: Vec<&'a Release> = modules
                .iter()
                .filter(|other| other.identifier != release.identifier)
                .copied()
                .collect();
            let with = match entry.descriptor.match_any(&others, dlls, dlc) {
                Some(DescriptorMatch::Module(m)) => ConflictTarget::Module(m),
                Some(DescriptorMatch::Dll(name)) => {
                    if name == release.identifier {
                        continue;
                    }
                    ConflictTarget::Dll(name)
                }
                Some(DescriptorMatch::Dlc(name)) => {
                    if name == release.identifier {
                        continue;
                    }
                    ConflictTarget::Dlc(name)
                }
                None => continue,
            };
            conflicts.push(SanityConflict {
                release,
                descriptor: entry,
                with,
            });
        }
    }
    conflicts
}

pub fn is_consistent(
    modules: &[&Release],
    dlls: &HashSet<String>,
    dlc: &HashMap<String, ModVersion>,
) -> bool {
    find_unmet_depends(modules, dlls, dlc).is_empty() && find_conflicts(modules, dlls, dlc).is_empty()
}

/// Error out when the set has unmet dependencies or internal conflicts
pub fn enforce_consistency(
    modules: &[&Release],
    dlls: &HashSet<String>,
    dlc: &HashMap<String, ModVersion>,
) -> Result<()> {
    let unmet = find_unmet_depends(modules, dlls, dlc);
    if !unmet.is_empty() {
        return Err(Error::Inconsistent {
            kind: InconsistencyKind::UnmetDepends,
            details: unmet
                .iter()
                .map(|u| format!("{} requires {}", u.release, u.descriptor))
                .collect(),
        });
    }

    let conflicts = find_conflicts(modules, dlls, dlc);
    if !conflicts.is_empty() {
        return Err(Error::Inconsistent {
            kind: InconsistencyKind::Conflict,
            details: conflicts
                .iter()
                .map(|c| {
                    let with = match &c.with {
                        ConflictTarget::Module(m) => m.to_string(),
                        ConflictTarget::Dll(name) => format!("DLL {}", name),
                        ConflictTarget::Dlc(name) => format!("DLC {}", name),
                    };
                    format!("{} conflicts with {}", c.release, with)
                })
                .collect(),
        });
    }

    Ok(())
}
