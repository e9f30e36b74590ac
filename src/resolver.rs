//! Recursive relationship resolution
//!
//! Given the releases the user wants and the releases already installed,
//! [`RelationshipResolver`] walks `depends`, `conflicts`, `recommends`,
//! `suggests` and `provides` relations to produce either a self-consistent
//! installation plan or a structured explanation of why none exists.
//!
//! Each release moves through Unseen → UnderConsideration → Chosen or
//! Rejected. A dependency descriptor resolves, in order, against installed
//! releases, releases already chosen this call, ambient DLLs, DLC facts,
//! and finally new candidates pulled from the registry. Candidate
//! expansion recurses; when a candidate fails (its own dependencies cannot
//! be met, or it conflicts with a chosen release) the resolver rolls its
//! tentative state back and tries the next candidate in sort order.
//!
//! Per-descriptor results are memoized in a [`RelationshipCache`]. At a
//! provider choice with more than one candidate the cache is cloned per
//! branch so a failure along one alternative cannot poison the others; a
//! single-candidate choice shares the cache. A descriptor already being
//! resolved further up the stack is treated as tentatively satisfied by
//! its pending choice, which is what breaks provider cycles.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

use log::debug;

use crate::gameversion::GameVersionCriteria;
use crate::querier::RegistryQuerier;
use crate::relationship::{DescriptorMatch, RelationshipEntry};
use crate::release::{Release, ReleaseStatus};
use crate::version::ModVersion;
use crate::{Error, Result};

/// Knobs for one resolution run
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    /// Expand `recommends` into the plan
    pub with_recommends: bool,
    /// Expand `suggests` into the plan
    pub with_suggests: bool,
    /// Also expand suggests of modules pulled in transitively
    pub with_all_suggests: bool,
    /// Collect `supports` back-references for the UI
    pub with_supports: bool,
    /// Record unmet relationships and conflicts instead of failing
    pub proceed_with_inconsistencies: bool,
    /// Highest pre-release level the user accepts
    pub stability_tolerance: ReleaseStatus,
    /// Collect recommendation/suggestion candidates without installing them
    pub get_recommenders: bool,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        ResolverOptions {
            with_recommends: true,
            with_suggests: false,
            with_all_suggests: false,
            with_supports: false,
            proceed_with_inconsistencies: false,
            stability_tolerance: ReleaseStatus::Stable,
            get_recommenders: false,
        }
    }
}

impl ResolverOptions {
    /// Options for a bare consistency check: nothing optional, keep going
    pub fn conflict_precheck() -> Self {
        ResolverOptions {
            with_recommends: false,
            with_suggests: false,
            with_all_suggests: false,
            with_supports: false,
            proceed_with_inconsistencies: true,
            stability_tolerance: ReleaseStatus::Development,
            get_recommenders: true,
        }
    }
}

/// Why a release entered the resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionReason {
    UserRequested,
    Depends(String),
    Recommendation(String),
    Suggestion(String),
    Replacement(String),
    ProvidedBy(String),
}

impl SelectionReason {
    pub fn parent(&self) -> Option<&str> {
        match self {
            SelectionReason::UserRequested => None,
            SelectionReason::Depends(p)
            | SelectionReason::Recommendation(p)
            | SelectionReason::Suggestion(p)
            | SelectionReason::Replacement(p)
            | SelectionReason::ProvidedBy(p) => Some(p),
        }
    }
}

impl fmt::Display for SelectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionReason::UserRequested => write!(f, "requested"),
            SelectionReason::Depends(p) => write!(f, "dependency of {}", p),
            SelectionReason::Recommendation(p) => write!(f, "recommended by {}", p),
            SelectionReason::Suggestion(p) => write!(f, "suggested by {}", p),
            SelectionReason::Replacement(p) => write!(f, "replacement for {}", p),
            SelectionReason::ProvidedBy(p) => write!(f, "provides for {}", p),
        }
    }
}

/// How one relationship descriptor was (or was not) satisfied
#[derive(Debug, Clone)]
pub enum ResolvedRelationship {
    /// Satisfied by a release that is already installed (or a DLC fact)
    ByInstalled {
        source: String,
        descriptor: RelationshipEntry,
        reason: SelectionReason,
        installed: Release,
    },
    /// Satisfied by a release chosen earlier in this resolution
    ByInstalling {
        source: String,
        descriptor: RelationshipEntry,
        reason: SelectionReason,
        installing: Release,
    },
    /// Satisfied by an ambient plugin DLL
    ByDll {
        source: String,
        descriptor: RelationshipEntry,
        reason: SelectionReason,
        dll: String,
    },
    /// Requires something new; providers maps each candidate tried to the
    /// relationships its own resolution produced. Resolvable iff some
    /// provider's subtree is fully satisfied; an empty map means nothing
    /// in the registry can satisfy the descriptor.
    ByNew {
        source: String,
        descriptor: RelationshipEntry,
        reason: SelectionReason,
        providers: Vec<(Release, Vec<ResolvedRelationship>)>,
    },
}

impl ResolvedRelationship {
    pub fn source(&self) -> &str {
        match self {
            ResolvedRelationship::ByInstalled { source, .. }
            | ResolvedRelationship::ByInstalling { source, .. }
            | ResolvedRelationship::ByDll { source, .. }
            | ResolvedRelationship::ByNew { source, .. } => source,
        }
    }

    pub fn descriptor(&self) -> &RelationshipEntry {
        match self {
            ResolvedRelationship::ByInstalled { descriptor, .. }
            | ResolvedRelationship::ByInstalling { descriptor, .. }
            | ResolvedRelationship::ByDll { descriptor, .. }
            | ResolvedRelationship::ByNew { descriptor, .. } => descriptor,
        }
    }

    pub fn reason(&self) -> &SelectionReason {
        match self {
            ResolvedRelationship::ByInstalled { reason, .. }
            | ResolvedRelationship::ByInstalling { reason, .. }
            | ResolvedRelationship::ByDll { reason, .. }
            | ResolvedRelationship::ByNew { reason, .. } => reason,
        }
    }

    pub fn is_satisfied(&self) -> bool {
        match self {
            ResolvedRelationship::ByNew { providers, .. } => providers
                .iter()
                .any(|(_, children)| children.iter().all(ResolvedRelationship::is_satisfied)),
            _ => true,
        }
    }

    /// Whether `identifier` appears anywhere in this subtree
    pub fn contains(&self, identifier: &str) -> bool {
        match self {
            ResolvedRelationship::ByInstalled { installed, .. } => {
                installed.describes(identifier)
            }
            ResolvedRelationship::ByInstalling { installing, .. } => {
                installing.describes(identifier)
            }
            ResolvedRelationship::ByDll { dll, .. } => dll == identifier,
            ResolvedRelationship::ByNew { providers, .. } => {
                providers.iter().any(|(release, children)| {
                    release.describes(identifier)
                        || children.iter().any(|child| child.contains(identifier))
                })
            }
        }
    }

    /// Every path from this node down to an unsatisfiable leaf
    pub fn unsatisfied_from(&self) -> Vec<ResolutionTrace> {
        let mut out = Vec::new();
        let mut path = Vec::new();
        self.collect_unsatisfied(&mut path, &mut out);
        out
    }

    fn collect_unsatisfied(
        &self,
        path: &mut Vec<ResolvedRelationship>,
        out: &mut Vec<ResolutionTrace>,
    ) {
        if self.is_satisfied() {
            return;
        }
        path.push(self.clone());
        if let ResolvedRelationship::ByNew { providers, .. } = self {
            if providers.is_empty() {
                out.push(ResolutionTrace(path.clone()));
            } else {
                for (_, children) in providers {
                    for child in children {
                        child.collect_unsatisfied(path, out);
                    }
                }
            }
        }
        path.pop();
    }
}

impl fmt::Display for ResolvedRelationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedRelationship::ByInstalled {
                source,
                descriptor,
                installed,
                ..
            } => write!(
                f,
                "{} needs {} (satisfied by installed {})",
                source, descriptor, installed
            ),
            ResolvedRelationship::ByInstalling {
                source,
                descriptor,
                installing,
                ..
            } => write!(
                f,
                "{} needs {} (satisfied by installing {})",
                source, descriptor, installing
            ),
            ResolvedRelationship::ByDll {
                source, descriptor, ..
            } => write!(f, "{} needs {} (satisfied by DLL)", source, descriptor),
            ResolvedRelationship::ByNew {
                source,
                descriptor,
                providers,
                ..
            } => {
                if providers.is_empty() {
                    write!(f, "{} needs {} (nothing provides it)", source, descriptor)
                } else {
                    write!(f, "{} needs {}", source, descriptor)
                }
            }
        }
    }
}

/// A path of relationships from a user request to an unsatisfiable leaf
#[derive(Debug, Clone)]
pub struct ResolutionTrace(pub Vec<ResolvedRelationship>);

impl fmt::Display for ResolutionTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|r| r.to_string()).collect();
        write!(f, "{}", parts.join("; because "))
    }
}

/// A conflict clause that fired between two concrete releases
#[derive(Debug, Clone)]
pub struct ConflictPair {
    /// The release owning the conflict clause
    pub module: Release,
    pub descriptor: RelationshipEntry,
    /// The release the clause matched
    pub with: Release,
}

impl fmt::Display for ConflictPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} conflicts with {} (via {})",
            self.module, self.with, self.descriptor
        )
    }
}

/// A module the plan would recommend to the user
#[derive(Debug, Clone)]
pub struct Recommendation {
    pub module: Release,
    /// Whether the UI should pre-check this entry
    pub default_checked: bool,
    /// Identifiers of the modules that recommended it
    pub sources: Vec<String>,
}

/// A module the plan would suggest to the user
#[derive(Debug, Clone)]
pub struct Suggestion {
    pub module: Release,
    pub sources: Vec<String>,
}

/// Memoized per-descriptor resolution results
///
/// Keys combine the source module and the descriptor text, so the same
/// clause is never re-expanded within one branch. Cloned at provider
/// branch points.
#[derive(Debug, Clone, Default)]
pub struct RelationshipCache {
    states: HashMap<String, CacheState>,
    in_progress: HashSet<String>,
}

#[derive(Debug, Clone)]
enum CacheState {
    Satisfied,
    Failed(Box<ResolvedRelationship>),
}

impl RelationshipCache {
    fn key(source: &str, entry: &RelationshipEntry) -> String {
        format!("{}|{}", source, entry.descriptor)
    }

    fn get(&self, key: &str) -> Option<&CacheState> {
        self.states.get(key)
    }

    fn set_satisfied(&mut self, key: String) {
        self.states.insert(key, CacheState::Satisfied);
    }

    fn set_failed(&mut self, key: String, node: ResolvedRelationship) {
        self.states.insert(key, CacheState::Failed(Box::new(node)));
    }

    fn enter(&mut self, key: &str) {
        self.in_progress.insert(key.to_string());
    }

    fn leave(&mut self, key: &str) {
        self.in_progress.remove(key);
    }

    fn is_in_progress(&self, key: &str) -> bool {
        self.in_progress.contains(key)
    }
}

/// Which optional relations to expand at the current depth
///
/// Recommendations of recommendations are never followed; suggestions
/// below the first level only survive `with_all_suggests`.
#[derive(Debug, Clone, Copy)]
struct ExpandFlags {
    recommends: bool,
    suggests: bool,
}

enum ResolveFailure {
    /// The descriptor could not be satisfied; node embeds the attempts
    Unsatisfied(ResolvedRelationship),
    /// A candidate clashed with a chosen or installed release
    Conflicted(ConflictPair),
}

struct Snapshot {
    installing: HashMap<String, Release>,
    install_order: Vec<String>,
    conflicts_len: usize,
}

pub struct RelationshipResolver<'a> {
    querier: &'a RegistryQuerier<'a>,
    criteria: &'a GameVersionCriteria,
    opts: ResolverOptions,
    removals: HashSet<String>,
    /// UnderConsideration and Chosen releases, by identifier
    installing: HashMap<String, Release>,
    /// Chosen identifiers in dependency-before-dependent order
    install_order: Vec<String>,
    resolved_roots: Vec<ResolvedRelationship>,
    conflicts: Vec<ConflictPair>,
    unsatisfied: Vec<ResolutionTrace>,
    recommendations: BTreeMap<String, Recommendation>,
    suggestions: BTreeMap<String, Suggestion>,
}

impl<'a> RelationshipResolver<'a> {
    pub fn new(
        querier: &'a RegistryQuerier<'a>,
        criteria: &'a GameVersionCriteria,
        opts: ResolverOptions,
    ) -> Self {
        RelationshipResolver {
            querier,
            criteria,
            opts,
            removals: HashSet::new(),
            installing: HashMap::new(),
            install_order: Vec::new(),
            resolved_roots: Vec::new(),
            conflicts: Vec::new(),
            unsatisfied: Vec::new(),
            recommendations: BTreeMap::new(),
            suggestions: BTreeMap::new(),
        }
    }

    /// Resolve the user's requested installs (and removals)
    ///
    /// On success the plan is available through [`mod_list`] and friends.
    /// Unless `proceed_with_inconsistencies` is set, unmet dependencies
    /// raise [`Error::UnmetDependencies`] and conflicts raise
    /// [`Error::Conflicts`].
    ///
    /// [`mod_list`]: RelationshipResolver::mod_list
    pub fn resolve(&mut self, requests: &[Release], removals: &[Release]) -> Result<()> {
        self.removals = removals.iter().map(|r| r.identifier.clone()).collect();
        let mut cache = RelationshipCache::default();

        let top_flags = ExpandFlags {
            recommends: self.opts.with_recommends || self.opts.get_recommenders,
            suggests: self.opts.with_suggests || self.opts.get_recommenders,
        };

        for request in requests {
            if self.installing.contains_key(&request.identifier) {
                continue;
            }
            debug!("resolving user request {}", request);

            let entry = RelationshipEntry::exact(request);
            let snapshot = self.snapshot();
            match self.add_module(
                request,
                SelectionReason::UserRequested,
                false,
                top_flags,
                &mut cache,
            ) {
                Ok(children) => {
                    self.resolved_roots.push(ResolvedRelationship::ByNew {
                        source: "user".to_string(),
                        descriptor: entry,
                        reason: SelectionReason::UserRequested,
                        providers: vec![(request.clone(), children)],
                    });
                }
                Err(ResolveFailure::Unsatisfied(node)) => {
                    self.restore(snapshot);
                    let root = ResolvedRelationship::ByNew {
                        source: "user".to_string(),
                        descriptor: entry,
                        reason: SelectionReason::UserRequested,
                        providers: vec![(request.clone(), vec![node])],
                    };
                    if !self.opts.proceed_with_inconsistencies {
                        return Err(Error::UnmetDependencies {
                            traces: root.unsatisfied_from(),
                        });
                    }
                    self.resolved_roots.push(root);
                }
                Err(ResolveFailure::Conflicted(pair)) => {
                    self.restore(snapshot);
                    self.conflicts.push(pair);
                    if !self.opts.proceed_with_inconsistencies {
                        return Err(Error::Conflicts {
                            pairs: std::mem::take(&mut self.conflicts),
                        });
                    }
                }
            }
        }

        // Collect traces for anything recorded while proceeding.
        if self.opts.proceed_with_inconsistencies {
            let mut traces = Vec::new();
            for root in &self.resolved_roots {
                if !root.is_satisfied() {
                    traces.extend(root.unsatisfied_from());
                }
            }
            self.unsatisfied = traces;
        }

        Ok(())
    }

    /// The chosen releases in installation order
    ///
    /// Dependencies precede their dependents; the order is stable across
    /// runs with identical inputs.
    pub fn mod_list(&self) -> Vec<Release> {
        self.install_order
            .iter()
            .filter_map(|identifier| self.installing.get(identifier))
            .cloned()
            .collect()
    }

    /// Human-readable reasons per conflicting module identifier
    pub fn conflict_list(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for pair in &self.conflicts {
            out.entry(pair.module.identifier.clone())
                .or_insert_with(|| pair.to_string());
            out.entry(pair.with.identifier.clone())
                .or_insert_with(|| pair.to_string());
        }
        out
    }

    /// Traces explaining every relationship that could not be satisfied
    pub fn unsatisfied(&self) -> &[ResolutionTrace] {
        &self.unsatisfied
    }

    pub fn conflicts(&self) -> &[ConflictPair] {
        &self.conflicts
    }

    pub fn recommendations(&self) -> &BTreeMap<String, Recommendation> {
        &self.recommendations
    }

    pub fn suggestions(&self) -> &BTreeMap<String, Suggestion> {
        &self.suggestions
    }

    /// Available modules whose `supports` matches something in the plan
    pub fn supporters(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut out: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        if !self.opts.with_supports {
            return out;
        }
        for identifier in self.querier.all_identifiers() {
            let Some(candidate) = self.querier.latest_available(
                &identifier,
                self.criteria,
                self.opts.stability_tolerance,
            ) else {
                continue;
            };
            for entry in &candidate.supports {
                for target in self.installing.values() {
                    if entry.descriptor.matches(target) {
                        out.entry(target.identifier.clone())
                            .or_default()
                            .insert(candidate.identifier.clone());
                    }
                }
            }
        }
        out
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            installing: self.installing.clone(),
            install_order: self.install_order.clone(),
            conflicts_len: self.conflicts.len(),
        }
    }

    fn restore(&mut self, snapshot: Snapshot) {
        self.installing = snapshot.installing;
        self.install_order = snapshot.install_order;
        self.conflicts.truncate(snapshot.conflicts_len);
    }

    fn installed_matches(&self, entry: &RelationshipEntry) -> Option<Release> {
        let installed: Vec<&Release> = self
            .querier
            .installed_modules()
            .filter(|release| !self.removals.contains(&release.identifier))
            .collect();
        match entry
            .descriptor
            .match_any(&installed, &HashSet::new(), &HashMap::new())
        {
            Some(DescriptorMatch::Module(release)) => Some(release.clone()),
            _ => None,
        }
    }

    fn installing_matches(&self, entry: &RelationshipEntry) -> Option<Release> {
        let installing: Vec<&Release> = self.installing.values().collect();
        match entry
            .descriptor
            .match_any(&installing, &HashSet::new(), &HashMap::new())
        {
            Some(DescriptorMatch::Module(release)) => Some(release.clone()),
            _ => None,
        }
    }

    fn ambient_matches(&self, entry: &RelationshipEntry) -> Option<DescriptorMatch<'a>> {
        entry
            .descriptor
            .match_any(&[], self.querier.dlls(), self.querier.dlc())
    }

    /// Add one release to the plan, resolving its relationships
    ///
    /// Returns the resolved relationships of the release's `depends` (plus
    /// any expanded optional relations). The caller owns rollback: state
    /// changes made by a failing call are undone via the snapshot taken
    /// before it.
    fn add_module(
        &mut self,
        module: &Release,
        reason: SelectionReason,
        suppress_recommendations: bool,
        flags: ExpandFlags,
        cache: &mut RelationshipCache,
    ) -> std::result::Result<Vec<ResolvedRelationship>, ResolveFailure> {
        if self.installing.contains_key(&module.identifier) {
            return Ok(Vec::new());
        }

        // Conflict check, both directions, against chosen and installed.
        if let Some(pair) = self.find_conflict(module) {
            self.conflicts.push(pair.clone());
            if !self.opts.proceed_with_inconsistencies {
                return Err(ResolveFailure::Conflicted(pair));
            }
        }

        // UnderConsideration.
        self.installing
            .insert(module.identifier.clone(), module.clone());

        let mut children = Vec::new();
        for entry in &module.depends {
            let reason = SelectionReason::Depends(module.identifier.clone());
            match self.resolve_entry(&module.identifier, entry, reason, flags, cache) {
                Ok(resolved) => children.push(resolved),
                Err(ResolveFailure::Unsatisfied(node)) => {
                    if self.opts.proceed_with_inconsistencies {
                        children.push(node);
                    } else {
                        return Err(ResolveFailure::Unsatisfied(node));
                    }
                }
                Err(conflicted) => return Err(conflicted),
            }
        }

        // Chosen: dependencies land in the order list before their
        // dependent, which is exactly the topological order we expose.
        self.install_order.push(module.identifier.clone());

        if !suppress_recommendations {
            self.expand_optional(module, flags, cache, &mut children);
        }

        Ok(children)
    }

    fn find_conflict(&self, module: &Release) -> Option<ConflictPair> {
        let peers: Vec<&Release> = self
            .installing
            .values()
            .chain(
                self.querier
                    .installed_modules()
                    .filter(|r| !self.removals.contains(&r.identifier))
                    .filter(|r| !self.installing.contains_key(&r.identifier)),
            )
            .filter(|peer| peer.identifier != module.identifier)
            .collect();

        for entry in &module.conflicts {
            if let Some(peer) = peers.iter().find(|peer| entry.descriptor.matches(peer)) {
                return Some(ConflictPair {
                    module: module.clone(),
                    descriptor: entry.clone(),
                    with: (*peer).clone(),
                });
            }
        }
        for peer in &peers {
            for entry in &peer.conflicts {
                if entry.descriptor.matches(module) {
                    return Some(ConflictPair {
                        module: (*peer).clone(),
                        descriptor: entry.clone(),
                        with: module.clone(),
                    });
                }
            }
        }
        None
    }

    /// Resolve a single descriptor for `source`
    fn resolve_entry(
        &mut self,
        source: &str,
        entry: &RelationshipEntry,
        reason: SelectionReason,
        flags: ExpandFlags,
        cache: &mut RelationshipCache,
    ) -> std::result::Result<ResolvedRelationship, ResolveFailure> {
        let key = RelationshipCache::key(source, entry);

        if let Some(CacheState::Failed(node)) = cache.get(&key) {
            return Err(ResolveFailure::Unsatisfied((**node).clone()));
        }

        // A descriptor already being expanded further up the stack is
        // tentatively satisfied by its pending choice.
        if cache.is_in_progress(&key) {
            if let Some(pending) = self.installing_matches(entry) {
                return Ok(ResolvedRelationship::ByInstalling {
                    source: source.to_string(),
                    descriptor: entry.clone(),
                    reason,
                    installing: pending,
                });
            }
        }

        if let Some(installed) = self.installed_matches(entry) {
            return Ok(ResolvedRelationship::ByInstalled {
                source: source.to_string(),
                descriptor: entry.clone(),
                reason,
                installed,
            });
        }

        if let Some(installing) = self.installing_matches(entry) {
            return Ok(ResolvedRelationship::ByInstalling {
                source: source.to_string(),
                descriptor: entry.clone(),
                reason,
                installing,
            });
        }

        match self.ambient_matches(entry) {
            Some(DescriptorMatch::Dll(dll)) => {
                return Ok(ResolvedRelationship::ByDll {
                    source: source.to_string(),
                    descriptor: entry.clone(),
                    reason,
                    dll,
                });
            }
            Some(DescriptorMatch::Dlc(name)) => {
                if let Some(version) = self.querier.dlc().get(&name) {
                    return Ok(ResolvedRelationship::ByInstalled {
                        source: source.to_string(),
                        descriptor: entry.clone(),
                        reason,
                        installed: Release::dlc_stub(&name, version),
                    });
                }
            }
            _ => {}
        }

        // Gather new candidates: alternatives in declaration order, and
        // within each alternative identifier-exact matches before provides
        // matches, newer versions first.
        let mut candidates: Vec<&'a Release> = Vec::new();
        let mut seen: HashSet<(String, ModVersion)> = HashSet::new();
        for direct in entry.descriptor.flatten() {
            for candidate in
                self.querier
                    .candidates_for(direct, self.criteria, self.opts.stability_tolerance)
            {
                if seen.insert((candidate.identifier.clone(), candidate.version.clone())) {
                    candidates.push(candidate);
                }
            }
        }

        if candidates.is_empty() {
            let node = ResolvedRelationship::ByNew {
                source: source.to_string(),
                descriptor: entry.clone(),
                reason,
                providers: Vec::new(),
            };
            cache.set_failed(key, node.clone());
            return Err(ResolveFailure::Unsatisfied(node));
        }

        cache.enter(&key);
        let branching = candidates.len() > 1;
        let mut failed_providers: Vec<(Release, Vec<ResolvedRelationship>)> = Vec::new();
        let mut conflict_failure: Option<ConflictPair> = None;

        for candidate in candidates {
            let exact_name = entry
                .descriptor
                .flatten()
                .iter()
                .any(|direct| direct.name == candidate.identifier);
            let child_reason = if exact_name {
                reason.clone()
            } else {
                SelectionReason::ProvidedBy(source.to_string())
            };

            let snapshot = self.snapshot();
            let result = if branching {
                // Clone the cache per branch so one candidate's failures
                // don't poison its alternatives.
                let mut branch = cache.clone();
                let result = self.add_module(
                    candidate,
                    child_reason,
                    entry.suppress_recommendations,
                    flags,
                    &mut branch,
                );
                if result.is_ok() {
                    *cache = branch;
                }
                result
            } else {
                self.add_module(
                    candidate,
                    child_reason,
                    entry.suppress_recommendations,
                    flags,
                    cache,
                )
            };

            match result {
                Ok(children) => {
                    cache.leave(&key);
                    cache.set_satisfied(key);
                    return Ok(ResolvedRelationship::ByNew {
                        source: source.to_string(),
                        descriptor: entry.clone(),
                        reason,
                        providers: vec![(candidate.clone(), children)],
                    });
                }
                Err(ResolveFailure::Unsatisfied(node)) => {
                    debug!("candidate {} for {} failed, backtracking", candidate, entry);
                    self.restore(snapshot);
                    failed_providers.push((candidate.clone(), vec![node]));
                }
                Err(ResolveFailure::Conflicted(pair)) => {
                    debug!("candidate {} for {} conflicts, backtracking", candidate, entry);
                    self.restore(snapshot);
                    conflict_failure.get_or_insert(pair);
                }
            }
        }

        cache.leave(&key);

        // Every candidate failed. If any failed on a conflict, surface the
        // conflict: it is the actionable explanation.
        if let Some(pair) = conflict_failure {
            return Err(ResolveFailure::Conflicted(pair));
        }

        let node = ResolvedRelationship::ByNew {
            source: source.to_string(),
            descriptor: entry.clone(),
            reason,
            providers: failed_providers,
        };
        cache.set_failed(key, node.clone());
        Err(ResolveFailure::Unsatisfied(node))
    }

    /// Expand recommends/suggests of a chosen module, or collect them for
    /// the UI when `get_recommenders` is set
    fn expand_optional(
        &mut self,
        module: &Release,
        flags: ExpandFlags,
        cache: &mut RelationshipCache,
        children: &mut Vec<ResolvedRelationship>,
    ) {
        // Recommendations of recommendations are never followed;
        // suggestions below the top level need with_all_suggests.
        let child_flags = ExpandFlags {
            recommends: false,
            suggests: self.opts.with_all_suggests,
        };

        if flags.recommends {
            for entry in &module.recommends {
                if self.opts.get_recommenders {
                    self.collect_optional(module, entry, true);
                } else {
                    let reason = SelectionReason::Recommendation(module.identifier.clone());
                    let snapshot = self.snapshot();
                    match self.resolve_entry(&module.identifier, entry, reason, child_flags, cache)
                    {
                        Ok(resolved) => children.push(resolved),
                        // Optional relations fail softly.
                        Err(_) => self.restore(snapshot),
                    }
                }
            }
        }

        if flags.suggests {
            for entry in &module.suggests {
                if self.opts.get_recommenders {
                    self.collect_optional(module, entry, false);
                } else {
                    let reason = SelectionReason::Suggestion(module.identifier.clone());
                    let snapshot = self.snapshot();
                    match self.resolve_entry(&module.identifier, entry, reason, child_flags, cache)
                    {
                        Ok(resolved) => children.push(resolved),
                        Err(_) => self.restore(snapshot),
                    }
                }
            }
        }
    }

    fn collect_optional(&mut self, source: &Release, entry: &RelationshipEntry, recommended: bool) {
        // Skip anything already present or already planned.
        if self.installed_matches(entry).is_some() || self.installing_matches(entry).is_some() {
            return;
        }
        let candidate = entry.descriptor.flatten().into_iter().find_map(|direct| {
            self.querier
                .candidates_for(direct, self.criteria, self.opts.stability_tolerance)
                .into_iter()
                .next()
        });
        let Some(candidate) = candidate else {
            return;
        };

        if recommended {
            let slot = self
                .recommendations
                .entry(candidate.identifier.clone())
                .or_insert_with(|| Recommendation {
                    module: candidate.clone(),
                    default_checked: true,
                    sources: Vec::new(),
                });
            slot.sources.push(source.identifier.clone());
        } else {
            let slot = self
                .suggestions
                .entry(candidate.identifier.clone())
                .or_insert_with(|| Suggestion {
                    module: candidate.clone(),
                    sources: Vec::new(),
                });
            slot.sources.push(source.identifier.clone());
        }
    }
}

impl fmt::Debug for RelationshipResolver<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationshipResolver")
            .field("installing", &self.install_order)
            .field("conflicts", &self.conflicts.len())
            .field("unsatisfied", &self.unsatisfied.len())
            .finish()
    }
}
