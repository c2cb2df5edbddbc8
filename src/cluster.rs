//! Duplicate-group bookkeeping.
//!
//! Each namespace holds two kinds of state:
//! - a reverse pointer per record: record id -> (root id, root weight)
//! - a member set per group, stored under the group's root id
//!
//! Every mutation goes through [`merge_into`], which folds one record's match
//! set into the groups. Backends run it inside whatever makes it indivisible
//! for them (a process-wide lock, a database transaction), so concurrent
//! workers never observe a half-applied merge.
//!
//! The root of a group is always its highest-ranked member, where rank is
//! weight descending, then id ascending. Because that is a total order over
//! the members of a connected component, the final grouping does not depend
//! on the order in which match sets arrive.

use crate::error::SimError;
use crate::record::{Namespace, WeightedId};
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Mutex;

/// Where a record currently points: its group root and the root's weight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DupPointer {
    pub root: String,
    pub weight: u64,
}

impl DupPointer {
    pub fn new(root: &str, weight: u64) -> Self {
        DupPointer {
            root: root.to_string(),
            weight,
        }
    }
}

/// A group as read back from the store. Members are sorted and include the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub root: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Fewer than two distinct ids: nothing to group.
    Skipped,
    Merged {
        root: String,
        weight: u64,
        /// Records newly pointed at `root`, including absorbed members.
        added: usize,
        /// Roots of groups folded into `root` and deleted.
        absorbed: Vec<String>,
    },
}

/// Storage access used by the merge algorithm. Implementations are expected to
/// be scoped to one namespace and one atomic unit of work.
pub trait GroupState {
    fn pointer(&mut self, id: &str) -> Result<Option<DupPointer>, SimError>;
    fn members(&mut self, root: &str) -> Result<Vec<String>, SimError>;
    fn set_pointer(&mut self, id: &str, pointer: &DupPointer) -> Result<(), SimError>;
    fn add_members(&mut self, root: &str, ids: &[String]) -> Result<(), SimError>;
    fn delete_group(&mut self, root: &str) -> Result<(), SimError>;
}

/// The shared duplicate-group store.
pub trait GroupStoreLike: Send + Sync {
    /// Atomically folds `matches` into the namespace's groups.
    fn merge(&self, namespace: Namespace, matches: &[WeightedId]) -> Result<MergeOutcome, SimError>;
    fn pointer(&self, namespace: Namespace, id: &str) -> Result<Option<DupPointer>, SimError>;
    /// All groups, largest first.
    fn groups(&self, namespace: Namespace) -> Result<Vec<Group>, SimError>;
    /// Wipes every namespace.
    fn clear(&self) -> Result<(), SimError>;
}

/// Higher weight ranks first; equal weights fall back to the smaller id.
fn rank(a: (&str, u64), b: (&str, u64)) -> Ordering {
    b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0))
}

/// Distinct ids sorted by rank. A repeated id keeps its highest weight.
fn normalize(matches: &[WeightedId]) -> Vec<WeightedId> {
    let mut best: FxHashMap<&str, u64> = FxHashMap::default();
    for m in matches {
        let weight = best.entry(m.id.as_str()).or_insert(m.weight);
        *weight = (*weight).max(m.weight);
    }
    let mut input: Vec<WeightedId> = best
        .into_iter()
        .map(|(id, weight)| WeightedId::new(id, weight))
        .collect();
    input.sort_by(|a, b| rank((&a.id, a.weight), (&b.id, b.weight)));
    input
}

/// Orders groups largest first, ties by root id.
pub fn sort_groups(groups: &mut [Group]) {
    groups.sort_by(|a, b| {
        b.members
            .len()
            .cmp(&a.members.len())
            .then_with(|| a.root.cmp(&b.root))
    });
}

/// Folds one match set into the groups visible through `state`.
pub fn merge_into<S: GroupState + ?Sized>(
    state: &mut S,
    matches: &[WeightedId],
) -> Result<MergeOutcome, SimError> {
    let input = normalize(matches);
    if input.len() < 2 {
        return Ok(MergeOutcome::Skipped);
    }

    // Candidate roots: the root of every group already touched, plus every
    // ungrouped input id. The highest-ranked one wins.
    let mut current: Option<DupPointer> = None;
    for m in &input {
        let candidate = state
            .pointer(&m.id)?
            .unwrap_or_else(|| DupPointer::new(&m.id, m.weight));
        let better = match &current {
            None => true,
            Some(c) => rank((&candidate.root, candidate.weight), (&c.root, c.weight)).is_lt(),
        };
        if better {
            current = Some(candidate);
        }
    }
    let Some(current) = current else {
        return Ok(MergeOutcome::Skipped);
    };

    let mut added = 0;
    let mut absorbed = Vec::new();

    if state.pointer(&current.root)?.as_ref() != Some(&current) {
        state.set_pointer(&current.root, &current)?;
        state.add_members(&current.root, std::slice::from_ref(&current.root))?;
        added += 1;
    }

    for m in &input {
        if m.id == current.root {
            continue;
        }
        // Re-read every time: absorbing an earlier id's group may have re-pointed this one.
        match state.pointer(&m.id)? {
            Some(pointer) if pointer.root == current.root => {}
            Some(pointer) => {
                let mut members = state.members(&pointer.root)?;
                if !members.contains(&m.id) {
                    members.push(m.id.clone());
                }
                for member in &members {
                    state.set_pointer(member, &current)?;
                }
                state.add_members(&current.root, &members)?;
                state.delete_group(&pointer.root)?;
                added += members.len();
                absorbed.push(pointer.root);
            }
            None => {
                state.set_pointer(&m.id, &current)?;
                state.add_members(&current.root, std::slice::from_ref(&m.id))?;
                added += 1;
            }
        }
    }

    Ok(MergeOutcome::Merged {
        root: current.root,
        weight: current.weight,
        added,
        absorbed,
    })
}

/// One namespace's committed state.
#[derive(Debug, Default, Clone)]
pub struct NamespaceState {
    pointers: FxHashMap<String, DupPointer>,
    groups: FxHashMap<String, BTreeSet<String>>,
}

impl NamespaceState {
    pub fn transaction(&self) -> InMemoryTx<'_> {
        InMemoryTx {
            base: self,
            changes: TxChanges::default(),
        }
    }

    pub fn apply(&mut self, changes: TxChanges) {
        for (id, pointer) in changes.pointers {
            self.pointers.insert(id, pointer);
        }
        for (root, members) in changes.groups {
            match members {
                Some(members) => {
                    self.groups.insert(root, members);
                }
                None => {
                    self.groups.remove(&root);
                }
            }
        }
    }

    pub fn groups(&self) -> Vec<Group> {
        let mut groups: Vec<Group> = self
            .groups
            .iter()
            .map(|(root, members)| Group {
                root: root.clone(),
                members: members.iter().cloned().collect(),
            })
            .collect();
        sort_groups(&mut groups);
        groups
    }
}

/// Writes staged against a [`NamespaceState`]; a deleted group is `None`.
#[derive(Debug, Default)]
pub struct TxChanges {
    pointers: FxHashMap<String, DupPointer>,
    groups: FxHashMap<String, Option<BTreeSet<String>>>,
}

/// Copy-on-write view over a namespace. Nothing reaches the base state until
/// the caller applies the result of [`InMemoryTx::commit`].
pub struct InMemoryTx<'a> {
    base: &'a NamespaceState,
    changes: TxChanges,
}

impl InMemoryTx<'_> {
    pub fn commit(self) -> TxChanges {
        self.changes
    }

    fn group_mut(&mut self, root: &str) -> &mut BTreeSet<String> {
        let base = self.base;
        self.changes
            .groups
            .entry(root.to_string())
            .or_insert_with(|| base.groups.get(root).cloned())
            .get_or_insert_with(BTreeSet::new)
    }
}

impl GroupState for InMemoryTx<'_> {
    fn pointer(&mut self, id: &str) -> Result<Option<DupPointer>, SimError> {
        Ok(self
            .changes
            .pointers
            .get(id)
            .or_else(|| self.base.pointers.get(id))
            .cloned())
    }

    fn members(&mut self, root: &str) -> Result<Vec<String>, SimError> {
        let members = match self.changes.groups.get(root) {
            Some(staged) => staged.as_ref(),
            None => self.base.groups.get(root),
        };
        Ok(members.map(|m| m.iter().cloned().collect()).unwrap_or_default())
    }

    fn set_pointer(&mut self, id: &str, pointer: &DupPointer) -> Result<(), SimError> {
        self.changes.pointers.insert(id.to_string(), pointer.clone());
        Ok(())
    }

    fn add_members(&mut self, root: &str, ids: &[String]) -> Result<(), SimError> {
        self.group_mut(root).extend(ids.iter().cloned());
        Ok(())
    }

    fn delete_group(&mut self, root: &str) -> Result<(), SimError> {
        self.changes.groups.insert(root.to_string(), None);
        Ok(())
    }
}

/// Single-writer group store: one lock serializes every merge across all
/// namespaces, and a merge is published only when it completes.
#[derive(Default)]
pub struct InMemoryGroupStore {
    namespaces: Mutex<FxHashMap<Namespace, NamespaceState>>,
}

impl InMemoryGroupStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, FxHashMap<Namespace, NamespaceState>>, SimError> {
        self.namespaces
            .lock()
            .map_err(|_| SimError::Store("group store lock poisoned".to_string()))
    }
}

impl GroupStoreLike for InMemoryGroupStore {
    fn merge(&self, namespace: Namespace, matches: &[WeightedId]) -> Result<MergeOutcome, SimError> {
        let mut namespaces = self.lock()?;
        let state = namespaces.entry(namespace).or_default();
        let mut tx = state.transaction();
        let outcome = merge_into(&mut tx, matches)?;
        let changes = tx.commit();
        state.apply(changes);
        Ok(outcome)
    }

    fn pointer(&self, namespace: Namespace, id: &str) -> Result<Option<DupPointer>, SimError> {
        let namespaces = self.lock()?;
        Ok(namespaces
            .get(&namespace)
            .and_then(|state| state.pointers.get(id))
            .cloned())
    }

    fn groups(&self, namespace: Namespace) -> Result<Vec<Group>, SimError> {
        let namespaces = self.lock()?;
        Ok(namespaces
            .get(&namespace)
            .map(NamespaceState::groups)
            .unwrap_or_default())
    }

    fn clear(&self) -> Result<(), SimError> {
        self.lock()?.clear();
        Ok(())
    }
}
