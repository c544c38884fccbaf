use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::committees::model::{CrmId, Membership, MembershipAttribute};

/// A membership whose person and committee are unchanged but whose role or
/// dates differ.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangedMembership {
    pub current: Membership,
    pub imported: Membership,
}

/// Result of comparing the imported memberships with the current ones. The
/// three categories are disjoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MembershipDiff {
    pub new: Vec<Membership>,
    pub changed: Vec<ChangedMembership>,
    pub obsolete: Vec<Membership>,
}

impl MembershipDiff {
    pub fn is_empty(&self) -> bool {
        self.total_changes() == 0
    }

    pub fn total_changes(&self) -> usize {
        self.new.len() + self.changed.len() + self.obsolete.len()
    }

    /// Relationships to deactivate: obsolete ones and the old side of changed
    /// ones, each at most once.
    pub fn relationships_to_deactivate(&self) -> Vec<CrmId> {
        let mut seen = HashSet::new();
        self.obsolete
            .iter()
            .chain(self.changed.iter().map(|change| &change.current))
            .filter_map(|membership| membership.relationship_id)
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// Memberships to create: new ones and the new side of changed ones.
    pub fn memberships_to_create(&self) -> impl Iterator<Item = &Membership> {
        self.new
            .iter()
            .chain(self.changed.iter().map(|change| &change.imported))
    }
}

type Key = (String, String);

fn key_of(membership: &Membership) -> Key {
    (membership.person_id.clone(), membership.committee_id.clone())
}

/// Partitions memberships into new, changed and obsolete.
///
/// Each current membership matches at most one imported membership; identical
/// imported rows count once. A current membership backed by a relationship
/// that also backs a matched membership is never reported as obsolete.
pub fn diff_memberships(
    current: &[Membership],
    imported: &[Membership],
    ignored: &[MembershipAttribute],
) -> MembershipDiff {
    let mut current_by_key: HashMap<Key, Vec<usize>> = HashMap::new();
    for (index, membership) in current.iter().enumerate() {
        current_by_key.entry(key_of(membership)).or_default().push(index);
    }

    let mut consumed = vec![false; current.len()];
    let mut retained: HashSet<CrmId> = HashSet::new();
    let mut accepted: HashMap<Key, Vec<&Membership>> = HashMap::new();
    let mut unmatched_imported: Vec<&Membership> = Vec::new();

    for membership in imported {
        let key = key_of(membership);
        let seen = accepted.entry(key.clone()).or_default();
        if seen.iter().any(|other| other.matches(membership, ignored)) {
            continue;
        }
        seen.push(membership);

        let candidate = current_by_key.get(&key).and_then(|indices| {
            indices
                .iter()
                .copied()
                .find(|index| !consumed[*index] && current[*index].matches(membership, ignored))
        });
        match candidate {
            Some(index) => {
                consumed[index] = true;
                retained.extend(current[index].relationship_id);
            }
            None => unmatched_imported.push(membership),
        }
    }

    let mut pending: Vec<Option<&Membership>> = current
        .iter()
        .enumerate()
        .map(|(index, membership)| {
            let shared = membership
                .relationship_id
                .is_some_and(|id| retained.contains(&id));
            (!consumed[index] && !shared).then_some(membership)
        })
        .collect();

    let mut diff = MembershipDiff::default();
    for membership in unmatched_imported {
        let replaced = current_by_key.get(&key_of(membership)).and_then(|indices| {
            indices
                .iter()
                .copied()
                .find(|index| pending[*index].is_some())
        });
        match replaced.and_then(|index| pending[index].take()) {
            Some(previous) => diff.changed.push(ChangedMembership {
                current: previous.clone(),
                imported: membership.clone(),
            }),
            None => diff.new.push(membership.clone()),
        }
    }
    diff.obsolete = pending.into_iter().flatten().cloned().collect();
    diff
}
