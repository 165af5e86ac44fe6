//! Read-only view of the groups a connection belongs to.

use std::collections::BTreeSet;

use super::value_object::GroupId;

/// Snapshot of a connection's groups.
///
/// The hub's registry is the source of truth; a `Membership` is only handed out
/// by hub operations and cannot be mutated by its holder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Membership(BTreeSet<GroupId>);

impl Membership {
    pub(crate) fn from_set(groups: BTreeSet<GroupId>) -> Self {
        Self(groups)
    }

    pub fn contains(&self, group: &GroupId) -> bool {
        self.0.contains(group)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GroupId> {
        self.0.iter()
    }
}
