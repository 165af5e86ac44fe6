//! Group membership bookkeeping.
//!
//! Pure data structure without locking or I/O; the [`Hub`](super::Hub) wraps it
//! in a single reader/writer lock. Both directions of the membership relation
//! (group -> members, connection -> groups) are updated together here, so a
//! connection is listed in a group exactly when the group is in its own set.

use std::collections::{BTreeSet, HashMap, HashSet};

use tokio::sync::mpsc;

use crate::domain::{ConnectionId, Envelope, GroupId, HubError, Membership};

/// Outbound side of one connection's queue
pub type Outbound = mpsc::Sender<Envelope>;

/// One attached connection
struct Peer {
    /// `None` once the queue has been closed
    outbound: Option<Outbound>,
    groups: BTreeSet<GroupId>,
    attached_at: i64,
}

/// Result of removing a connection from one or all of its groups
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Departure {
    /// Whether the connection was a member of the group(s) it was removed from
    pub was_member: bool,
    /// Whether this removal closed the outbound queue. True for at most one
    /// removal per connection.
    pub closed_queue: bool,
    /// Groups that became empty and were dropped
    pub pruned: Vec<GroupId>,
}

/// Member of a group summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSummary {
    pub connection_id: ConnectionId,
    pub attached_at: i64,
}

/// One group and its current members
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSummary {
    pub id: GroupId,
    pub members: Vec<MemberSummary>,
}

#[derive(Default)]
pub(crate) struct Registry {
    groups: HashMap<GroupId, HashSet<ConnectionId>>,
    peers: HashMap<ConnectionId, Peer>,
}

impl Registry {
    pub(crate) fn attach(&mut self, id: ConnectionId, outbound: Outbound, attached_at: i64) {
        self.peers.insert(
            id,
            Peer {
                outbound: Some(outbound),
                groups: BTreeSet::new(),
                attached_at,
            },
        );
    }

    pub(crate) fn join(
        &mut self,
        id: ConnectionId,
        group: GroupId,
    ) -> Result<Membership, HubError> {
        let peer = self
            .peers
            .get_mut(&id)
            .filter(|peer| peer.outbound.is_some())
            .ok_or(HubError::Detached(id))?;

        peer.groups.insert(group.clone());
        let membership = Membership::from_set(peer.groups.clone());
        self.groups.entry(group).or_default().insert(id);
        Ok(membership)
    }

    /// Remove `id` from `group` and close its queue if it was a member.
    pub(crate) fn leave(&mut self, id: ConnectionId, group: &GroupId) -> Departure {
        let mut pruned = Vec::new();
        if !self.detach_from_group(id, group, &mut pruned) {
            return Departure::default();
        }

        let Some(peer) = self.peers.get_mut(&id) else {
            return Departure {
                was_member: true,
                pruned,
                ..Departure::default()
            };
        };
        let closed_queue = peer.outbound.take().is_some();
        peer.groups.remove(group);

        // A closed peer with nothing left to unwind is gone for good
        if peer.groups.is_empty() {
            self.peers.remove(&id);
        }

        Departure {
            was_member: true,
            closed_queue,
            pruned,
        }
    }

    pub(crate) fn remove_everywhere(&mut self, id: ConnectionId) -> Departure {
        let Some(peer) = self.peers.remove(&id) else {
            return Departure::default();
        };

        let mut pruned = Vec::new();
        for group in &peer.groups {
            self.detach_from_group(id, group, &mut pruned);
        }

        Departure {
            was_member: !peer.groups.is_empty(),
            closed_queue: peer.outbound.is_some(),
            pruned,
        }
    }

    /// Add every live member of `from` that is not yet in `into` to `into`.
    pub(crate) fn pull_members(&mut self, from: &GroupId, into: &GroupId) -> Vec<ConnectionId> {
        let Some(candidates) = self.groups.get(from) else {
            return Vec::new();
        };
        let already_in = self.groups.get(into);

        let mut pulled: Vec<ConnectionId> = candidates
            .iter()
            .filter(|id| already_in.is_none_or(|members| !members.contains(*id)))
            .filter(|id| self.is_attached(**id))
            .copied()
            .collect();
        pulled.sort();

        for id in &pulled {
            if let Some(peer) = self.peers.get_mut(id) {
                peer.groups.insert(into.clone());
            }
            self.groups.entry(into.clone()).or_default().insert(*id);
        }

        pulled
    }

    pub(crate) fn is_member(&self, id: ConnectionId, group: &GroupId) -> bool {
        self.groups
            .get(group)
            .is_some_and(|members| members.contains(&id))
    }

    pub(crate) fn membership(&self, id: ConnectionId) -> Membership {
        self.peers
            .get(&id)
            .map(|peer| Membership::from_set(peer.groups.clone()))
            .unwrap_or_default()
    }

    /// Whether `id` is known and its queue is still open
    pub(crate) fn is_attached(&self, id: ConnectionId) -> bool {
        self.peers
            .get(&id)
            .is_some_and(|peer| peer.outbound.is_some())
    }

    pub(crate) fn outbound(&self, id: ConnectionId) -> Option<Outbound> {
        self.peers.get(&id).and_then(|peer| peer.outbound.clone())
    }

    /// Members of `group` with their queues, `None` for already closed queues.
    pub(crate) fn recipients(&self, group: &GroupId) -> Vec<(ConnectionId, Option<Outbound>)> {
        let Some(members) = self.groups.get(group) else {
            return Vec::new();
        };

        let mut recipients: Vec<(ConnectionId, Option<Outbound>)> = members
            .iter()
            .map(|id| (*id, self.outbound(*id)))
            .collect();
        recipients.sort_by_key(|(id, _)| *id);
        recipients
    }

    pub(crate) fn summaries(&self) -> Vec<GroupSummary> {
        let mut summaries: Vec<GroupSummary> = self
            .groups
            .iter()
            .map(|(group, members)| {
                let mut members: Vec<MemberSummary> = members
                    .iter()
                    .map(|id| MemberSummary {
                        connection_id: *id,
                        attached_at: self.peers.get(id).map_or(0, |peer| peer.attached_at),
                    })
                    .collect();
                members.sort_by_key(|member| (member.attached_at, member.connection_id));
                GroupSummary {
                    id: group.clone(),
                    members,
                }
            })
            .collect();

        // Sort by group id for consistent ordering
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    /// Drop `id` from the group side only, pruning the group once empty.
    fn detach_from_group(
        &mut self,
        id: ConnectionId,
        group: &GroupId,
        pruned: &mut Vec<GroupId>,
    ) -> bool {
        let Some(members) = self.groups.get_mut(group) else {
            return false;
        };
        let removed = members.remove(&id);
        if members.is_empty() {
            self.groups.remove(group);
            pruned.push(group.clone());
        }
        removed
    }
}
