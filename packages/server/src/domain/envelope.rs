//! Message envelope routed between connections.

use super::value_object::GroupId;

/// Kind of an inbound envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// Join handshake: registers the sender under its own id
    Join,
    /// Chat content to be fanned out to a group
    Content,
}

/// Structured message unit exchanged over the transport.
///
/// `payload` is the original frame text; members receive it byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    pub sender_id: String,
    /// Peer to pull into `group_id` on first contact
    pub receiver_id: Option<GroupId>,
    /// Target group. For [`EnvelopeKind::Join`] this is the sender's own group.
    pub group_id: GroupId,
    pub timestamp: Option<String>,
    pub payload: String,
}

impl Envelope {
    pub fn is_content(&self) -> bool {
        self.kind == EnvelopeKind::Content
    }

    /// Copy of this envelope carrying a different payload
    pub fn with_payload(&self, payload: String) -> Self {
        Self {
            payload,
            ..self.clone()
        }
    }
}
