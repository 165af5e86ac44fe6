//! WebSocket envelope DTO and decoding.
//!
//! Inbound frames are JSON objects:
//!
//! ```text
//! {"type":"INIT","senderId":"alice"}
//! {"type":"MESSAGE","senderId":"alice","receiverId":"bob","groupId":"room1",
//!  "timestamp":"1700000000","message":"hi"}
//! ```
//!
//! The legacy keys `uid`, `oid` and `groupid` are accepted as well.

use serde::Deserialize;

use crate::domain::{Envelope, EnvelopeError, EnvelopeKind, GroupId};

/// Wire type tag of a join handshake
pub const TYPE_INIT: &str = "INIT";
/// Wire type tag of a chat message
pub const TYPE_MESSAGE: &str = "MESSAGE";

/// Raw envelope as it appears on the wire; every field is optional here and
/// validated in [`decode_envelope`].
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEnvelope {
    pub r#type: Option<String>,
    #[serde(alias = "uid")]
    pub sender_id: Option<String>,
    #[serde(alias = "oid")]
    pub receiver_id: Option<String>,
    #[serde(alias = "groupid")]
    pub group_id: Option<String>,
    pub timestamp: Option<String>,
    pub message: Option<serde_json::Value>,
}

/// Decode one text frame into an [`Envelope`] whose payload is the frame itself.
pub fn decode_envelope(frame: &str) -> Result<Envelope, EnvelopeError> {
    let wire: WireEnvelope = serde_json::from_str(frame)?;

    let kind = match wire.r#type.as_deref() {
        Some(TYPE_INIT) => EnvelopeKind::Join,
        Some(TYPE_MESSAGE) => EnvelopeKind::Content,
        Some(other) => return Err(EnvelopeError::UnknownType(other.to_string())),
        None => return Err(EnvelopeError::MissingField("type")),
    };

    let sender_id = wire
        .sender_id
        .filter(|id| !id.is_empty())
        .ok_or(EnvelopeError::MissingField("senderId"))?;

    match kind {
        EnvelopeKind::Join => Ok(Envelope {
            kind,
            group_id: GroupId::new(sender_id.clone())?,
            sender_id,
            receiver_id: None,
            timestamp: wire.timestamp,
            payload: frame.to_string(),
        }),
        EnvelopeKind::Content => {
            let group_id = GroupId::new(
                wire.group_id
                    .ok_or(EnvelopeError::MissingField("groupId"))?,
            )?;
            if wire.message.is_none() {
                return Err(EnvelopeError::MissingField("message"));
            }
            let receiver_id = wire
                .receiver_id
                .filter(|id| !id.is_empty())
                .map(GroupId::new)
                .transpose()?;

            Ok(Envelope {
                kind,
                sender_id,
                receiver_id,
                group_id,
                timestamp: wire.timestamp,
                payload: frame.to_string(),
            })
        }
    }
}
