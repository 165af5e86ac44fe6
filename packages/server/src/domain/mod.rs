//! Domain layer: value objects, envelopes, history store contract.

pub mod envelope;
pub mod error;
pub mod history;
pub mod membership;
pub mod value_object;

pub use envelope::{Envelope, EnvelopeKind};
pub use error::{DispatchError, EnvelopeError, HistoryError, HubError, ValueObjectError};
pub use history::HistoryStore;
pub use membership::Membership;
pub use value_object::{ConnectionId, GroupId};
