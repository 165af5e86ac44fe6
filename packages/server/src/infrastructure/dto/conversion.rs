//! Conversion logic between DTOs and domain types.

use huddle_shared::time::millis_to_rfc3339;

use crate::{
    hub::{GroupSummary, MemberSummary},
    infrastructure::dto::http::{GroupSummaryDto, MemberDto},
};

impl From<MemberSummary> for MemberDto {
    fn from(member: MemberSummary) -> Self {
        Self {
            connection_id: member.connection_id.to_string(),
            attached_at: millis_to_rfc3339(member.attached_at),
        }
    }
}

impl From<GroupSummary> for GroupSummaryDto {
    fn from(summary: GroupSummary) -> Self {
        Self {
            id: summary.id.into_string(),
            members: summary.members.into_iter().map(MemberDto::from).collect(),
        }
    }
}
