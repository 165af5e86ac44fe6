//! HTTP API response DTOs.

use serde::Serialize;

/// One member of a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberDto {
    pub connection_id: String,
    /// RFC 3339
    pub attached_at: String,
}

/// Group with its current members, returned by `GET /api/groups`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupSummaryDto {
    pub id: String,
    pub members: Vec<MemberDto>,
}
