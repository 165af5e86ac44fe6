//! Infrastructure layer: wire DTOs and history store implementations.

pub mod dto;
pub mod history;
