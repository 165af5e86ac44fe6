//! Shared utilities for the Huddle relay: logging bootstrap and time helpers.

pub mod logger;
pub mod time;
