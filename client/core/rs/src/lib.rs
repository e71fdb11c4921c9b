//! Shared types for the WindFlow deployment platform.
//!
//! Everything the core server and its clients agree on lives here:
//! the persisted entities, the capability-scan records, and the
//! WebSocket wire protocol.

pub mod entities;
pub mod ws;
