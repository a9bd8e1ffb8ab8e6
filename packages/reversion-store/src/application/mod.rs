//! Application layer
//!
//! - `RevertEngine`: safe revert with optional cascade delete
//! - `Moderator`: approve/reject transitions and retention cleanup
//! - `defer`: denormalized moderation status on live objects
//! - `RevisionManager`: facade wiring the above over one backend

pub mod defer;
pub mod manager;
pub mod moderation;
pub mod revert;

pub use defer::defer;
pub use manager::{RevisionManager, RevisionManagerBuilder};
pub use moderation::{ApprovalOutcome, Moderator, RejectionOutcome};
pub use revert::{RevertEngine, RevertReport};
