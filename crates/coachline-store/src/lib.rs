//! # coachline-store
//!
//! SQLite persistence for accounts, profiles, tasks, relationships, habits
//! and the audit trail.

pub mod audit;
pub mod store;

pub use audit::{AuditEntry, AuditLogger, AuditStatus};
pub use store::{NewEntity, Store};
