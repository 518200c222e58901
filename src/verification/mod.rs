//! Verification primitives for client updates.
//!
//! - [`shape`] - layer set and sizes must match the global model
//! - [`norm_bound`] - reject updates with an excessive delta norm
//! - [`audit`] - append-only log of round summaries

pub mod audit;
pub mod norm_bound;
pub mod shape;

pub use audit::{AuditEntry, AuditLog, RoundOutcomeKind};
pub use norm_bound::{check_norm_bound, filter_by_norm_bound};
pub use shape::check_shape;
