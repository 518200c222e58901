//! Round audit log for post-hoc analysis.
//!
//! Records the summary of every round, successful or not, so operators and
//! reputation/governance collaborators can replay what was admitted,
//! quarantined and rejected.

use serde::{Deserialize, Serialize};

use crate::round::RoundSummary;

/// How a round ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundOutcomeKind {
    /// A new generation was produced
    Aggregated,
    /// Nothing survived screening; model unchanged
    NoViableUpdates,
}

/// One audited round.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Model generation the round targeted
    pub generation: u64,
    /// How the round ended
    pub outcome: RoundOutcomeKind,
    /// Full round summary
    pub summary: RoundSummary,
}

/// Append-only audit log of rounds.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuditLog {
    entries: Vec<AuditEntry>,
}

impl AuditLog {
    /// Create a new, empty audit log.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append an entry to the log.
    pub fn push(&mut self, entry: AuditEntry) {
        self.entries.push(entry);
    }

    /// Get all entries.
    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    /// Most recent entry.
    pub fn last(&self) -> Option<&AuditEntry> {
        self.entries.last()
    }

    /// Number of recorded rounds.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize the audit log to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
