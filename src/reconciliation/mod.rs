//! Statement reconciliation.
//!
//! Reads camt.053 statements, totals the signed entry amounts with exact
//! decimal arithmetic and, optionally, matches each entry's reference
//! against the transfers the ledger gateway has seen accepted. Never writes
//! to the ledger.

pub mod engine;
pub mod matching;
pub mod report;

pub use engine::{reconcile, ReconcileOptions, ReconciliationEngine, ReconciliationError, DEFAULT_TOLERANCE};
pub use matching::{match_entry, MatchOutcome};
pub use report::{Issue, IssueKind, ReconciliationReport};
