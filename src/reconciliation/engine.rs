use crate::core::currency::CurrencyCode;
use crate::ledger::known::KnownTransfers;
use crate::messaging::camt053::{self, CreditDebit, EntryAmountError, Statement, StatementEntry, StatementError};
use crate::reconciliation::matching::matching_issues;
use crate::reconciliation::report::{Issue, IssueKind, ReconciliationReport};
use log::{debug, info, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Drift the engine accepts by default: one cent.
pub const DEFAULT_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Reconciliation failures.
#[derive(Debug, Clone, Error)]
pub enum ReconciliationError {
    /// The statement does not balance. Never corrected automatically.
    #[error("drift {drift} exceeds tolerance {tolerance}")]
    DriftExceeded {
        drift: Decimal,
        tolerance: Decimal,
        report: Box<ReconciliationReport>,
    },

    #[error(transparent)]
    Statement(#[from] StatementError),
}

impl ReconciliationError {
    /// The full report behind a drift failure.
    pub fn report(&self) -> Option<&ReconciliationReport> {
        match self {
            ReconciliationError::DriftExceeded { report, .. } => Some(report),
            ReconciliationError::Statement(_) => None,
        }
    }
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileOptions {
    /// Largest absolute drift that still counts as balanced.
    pub tolerance: Decimal,
    /// When set, entries in any other currency are reported and left out
    /// of the drift.
    pub expected_currency: Option<CurrencyCode>,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            expected_currency: None,
        }
    }
}

/// Single-pass, read-only reconciliation of camt.053 statements.
///
/// Drift is the sum of the signed amounts of every valid entry, credits
/// positive. Entries with a missing or unparseable amount are reported and
/// skipped. Entries whose direction is neither credit nor debit are counted
/// as informational and skipped without an issue. The pass fails only when
/// the absolute drift exceeds the tolerance.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationEngine {
    options: ReconcileOptions,
}

impl ReconciliationEngine {
    pub fn new(options: ReconcileOptions) -> Self {
        Self { options }
    }

    pub fn with_tolerance(tolerance: Decimal) -> Self {
        Self::new(ReconcileOptions {
            tolerance,
            ..ReconcileOptions::default()
        })
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Compute drift over a statement document.
    pub fn reconcile(&self, document: &str) -> Result<ReconciliationReport, ReconciliationError> {
        let statements = camt053::parse_statements(document)?;
        self.reconcile_statements(&statements, None)
    }

    /// Compute drift and match every valid entry against `known`.
    pub fn reconcile_with(
        &self,
        document: &str,
        known: &KnownTransfers,
    ) -> Result<ReconciliationReport, ReconciliationError> {
        let statements = camt053::parse_statements(document)?;
        self.reconcile_statements(&statements, Some(known))
    }

    /// Reconcile statements that are already parsed.
    pub fn reconcile_statements(
        &self,
        statements: &[Statement],
        known: Option<&KnownTransfers>,
    ) -> Result<ReconciliationReport, ReconciliationError> {
        let mut report = ReconciliationReport::new();
        let mut position = 0;
        for statement in statements {
            report.count_statement();
            for entry in &statement.entries {
                self.process_entry(position, entry, known, &mut report);
                position += 1;
            }
        }

        let tolerance = self.options.tolerance.abs();
        let drift = report.drift();
        if drift.abs() > tolerance {
            warn!(
                "reconciliation failed: drift {} over {} entries exceeds {}",
                drift,
                report.total_entries(),
                tolerance
            );
            return Err(ReconciliationError::DriftExceeded {
                drift,
                tolerance,
                report: Box::new(report),
            });
        }

        info!(
            "reconciled {} entries: drift {}, {} issues",
            report.total_entries(),
            drift,
            report.issues().len()
        );
        Ok(report)
    }

    fn process_entry(
        &self,
        position: usize,
        entry: &StatementEntry,
        known: Option<&KnownTransfers>,
        report: &mut ReconciliationReport,
    ) {
        report.count_entry();

        let amount = match entry.amount() {
            Ok(amount) => amount,
            Err(EntryAmountError::Missing) => {
                report.push_issue(Issue::new(position, IssueKind::MissingAmount));
                return;
            }
            Err(EntryAmountError::Invalid(raw)) => {
                report.push_issue(Issue::new(position, IssueKind::InvalidAmount { raw }));
                return;
            }
        };

        let Some(direction) = entry.direction() else {
            debug!(
                "entry {} has direction {:?}, treated as informational",
                position, entry.direction_code
            );
            report.count_informational();
            return;
        };

        if let Some(expected) = &self.options.expected_currency {
            let found = entry
                .currency
                .as_deref()
                .map(|c| c.trim().to_ascii_uppercase());
            if found.as_deref() != Some(expected.as_str()) {
                report.push_issue(Issue::new(
                    position,
                    IssueKind::CurrencyMismatch {
                        expected: expected.clone(),
                        found,
                    },
                ));
                return;
            }
        }

        let applied = match direction {
            CreditDebit::Credit => report.add_credit(amount),
            CreditDebit::Debit => report.add_debit(amount),
        };
        if !applied {
            warn!("entry {} amount {} overflows the running totals", position, amount);
            report.push_issue(Issue::new(position, IssueKind::AmountOverflow { amount }));
            return;
        }

        if let Some(known) = known {
            let (matched, issues) = matching_issues(entry, known);
            if matched {
                report.count_matched();
            }
            for kind in issues {
                report.push_issue(Issue::new(position, kind));
            }
        }
    }
}

/// Reconcile a document with default options and the given tolerance.
pub fn reconcile(document: &str, tolerance: Decimal) -> Result<ReconciliationReport, ReconciliationError> {
    ReconciliationEngine::with_tolerance(tolerance).reconcile(document)
}
