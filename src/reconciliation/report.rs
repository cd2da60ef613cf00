use crate::core::currency::CurrencyCode;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

/// Why an entry could not be fully trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IssueKind {
    MissingAmount,
    InvalidAmount { raw: String },
    CurrencyMismatch {
        expected: CurrencyCode,
        found: Option<String>,
    },
    UnmatchedReference { reference: String },
    MissingReference,
    InvalidCounterpartyAccount { account: String },
    /// Adding the amount would overflow the running totals.
    AmountOverflow { amount: Decimal },
}

impl IssueKind {
    /// Whether the entry was left out of the drift total.
    pub fn excludes_from_drift(&self) -> bool {
        matches!(
            self,
            IssueKind::MissingAmount
                | IssueKind::InvalidAmount { .. }
                | IssueKind::CurrencyMismatch { .. }
                | IssueKind::AmountOverflow { .. }
        )
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueKind::MissingAmount => write!(f, "missing amount"),
            IssueKind::InvalidAmount { raw } => write!(f, "invalid amount {raw:?}"),
            IssueKind::CurrencyMismatch { expected, found } => match found {
                Some(found) => write!(f, "currency {found} does not match {expected}"),
                None => write!(f, "no currency, expected {expected}"),
            },
            IssueKind::UnmatchedReference { reference } => {
                write!(f, "reference {reference} matches no known transfer")
            }
            IssueKind::MissingReference => write!(f, "no reference to match"),
            IssueKind::InvalidCounterpartyAccount { account } => {
                write!(f, "counterparty account {account} fails check digit validation")
            }
            IssueKind::AmountOverflow { amount } => write!(f, "amount {amount} overflows the running totals"),
        }
    }
}

/// A non-fatal problem with one statement entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    /// Position of the entry across the whole document, from zero.
    pub entry: usize,
    pub kind: IssueKind,
}

impl Issue {
    pub fn new(entry: usize, kind: IssueKind) -> Self {
        Self { entry, kind }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entry {}: {}", self.entry, self.kind)
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    statements: usize,
    total_entries: usize,
    issues: Vec<Issue>,
    /// Sum of signed amounts of every valid entry.
    drift: Decimal,
    credits: Decimal,
    debits: Decimal,
    matched: usize,
    /// Entries with a direction other than credit or debit.
    informational: usize,
}

impl ReconciliationReport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn count_statement(&mut self) {
        self.statements += 1;
    }

    pub(crate) fn count_entry(&mut self) {
        self.total_entries += 1;
    }

    pub(crate) fn count_informational(&mut self) {
        self.informational += 1;
    }

    pub(crate) fn count_matched(&mut self) {
        self.matched += 1;
    }

    pub(crate) fn push_issue(&mut self, issue: Issue) {
        self.issues.push(issue);
    }

    /// Returns false, leaving every total untouched, when a sum would overflow.
    pub(crate) fn add_credit(&mut self, amount: Decimal) -> bool {
        match (self.credits.checked_add(amount), self.drift.checked_add(amount)) {
            (Some(credits), Some(drift)) => {
                self.credits = credits;
                self.drift = drift;
                true
            }
            _ => false,
        }
    }

    /// Returns false, leaving every total untouched, when a sum would overflow.
    pub(crate) fn add_debit(&mut self, amount: Decimal) -> bool {
        match (self.debits.checked_add(amount), self.drift.checked_sub(amount)) {
            (Some(debits), Some(drift)) => {
                self.debits = debits;
                self.drift = drift;
                true
            }
            _ => false,
        }
    }

    pub fn statements(&self) -> usize {
        self.statements
    }

    /// Every entry seen, including those with issues.
    pub fn total_entries(&self) -> usize {
        self.total_entries
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn issue_descriptions(&self) -> Vec<String> {
        self.issues.iter().map(Issue::to_string).collect()
    }

    /// Credits minus debits over the valid entries.
    pub fn drift(&self) -> Decimal {
        self.drift
    }

    pub fn credits(&self) -> Decimal {
        self.credits
    }

    pub fn debits(&self) -> Decimal {
        self.debits
    }

    pub fn matched(&self) -> usize {
        self.matched
    }

    pub fn informational(&self) -> usize {
        self.informational
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}
