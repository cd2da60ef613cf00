//! Matching of statement entries against transfers the ledger accepted.

use crate::core::iban;
use crate::ledger::known::KnownTransfers;
use crate::messaging::camt053::StatementEntry;
use crate::reconciliation::report::IssueKind;

/// Result of resolving one entry's reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched,
    Unmatched(String),
    NoReference,
}

pub fn match_entry(entry: &StatementEntry, known: &KnownTransfers) -> MatchOutcome {
    match entry.reference() {
        None => MatchOutcome::NoReference,
        Some(reference) if known.contains_reference(reference) => MatchOutcome::Matched,
        Some(reference) => MatchOutcome::Unmatched(reference.to_string()),
    }
}

/// Issues found while matching one entry, in a stable order.
pub(crate) fn matching_issues(entry: &StatementEntry, known: &KnownTransfers) -> (bool, Vec<IssueKind>) {
    let mut issues = Vec::new();
    if let Some(account) = entry.counterparty_account() {
        if !iban::validate_str(account) {
            issues.push(IssueKind::InvalidCounterpartyAccount {
                account: account.trim().to_string(),
            });
        }
    }
    let matched = match match_entry(entry, known) {
        MatchOutcome::Matched => true,
        MatchOutcome::Unmatched(reference) => {
            issues.push(IssueKind::UnmatchedReference { reference });
            false
        }
        MatchOutcome::NoReference => {
            issues.push(IssueKind::MissingReference);
            false
        }
    };
    (matched, issues)
}
