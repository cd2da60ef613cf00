//! Ledger and gateway errors.

use crate::ledger::types::{AccountId, TransferId};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Per-event rejection reported by the ledger.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LedgerError {
    #[error("account {0} already exists")]
    AccountExists(AccountId),

    #[error("invalid flags {flags:#06x} for account code {code}")]
    InvalidFlags { code: u16, flags: u16 },

    #[error("invalid transfer flags {0:#06x}")]
    InvalidTransferFlags(u16),

    #[error("id must not be zero")]
    IdMustNotBeZero,

    #[error("ledger must not be zero")]
    LedgerMustNotBeZero,

    #[error("amount must not be zero")]
    AmountMustNotBeZero,

    #[error("debit account {0} not found")]
    DebitAccountNotFound(AccountId),

    #[error("credit account {0} not found")]
    CreditAccountNotFound(AccountId),

    #[error("debit and credit accounts must be different")]
    AccountsMustBeDifferent,

    #[error("account {account} is on ledger {found}, transfer is on ledger {expected}")]
    LedgerMismatch {
        account: AccountId,
        expected: u32,
        found: u32,
    },

    #[error("debit of {amount} on account {account} would exceed its credits")]
    ExceedsCredits { account: AccountId, amount: u128 },

    #[error("credit of {amount} on account {account} would exceed its debits")]
    ExceedsDebits { account: AccountId, amount: u128 },

    #[error("balance counter overflow on account {0}")]
    Overflow(AccountId),

    #[error("transfer {0} already exists")]
    TransferExists(TransferId),

    #[error("transfer {0} already exists with different fields")]
    TransferExistsWithDifferentFields(TransferId),

    #[error("pending id is required to post or void a transfer")]
    PendingIdRequired,

    #[error("pending id is only allowed when posting or voiding")]
    PendingIdNotAllowed,

    #[error("pending transfer {0} not found")]
    PendingTransferNotFound(TransferId),

    #[error("transfer {0} is not pending")]
    PendingTransferNotPending(TransferId),

    #[error("pending transfer {0} was already posted")]
    PendingTransferAlreadyPosted(TransferId),

    #[error("pending transfer {0} was already voided")]
    PendingTransferAlreadyVoided(TransferId),

    #[error("accounts do not match pending transfer {0}")]
    PendingTransferAccountsMismatch(TransferId),

    #[error("amount {amount} exceeds pending amount {pending}")]
    ExceedsPendingAmount { amount: u128, pending: u128 },

    #[error("linked event failed")]
    LinkedEventFailed,
}

impl LedgerError {
    /// Whether the error reports an exact duplicate that was already applied.
    pub fn is_exact_duplicate(&self) -> bool {
        matches!(self, LedgerError::TransferExists(_))
    }
}

/// One failed entry of a batch submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    /// Position of the entry in the submitted batch.
    pub index: usize,
    pub error: LedgerError,
}

impl BatchFailure {
    pub fn new(index: usize, error: LedgerError) -> Self {
        Self { index, error }
    }
}

/// Failure to reach the ledger at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("ledger unreachable: {0}")]
    Unreachable(String),
}

/// Errors returned by the ledger gateway.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Rejected locally before anything was sent.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The outcome is unknown; retry with the same ids.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl GatewayError {
    /// Transient infrastructure failures may be retried with the same ids.
    /// Validation and ledger rejections never should be.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Timeout { .. } | GatewayError::Transport(_))
    }
}
