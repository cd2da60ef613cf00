//! # payment-rail
//!
//! Core of an ISO 20022 payment rail on top of a double-entry ledger.
//!
//! Issues IBAN-style account identifiers, builds pacs.008 credit transfer
//! instructions, posts the resulting money movement to the ledger through a
//! timeout-bounded gateway, and reconciles camt.053 bank statements against
//! what the ledger accepted.
//!
//! ## Architecture
//!
//! - **core**: Account identifiers, currencies and parties
//! - **messaging**: pacs.008 instructions and camt.053 statements
//! - **ledger**: Accounts, transfers, the ledger client trait and gateway
//! - **reconciliation**: Drift computation and reference matching
//! - **simulation**: Synthetic statements for benches and tests

pub mod core;
pub mod ledger;
pub mod messaging;
pub mod reconciliation;
pub mod simulation;

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::core::currency::CurrencyCode;
    pub use crate::core::iban::{self, AccountIdentifier, IbanError};
    pub use crate::core::party::Party;
    pub use crate::ledger::{
        AccountCode, AccountId, BatchFailure, GatewayConfig, GatewayError, InMemoryLedger, LedgerClient,
        LedgerError, LedgerGateway, NewAccount, NewTransfer, PostOutcome, TransferId,
    };
    pub use crate::messaging::camt053::{parse_statements, CreditDebit, Statement, StatementEntry};
    pub use crate::messaging::pacs008::{build_pacs008, PaymentInstruction, SettlementMethod};
    pub use crate::reconciliation::{
        ReconcileOptions, ReconciliationEngine, ReconciliationError, ReconciliationReport,
    };
}
