//! Double-entry ledger access.
//!
//! [`LedgerGateway`] is the handle application code holds. It talks to the
//! ledger through the [`LedgerClient`] trait; [`InMemoryLedger`] is the
//! in-process implementation used by tests, demos and the simulator.

pub mod client;
pub mod error;
pub mod gateway;
pub mod known;
pub mod memory;
pub mod types;

pub use client::LedgerClient;
pub use error::{BatchFailure, GatewayError, LedgerError, TransportError};
pub use gateway::{GatewayConfig, LedgerGateway, NewAccount, NewTransfer, PostOutcome};
pub use known::KnownTransfers;
pub use memory::InMemoryLedger;
pub use types::{
    from_minor_units, to_minor_units, Account, AccountCode, AccountFlags, AccountId, Transfer, TransferFlags,
    TransferId, LARGE_DEPOSIT_CODE,
};
