use crate::ledger::error::{BatchFailure, TransportError};
use crate::ledger::types::{Account, AccountId, Transfer, TransferId};
use async_trait::async_trait;
use std::sync::Arc;

/// Narrow account/transfer API of the external double-entry ledger.
///
/// Batch calls return only the entries that failed, as `(index, error)`
/// pairs; every other entry was applied. Entries flagged linked succeed or
/// fail together with the rest of their chain. A transport error means the
/// outcome of the whole call is unknown.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn create_accounts(&self, accounts: &[Account]) -> Result<Vec<BatchFailure>, TransportError>;

    async fn create_transfers(&self, transfers: &[Transfer]) -> Result<Vec<BatchFailure>, TransportError>;

    /// Accounts that exist among `ids`, in request order. Missing ids are skipped.
    async fn lookup_accounts(&self, ids: &[AccountId]) -> Result<Vec<Account>, TransportError>;

    /// Transfers that exist among `ids`, in request order. Missing ids are skipped.
    async fn lookup_transfers(&self, ids: &[TransferId]) -> Result<Vec<Transfer>, TransportError>;
}

#[async_trait]
impl<T: LedgerClient + ?Sized> LedgerClient for Arc<T> {
    async fn create_accounts(&self, accounts: &[Account]) -> Result<Vec<BatchFailure>, TransportError> {
        (**self).create_accounts(accounts).await
    }

    async fn create_transfers(&self, transfers: &[Transfer]) -> Result<Vec<BatchFailure>, TransportError> {
        (**self).create_transfers(transfers).await
    }

    async fn lookup_accounts(&self, ids: &[AccountId]) -> Result<Vec<Account>, TransportError> {
        (**self).lookup_accounts(ids).await
    }

    async fn lookup_transfers(&self, ids: &[TransferId]) -> Result<Vec<Transfer>, TransportError> {
        (**self).lookup_transfers(ids).await
    }
}
