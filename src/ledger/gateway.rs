//! Ledger gateway: the single handle application code uses to open accounts
//! and move money.
//!
//! The gateway owns no balances. It applies the account flag policy,
//! rejects malformed requests before they reach the network, bounds every
//! ledger call with a timeout, and turns exact duplicate resubmissions into
//! a successful [`PostOutcome::AlreadyPosted`]. Callers retry only on
//! [`GatewayError::is_retryable`] errors, and always with the same ids.

use crate::core::iban::{self, AccountIdentifier};
use crate::ledger::client::LedgerClient;
use crate::ledger::error::{BatchFailure, GatewayError, LedgerError, TransportError};
use crate::ledger::known::KnownTransfers;
use crate::ledger::types::{
    linked_chains, Account, AccountCode, AccountFlags, AccountId, Transfer, TransferFlags, TransferId,
};
use log::{debug, info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Gateway settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Ledger used when a request does not name one.
    pub ledger: u32,
    /// Upper bound on every ledger round trip.
    pub timeout_ms: u64,
    pub max_batch_size: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ledger: 1,
            timeout_ms: 5_000,
            max_batch_size: 8_190,
        }
    }
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Request to open an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub id: AccountId,
    pub code: u16,
    pub ledger: Option<u32>,
    /// External identifier the account stands for; validated before creation.
    pub identifier: Option<AccountIdentifier>,
}

impl NewAccount {
    pub fn new(id: AccountId, code: u16) -> Self {
        Self {
            id,
            code,
            ledger: None,
            identifier: None,
        }
    }

    pub fn vault(id: AccountId) -> Self {
        Self::new(id, AccountCode::VAULT)
    }

    pub fn customer_deposit(id: AccountId) -> Self {
        Self::new(id, AccountCode::CUSTOMER_DEPOSIT)
    }

    pub fn on_ledger(mut self, ledger: u32) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_identifier(mut self, identifier: AccountIdentifier) -> Self {
        self.identifier = Some(identifier);
        self
    }
}

/// Request to move `amount` from the debit account to the credit account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransfer {
    pub id: TransferId,
    pub debit_account_id: AccountId,
    pub credit_account_id: AccountId,
    pub amount: u128,
    pub code: u16,
    pub ledger: Option<u32>,
    pub linked: bool,
    /// Reserve the amount instead of posting it.
    pub pending: bool,
    /// End-to-end id of the payment instruction this transfer settles.
    pub end_to_end_id: Option<String>,
}

impl NewTransfer {
    pub fn new(
        id: TransferId,
        debit_account_id: AccountId,
        credit_account_id: AccountId,
        amount: u128,
        code: u16,
    ) -> Self {
        Self {
            id,
            debit_account_id,
            credit_account_id,
            amount,
            code,
            ledger: None,
            linked: false,
            pending: false,
            end_to_end_id: None,
        }
    }

    pub fn on_ledger(mut self, ledger: u32) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Chain this transfer with the next one in the same batch.
    pub fn linked(mut self) -> Self {
        self.linked = true;
        self
    }

    pub fn pending(mut self) -> Self {
        self.pending = true;
        self
    }

    pub fn with_end_to_end_id(mut self, end_to_end_id: impl Into<String>) -> Self {
        self.end_to_end_id = Some(end_to_end_id.into());
        self
    }

    fn flags(&self) -> TransferFlags {
        let mut flags = TransferFlags::NONE;
        if self.linked {
            flags = flags | TransferFlags::LINKED;
        }
        if self.pending {
            flags = flags | TransferFlags::PENDING;
        }
        flags
    }

    fn to_record(&self, default_ledger: u32) -> Transfer {
        Transfer::new(
            self.id,
            self.debit_account_id,
            self.credit_account_id,
            self.amount,
            self.ledger.unwrap_or(default_ledger),
            self.code,
        )
        .with_flags(self.flags())
    }
}

/// Result of a successful single transfer submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PostOutcome {
    Posted,
    /// The same transfer had already been accepted; nothing changed.
    AlreadyPosted,
}

/// Handle to the external ledger. Cheap to clone; clones share the client
/// and the record of accepted transfers.
pub struct LedgerGateway<C: LedgerClient> {
    client: Arc<C>,
    config: GatewayConfig,
    known: Arc<RwLock<KnownTransfers>>,
}

impl<C: LedgerClient> Clone for LedgerGateway<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            config: self.config.clone(),
            known: Arc::clone(&self.known),
        }
    }
}

impl<C: LedgerClient> LedgerGateway<C> {
    pub fn new(client: Arc<C>, config: GatewayConfig) -> Self {
        Self {
            client,
            config,
            known: Arc::new(RwLock::new(KnownTransfers::new())),
        }
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Snapshot of every transfer the ledger is known to hold.
    pub fn known_transfers(&self) -> KnownTransfers {
        self.known.read().clone()
    }

    /// Open a single account with the flags its code calls for.
    pub async fn create_account(&self, account: NewAccount) -> Result<(), GatewayError> {
        let failures = self.create_accounts(std::slice::from_ref(&account)).await?;
        match failures.into_iter().next() {
            None => Ok(()),
            Some(failure) => Err(GatewayError::Ledger(failure.error)),
        }
    }

    /// Open accounts as one batch.
    ///
    /// Returns the entries that failed. A malformed external identifier
    /// rejects the whole batch before anything is sent. An unknown code fails
    /// its entry and the rest of that entry's linked chain.
    pub async fn create_accounts(&self, accounts: &[NewAccount]) -> Result<Vec<BatchFailure>, GatewayError> {
        self.check_batch_size(accounts.len())?;
        for account in accounts {
            if account.id.is_zero() {
                return Err(GatewayError::InvalidInput("account id must not be zero".into()));
            }
            if let Some(identifier) = &account.identifier {
                if !iban::validate(identifier) {
                    return Err(GatewayError::InvalidInput(format!(
                        "account identifier {identifier} fails check digit validation"
                    )));
                }
            }
        }

        let policy: Vec<Option<AccountFlags>> = accounts
            .iter()
            .map(|a| AccountCode::from_code(a.code).map(|code| code.flags()))
            .collect();
        let linked: Vec<bool> = policy
            .iter()
            .map(|flags| flags.map_or(false, |f| f.contains(AccountFlags::LINKED)))
            .collect();

        let mut failures = Vec::new();
        let mut records = Vec::with_capacity(accounts.len());
        let mut positions = Vec::with_capacity(accounts.len());
        for chain in linked_chains(&linked) {
            let unknown = chain.clone().find(|&index| policy[index].is_none());
            match unknown {
                Some(bad) => {
                    for index in chain {
                        let error = if index == bad {
                            LedgerError::InvalidFlags {
                                code: accounts[index].code,
                                flags: AccountFlags::NONE.bits(),
                            }
                        } else {
                            LedgerError::LinkedEventFailed
                        };
                        failures.push(BatchFailure::new(index, error));
                    }
                }
                None => {
                    for index in chain {
                        let request = &accounts[index];
                        let flags = policy[index].unwrap_or(AccountFlags::NONE);
                        let ledger = request.ledger.unwrap_or(self.config.ledger);
                        records.push(Account::new(request.id, ledger, request.code, flags));
                        positions.push(index);
                    }
                }
            }
        }

        if !records.is_empty() {
            let remote = self
                .call("create_accounts", self.client.create_accounts(&records))
                .await?;
            failures.extend(
                remote
                    .into_iter()
                    .map(|f| BatchFailure::new(positions[f.index], f.error)),
            );
        }

        failures.sort_by_key(|f| f.index);
        for failure in &failures {
            warn!("account {} rejected: {}", accounts[failure.index].id, failure.error);
        }
        info!(
            "created {} of {} accounts",
            accounts.len() - failures.len(),
            accounts.len()
        );
        Ok(failures)
    }

    /// Post a single transfer. Resubmitting an accepted transfer unchanged
    /// is a no-op that reports [`PostOutcome::AlreadyPosted`].
    pub async fn post_transfer(&self, transfer: NewTransfer) -> Result<PostOutcome, GatewayError> {
        if transfer.id.is_zero() {
            return Err(GatewayError::InvalidInput("transfer id must not be zero".into()));
        }
        if transfer.amount == 0 {
            return Err(GatewayError::InvalidInput(format!(
                "transfer {} has a zero amount",
                transfer.id
            )));
        }
        let record = transfer.to_record(self.config.ledger);
        self.submit_one(record, transfer.end_to_end_id.as_deref()).await
    }

    /// Post transfers as one batch and return the entries that failed.
    ///
    /// Entries succeed or fail independently unless linked. Exact duplicates
    /// of accepted transfers are not failures.
    pub async fn post_transfers(&self, transfers: &[NewTransfer]) -> Result<Vec<BatchFailure>, GatewayError> {
        self.check_batch_size(transfers.len())?;
        let records: Vec<Transfer> = transfers
            .iter()
            .map(|t| t.to_record(self.config.ledger))
            .collect();

        let remote = self
            .call("create_transfers", self.client.create_transfers(&records))
            .await?;

        let mut failed = vec![false; transfers.len()];
        let mut failures = Vec::with_capacity(remote.len());
        for failure in remote {
            if failure.error.is_exact_duplicate() {
                debug!("transfer {} already posted", transfers[failure.index].id);
                continue;
            }
            warn!("transfer {} rejected: {}", transfers[failure.index].id, failure.error);
            failed[failure.index] = true;
            failures.push(failure);
        }

        let mut known = self.known.write();
        for (transfer, failed) in transfers.iter().zip(&failed) {
            if !failed {
                known.record(transfer.id, transfer.end_to_end_id.as_deref());
            }
        }
        info!(
            "posted {} of {} transfers",
            transfers.len() - failures.len(),
            transfers.len()
        );
        Ok(failures)
    }

    /// Post a pending transfer. `amount` of `None` posts the full reservation;
    /// a smaller amount posts part of it and releases the rest.
    pub async fn post_pending(
        &self,
        id: TransferId,
        pending_id: TransferId,
        amount: Option<u128>,
    ) -> Result<PostOutcome, GatewayError> {
        if amount == Some(0) {
            return Err(GatewayError::InvalidInput(format!(
                "posting pending transfer {pending_id} with a zero amount"
            )));
        }
        let record = self.resolution(id, pending_id, amount.unwrap_or(0), TransferFlags::POST_PENDING_TRANSFER)?;
        self.submit_one(record, None).await
    }

    /// Release a pending transfer's reservation.
    pub async fn void_pending(&self, id: TransferId, pending_id: TransferId) -> Result<PostOutcome, GatewayError> {
        let record = self.resolution(id, pending_id, 0, TransferFlags::VOID_PENDING_TRANSFER)?;
        self.submit_one(record, None).await
    }

    pub async fn lookup_account(&self, id: AccountId) -> Result<Option<Account>, GatewayError> {
        let found = self
            .call("lookup_accounts", self.client.lookup_accounts(&[id]))
            .await?;
        Ok(found.into_iter().find(|a| a.id == id))
    }

    pub async fn lookup_transfer(&self, id: TransferId) -> Result<Option<Transfer>, GatewayError> {
        let found = self
            .call("lookup_transfers", self.client.lookup_transfers(&[id]))
            .await?;
        Ok(found.into_iter().find(|t| t.id == id))
    }

    fn resolution(
        &self,
        id: TransferId,
        pending_id: TransferId,
        amount: u128,
        flags: TransferFlags,
    ) -> Result<Transfer, GatewayError> {
        if id.is_zero() || pending_id.is_zero() {
            return Err(GatewayError::InvalidInput("transfer ids must not be zero".into()));
        }
        Ok(Transfer::new(id, AccountId::new(0), AccountId::new(0), amount, self.config.ledger, 0)
            .with_flags(flags)
            .with_pending_id(pending_id))
    }

    async fn submit_one(&self, record: Transfer, end_to_end_id: Option<&str>) -> Result<PostOutcome, GatewayError> {
        let id = record.id;
        let failures = self
            .call("create_transfers", self.client.create_transfers(std::slice::from_ref(&record)))
            .await?;

        let outcome = match failures.into_iter().next() {
            None => PostOutcome::Posted,
            Some(failure) if failure.error.is_exact_duplicate() => {
                debug!("transfer {id} already posted");
                PostOutcome::AlreadyPosted
            }
            Some(failure) => {
                warn!("transfer {id} rejected: {}", failure.error);
                return Err(GatewayError::Ledger(failure.error));
            }
        };
        self.known.write().record(id, end_to_end_id);
        Ok(outcome)
    }

    fn check_batch_size(&self, len: usize) -> Result<(), GatewayError> {
        if len > self.config.max_batch_size {
            return Err(GatewayError::InvalidInput(format!(
                "batch of {len} exceeds the limit of {}",
                self.config.max_batch_size
            )));
        }
        Ok(())
    }

    /// Run one ledger round trip under the configured timeout.
    async fn call<T, F>(&self, operation: &'static str, request: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, TransportError>>,
    {
        let after = self.config.timeout();
        match tokio::time::timeout(after, request).await {
            Ok(result) => result.map_err(|e| {
                warn!("{operation} failed: {e}");
                GatewayError::Transport(e)
            }),
            Err(_) => {
                warn!("{operation} timed out after {after:?}");
                Err(GatewayError::Timeout { operation, after })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::InMemoryLedger;

    fn gateway() -> LedgerGateway<InMemoryLedger> {
        LedgerGateway::new(Arc::new(InMemoryLedger::new()), GatewayConfig::default())
    }

    async fn funded(gateway: &LedgerGateway<InMemoryLedger>) {
        gateway.create_account(NewAccount::vault(AccountId::new(1))).await.unwrap();
        gateway
            .create_account(NewAccount::customer_deposit(AccountId::new(2)))
            .await
            .unwrap();
        gateway
            .post_transfer(NewTransfer::new(TransferId::new(1), AccountId::new(2), AccountId::new(1), 1_000, 1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_flag_policy_applied() {
        let gateway = gateway();
        funded(&gateway).await;
        let vault = gateway.lookup_account(AccountId::new(1)).await.unwrap().unwrap();
        assert_eq!(vault.flags, AccountFlags::DEBITS_MUST_NOT_EXCEED_CREDITS);
        assert_eq!(vault.code, AccountCode::VAULT);
        let custody = gateway.lookup_account(AccountId::new(2)).await.unwrap().unwrap();
        assert_eq!(custody.flags, AccountFlags::LINKED);
    }

    #[tokio::test]
    async fn test_duplicate_account() {
        let gateway = gateway();
        gateway.create_account(NewAccount::vault(AccountId::new(1))).await.unwrap();
        let err = gateway
            .create_account(NewAccount::vault(AccountId::new(1)))
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::Ledger(LedgerError::AccountExists(AccountId::new(1))));
    }

    #[tokio::test]
    async fn test_unknown_code_fails_its_chain_only() {
        let gateway = gateway();
        let failures = gateway
            .create_accounts(&[
                NewAccount::customer_deposit(AccountId::new(10)),
                NewAccount::new(AccountId::new(11), 3001),
                NewAccount::vault(AccountId::new(12)),
            ])
            .await
            .unwrap();
        assert_eq!(
            failures,
            vec![
                BatchFailure::new(0, LedgerError::LinkedEventFailed),
                BatchFailure::new(1, LedgerError::InvalidFlags { code: 3001, flags: 0 }),
            ]
        );
        assert!(gateway.lookup_account(AccountId::new(12)).await.unwrap().is_some());
        assert!(gateway.lookup_account(AccountId::new(10)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_identifier_rejects_batch() {
        let gateway = gateway();
        let bad: AccountIdentifier = iban::generate("DE", "37040044", "0532013000")
            .unwrap()
            .with_check_digits("00");
        let err = gateway
            .create_accounts(&[
                NewAccount::vault(AccountId::new(1)),
                NewAccount::customer_deposit(AccountId::new(2)).with_identifier(bad),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput(_)));
        assert_eq!(gateway.client().account_count(), 0);
    }

    #[tokio::test]
    async fn test_resubmission_is_idempotent() {
        let gateway = gateway();
        funded(&gateway).await;
        let transfer = NewTransfer::new(TransferId::new(5), AccountId::new(1), AccountId::new(2), 300, 1);
        assert_eq!(gateway.post_transfer(transfer.clone()).await.unwrap(), PostOutcome::Posted);
        assert_eq!(
            gateway.post_transfer(transfer).await.unwrap(),
            PostOutcome::AlreadyPosted
        );
        let vault = gateway.lookup_account(AccountId::new(1)).await.unwrap().unwrap();
        assert_eq!(vault.debits_posted, 300);

        let changed = NewTransfer::new(TransferId::new(5), AccountId::new(1), AccountId::new(2), 301, 1);
        assert_eq!(
            gateway.post_transfer(changed).await.unwrap_err(),
            GatewayError::Ledger(LedgerError::TransferExistsWithDifferentFields(TransferId::new(5)))
        );
    }

    #[tokio::test]
    async fn test_insufficient_balance_and_unknown_account() {
        let gateway = gateway();
        funded(&gateway).await;
        let err = gateway
            .post_transfer(NewTransfer::new(TransferId::new(6), AccountId::new(1), AccountId::new(2), 1_001, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Ledger(LedgerError::ExceedsCredits { .. })));

        let err = gateway
            .post_transfer(NewTransfer::new(TransferId::new(7), AccountId::new(1), AccountId::new(99), 1, 1))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GatewayError::Ledger(LedgerError::CreditAccountNotFound(AccountId::new(99)))
        );
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_zero_amount_is_input_error() {
        let gateway = gateway();
        let err = gateway
            .post_transfer(NewTransfer::new(TransferId::new(6), AccountId::new(1), AccountId::new(2), 0, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_batch_reports_per_index_and_skips_duplicates() {
        let gateway = gateway();
        funded(&gateway).await;
        let failures = gateway
            .post_transfers(&[
                NewTransfer::new(TransferId::new(1), AccountId::new(2), AccountId::new(1), 1_000, 1),
                NewTransfer::new(TransferId::new(20), AccountId::new(1), AccountId::new(2), 5_000, 1),
                NewTransfer::new(TransferId::new(21), AccountId::new(1), AccountId::new(2), 10, 1)
                    .with_end_to_end_id("E2E-000000000021"),
            ])
            .await
            .unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].index, 1);

        let known = gateway.known_transfers();
        assert!(known.contains_reference("E2E-000000000021"));
        assert!(known.contains_transfer(TransferId::new(1)));
        assert!(!known.contains_transfer(TransferId::new(20)));
    }

    #[tokio::test]
    async fn test_pending_post_and_void() {
        let gateway = gateway();
        funded(&gateway).await;
        let reserve = NewTransfer::new(TransferId::new(30), AccountId::new(1), AccountId::new(2), 400, 1).pending();
        gateway.post_transfer(reserve).await.unwrap();
        gateway
            .post_pending(TransferId::new(31), TransferId::new(30), Some(150))
            .await
            .unwrap();
        let vault = gateway.lookup_account(AccountId::new(1)).await.unwrap().unwrap();
        assert_eq!(vault.debits_posted, 150);
        assert_eq!(vault.debits_pending, 0);

        let err = gateway
            .void_pending(TransferId::new(32), TransferId::new(30))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GatewayError::Ledger(LedgerError::PendingTransferAlreadyPosted(TransferId::new(30)))
        );

        let reserve = NewTransfer::new(TransferId::new(40), AccountId::new(1), AccountId::new(2), 100, 1).pending();
        gateway.post_transfer(reserve).await.unwrap();
        assert_eq!(
            gateway.void_pending(TransferId::new(41), TransferId::new(40)).await.unwrap(),
            PostOutcome::Posted
        );
        assert_eq!(
            gateway.void_pending(TransferId::new(41), TransferId::new(40)).await.unwrap(),
            PostOutcome::AlreadyPosted
        );
        let posted = gateway.lookup_transfer(TransferId::new(31)).await.unwrap().unwrap();
        assert_eq!(posted.amount, 150);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_ledger_times_out() {
        let ledger = Arc::new(InMemoryLedger::new().with_latency(Duration::from_secs(30)));
        let config = GatewayConfig {
            timeout_ms: 50,
            ..GatewayConfig::default()
        };
        let gateway = LedgerGateway::new(ledger, config);
        let err = gateway
            .create_account(NewAccount::vault(AccountId::new(1)))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GatewayError::Timeout {
                operation: "create_accounts",
                after: Duration::from_millis(50)
            }
        );
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_offline_ledger_is_transport_error() {
        let gateway = gateway();
        gateway.client().set_offline(true);
        let err = gateway
            .post_transfer(NewTransfer::new(TransferId::new(1), AccountId::new(2), AccountId::new(1), 5, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Transport(TransportError::Unreachable(_))));
        assert!(gateway.known_transfers().is_empty());
    }

    #[test]
    fn test_config_defaults_fill_missing_fields() {
        let config: GatewayConfig = serde_json::from_str(r#"{"timeout_ms": 250}"#).unwrap();
        assert_eq!(config.ledger, 1);
        assert_eq!(config.timeout(), Duration::from_millis(250));
        assert_eq!(config.max_batch_size, 8_190);
    }
}
