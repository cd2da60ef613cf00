//! In-process implementation of the ledger API.
//!
//! Used in tests and simulations in place of a networked ledger cluster. Each
//! account sits behind its own lock. A transfer chain locks every account it
//! touches in id order, validates every event against a scratch copy and only
//! then writes back, so a transfer applies both legs or neither.
//!
//! Chains validate under a shared read lock on the transfer registry and take
//! the write lock only to commit, so chains on disjoint accounts validate in
//! parallel and serialise only for the insert itself. A chain that loses a
//! race for a transfer id, or finds a pending transfer on accounts it did not
//! lock, starts over.

use crate::ledger::client::LedgerClient;
use crate::ledger::error::{BatchFailure, LedgerError, TransportError};
use crate::ledger::types::{
    linked_chains, Account, AccountFlags, AccountId, Transfer, TransferFlags, TransferId,
};
use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Posted,
    Voided,
}

#[derive(Debug, Default)]
struct TransferRegistry {
    transfers: HashMap<TransferId, Transfer>,
    resolved: HashMap<TransferId, Resolution>,
}

/// Transfers accepted so far within the chain being validated.
#[derive(Default)]
struct Staged {
    transfers: Vec<Transfer>,
    resolutions: Vec<(TransferId, Resolution)>,
}

impl Staged {
    fn transfer<'a>(&'a self, registry: &'a TransferRegistry, id: TransferId) -> Option<&'a Transfer> {
        registry
            .transfers
            .get(&id)
            .or_else(|| self.transfers.iter().find(|t| t.id == id))
    }

    fn resolution(&self, registry: &TransferRegistry, id: TransferId) -> Option<Resolution> {
        registry.resolved.get(&id).copied().or_else(|| {
            self.resolutions
                .iter()
                .find(|(pending, _)| *pending == id)
                .map(|(_, r)| *r)
        })
    }
}

enum ChainFailure {
    /// Every event in the chain had already been applied.
    AllExist,
    Failed { offset: usize, error: LedgerError },
}

/// In-memory double-entry ledger.
#[derive(Debug)]
pub struct InMemoryLedger {
    accounts: RwLock<HashMap<AccountId, Arc<Mutex<Account>>>>,
    transfers: RwLock<TransferRegistry>,
    clock: AtomicU64,
    latency_micros: AtomicU64,
    offline: AtomicBool,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    pub fn new() -> Self {
        let start = Utc::now().timestamp_nanos_opt().unwrap_or(0).max(0) as u64;
        Self {
            accounts: RwLock::new(HashMap::new()),
            transfers: RwLock::new(TransferRegistry::default()),
            clock: AtomicU64::new(start),
            latency_micros: AtomicU64::new(0),
            offline: AtomicBool::new(false),
        }
    }

    /// Delay every call by `latency`, to exercise caller timeouts.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_micros
            .store(latency.as_micros().min(u64::MAX as u128) as u64, Ordering::SeqCst);
    }

    /// While offline every call fails with a transport error and nothing is applied.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn account_count(&self) -> usize {
        self.accounts.read().len()
    }

    pub fn transfer_count(&self) -> usize {
        self.transfers.read().transfers.len()
    }

    /// Sum of posted debits and posted credits across all accounts.
    /// Equal whenever the ledger is consistent.
    pub fn posted_totals(&self) -> (u128, u128) {
        let map = self.accounts.read();
        map.values().fold((0, 0), |(debits, credits), account| {
            let account = account.lock();
            (debits + account.debits_posted, credits + account.credits_posted)
        })
    }

    async fn simulate_network(&self) -> Result<(), TransportError> {
        let latency = Duration::from_micros(self.latency_micros.load(Ordering::SeqCst));
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable("in-memory ledger is offline".into()));
        }
        Ok(())
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn apply_accounts(&self, batch: &[Account]) -> Vec<BatchFailure> {
        let linked: Vec<bool> = batch
            .iter()
            .map(|a| a.flags.contains(AccountFlags::LINKED))
            .collect();
        let mut failures = Vec::new();
        let mut map = self.accounts.write();

        for chain in linked_chains(&linked) {
            let mut staged: Vec<Account> = Vec::new();
            let mut failed = None;

            for index in chain.clone() {
                let candidate = &batch[index];
                let exists = map.contains_key(&candidate.id) || staged.iter().any(|a| a.id == candidate.id);
                match validate_account(candidate, exists) {
                    Ok(()) => {
                        let mut account =
                            Account::new(candidate.id, candidate.ledger, candidate.code, candidate.flags);
                        account.timestamp = self.tick();
                        staged.push(account);
                    }
                    Err(error) => {
                        failed = Some((index, error));
                        break;
                    }
                }
            }

            match failed {
                None => {
                    for account in staged {
                        map.insert(account.id, Arc::new(Mutex::new(account)));
                    }
                }
                Some((at, error)) => {
                    debug!("account chain {:?} rejected at {}: {}", chain, at, error);
                    push_chain_failures(&mut failures, chain, at, error);
                }
            }
        }
        failures
    }

    fn apply_transfers(&self, batch: &[Transfer]) -> Vec<BatchFailure> {
        let linked: Vec<bool> = batch.iter().map(Transfer::is_linked).collect();
        let mut failures = Vec::new();

        for chain in linked_chains(&linked) {
            match self.apply_chain(&batch[chain.clone()]) {
                Ok(()) => {}
                Err(ChainFailure::AllExist) => {
                    for index in chain {
                        failures.push(BatchFailure::new(index, LedgerError::TransferExists(batch[index].id)));
                    }
                }
                Err(ChainFailure::Failed { offset, error }) => {
                    let at = chain.start + offset;
                    debug!("transfer chain {:?} rejected at {}: {}", chain, at, error);
                    push_chain_failures(&mut failures, chain, at, error);
                }
            }
        }
        failures
    }

    fn apply_chain(&self, events: &[Transfer]) -> Result<(), ChainFailure> {
        loop {
            match self.try_chain(events) {
                Some(outcome) => return outcome,
                None => debug!("transfer chain raced a concurrent commit, retrying"),
            }
        }
    }

    /// One validate-and-commit attempt. `None` means state changed under the
    /// chain and it must be validated again.
    fn try_chain(&self, events: &[Transfer]) -> Option<Result<(), ChainFailure>> {
        let ids = self.touched_accounts(events);
        let handles: Vec<Arc<Mutex<Account>>> = {
            let map = self.accounts.read();
            ids.iter().filter_map(|id| map.get(id).map(Arc::clone)).collect()
        };
        // Account locks in ascending id order, then the registry.
        let mut guards: Vec<MutexGuard<'_, Account>> = handles.iter().map(|h| h.lock()).collect();

        let mut scratch: HashMap<AccountId, Account> =
            guards.iter().map(|g| (g.id, Account::clone(g))).collect();
        let mut staged = Staged::default();
        {
            let registry = self.transfers.read();
            if !pending_accounts_locked(events, &registry, &ids) {
                return None;
            }

            let mut first_duplicate = None;
            for (offset, event) in events.iter().enumerate() {
                match self.check_transfer(event, &mut scratch, &registry, &staged) {
                    Ok((record, resolution)) => {
                        staged.transfers.push(record);
                        staged.resolutions.extend(resolution);
                    }
                    Err(LedgerError::TransferExists(id)) => {
                        first_duplicate.get_or_insert((offset, LedgerError::TransferExists(id)));
                    }
                    Err(error) => return Some(Err(ChainFailure::Failed { offset, error })),
                }
            }

            if let Some((offset, error)) = first_duplicate {
                if staged.transfers.is_empty() {
                    return Some(Err(ChainFailure::AllExist));
                }
                return Some(Err(ChainFailure::Failed { offset, error }));
            }
        }

        let mut registry = self.transfers.write();
        if staged.transfers.iter().any(|t| registry.transfers.contains_key(&t.id)) {
            return None;
        }
        for guard in guards.iter_mut() {
            if let Some(updated) = scratch.remove(&guard.id) {
                **guard = updated;
            }
        }
        for record in staged.transfers {
            registry.transfers.insert(record.id, record);
        }
        registry.resolved.extend(staged.resolutions);
        Some(Ok(()))
    }

    /// Every account id a chain may touch, sorted and deduplicated.
    fn touched_accounts(&self, events: &[Transfer]) -> Vec<AccountId> {
        let registry = self.transfers.read();
        let mut ids = Vec::with_capacity(events.len() * 2);
        for event in events {
            ids.push(event.debit_account_id);
            ids.push(event.credit_account_id);
            if let (true, Some(pending_id)) = (event.flags.resolves_pending(), event.pending_id) {
                let pending = registry
                    .transfers
                    .get(&pending_id)
                    .or_else(|| events.iter().find(|e| e.id == pending_id));
                if let Some(pending) = pending {
                    ids.push(pending.debit_account_id);
                    ids.push(pending.credit_account_id);
                }
            }
        }
        ids.retain(|id| !id.is_zero());
        ids.sort();
        ids.dedup();
        ids
    }

    fn check_transfer(
        &self,
        event: &Transfer,
        scratch: &mut HashMap<AccountId, Account>,
        registry: &TransferRegistry,
        staged: &Staged,
    ) -> Result<(Transfer, Option<(TransferId, Resolution)>), LedgerError> {
        if event.id.is_zero() {
            return Err(LedgerError::IdMustNotBeZero);
        }
        if let Some(existing) = staged.transfer(registry, event.id) {
            return Err(if existing.matches_submission(event) {
                LedgerError::TransferExists(event.id)
            } else {
                LedgerError::TransferExistsWithDifferentFields(event.id)
            });
        }
        if !event.flags.is_valid() {
            return Err(LedgerError::InvalidTransferFlags(event.flags.bits()));
        }
        if event.ledger == 0 {
            return Err(LedgerError::LedgerMustNotBeZero);
        }

        if event.flags.resolves_pending() {
            self.resolve_pending(event, scratch, registry, staged)
        } else {
            self.post_plain(event, scratch).map(|record| (record, None))
        }
    }

    fn post_plain(
        &self,
        event: &Transfer,
        scratch: &mut HashMap<AccountId, Account>,
    ) -> Result<Transfer, LedgerError> {
        if event.pending_id.is_some() {
            return Err(LedgerError::PendingIdNotAllowed);
        }
        if event.debit_account_id == event.credit_account_id {
            return Err(LedgerError::AccountsMustBeDifferent);
        }
        if event.amount == 0 {
            return Err(LedgerError::AmountMustNotBeZero);
        }

        let debit = scratch
            .get(&event.debit_account_id)
            .ok_or(LedgerError::DebitAccountNotFound(event.debit_account_id))?;
        let credit = scratch
            .get(&event.credit_account_id)
            .ok_or(LedgerError::CreditAccountNotFound(event.credit_account_id))?;
        for account in [debit, credit] {
            if account.ledger != event.ledger {
                return Err(LedgerError::LedgerMismatch {
                    account: account.id,
                    expected: event.ledger,
                    found: account.ledger,
                });
            }
        }

        let amount = event.amount;
        let overflow = |id| LedgerError::Overflow(id);

        if debit.flags.contains(AccountFlags::DEBITS_MUST_NOT_EXCEED_CREDITS) {
            let exposure = debit
                .debits_pending
                .checked_add(debit.debits_posted)
                .and_then(|v| v.checked_add(amount))
                .ok_or(overflow(debit.id))?;
            if exposure > debit.credits_posted {
                return Err(LedgerError::ExceedsCredits {
                    account: debit.id,
                    amount,
                });
            }
        }
        if credit.flags.contains(AccountFlags::CREDITS_MUST_NOT_EXCEED_DEBITS) {
            let exposure = credit
                .credits_pending
                .checked_add(credit.credits_posted)
                .and_then(|v| v.checked_add(amount))
                .ok_or(overflow(credit.id))?;
            if exposure > credit.debits_posted {
                return Err(LedgerError::ExceedsDebits {
                    account: credit.id,
                    amount,
                });
            }
        }

        let pending = event.flags.contains(TransferFlags::PENDING);
        let mut debit = debit.clone();
        let mut credit = credit.clone();
        {
            let debit_counter = if pending { &mut debit.debits_pending } else { &mut debit.debits_posted };
            *debit_counter = debit_counter.checked_add(amount).ok_or(overflow(debit.id))?;
        }
        {
            let credit_counter = if pending { &mut credit.credits_pending } else { &mut credit.credits_posted };
            *credit_counter = credit_counter.checked_add(amount).ok_or(overflow(credit.id))?;
        }
        scratch.insert(debit.id, debit);
        scratch.insert(credit.id, credit);

        let mut record = event.clone();
        record.timestamp = self.tick();
        Ok(record)
    }

    fn resolve_pending(
        &self,
        event: &Transfer,
        scratch: &mut HashMap<AccountId, Account>,
        registry: &TransferRegistry,
        staged: &Staged,
    ) -> Result<(Transfer, Option<(TransferId, Resolution)>), LedgerError> {
        let pending_id = event.pending_id.ok_or(LedgerError::PendingIdRequired)?;
        let pending = staged
            .transfer(registry, pending_id)
            .ok_or(LedgerError::PendingTransferNotFound(pending_id))?;
        if !pending.flags.contains(TransferFlags::PENDING) {
            return Err(LedgerError::PendingTransferNotPending(pending_id));
        }
        match staged.resolution(registry, pending_id) {
            Some(Resolution::Posted) => return Err(LedgerError::PendingTransferAlreadyPosted(pending_id)),
            Some(Resolution::Voided) => return Err(LedgerError::PendingTransferAlreadyVoided(pending_id)),
            None => {}
        }
        let mismatched = |given: AccountId, expected: AccountId| !given.is_zero() && given != expected;
        if mismatched(event.debit_account_id, pending.debit_account_id)
            || mismatched(event.credit_account_id, pending.credit_account_id)
        {
            return Err(LedgerError::PendingTransferAccountsMismatch(pending_id));
        }
        if event.ledger != pending.ledger {
            return Err(LedgerError::LedgerMismatch {
                account: pending.debit_account_id,
                expected: event.ledger,
                found: pending.ledger,
            });
        }

        let post = event.flags.contains(TransferFlags::POST_PENDING_TRANSFER);
        let amount = match (post, event.amount) {
            (true, 0) => pending.amount,
            (true, amount) => amount,
            (false, _) => pending.amount,
        };
        if amount > pending.amount {
            return Err(LedgerError::ExceedsPendingAmount {
                amount,
                pending: pending.amount,
            });
        }

        let mut debit = scratch
            .get(&pending.debit_account_id)
            .cloned()
            .ok_or(LedgerError::DebitAccountNotFound(pending.debit_account_id))?;
        let mut credit = scratch
            .get(&pending.credit_account_id)
            .cloned()
            .ok_or(LedgerError::CreditAccountNotFound(pending.credit_account_id))?;

        debit.debits_pending = debit
            .debits_pending
            .checked_sub(pending.amount)
            .ok_or(LedgerError::Overflow(debit.id))?;
        credit.credits_pending = credit
            .credits_pending
            .checked_sub(pending.amount)
            .ok_or(LedgerError::Overflow(credit.id))?;
        if post {
            debit.debits_posted = debit
                .debits_posted
                .checked_add(amount)
                .ok_or(LedgerError::Overflow(debit.id))?;
            credit.credits_posted = credit
                .credits_posted
                .checked_add(amount)
                .ok_or(LedgerError::Overflow(credit.id))?;
        }

        let record = Transfer {
            id: event.id,
            debit_account_id: pending.debit_account_id,
            credit_account_id: pending.credit_account_id,
            amount,
            pending_id: Some(pending_id),
            ledger: event.ledger,
            code: event.code,
            flags: event.flags,
            timestamp: self.tick(),
        };
        scratch.insert(debit.id, debit);
        scratch.insert(credit.id, credit);

        let resolution = if post { Resolution::Posted } else { Resolution::Voided };
        Ok((record, Some((pending_id, resolution))))
    }
}

/// Whether every pending transfer the chain resolves sits on accounts in
/// `locked`. A pending transfer created after the lock set was computed may
/// not.
fn pending_accounts_locked(events: &[Transfer], registry: &TransferRegistry, locked: &[AccountId]) -> bool {
    events
        .iter()
        .filter(|e| e.flags.resolves_pending())
        .filter_map(|e| e.pending_id)
        .filter_map(|id| registry.transfers.get(&id).or_else(|| events.iter().find(|e| e.id == id)))
        .all(|pending| {
            [pending.debit_account_id, pending.credit_account_id]
                .iter()
                .all(|id| id.is_zero() || locked.binary_search(id).is_ok())
        })
}

fn validate_account(account: &Account, exists: bool) -> Result<(), LedgerError> {
    if account.id.is_zero() {
        return Err(LedgerError::IdMustNotBeZero);
    }
    if account.ledger == 0 {
        return Err(LedgerError::LedgerMustNotBeZero);
    }
    if !account.flags.is_valid() {
        return Err(LedgerError::InvalidFlags {
            code: account.code,
            flags: account.flags.bits(),
        });
    }
    if exists {
        return Err(LedgerError::AccountExists(account.id));
    }
    Ok(())
}

fn push_chain_failures(failures: &mut Vec<BatchFailure>, chain: Range<usize>, at: usize, error: LedgerError) {
    for index in chain {
        let error = if index == at {
            error.clone()
        } else {
            LedgerError::LinkedEventFailed
        };
        failures.push(BatchFailure::new(index, error));
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn create_accounts(&self, accounts: &[Account]) -> Result<Vec<BatchFailure>, TransportError> {
        self.simulate_network().await?;
        Ok(self.apply_accounts(accounts))
    }

    async fn create_transfers(&self, transfers: &[Transfer]) -> Result<Vec<BatchFailure>, TransportError> {
        self.simulate_network().await?;
        Ok(self.apply_transfers(transfers))
    }

    async fn lookup_accounts(&self, ids: &[AccountId]) -> Result<Vec<Account>, TransportError> {
        self.simulate_network().await?;
        let map = self.accounts.read();
        Ok(ids
            .iter()
            .filter_map(|id| map.get(id).map(|a| a.lock().clone()))
            .collect())
    }

    async fn lookup_transfers(&self, ids: &[TransferId]) -> Result<Vec<Transfer>, TransportError> {
        self.simulate_network().await?;
        let registry = self.transfers.read();
        Ok(ids
            .iter()
            .filter_map(|id| registry.transfers.get(id).cloned())
            .collect())
    }
}
