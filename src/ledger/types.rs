//! Account and transfer records exchanged with the double-entry ledger.
//!
//! Field layout follows the ledger's network contract: 128-bit ids, a
//! numeric ledger id, a type code, and unsigned 128-bit counters. Amounts are
//! integers in minor units at whatever fixed scale the ledger id implies.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, Range};
use std::str::FromStr;
use uuid::Uuid;

/// Ledger-scoped account id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(u128);

impl AccountId {
    pub const fn new(id: u128) -> Self {
        Self(id)
    }

    pub const fn get(&self) -> u128 {
        self.0
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u128> for AccountId {
    fn from(id: u128) -> Self {
        Self(id)
    }
}

/// Transfer id. Doubles as the idempotency key for resubmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(u128);

impl TransferId {
    pub const fn new(id: u128) -> Self {
        Self(id)
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4().as_u128())
    }

    pub const fn get(&self) -> u128 {
        self.0
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

/// Rendered as a hyphenated UUID, which is how transfer ids travel in
/// statement references.
impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Uuid::from_u128(self.0))
    }
}

impl FromStr for TransferId {
    type Err = String;

    /// Accepts UUID text in any of its usual forms, or a plain decimal.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(uuid) = Uuid::parse_str(s) {
            return Ok(Self(uuid.as_u128()));
        }
        s.parse::<u128>()
            .map(Self)
            .map_err(|_| format!("not a transfer id: {s:?}"))
    }
}

impl From<u128> for TransferId {
    fn from(id: u128) -> Self {
        Self(id)
    }
}

/// Account flag bitset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountFlags(u16);

impl AccountFlags {
    pub const NONE: Self = Self(0);
    /// Chain this event with the next one in the batch.
    pub const LINKED: Self = Self(1 << 0);
    pub const DEBITS_MUST_NOT_EXCEED_CREDITS: Self = Self(1 << 1);
    pub const CREDITS_MUST_NOT_EXCEED_DEBITS: Self = Self(1 << 2);

    const KNOWN: u16 = 0b111;

    pub const fn bits(&self) -> u16 {
        self.0
    }

    pub const fn from_bits_retain(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Known bits only, and not both balance constraints at once.
    pub fn is_valid(&self) -> bool {
        self.0 & !Self::KNOWN == 0
            && !(self.contains(Self::DEBITS_MUST_NOT_EXCEED_CREDITS)
                && self.contains(Self::CREDITS_MUST_NOT_EXCEED_DEBITS))
    }
}

impl BitOr for AccountFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Transfer flag bitset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferFlags(u16);

impl TransferFlags {
    pub const NONE: Self = Self(0);
    pub const LINKED: Self = Self(1 << 0);
    /// Reserve the amount without posting it.
    pub const PENDING: Self = Self(1 << 1);
    pub const POST_PENDING_TRANSFER: Self = Self(1 << 2);
    pub const VOID_PENDING_TRANSFER: Self = Self(1 << 3);

    const KNOWN: u16 = 0b1111;

    pub const fn bits(&self) -> u16 {
        self.0
    }

    pub const fn from_bits_retain(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether this transfer resolves an earlier pending transfer.
    pub const fn resolves_pending(&self) -> bool {
        self.contains(Self::POST_PENDING_TRANSFER) || self.contains(Self::VOID_PENDING_TRANSFER)
    }

    /// Known bits only, and at most one of pending/post/void.
    pub fn is_valid(&self) -> bool {
        let phases = [Self::PENDING, Self::POST_PENDING_TRANSFER, Self::VOID_PENDING_TRANSFER]
            .iter()
            .filter(|f| self.contains(**f))
            .count();
        self.0 & !Self::KNOWN == 0 && phases <= 1
    }
}

impl BitOr for TransferFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Account type codes the gateway knows how to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountCode {
    /// Asset side: vault / settlement float.
    Vault,
    /// Liability side: customer funds held in custody.
    CustomerDeposit,
}

impl AccountCode {
    pub const VAULT: u16 = 1001;
    pub const CUSTOMER_DEPOSIT: u16 = 2001;

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            Self::VAULT => Some(AccountCode::Vault),
            Self::CUSTOMER_DEPOSIT => Some(AccountCode::CustomerDeposit),
            _ => None,
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            AccountCode::Vault => Self::VAULT,
            AccountCode::CustomerDeposit => Self::CUSTOMER_DEPOSIT,
        }
    }

    /// Flags an account of this type is opened with.
    ///
    /// Vaults may never be debited beyond what has been credited to them.
    /// Custody accounts carry the linked flag so several can be opened as
    /// one atomic chain.
    pub fn flags(&self) -> AccountFlags {
        match self {
            AccountCode::Vault => AccountFlags::DEBITS_MUST_NOT_EXCEED_CREDITS,
            AccountCode::CustomerDeposit => AccountFlags::LINKED,
        }
    }
}

/// Transfer code used for large custody deposits.
pub const LARGE_DEPOSIT_CODE: u16 = 10001;

/// An account record as held by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub ledger: u32,
    pub code: u16,
    pub flags: AccountFlags,
    pub debits_pending: u128,
    pub debits_posted: u128,
    pub credits_pending: u128,
    pub credits_posted: u128,
    /// Assigned by the ledger on creation.
    pub timestamp: u64,
}

impl Account {
    pub fn new(id: AccountId, ledger: u32, code: u16, flags: AccountFlags) -> Self {
        Self {
            id,
            ledger,
            code,
            flags,
            debits_pending: 0,
            debits_posted: 0,
            credits_pending: 0,
            credits_posted: 0,
            timestamp: 0,
        }
    }

    /// Posted credits minus posted debits.
    pub fn net_posted(&self) -> i128 {
        self.credits_posted as i128 - self.debits_posted as i128
    }

    /// Credits still available to back new debits, counting reservations.
    pub fn available_credit(&self) -> u128 {
        self.credits_posted
            .saturating_sub(self.debits_posted.saturating_add(self.debits_pending))
    }
}

/// A transfer record as held by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub debit_account_id: AccountId,
    pub credit_account_id: AccountId,
    pub amount: u128,
    /// For post/void transfers, the pending transfer being resolved.
    pub pending_id: Option<TransferId>,
    pub ledger: u32,
    pub code: u16,
    pub flags: TransferFlags,
    /// Assigned by the ledger on acceptance.
    pub timestamp: u64,
}

impl Transfer {
    pub fn new(
        id: TransferId,
        debit_account_id: AccountId,
        credit_account_id: AccountId,
        amount: u128,
        ledger: u32,
        code: u16,
    ) -> Self {
        Self {
            id,
            debit_account_id,
            credit_account_id,
            amount,
            pending_id: None,
            ledger,
            code,
            flags: TransferFlags::NONE,
            timestamp: 0,
        }
    }

    pub fn with_flags(mut self, flags: TransferFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_pending_id(mut self, pending_id: TransferId) -> Self {
        self.pending_id = Some(pending_id);
        self
    }

    pub fn is_linked(&self) -> bool {
        self.flags.contains(TransferFlags::LINKED)
    }

    /// Whether `submitted` is an exact resubmission of this accepted transfer.
    ///
    /// For post/void transfers the ledger fills in accounts and amount from
    /// the pending transfer, so zero values in the submission match anything.
    pub fn matches_submission(&self, submitted: &Transfer) -> bool {
        let wildcard = submitted.flags.resolves_pending();
        let account_eq = |stored: AccountId, given: AccountId| stored == given || (wildcard && given.is_zero());
        self.id == submitted.id
            && account_eq(self.debit_account_id, submitted.debit_account_id)
            && account_eq(self.credit_account_id, submitted.credit_account_id)
            && (self.amount == submitted.amount || (wildcard && submitted.amount == 0))
            && self.pending_id == submitted.pending_id
            && self.ledger == submitted.ledger
            && self.code == submitted.code
            && self.flags == submitted.flags
    }
}

/// Convert a decimal amount to integer minor units at `scale` places.
///
/// `None` when the amount is negative, has more precision than `scale`
/// allows, or does not fit.
pub fn to_minor_units(amount: Decimal, scale: u32) -> Option<u128> {
    let factor = 10u64.checked_pow(scale)?;
    let scaled = amount.checked_mul(Decimal::from(factor))?;
    if scaled.is_sign_negative() || !scaled.fract().is_zero() {
        return None;
    }
    scaled.to_u128()
}

/// Inverse of [`to_minor_units`].
pub fn from_minor_units(units: u128, scale: u32) -> Option<Decimal> {
    let units = i128::try_from(units).ok()?;
    Decimal::try_from_i128_with_scale(units, scale).ok()
}

/// Split a batch into linked chains.
///
/// A chain runs from an event through every following event while the
/// current one is flagged linked. A chain still open at the end of the batch
/// is closed by the end of the batch.
pub fn linked_chains(linked: &[bool]) -> Vec<Range<usize>> {
    let mut chains = Vec::new();
    let mut start = 0;
    for (index, is_linked) in linked.iter().enumerate() {
        if !is_linked {
            chains.push(start..index + 1);
            start = index + 1;
        }
    }
    if start < linked.len() {
        chains.push(start..linked.len());
    }
    chains
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_code_flag_policy() {
        assert_eq!(
            AccountCode::Vault.flags(),
            AccountFlags::DEBITS_MUST_NOT_EXCEED_CREDITS
        );
        assert_eq!(AccountCode::CustomerDeposit.flags(), AccountFlags::LINKED);
        assert_eq!(AccountCode::from_code(1001), Some(AccountCode::Vault));
        assert_eq!(AccountCode::from_code(2001), Some(AccountCode::CustomerDeposit));
        assert_eq!(AccountCode::from_code(3001), None);
    }

    #[test]
    fn test_flag_validity() {
        assert!(AccountFlags::LINKED.is_valid());
        assert!(!(AccountFlags::DEBITS_MUST_NOT_EXCEED_CREDITS
            | AccountFlags::CREDITS_MUST_NOT_EXCEED_DEBITS)
            .is_valid());
        assert!(!AccountFlags::from_bits_retain(1 << 9).is_valid());

        assert!((TransferFlags::LINKED | TransferFlags::PENDING).is_valid());
        assert!(!(TransferFlags::PENDING | TransferFlags::VOID_PENDING_TRANSFER).is_valid());
    }

    #[test]
    fn test_transfer_id_text_forms() {
        let id = TransferId::random();
        let text = id.to_string();
        assert_eq!(text.parse::<TransferId>(), Ok(id));
        assert_eq!(text.replace('-', "").parse::<TransferId>(), Ok(id));
        assert_eq!("42".parse::<TransferId>(), Ok(TransferId::new(42)));
        assert!("E2E-1".parse::<TransferId>().is_err());
    }

    #[test]
    fn test_linked_chains() {
        assert_eq!(linked_chains(&[]), Vec::<Range<usize>>::new());
        assert_eq!(linked_chains(&[false, false]), vec![0..1, 1..2]);
        assert_eq!(linked_chains(&[true, true, false, false]), vec![0..3, 3..4]);
        assert_eq!(linked_chains(&[false, true]), vec![0..1, 1..2]);
        assert_eq!(linked_chains(&[true, true]), vec![0..2]);
    }

    #[test]
    fn test_matches_submission() {
        let stored = Transfer::new(
            TransferId::new(9),
            AccountId::new(1),
            AccountId::new(2),
            500,
            1,
            1,
        );
        assert!(stored.matches_submission(&stored.clone()));
        let mut changed = stored.clone();
        changed.amount = 501;
        assert!(!stored.matches_submission(&changed));

        let post = Transfer::new(TransferId::new(10), AccountId::new(1), AccountId::new(2), 500, 1, 1)
            .with_flags(TransferFlags::POST_PENDING_TRANSFER)
            .with_pending_id(TransferId::new(9));
        let resubmitted = Transfer::new(TransferId::new(10), AccountId::new(0), AccountId::new(0), 0, 1, 1)
            .with_flags(TransferFlags::POST_PENDING_TRANSFER)
            .with_pending_id(TransferId::new(9));
        assert!(post.matches_submission(&resubmitted));
    }

    #[test]
    fn test_minor_units() {
        use rust_decimal_macros::dec;

        assert_eq!(to_minor_units(dec!(1250.75), 2), Some(125_075));
        assert_eq!(to_minor_units(dec!(0.001), 2), None);
        assert_eq!(to_minor_units(dec!(-1), 2), None);
        assert_eq!(from_minor_units(125_075, 2), Some(dec!(1250.75)));
    }

    #[test]
    fn test_available_credit() {
        let mut account = Account::new(AccountId::new(1), 1, AccountCode::VAULT, AccountCode::Vault.flags());
        account.credits_posted = 100;
        account.debits_posted = 30;
        account.debits_pending = 20;
        assert_eq!(account.available_credit(), 50);
        assert_eq!(account.net_posted(), 70);
    }
}
