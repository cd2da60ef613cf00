use crate::core::iban::AccountIdentifier;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A debtor or creditor on a payment instruction.
///
/// Pairs a display name with the account identifier funds move from or to.
///
/// # Examples
///
/// ```
/// use payment_rail::core::iban::generate;
/// use payment_rail::core::party::Party;
///
/// let account = generate("DE", "37040044", "0532013000").unwrap();
/// let party = Party::new("Muster GmbH", account);
/// assert_eq!(party.name(), "Muster GmbH");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    name: String,
    account: AccountIdentifier,
}

impl Party {
    pub fn new(name: impl Into<String>, account: AccountIdentifier) -> Self {
        Self {
            name: name.into(),
            account,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn account(&self) -> &AccountIdentifier {
        &self.account
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::iban::generate;

    #[test]
    fn test_party_display() {
        let party = Party::new(
            "Receiver Name",
            generate("GB", "WEST123456", "98765432").unwrap(),
        );
        assert_eq!(format!("{}", party), "Receiver Name <GB82WEST12345698765432>");
    }

    #[test]
    fn test_party_equality() {
        let account = generate("DE", "37040044", "0532013000").unwrap();
        let a = Party::new("A", account.clone());
        let b = Party::new("A", account.clone());
        let c = Party::new("B", account);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
