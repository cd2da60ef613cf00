//! IBAN-style account identifiers with ISO 7064 Mod-97-10 check digits.
//!
//! The check digits are derived from the rearranged string
//! `BBAN ‖ country ‖ "00"`, where every letter expands to `ord(letter) - 55`
//! (A=10 .. Z=35). The expansion is parsed as an arbitrary-precision integer;
//! `98 - (value mod 97)` gives the two check digits.

use num_bigint::BigUint;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum length of an identifier in electronic format.
pub const MAX_IDENTIFIER_LEN: usize = 34;

/// Errors raised while generating or parsing an account identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IbanError {
    #[error("country code must be 2 letters, got {0:?}")]
    InvalidCountryCode(String),
    #[error("bank code and account number must not be empty")]
    EmptyBban,
    #[error("invalid character {0:?} in account identifier")]
    InvalidCharacter(char),
    #[error("account identifier is {0} characters, maximum is 34")]
    TooLong(usize),
    #[error("account identifier {0:?} is too short")]
    TooShort(String),
    #[error("check digits {found} do not match, expected {expected}")]
    ChecksumMismatch { expected: String, found: String },
}

/// An international bank account identifier.
///
/// Immutable once generated. The check digits always satisfy Mod-97-10 for
/// identifiers produced by [`generate`] or [`AccountIdentifier::from_str`].
///
/// # Examples
///
/// ```
/// use payment_rail::core::iban::{generate, validate};
///
/// let id = generate("DE", "37040044", "0532013000").unwrap();
/// assert_eq!(id.to_string(), "DE89370400440532013000");
/// assert!(validate(&id));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountIdentifier {
    country_code: String,
    check_digits: String,
    bank_code: String,
    account_number: String,
}

impl AccountIdentifier {
    pub fn country_code(&self) -> &str {
        &self.country_code
    }

    pub fn check_digits(&self) -> &str {
        &self.check_digits
    }

    /// The bank code. Empty for identifiers parsed from text, where the
    /// bank/account split is country specific and not recoverable.
    pub fn bank_code(&self) -> &str {
        &self.bank_code
    }

    pub fn account_number(&self) -> &str {
        &self.account_number
    }

    /// Basic bank account number: bank code followed by account number.
    pub fn bban(&self) -> String {
        format!("{}{}", self.bank_code, self.account_number)
    }

    /// Electronic format, e.g. `DE89370400440532013000`.
    pub fn electronic_format(&self) -> String {
        format!(
            "{}{}{}{}",
            self.country_code, self.check_digits, self.bank_code, self.account_number
        )
    }

    /// Print format in groups of four, e.g. `DE89 3704 0044 0532 0130 00`.
    pub fn to_print_format(&self) -> String {
        let electronic = self.electronic_format();
        electronic
            .as_bytes()
            .chunks(4)
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Return a copy with the given check digits. Used to build deliberately
    /// corrupted identifiers in tests and fixtures.
    pub fn with_check_digits(&self, check_digits: impl Into<String>) -> Self {
        Self {
            check_digits: check_digits.into(),
            ..self.clone()
        }
    }
}

impl fmt::Display for AccountIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.electronic_format())
    }
}

impl FromStr for AccountIdentifier {
    type Err = IbanError;

    /// Parse electronic or print format and verify the check digits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| c.to_ascii_uppercase())
            .collect();
        if compact.len() < 5 {
            return Err(IbanError::TooShort(s.to_string()));
        }
        if compact.len() > MAX_IDENTIFIER_LEN {
            return Err(IbanError::TooLong(compact.len()));
        }
        if let Some(bad) = compact.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(IbanError::InvalidCharacter(bad));
        }

        let (country, rest) = compact.split_at(2);
        let (check, bban) = rest.split_at(2);
        let country = normalize_country(country)?;
        if !check.chars().all(|c| c.is_ascii_digit()) {
            return Err(IbanError::ChecksumMismatch {
                expected: compute_check_digits(&country, bban)?,
                found: check.to_string(),
            });
        }

        let expected = compute_check_digits(&country, bban)?;
        if expected != check {
            return Err(IbanError::ChecksumMismatch {
                expected,
                found: check.to_string(),
            });
        }

        Ok(Self {
            country_code: country,
            check_digits: expected,
            bank_code: String::new(),
            account_number: bban.to_string(),
        })
    }
}

impl TryFrom<String> for AccountIdentifier {
    type Error = IbanError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AccountIdentifier> for String {
    fn from(id: AccountIdentifier) -> Self {
        id.electronic_format()
    }
}

/// Generate an identifier with freshly computed check digits.
///
/// Spaces in the bank code and account number are stripped and letters are
/// upper-cased.
pub fn generate(
    country_code: &str,
    bank_code: &str,
    account_number: &str,
) -> Result<AccountIdentifier, IbanError> {
    let country = normalize_country(country_code)?;
    let bank_code = normalize_bban_part(bank_code)?;
    let account_number = normalize_bban_part(account_number)?;

    let bban = format!("{bank_code}{account_number}");
    if bban.is_empty() {
        return Err(IbanError::EmptyBban);
    }
    let total_len = 4 + bban.len();
    if total_len > MAX_IDENTIFIER_LEN {
        return Err(IbanError::TooLong(total_len));
    }

    let check_digits = compute_check_digits(&country, &bban)?;
    Ok(AccountIdentifier {
        country_code: country,
        check_digits,
        bank_code,
        account_number,
    })
}

/// Recompute the check digits of `identifier` and compare.
pub fn validate(identifier: &AccountIdentifier) -> bool {
    let bban = identifier.bban();
    if bban.is_empty() || !bban.chars().all(|c| c.is_ascii_alphanumeric()) {
        return false;
    }
    match compute_check_digits(&identifier.country_code, &bban) {
        Ok(expected) => expected == identifier.check_digits,
        Err(_) => false,
    }
}

/// Validate an identifier given as text, in electronic or print format.
pub fn validate_str(identifier: &str) -> bool {
    identifier.parse::<AccountIdentifier>().is_ok()
}

/// Compute the two check digits for `country` and `bban`.
pub fn compute_check_digits(country: &str, bban: &str) -> Result<String, IbanError> {
    let rearranged = format!("{bban}{country}00");
    let remainder = mod97(&expand(&rearranged)?);
    Ok(format!("{:02}", 98 - remainder))
}

/// Replace every letter with `ord(letter) - 55`, keep digits.
fn expand(s: &str) -> Result<String, IbanError> {
    let mut out = String::with_capacity(s.len() * 2);
    for c in s.chars() {
        match c {
            '0'..='9' => out.push(c),
            'A'..='Z' => out.push_str(&(c as u32 - 55).to_string()),
            'a'..='z' => out.push_str(&(c.to_ascii_uppercase() as u32 - 55).to_string()),
            other => return Err(IbanError::InvalidCharacter(other)),
        }
    }
    Ok(out)
}

fn mod97(digits: &str) -> u32 {
    // Expansion only ever contains ASCII digits.
    let value = BigUint::parse_bytes(digits.as_bytes(), 10).unwrap_or_default();
    (value % 97u32).to_u32().unwrap_or(0)
}

fn normalize_country(country_code: &str) -> Result<String, IbanError> {
    let upper = country_code.to_ascii_uppercase();
    if upper.len() != 2 || !upper.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(IbanError::InvalidCountryCode(country_code.to_string()));
    }
    Ok(upper)
}

fn normalize_bban_part(part: &str) -> Result<String, IbanError> {
    let stripped: String = part.chars().filter(|c| *c != ' ').collect();
    if let Some(bad) = stripped.chars().find(|c| !c.is_ascii_alphanumeric()) {
        return Err(IbanError::InvalidCharacter(bad));
    }
    Ok(stripped.to_ascii_uppercase())
}
