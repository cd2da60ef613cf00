//! pacs.008 FI-to-FI customer credit transfer instructions.
//!
//! An instruction is built once from a debtor, a creditor and an amount,
//! then serialized. Building never contacts the ledger.

use crate::core::currency::{CurrencyCode, CurrencyError};
use crate::core::iban::{self, AccountIdentifier};
use crate::core::party::Party;
use crate::messaging::xml::{XmlError, XmlWriter};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use log::debug;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Target namespace of the generated document.
pub const PACS008_NAMESPACE: &str = "urn:iso:std:iso:20022:tech:xsd:pacs.008.001.08";

/// Maximum length of unstructured remittance information.
pub const MAX_REMITTANCE_CHARS: usize = 140;

/// Errors raised while building an instruction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstructionError {
    #[error("instructed amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),
    #[error(transparent)]
    Currency(#[from] CurrencyError),
    #[error("{role} account {account} fails check digit validation")]
    InvalidAccount {
        role: &'static str,
        account: String,
    },
    #[error("end-to-end id must not be empty")]
    EmptyEndToEndId,
    #[error(transparent)]
    Xml(#[from] XmlError),
}

/// Settlement method carried in the group header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SettlementMethod {
    /// Instant settlement.
    #[default]
    #[serde(rename = "INST")]
    Instant,
    #[serde(rename = "CLRG")]
    ClearingSystem,
    #[serde(rename = "INDA")]
    InstructedAgent,
    #[serde(rename = "INGA")]
    InstructingAgent,
    #[serde(rename = "COVE")]
    Cover,
}

impl SettlementMethod {
    pub fn code(&self) -> &'static str {
        match self {
            SettlementMethod::Instant => "INST",
            SettlementMethod::ClearingSystem => "CLRG",
            SettlementMethod::InstructedAgent => "INDA",
            SettlementMethod::InstructingAgent => "INGA",
            SettlementMethod::Cover => "COVE",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "INST" => Some(SettlementMethod::Instant),
            "CLRG" => Some(SettlementMethod::ClearingSystem),
            "INDA" => Some(SettlementMethod::InstructedAgent),
            "INGA" => Some(SettlementMethod::InstructingAgent),
            "COVE" => Some(SettlementMethod::Cover),
            _ => None,
        }
    }
}

impl fmt::Display for SettlementMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A single-transaction funds-transfer instruction.
///
/// Immutable once built. The group header always reports one transaction
/// and a control sum equal to the instructed amount.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentInstruction {
    message_id: Uuid,
    instruction_id: String,
    end_to_end_id: String,
    transaction_id: Uuid,
    created_at: DateTime<Utc>,
    amount: Decimal,
    currency: CurrencyCode,
    settlement_method: SettlementMethod,
    debtor: Party,
    creditor: Party,
    remittance_info: Option<String>,
}

impl PaymentInstruction {
    /// Start building an instruction.
    pub fn builder(
        debtor: Party,
        creditor: Party,
        amount: Decimal,
        currency: &str,
    ) -> PaymentInstructionBuilder {
        PaymentInstructionBuilder {
            debtor,
            creditor,
            amount,
            currency: currency.to_string(),
            end_to_end_id: None,
            remittance_info: None,
            settlement_method: SettlementMethod::default(),
        }
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn instruction_id(&self) -> &str {
        &self.instruction_id
    }

    pub fn end_to_end_id(&self) -> &str {
        &self.end_to_end_id
    }

    pub fn transaction_id(&self) -> Uuid {
        self.transaction_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Instructed amount, already rounded to two decimal places.
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> &CurrencyCode {
        &self.currency
    }

    pub fn settlement_method(&self) -> SettlementMethod {
        self.settlement_method
    }

    pub fn debtor(&self) -> &Party {
        &self.debtor
    }

    pub fn creditor(&self) -> &Party {
        &self.creditor
    }

    pub fn remittance_info(&self) -> Option<&str> {
        self.remittance_info.as_deref()
    }

    /// Number of transactions in the message. Always one.
    pub fn transaction_count(&self) -> usize {
        1
    }

    /// Sum of all instructed amounts in the message.
    pub fn control_sum(&self) -> Decimal {
        self.amount
    }

    /// Creation timestamp as rendered in the group header.
    pub fn creation_time(&self) -> String {
        self.created_at.to_rfc3339_opts(SecondsFormat::Secs, false)
    }

    /// Serialize to a UTF-8 pacs.008 document with an XML declaration.
    pub fn to_xml(&self) -> Result<String, InstructionError> {
        let amount = format_amount(self.amount);
        let mut w = XmlWriter::new();
        w.declaration()?;
        w.start("Document", &[("xmlns", PACS008_NAMESPACE)])?;
        w.start("FIToFICstmrCdtTrf", &[])?;

        w.start("GrpHdr", &[])?;
        w.leaf("MsgId", &self.message_id.to_string())?;
        w.leaf("CreDtTm", &self.creation_time())?;
        w.leaf("NbOfTxs", &self.transaction_count().to_string())?;
        w.leaf("CtrlSum", &format_amount(self.control_sum()))?;
        w.start("SttlmInf", &[])?;
        w.leaf("SttlmMtd", self.settlement_method.code())?;
        w.end("SttlmInf")?;
        w.end("GrpHdr")?;

        w.start("CdtTrfTxInf", &[])?;
        w.start("PmtId", &[])?;
        w.leaf("InstrId", &self.instruction_id)?;
        w.leaf("EndToEndId", &self.end_to_end_id)?;
        w.leaf("TxId", &self.transaction_id.to_string())?;
        w.end("PmtId")?;
        w.leaf_with("InstdAmt", &[("Ccy", self.currency.as_str())], &amount)?;
        write_party(&mut w, "Dbtr", "DbtrAcct", &self.debtor)?;
        write_party(&mut w, "Cdtr", "CdtrAcct", &self.creditor)?;
        if let Some(remittance) = &self.remittance_info {
            w.start("RmtInf", &[])?;
            w.leaf("Ustrd", remittance)?;
            w.end("RmtInf")?;
        }
        w.end("CdtTrfTxInf")?;

        w.end("FIToFICstmrCdtTrf")?;
        w.end("Document")?;
        Ok(w.finish()?)
    }
}

fn write_party(
    w: &mut XmlWriter,
    party_tag: &str,
    account_tag: &str,
    party: &Party,
) -> Result<(), XmlError> {
    w.start(party_tag, &[])?;
    w.leaf("Nm", party.name())?;
    w.end(party_tag)?;
    w.start(account_tag, &[])?;
    w.start("Id", &[])?;
    w.leaf("IBAN", &party.account().electronic_format())?;
    w.end("Id")?;
    w.end(account_tag)
}

/// Fluent builder for [`PaymentInstruction`].
///
/// # Examples
///
/// ```
/// use payment_rail::core::iban::generate;
/// use payment_rail::core::party::Party;
/// use payment_rail::messaging::pacs008::PaymentInstruction;
/// use rust_decimal_macros::dec;
///
/// let debtor = Party::new("Sender", generate("DE", "37040044", "0532013000").unwrap());
/// let creditor = Party::new("Receiver", generate("GB", "WEST123456", "98765432").unwrap());
///
/// let instruction = PaymentInstruction::builder(debtor, creditor, dec!(250), "EUR")
///     .remittance_info("Invoice 2024-117")
///     .build()
///     .unwrap();
///
/// assert_eq!(instruction.control_sum(), dec!(250.00));
/// assert!(instruction.to_xml().unwrap().contains("<CtrlSum>250.00</CtrlSum>"));
/// ```
#[derive(Debug, Clone)]
pub struct PaymentInstructionBuilder {
    debtor: Party,
    creditor: Party,
    amount: Decimal,
    currency: String,
    end_to_end_id: Option<String>,
    remittance_info: Option<String>,
    settlement_method: SettlementMethod,
}

impl PaymentInstructionBuilder {
    /// Use a caller-supplied end-to-end id instead of deriving one.
    pub fn end_to_end_id(mut self, id: impl Into<String>) -> Self {
        self.end_to_end_id = Some(id.into());
        self
    }

    /// Attach unstructured remittance text. Anything beyond 140 characters
    /// is dropped when the instruction is built.
    pub fn remittance_info(mut self, text: impl Into<String>) -> Self {
        self.remittance_info = Some(text.into());
        self
    }

    pub fn settlement_method(mut self, method: SettlementMethod) -> Self {
        self.settlement_method = method;
        self
    }

    /// Validate inputs and stamp identifiers and the creation time.
    pub fn build(self) -> Result<PaymentInstruction, InstructionError> {
        let amount = self.amount.round_dp(2);
        if amount <= Decimal::ZERO {
            return Err(InstructionError::NonPositiveAmount(self.amount));
        }
        let currency = CurrencyCode::parse(&self.currency)?;
        check_account("debtor", self.debtor.account())?;
        check_account("creditor", self.creditor.account())?;

        let end_to_end_id = match self.end_to_end_id {
            Some(id) if id.trim().is_empty() => return Err(InstructionError::EmptyEndToEndId),
            Some(id) => id,
            None => format!("E2E-{}", &Uuid::new_v4().simple().to_string()[..12]),
        };
        let remittance_info = self.remittance_info.map(|text| truncate_chars(&text, MAX_REMITTANCE_CHARS));

        let created_at = Utc::now().trunc_subsecs(0);

        let instruction = PaymentInstruction {
            message_id: Uuid::new_v4(),
            instruction_id: format!("INST-{}", &Uuid::new_v4().simple().to_string()[..8]),
            end_to_end_id,
            transaction_id: Uuid::new_v4(),
            created_at,
            amount,
            currency,
            settlement_method: self.settlement_method,
            debtor: self.debtor,
            creditor: self.creditor,
            remittance_info,
        };
        debug!(
            "built pacs.008 {} for {} {} ({} -> {})",
            instruction.message_id,
            format_amount(instruction.amount),
            instruction.currency,
            instruction.debtor.account(),
            instruction.creditor.account()
        );
        Ok(instruction)
    }
}

/// Build and serialize an instruction in one call.
pub fn build_pacs008(
    debtor: Party,
    creditor: Party,
    amount: Decimal,
    currency: &str,
    end_to_end_id: Option<&str>,
    remittance_info: Option<&str>,
    settlement_method: SettlementMethod,
) -> Result<String, InstructionError> {
    let mut builder =
        PaymentInstruction::builder(debtor, creditor, amount, currency).settlement_method(settlement_method);
    if let Some(id) = end_to_end_id {
        builder = builder.end_to_end_id(id);
    }
    if let Some(text) = remittance_info {
        builder = builder.remittance_info(text);
    }
    builder.build()?.to_xml()
}

/// Render an amount with exactly two decimal places.
pub fn format_amount(amount: Decimal) -> String {
    format!("{:.2}", amount.round_dp(2))
}

fn check_account(role: &'static str, account: &AccountIdentifier) -> Result<(), InstructionError> {
    if iban::validate(account) {
        Ok(())
    } else {
        Err(InstructionError::InvalidAccount {
            role,
            account: account.to_string(),
        })
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::iban::generate;
    use rust_decimal_macros::dec;

    fn debtor() -> Party {
        Party::new("Sender Name", generate("DE", "37040044", "0532013000").unwrap())
    }

    fn creditor() -> Party {
        Party::new("Receiver Name", generate("GB", "WEST123456", "98765432").unwrap())
    }

    #[test]
    fn test_header_totals() {
        let ins = PaymentInstruction::builder(debtor(), creditor(), dec!(1234.5), "usd")
            .build()
            .unwrap();
        assert_eq!(ins.transaction_count(), 1);
        assert_eq!(ins.control_sum(), ins.amount());
        assert_eq!(ins.currency().as_str(), "USD");

        let xml = ins.to_xml().unwrap();
        assert!(xml.contains("<NbOfTxs>1</NbOfTxs>"));
        assert!(xml.contains("<CtrlSum>1234.50</CtrlSum>"));
        assert!(xml.contains("<InstdAmt Ccy=\"USD\">1234.50</InstdAmt>"));
        assert!(xml.contains("<SttlmMtd>INST</SttlmMtd>"));
    }

    #[test]
    fn test_amount_rounds_to_cents() {
        assert_eq!(format_amount(dec!(10)), "10.00");
        assert_eq!(format_amount(dec!(0.125)), "0.12");
        assert_eq!(format_amount(dec!(0.135)), "0.14");
    }

    #[test]
    fn test_element_order() {
        let xml = PaymentInstruction::builder(debtor(), creditor(), dec!(5), "EUR")
            .remittance_info("ref")
            .build()
            .unwrap()
            .to_xml()
            .unwrap();

        let order = [
            "<Document xmlns=\"urn:iso:std:iso:20022:tech:xsd:pacs.008.001.08\">",
            "<GrpHdr>",
            "<MsgId>",
            "<CreDtTm>",
            "<NbOfTxs>",
            "<CtrlSum>",
            "<SttlmMtd>",
            "<CdtTrfTxInf>",
            "<PmtId>",
            "<InstrId>",
            "<EndToEndId>",
            "<TxId>",
            "<InstdAmt",
            "<Dbtr>",
            "<DbtrAcct>",
            "<Cdtr>",
            "<CdtrAcct>",
            "<RmtInf>",
        ];
        let positions: Vec<usize> = order
            .iter()
            .map(|tag| xml.find(tag).unwrap_or_else(|| panic!("missing {tag}")))
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{xml}");
    }

    #[test]
    fn test_remittance_truncated_silently() {
        let long = "x".repeat(200);
        let ins = PaymentInstruction::builder(debtor(), creditor(), dec!(1), "EUR")
            .remittance_info(long)
            .build()
            .unwrap();
        assert_eq!(ins.remittance_info().unwrap().chars().count(), 140);
    }

    #[test]
    fn test_remittance_truncation_respects_multibyte_chars() {
        let long = "ü".repeat(150);
        let ins = PaymentInstruction::builder(debtor(), creditor(), dec!(1), "EUR")
            .remittance_info(long)
            .build()
            .unwrap();
        assert_eq!(ins.remittance_info().unwrap(), "ü".repeat(140));
    }

    #[test]
    fn test_no_remittance_block_when_absent() {
        let xml = build_pacs008(debtor(), creditor(), dec!(1), "EUR", None, None, SettlementMethod::Cover)
            .unwrap();
        assert!(!xml.contains("RmtInf"));
        assert!(xml.contains("<SttlmMtd>COVE</SttlmMtd>"));
    }

    #[test]
    fn test_derived_and_supplied_end_to_end_ids() {
        let derived = PaymentInstruction::builder(debtor(), creditor(), dec!(1), "EUR")
            .build()
            .unwrap();
        assert!(derived.end_to_end_id().starts_with("E2E-"));
        assert_eq!(derived.end_to_end_id().len(), 16);
        assert!(derived.instruction_id().starts_with("INST-"));

        let supplied = PaymentInstruction::builder(debtor(), creditor(), dec!(1), "EUR")
            .end_to_end_id("INV-42")
            .build()
            .unwrap();
        assert_eq!(supplied.end_to_end_id(), "INV-42");
    }

    #[test]
    fn test_fresh_ids_per_instruction() {
        let a = PaymentInstruction::builder(debtor(), creditor(), dec!(1), "EUR").build().unwrap();
        let b = PaymentInstruction::builder(debtor(), creditor(), dec!(1), "EUR").build().unwrap();
        assert_ne!(a.message_id(), b.message_id());
        assert_ne!(a.transaction_id(), b.transaction_id());
    }

    #[test]
    fn test_creation_time_second_precision_utc() {
        let ins = PaymentInstruction::builder(debtor(), creditor(), dec!(1), "EUR").build().unwrap();
        let stamp = ins.creation_time();
        assert!(stamp.ends_with("+00:00"), "{stamp}");
        assert_eq!(stamp.len(), "2024-01-01T00:00:00+00:00".len());
    }

    #[test]
    fn test_rejects_non_positive_amount() {
        let err = PaymentInstruction::builder(debtor(), creditor(), dec!(0), "EUR")
            .build()
            .unwrap_err();
        assert_eq!(err, InstructionError::NonPositiveAmount(dec!(0)));
        assert!(PaymentInstruction::builder(debtor(), creditor(), dec!(-1), "EUR")
            .build()
            .is_err());
    }

    #[test]
    fn test_rejects_amount_that_rounds_to_zero() {
        let err = PaymentInstruction::builder(debtor(), creditor(), dec!(0.004), "EUR")
            .build()
            .unwrap_err();
        assert_eq!(err, InstructionError::NonPositiveAmount(dec!(0.004)));

        let ins = PaymentInstruction::builder(debtor(), creditor(), dec!(0.006), "EUR")
            .build()
            .unwrap();
        assert_eq!(ins.amount(), dec!(0.01));
        assert_eq!(ins.control_sum(), dec!(0.01));
    }

    #[test]
    fn test_rejects_bad_currency() {
        let err = PaymentInstruction::builder(debtor(), creditor(), dec!(1), "EURO")
            .build()
            .unwrap_err();
        assert!(matches!(err, InstructionError::Currency(_)));
    }

    #[test]
    fn test_rejects_invalid_account() {
        let bad = Party::new("Bad", debtor().account().with_check_digits("00"));
        let err = PaymentInstruction::builder(bad, creditor(), dec!(1), "EUR")
            .build()
            .unwrap_err();
        assert!(matches!(err, InstructionError::InvalidAccount { role: "debtor", .. }));
    }

    #[test]
    fn test_settlement_method_codes() {
        for method in [
            SettlementMethod::Instant,
            SettlementMethod::ClearingSystem,
            SettlementMethod::InstructedAgent,
            SettlementMethod::InstructingAgent,
            SettlementMethod::Cover,
        ] {
            assert_eq!(SettlementMethod::from_code(method.code()), Some(method));
        }
        assert_eq!(SettlementMethod::from_code("XXXX"), None);
    }
}
