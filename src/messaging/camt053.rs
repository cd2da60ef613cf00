//! camt.053 bank-to-customer statements.
//!
//! Parsing is lenient at the entry level and strict at the document level:
//! a statement that is not well-formed XML is rejected, but an entry with a
//! garbled amount or an unknown direction code is kept verbatim so the
//! reconciliation pass can report on it.

use crate::core::currency::CurrencyCode;
use crate::core::iban::AccountIdentifier;
use crate::messaging::xml::{XmlError, XmlWriter};
use chrono::{SecondsFormat, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Namespace of the statements this module reads and writes.
pub const CAMT053_NAMESPACE: &str = "urn:iso:std:iso:20022:tech:xsd:camt.053.001.02";

/// Document-level parse failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatementError {
    #[error("malformed statement document at byte {position}: {message}")]
    Malformed { position: u64, message: String },
    #[error("expected a Document root element, found {0:?}")]
    UnexpectedRoot(String),
    #[error("statement document is empty")]
    Empty,
}

/// Problems with a single entry's amount.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntryAmountError {
    #[error("entry has no amount")]
    Missing,
    #[error("invalid amount {0:?}")]
    Invalid(String),
}

/// Credit/debit indicator of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CreditDebit {
    #[serde(rename = "CRDT")]
    Credit,
    #[serde(rename = "DBIT")]
    Debit,
}

impl CreditDebit {
    pub fn code(&self) -> &'static str {
        match self {
            CreditDebit::Credit => "CRDT",
            CreditDebit::Debit => "DBIT",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "CRDT" => Some(CreditDebit::Credit),
            "DBIT" => Some(CreditDebit::Debit),
            _ => None,
        }
    }

    /// Apply the direction to an unsigned amount: credits are positive.
    pub fn signed(&self, amount: Decimal) -> Decimal {
        match self {
            CreditDebit::Credit => amount,
            CreditDebit::Debit => -amount,
        }
    }
}

impl fmt::Display for CreditDebit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One `Ntry` of a statement, kept as close to the wire text as possible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementEntry {
    /// Raw text of the `Amt` element, `None` when the element is absent.
    pub amount_text: Option<String>,
    /// `Ccy` attribute of the amount.
    pub currency: Option<String>,
    /// Raw `CdtDbtInd` text.
    pub direction_code: Option<String>,
    pub account_servicer_ref: Option<String>,
    pub end_to_end_id: Option<String>,
    pub debtor_account: Option<String>,
    pub creditor_account: Option<String>,
}

impl StatementEntry {
    /// A well-formed credit entry.
    pub fn credit(amount: Decimal, currency: &CurrencyCode) -> Self {
        Self::with_direction(amount, currency, CreditDebit::Credit)
    }

    /// A well-formed debit entry.
    pub fn debit(amount: Decimal, currency: &CurrencyCode) -> Self {
        Self::with_direction(amount, currency, CreditDebit::Debit)
    }

    fn with_direction(amount: Decimal, currency: &CurrencyCode, direction: CreditDebit) -> Self {
        Self {
            amount_text: Some(format!("{:.2}", amount.round_dp(2))),
            currency: Some(currency.to_string()),
            direction_code: Some(direction.code().to_string()),
            ..Self::default()
        }
    }

    /// An entry built from arbitrary wire text.
    pub fn raw(amount_text: Option<&str>, currency: Option<&str>, direction_code: Option<&str>) -> Self {
        Self {
            amount_text: amount_text.map(str::to_string),
            currency: currency.map(str::to_string),
            direction_code: direction_code.map(str::to_string),
            ..Self::default()
        }
    }

    pub fn with_account_servicer_ref(mut self, reference: impl Into<String>) -> Self {
        self.account_servicer_ref = Some(reference.into());
        self
    }

    pub fn with_end_to_end_id(mut self, id: impl Into<String>) -> Self {
        self.end_to_end_id = Some(id.into());
        self
    }

    /// Record the counterparty account on the side implied by the direction:
    /// the debtor for credits, the creditor for debits.
    pub fn with_counterparty(mut self, account: impl Into<String>) -> Self {
        match self.direction() {
            Some(CreditDebit::Debit) => self.creditor_account = Some(account.into()),
            _ => self.debtor_account = Some(account.into()),
        }
        self
    }

    /// Parse the amount with exact decimal arithmetic.
    pub fn amount(&self) -> Result<Decimal, EntryAmountError> {
        let text = self.amount_text.as_deref().ok_or(EntryAmountError::Missing)?;
        let trimmed = text.trim();
        let amount = Decimal::from_str(trimmed)
            .map_err(|_| EntryAmountError::Invalid(text.to_string()))?;
        if amount.is_sign_negative() {
            return Err(EntryAmountError::Invalid(text.to_string()));
        }
        Ok(amount)
    }

    pub fn direction(&self) -> Option<CreditDebit> {
        self.direction_code.as_deref().and_then(CreditDebit::from_code)
    }

    /// Reference used for matching: the end-to-end id when present,
    /// otherwise the account servicer reference.
    pub fn reference(&self) -> Option<&str> {
        fn present(value: &Option<String>) -> Option<&str> {
            value.as_deref().map(str::trim).filter(|r| !r.is_empty())
        }
        present(&self.end_to_end_id).or_else(|| present(&self.account_servicer_ref))
    }

    /// The other side's account, if the statement carries one.
    pub fn counterparty_account(&self) -> Option<&str> {
        match self.direction() {
            Some(CreditDebit::Debit) => self.creditor_account.as_deref().or(self.debtor_account.as_deref()),
            _ => self.debtor_account.as_deref().or(self.creditor_account.as_deref()),
        }
    }
}

/// One `Stmt` block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub id: Option<String>,
    pub account: Option<String>,
    pub entries: Vec<StatementEntry>,
}

impl Statement {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn for_account(mut self, account: &AccountIdentifier) -> Self {
        self.account = Some(account.electronic_format());
        self
    }

    pub fn with_entry(mut self, entry: StatementEntry) -> Self {
        self.entries.push(entry);
        self
    }
}

/// Parse every `Stmt` block of a camt.053 document.
///
/// Element names are matched on their local part, so both prefixed and
/// default-namespace documents are accepted. Only `Ntry` elements inside a
/// `Stmt` are collected.
pub fn parse_statements(xml: &str) -> Result<Vec<Statement>, StatementError> {
    if xml.trim().is_empty() {
        return Err(StatementError::Empty);
    }

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut saw_root = false;
    let mut statements = Vec::new();
    let mut statement: Option<Statement> = None;
    let mut entry: Option<StatementEntry> = None;

    loop {
        let position = reader.buffer_position() as u64;
        let malformed = |message: String| StatementError::Malformed { position, message };

        match reader.read_event() {
            Err(err) => return Err(malformed(err.to_string())),
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                let name = local_name(&e);
                open_element(&name, &e, &path, position, &mut saw_root, &mut statement, &mut entry)?;
                path.push(name);
            }
            Ok(Event::Empty(e)) => {
                let name = local_name(&e);
                open_element(&name, &e, &path, position, &mut saw_root, &mut statement, &mut entry)?;
                close_element(&name, &mut statements, &mut statement, &mut entry);
            }
            Ok(Event::End(_)) => {
                if let Some(name) = path.pop() {
                    close_element(&name, &mut statements, &mut statement, &mut entry);
                }
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|err| malformed(err.to_string()))?;
                assign_text(&path, text.trim(), &mut statement, &mut entry);
            }
            Ok(Event::CData(c)) => {
                let bytes = c.into_inner();
                let text = String::from_utf8_lossy(&bytes);
                assign_text(&path, text.trim(), &mut statement, &mut entry);
            }
            Ok(_) => {}
        }
    }

    if !saw_root {
        return Err(StatementError::Empty);
    }
    if !path.is_empty() {
        return Err(StatementError::Malformed {
            position: xml.len() as u64,
            message: format!("unclosed element {:?}", path.join("/")),
        });
    }
    Ok(statements)
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn open_element(
    name: &str,
    e: &BytesStart<'_>,
    path: &[String],
    position: u64,
    saw_root: &mut bool,
    statement: &mut Option<Statement>,
    entry: &mut Option<StatementEntry>,
) -> Result<(), StatementError> {
    if path.is_empty() {
        if *saw_root {
            return Err(StatementError::Malformed {
                position,
                message: format!("second root element {name:?}"),
            });
        }
        if name != "Document" {
            return Err(StatementError::UnexpectedRoot(name.to_string()));
        }
        *saw_root = true;
        return Ok(());
    }

    match name {
        "Stmt" => *statement = Some(Statement::default()),
        "Ntry" if statement.is_some() => *entry = Some(StatementEntry::default()),
        "Amt" if path.last().map(String::as_str) == Some("Ntry") => {
            if let Some(entry) = entry.as_mut() {
                entry.amount_text = Some(String::new());
                entry.currency = attribute(e, b"Ccy")
                    .map_err(|message| StatementError::Malformed { position, message })?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn close_element(
    name: &str,
    statements: &mut Vec<Statement>,
    statement: &mut Option<Statement>,
    entry: &mut Option<StatementEntry>,
) {
    match name {
        "Ntry" => {
            if let (Some(done), Some(stmt)) = (entry.take(), statement.as_mut()) {
                stmt.entries.push(done);
            }
        }
        "Stmt" => {
            if let Some(done) = statement.take() {
                statements.push(done);
            }
        }
        _ => {}
    }
}

fn assign_text(
    path: &[String],
    text: &str,
    statement: &mut Option<Statement>,
    entry: &mut Option<StatementEntry>,
) {
    let tail: Vec<&str> = path.iter().rev().take(4).map(String::as_str).collect();

    if let Some(entry) = entry.as_mut() {
        match tail.as_slice() {
            ["Amt", "Ntry", ..] => entry.amount_text = Some(text.to_string()),
            ["CdtDbtInd", "Ntry", ..] => entry.direction_code = Some(text.to_string()),
            ["AcctSvcrRef", "Ntry", ..] => entry.account_servicer_ref = Some(text.to_string()),
            ["EndToEndId", "Refs", ..] if entry.end_to_end_id.is_none() => {
                entry.end_to_end_id = Some(text.to_string())
            }
            ["IBAN", "Id", "DbtrAcct", ..] if entry.debtor_account.is_none() => {
                entry.debtor_account = Some(text.to_string())
            }
            ["IBAN", "Id", "CdtrAcct", ..] if entry.creditor_account.is_none() => {
                entry.creditor_account = Some(text.to_string())
            }
            _ => {}
        }
        return;
    }

    if let Some(statement) = statement.as_mut() {
        match tail.as_slice() {
            ["Id", "Stmt", ..] => statement.id = Some(text.to_string()),
            ["IBAN", "Id", "Acct", "Stmt"] => statement.account = Some(text.to_string()),
            _ => {}
        }
    }
}

fn attribute(e: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>, String> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| err.to_string())?;
        if attr.key.local_name().as_ref() == name {
            let value = attr.unescape_value().map_err(|err| err.to_string())?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

/// Render statements as a camt.053 document.
pub fn render_statements(statements: &[Statement]) -> Result<String, XmlError> {
    let created = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, false);
    let mut w = XmlWriter::new();
    w.declaration()?;
    w.start("Document", &[("xmlns", CAMT053_NAMESPACE)])?;
    w.start("BkToCstmrStmt", &[])?;
    w.start("GrpHdr", &[])?;
    w.leaf("MsgId", &Uuid::new_v4().to_string())?;
    w.leaf("CreDtTm", &created)?;
    w.end("GrpHdr")?;

    for statement in statements {
        w.start("Stmt", &[])?;
        if let Some(id) = &statement.id {
            w.leaf("Id", id)?;
        }
        w.leaf("CreDtTm", &created)?;
        if let Some(account) = &statement.account {
            w.start("Acct", &[])?;
            w.start("Id", &[])?;
            w.leaf("IBAN", account)?;
            w.end("Id")?;
            w.end("Acct")?;
        }
        for entry in &statement.entries {
            write_entry(&mut w, entry)?;
        }
        w.end("Stmt")?;
    }

    w.end("BkToCstmrStmt")?;
    w.end("Document")?;
    w.finish()
}

fn write_entry(w: &mut XmlWriter, entry: &StatementEntry) -> Result<(), XmlError> {
    w.start("Ntry", &[])?;
    if let Some(amount) = &entry.amount_text {
        match &entry.currency {
            Some(ccy) => w.leaf_with("Amt", &[("Ccy", ccy.as_str())], amount)?,
            None => w.leaf("Amt", amount)?,
        }
    }
    if let Some(code) = &entry.direction_code {
        w.leaf("CdtDbtInd", code)?;
    }
    w.leaf("Sts", "BOOK")?;
    if let Some(reference) = &entry.account_servicer_ref {
        w.leaf("AcctSvcrRef", reference)?;
    }

    let has_details =
        entry.end_to_end_id.is_some() || entry.debtor_account.is_some() || entry.creditor_account.is_some();
    if has_details {
        w.start("NtryDtls", &[])?;
        w.start("TxDtls", &[])?;
        if let Some(id) = &entry.end_to_end_id {
            w.start("Refs", &[])?;
            w.leaf("EndToEndId", id)?;
            w.end("Refs")?;
        }
        if entry.debtor_account.is_some() || entry.creditor_account.is_some() {
            w.start("RltdPties", &[])?;
            for (tag, account) in [("DbtrAcct", &entry.debtor_account), ("CdtrAcct", &entry.creditor_account)] {
                if let Some(account) = account {
                    w.start(tag, &[])?;
                    w.start("Id", &[])?;
                    w.leaf("IBAN", account)?;
                    w.end("Id")?;
                    w.end(tag)?;
                }
            }
            w.end("RltdPties")?;
        }
        w.end("TxDtls")?;
        w.end("NtryDtls")?;
    }
    w.end("Ntry")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Document xmlns="urn:iso:std:iso:20022:tech:xsd:camt.053.001.02">
  <BkToCstmrStmt>
    <Stmt>
      <Id>STMT-1</Id>
      <Acct><Id><IBAN>DE89370400440532013000</IBAN></Id></Acct>
      <Bal><Amt Ccy="EUR">500.00</Amt><CdtDbtInd>CRDT</CdtDbtInd></Bal>
      <Ntry>
        <Amt Ccy="EUR">100.00</Amt>
        <CdtDbtInd>CRDT</CdtDbtInd>
        <AcctSvcrRef>BANK-REF-1</AcctSvcrRef>
        <NtryDtls><TxDtls>
          <Refs><EndToEndId>E2E-abc</EndToEndId></Refs>
          <AmtDtls><TxAmt><Amt Ccy="EUR">100.00</Amt></TxAmt></AmtDtls>
          <RltdPties><DbtrAcct><Id><IBAN>GB82WEST12345698765432</IBAN></Id></DbtrAcct></RltdPties>
        </TxDtls></NtryDtls>
      </Ntry>
      <Ntry>
        <Amt Ccy="EUR">12,5</Amt>
        <CdtDbtInd>DBIT</CdtDbtInd>
      </Ntry>
    </Stmt>
    <Stmt>
      <Ntry><Amt Ccy="USD">7.00</Amt><CdtDbtInd>DBIT</CdtDbtInd></Ntry>
    </Stmt>
  </BkToCstmrStmt>
</Document>"#;

    #[test]
    fn test_blank_end_to_end_id_falls_back() {
        let eur = CurrencyCode::new("EUR");
        let entry = StatementEntry::credit(dec!(1.00), &eur)
            .with_end_to_end_id("   ")
            .with_account_servicer_ref("BANK-REF-9");
        assert_eq!(entry.reference(), Some("BANK-REF-9"));

        let blank = StatementEntry::credit(dec!(1.00), &eur)
            .with_end_to_end_id("")
            .with_account_servicer_ref(" ");
        assert_eq!(blank.reference(), None);
    }

    #[test]
    fn test_parse_sample() {
        let statements = parse_statements(SAMPLE).unwrap();
        assert_eq!(statements.len(), 2);

        let first = &statements[0];
        assert_eq!(first.id.as_deref(), Some("STMT-1"));
        assert_eq!(first.account.as_deref(), Some("DE89370400440532013000"));
        assert_eq!(first.entries.len(), 2);

        let e = &first.entries[0];
        assert_eq!(e.amount(), Ok(dec!(100.00)));
        assert_eq!(e.currency.as_deref(), Some("EUR"));
        assert_eq!(e.direction(), Some(CreditDebit::Credit));
        assert_eq!(e.reference(), Some("E2E-abc"));
        assert_eq!(e.account_servicer_ref.as_deref(), Some("BANK-REF-1"));
        assert_eq!(e.counterparty_account(), Some("GB82WEST12345698765432"));

        assert_eq!(
            first.entries[1].amount(),
            Err(EntryAmountError::Invalid("12,5".to_string()))
        );
        assert_eq!(statements[1].entries[0].direction(), Some(CreditDebit::Debit));
    }

    #[test]
    fn test_balance_amounts_are_not_entries() {
        let statements = parse_statements(SAMPLE).unwrap();
        let total: usize = statements.iter().map(|s| s.entries.len()).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn test_prefixed_elements() {
        let xml = r#"<c:Document xmlns:c="urn:iso:std:iso:20022:tech:xsd:camt.053.001.02">
            <c:BkToCstmrStmt><c:Stmt><c:Ntry>
              <c:Amt Ccy="CHF">3.10</c:Amt><c:CdtDbtInd>CRDT</c:CdtDbtInd>
            </c:Ntry></c:Stmt></c:BkToCstmrStmt></c:Document>"#;
        let statements = parse_statements(xml).unwrap();
        assert_eq!(statements[0].entries[0].amount(), Ok(dec!(3.10)));
        assert_eq!(statements[0].entries[0].currency.as_deref(), Some("CHF"));
    }

    #[test]
    fn test_missing_and_empty_amounts() {
        let xml = r#"<Document><BkToCstmrStmt><Stmt>
            <Ntry><CdtDbtInd>CRDT</CdtDbtInd></Ntry>
            <Ntry><Amt Ccy="EUR"/><CdtDbtInd>CRDT</CdtDbtInd></Ntry>
        </Stmt></BkToCstmrStmt></Document>"#;
        let statements = parse_statements(xml).unwrap();
        assert_eq!(statements[0].entries[0].amount(), Err(EntryAmountError::Missing));
        assert_eq!(
            statements[0].entries[1].amount(),
            Err(EntryAmountError::Invalid(String::new()))
        );
    }

    #[test]
    fn test_negative_amount_text_is_invalid() {
        let entry = StatementEntry::raw(Some("-5.00"), Some("EUR"), Some("CRDT"));
        assert_eq!(entry.amount(), Err(EntryAmountError::Invalid("-5.00".to_string())));
    }

    #[test]
    fn test_document_level_errors() {
        assert_eq!(parse_statements("   "), Err(StatementError::Empty));
        assert!(matches!(
            parse_statements("<Document><Stmt></Document>"),
            Err(StatementError::Malformed { .. })
        ));
        assert_eq!(
            parse_statements("<Report/>"),
            Err(StatementError::UnexpectedRoot("Report".to_string()))
        );
        assert!(matches!(
            parse_statements("<Document><BkToCstmrStmt>"),
            Err(StatementError::Malformed { .. })
        ));
    }

    #[test]
    fn test_render_then_parse_preserves_entries() {
        let eur = CurrencyCode::new("EUR");
        let statement = Statement::new("S-9")
            .with_entry(
                StatementEntry::credit(dec!(10), &eur)
                    .with_end_to_end_id("E2E-1")
                    .with_counterparty("GB82WEST12345698765432"),
            )
            .with_entry(StatementEntry::debit(dec!(2.5), &eur).with_account_servicer_ref("R-2"))
            .with_entry(StatementEntry::raw(Some("abc"), Some("EUR"), Some("CRDT")))
            .with_entry(StatementEntry::raw(Some("1.00"), Some("EUR"), Some("BOOK")));

        let xml = render_statements(std::slice::from_ref(&statement)).unwrap();
        assert!(xml.contains("<Amt Ccy=\"EUR\">10.00</Amt>"));

        let parsed = parse_statements(&xml).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].entries, statement.entries);
    }

    #[test]
    fn test_signed_direction() {
        assert_eq!(CreditDebit::Credit.signed(dec!(4)), dec!(4));
        assert_eq!(CreditDebit::Debit.signed(dec!(4)), dec!(-4));
        assert_eq!(CreditDebit::from_code("OPBD"), None);
    }
}
