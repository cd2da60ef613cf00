//! Random camt.053 statements with a known drift.
//!
//! Used by benches, property tests and the `generate` command to exercise
//! the reconciliation engine with realistic noise: garbled amounts and
//! balance marker lines mixed in with ordinary credits and debits.

use crate::core::currency::CurrencyCode;
use crate::ledger::types::to_minor_units;
use crate::messaging::camt053::{render_statements, Statement, StatementEntry};
use crate::messaging::XmlError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use uuid::Uuid;

const GARBLED_AMOUNTS: [&str; 4] = ["12,50", "N/A", "1.2.3", "ten"];
const MARKER_CODES: [&str; 2] = ["OPBD", "CLBD"];
/// Largest amount in cents that still fits `Decimal::new`.
const MAX_CENTS: u64 = i64::MAX.unsigned_abs();

/// Configuration for a generated statement.
#[derive(Debug, Clone)]
pub struct StatementConfig {
    /// Number of entries before any balancing entry is added.
    pub entries: usize,
    pub currency: CurrencyCode,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    /// Share of entries carrying an unparseable amount.
    pub invalid_ratio: f64,
    /// Share of entries with a balance-marker direction code.
    pub informational_ratio: f64,
    /// Append one entry that brings the drift back to zero.
    pub balanced: bool,
    /// Fixed seed: ids, amounts and references repeat across runs.
    pub seed: Option<u64>,
}

impl Default for StatementConfig {
    fn default() -> Self {
        Self {
            entries: 100,
            currency: CurrencyCode::new("EUR"),
            min_amount: Decimal::new(1, 2),
            max_amount: Decimal::from(10_000),
            invalid_ratio: 0.0,
            informational_ratio: 0.0,
            balanced: false,
            seed: None,
        }
    }
}

/// A generated document and what reconciling it should yield.
#[derive(Debug, Clone)]
pub struct GeneratedStatement {
    pub xml: String,
    pub statement: Statement,
    /// Exact signed sum of the valid entries.
    pub expected_drift: Decimal,
    pub valid_entries: usize,
    pub invalid_entries: usize,
    pub informational_entries: usize,
    /// End-to-end ids carried by the valid entries.
    pub references: Vec<String>,
}

impl GeneratedStatement {
    pub fn total_entries(&self) -> usize {
        self.statement.entries.len()
    }
}

pub fn generate_statement(config: &StatementConfig) -> Result<GeneratedStatement, XmlError> {
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let min_cents = clamp_cents(to_minor_units(config.min_amount, 2).unwrap_or(1)).max(1);
    let max_cents = to_minor_units(config.max_amount, 2)
        .map(clamp_cents)
        .unwrap_or(min_cents)
        .max(min_cents);

    let mut statement = Statement::new(format!("STMT-{}", short_hex(&mut rng, 12)));
    let mut generated = GeneratedStatement {
        xml: String::new(),
        statement: Statement::default(),
        expected_drift: Decimal::ZERO,
        valid_entries: 0,
        invalid_entries: 0,
        informational_entries: 0,
        references: Vec::new(),
    };

    for _ in 0..config.entries {
        let cents = rng.gen_range(min_cents..=max_cents);
        let amount = Decimal::new(i64::try_from(cents).unwrap_or(i64::MAX), 2);
        let roll: f64 = rng.gen();

        let entry = if roll < config.invalid_ratio {
            generated.invalid_entries += 1;
            let garbled = GARBLED_AMOUNTS[rng.gen_range(0..GARBLED_AMOUNTS.len())];
            let direction = if rng.gen_bool(0.5) { "CRDT" } else { "DBIT" };
            StatementEntry::raw(Some(garbled), Some(config.currency.as_str()), Some(direction))
        } else if roll < config.invalid_ratio + config.informational_ratio {
            generated.informational_entries += 1;
            let code = MARKER_CODES[rng.gen_range(0..MARKER_CODES.len())];
            StatementEntry::raw(Some(&amount.to_string()), Some(config.currency.as_str()), Some(code))
        } else {
            let entry = if rng.gen_bool(0.5) {
                generated.expected_drift += amount;
                StatementEntry::credit(amount, &config.currency)
            } else {
                generated.expected_drift -= amount;
                StatementEntry::debit(amount, &config.currency)
            };
            valid(&mut generated, &mut rng, entry)
        };
        statement.entries.push(entry);
    }

    if config.balanced && !generated.expected_drift.is_zero() {
        let drift = generated.expected_drift;
        let entry = if drift.is_sign_positive() {
            StatementEntry::debit(drift, &config.currency)
        } else {
            StatementEntry::credit(-drift, &config.currency)
        };
        generated.expected_drift = Decimal::ZERO;
        let entry = valid(&mut generated, &mut rng, entry);
        statement.entries.push(entry);
    }

    generated.xml = render_statements(std::slice::from_ref(&statement))?;
    generated.statement = statement;
    Ok(generated)
}

fn valid(generated: &mut GeneratedStatement, rng: &mut StdRng, entry: StatementEntry) -> StatementEntry {
    let reference = format!("E2E-{}", short_hex(rng, 12));
    generated.valid_entries += 1;
    generated.references.push(reference.clone());
    entry.with_end_to_end_id(reference)
}

fn clamp_cents(cents: u128) -> u64 {
    u64::try_from(cents).unwrap_or(u64::MAX).min(MAX_CENTS)
}

/// Upper-case hex drawn from `rng`, so seeded runs repeat exactly.
fn short_hex(rng: &mut StdRng, len: usize) -> String {
    Uuid::from_u128(rng.gen()).simple().to_string()[..len].to_uppercase()
}
