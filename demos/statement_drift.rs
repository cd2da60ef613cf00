//! Drift detection on a generated bank statement.
//!
//! Generates a noisy camt.053 document, reconciles it, and shows how the
//! tolerance decides between a report and a drift failure.

use payment_rail::core::currency::CurrencyCode;
use payment_rail::messaging::camt053::{render_statements, Statement, StatementEntry};
use payment_rail::reconciliation::{ReconciliationEngine, ReconciliationError};
use payment_rail::simulation::statement_gen::{generate_statement, StatementConfig};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    println!("╔══════════════════════════════════════════╗");
    println!("║  payment-rail: Statement Drift Example   ║");
    println!("╚══════════════════════════════════════════╝\n");

    // --- Scenario 1: Balanced statement with noise ---
    println!("━━━ Scenario 1: Balanced Statement ━━━\n");
    let balanced = generate_statement(&StatementConfig {
        entries: 50,
        invalid_ratio: 0.1,
        informational_ratio: 0.05,
        balanced: true,
        seed: Some(7),
        ..Default::default()
    })?;
    println!("  Entries:        {}", balanced.total_entries());
    println!("  Garbled:        {}", balanced.invalid_entries);
    println!("  Informational:  {}", balanced.informational_entries);

    let report = ReconciliationEngine::default().reconcile(&balanced.xml)?;
    println!("  Drift:          {}", report.drift());
    println!("  Issues:         {}", report.issues().len());
    for issue in report.issue_descriptions() {
        println!("    {}", issue);
    }
    println!();

    // --- Scenario 2: Unbalanced statement ---
    println!("━━━ Scenario 2: Unbalanced Statement ━━━\n");
    let unbalanced = generate_statement(&StatementConfig {
        entries: 20,
        seed: Some(11),
        ..Default::default()
    })?;
    println!("  Expected drift: {}", unbalanced.expected_drift);

    match ReconciliationEngine::default().reconcile(&unbalanced.xml) {
        Ok(report) => println!("  Within tolerance, drift {}", report.drift()),
        Err(ReconciliationError::DriftExceeded { drift, tolerance, .. }) => {
            println!("  Rejected: drift {} exceeds tolerance {}", drift, tolerance)
        }
        Err(other) => return Err(other.into()),
    }

    let lenient = ReconciliationEngine::with_tolerance(Decimal::MAX);
    let report = lenient.reconcile(&unbalanced.xml)?;
    println!("  Credits {} - debits {} = {}", report.credits(), report.debits(), report.drift());
    println!();

    // --- Scenario 3: The cent boundary ---
    println!("━━━ Scenario 3: One-Cent Boundary ━━━\n");
    let eur = CurrencyCode::new("EUR");
    for (credit, debit) in [(dec!(100.00), dec!(99.99)), (dec!(100.00), dec!(99.98))] {
        let document = render_statements(&[Statement::new("EDGE")
            .with_entry(StatementEntry::credit(credit, &eur))
            .with_entry(StatementEntry::debit(debit, &eur))])?;
        let verdict = match ReconciliationEngine::default().reconcile(&document) {
            Ok(_) => "accepted",
            Err(_) => "rejected",
        };
        println!("  {} - {} = {:>5}  {}", credit, debit, credit - debit, verdict);
    }
    Ok(())
}
