//! End-to-end payment flow.
//!
//! Issues two account identifiers, builds a pacs.008 instruction, posts the
//! money movement to an in-memory ledger and reconciles the bank statement
//! that reports it.

use payment_rail::core::currency::CurrencyCode;
use payment_rail::core::iban;
use payment_rail::core::party::Party;
use payment_rail::ledger::{
    from_minor_units, to_minor_units, AccountId, GatewayConfig, InMemoryLedger, LedgerGateway, NewAccount, NewTransfer, TransferId,
    LARGE_DEPOSIT_CODE,
};
use payment_rail::messaging::camt053::{render_statements, Statement, StatementEntry};
use payment_rail::messaging::pacs008::PaymentInstruction;
use payment_rail::reconciliation::ReconciliationEngine;
use rust_decimal_macros::dec;
use std::error::Error;
use std::sync::Arc;

const VAULT: AccountId = AccountId::new(1_001);
const ALICE: AccountId = AccountId::new(2_001);
const BOB: AccountId = AccountId::new(2_002);

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    println!("╔══════════════════════════════════════════╗");
    println!("║  payment-rail: End-to-End Payment Flow   ║");
    println!("╚══════════════════════════════════════════╝\n");

    // --- Step 1: Identifiers ---
    println!("━━━ Step 1: Account Identifiers ━━━\n");
    let alice_iban = iban::generate("DE", "37040044", "0532013000")?;
    let bob_iban = iban::generate("GB", "WEST123456", "98765432")?;
    println!("  Alice: {}", alice_iban.to_print_format());
    println!("  Bob:   {}", bob_iban.to_print_format());
    println!("  Both valid: {}\n", iban::validate(&alice_iban) && iban::validate(&bob_iban));

    // --- Step 2: Ledger accounts ---
    println!("━━━ Step 2: Ledger Accounts ━━━\n");
    let gateway = LedgerGateway::new(Arc::new(InMemoryLedger::new()), GatewayConfig::default());
    let failures = gateway
        .create_accounts(&[
            NewAccount::vault(VAULT),
            NewAccount::customer_deposit(ALICE).with_identifier(alice_iban.clone()),
            NewAccount::customer_deposit(BOB).with_identifier(bob_iban.clone()),
        ])
        .await?;
    println!("  Created 3 accounts, {} failures\n", failures.len());

    let deposit = NewTransfer::new(TransferId::random(), ALICE, VAULT, 500_000, LARGE_DEPOSIT_CODE)
        .with_end_to_end_id("E2E-DEPOSIT00001");
    println!("  Deposit 5000.00 EUR: {:?}\n", gateway.post_transfer(deposit).await?);

    // --- Step 3: Instruction ---
    println!("━━━ Step 3: pacs.008 Instruction ━━━\n");
    let instruction = PaymentInstruction::builder(
        Party::new("Alice Example", alice_iban.clone()),
        Party::new("Bob Example", bob_iban.clone()),
        dec!(1250.40),
        "EUR",
    )
    .remittance_info("Invoice 2024-117")
    .build()?;
    println!("  End-to-end id: {}", instruction.end_to_end_id());
    println!("  Control sum:   {}", instruction.control_sum());
    println!("{}\n", instruction.to_xml()?);

    // --- Step 4: Posting ---
    println!("━━━ Step 4: Ledger Posting ━━━\n");
    let payout_id = TransferId::random();
    let minor = to_minor_units(instruction.amount(), 2).ok_or("amount out of range")?;
    let payout = NewTransfer::new(payout_id, VAULT, BOB, minor, 1).with_end_to_end_id(instruction.end_to_end_id());
    println!("  First submit:  {:?}", gateway.post_transfer(payout.clone()).await?);
    println!("  Retry:         {:?}", gateway.post_transfer(payout).await?);

    if let Some(vault) = gateway.lookup_account(VAULT).await? {
        let display = |units: u128| from_minor_units(units, 2).map_or(units.to_string(), |d| d.to_string());
        println!("  Vault credits: {} EUR", display(vault.credits_posted));
        println!("  Vault debits:  {} EUR\n", display(vault.debits_posted));
    }

    // --- Step 5: Reconciliation ---
    println!("━━━ Step 5: camt.053 Reconciliation ━━━\n");
    let eur = CurrencyCode::new("EUR");
    let statement = Statement::new("STMT-DEMO-001")
        .for_account(&bob_iban)
        .with_entry(
            StatementEntry::credit(instruction.amount(), &eur)
                .with_end_to_end_id(instruction.end_to_end_id())
                .with_counterparty(alice_iban.electronic_format()),
        )
        .with_entry(StatementEntry::debit(instruction.amount(), &eur).with_account_servicer_ref(payout_id.to_string()))
        .with_entry(StatementEntry::debit(dec!(9.99), &eur).with_account_servicer_ref("BANK-FEE-77"))
        .with_entry(StatementEntry::credit(dec!(9.99), &eur));
    let document = render_statements(&[statement])?;

    let report = ReconciliationEngine::default().reconcile_with(&document, &gateway.known_transfers())?;
    println!("  Entries:  {}", report.total_entries());
    println!("  Matched:  {}", report.matched());
    println!("  Drift:    {}", report.drift());
    for issue in report.issue_descriptions() {
        println!("  Issue:    {}", issue);
    }

    println!("\n━━━ Interpretation ━━━\n");
    println!("  The retry reused the transfer id, so the ledger moved the money");
    println!("  once. The bank fee has no ledger counterpart and shows up as an");
    println!("  unmatched reference while the drift stays at zero.");
    Ok(())
}
