use payment_rail::core::currency::CurrencyCode;
use payment_rail::core::iban::{self, AccountIdentifier};
use payment_rail::core::party::Party;
use payment_rail::ledger::{AccountId, GatewayConfig, InMemoryLedger, LedgerGateway, NewAccount, NewTransfer, TransferId};
use payment_rail::messaging::camt053::{render_statements, Statement, StatementEntry};
use payment_rail::messaging::pacs008::{format_amount, PaymentInstruction};
use payment_rail::reconciliation::{reconcile, ReconciliationEngine, ReconciliationError};
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

/// Country codes as two upper-case letters.
fn arb_country() -> impl Strategy<Value = String> {
    "[A-Z]{2}"
}

/// Bank code and account number that fit the 34 character limit.
fn arb_bban_parts() -> impl Strategy<Value = (String, String)> {
    ("[0-9A-Z]{1,10}", "[0-9]{1,18}")
}

/// Positive amounts in cents, up to one million.
fn arb_amount() -> impl Strategy<Value = Decimal> {
    (1i64..100_000_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

fn eur() -> CurrencyCode {
    CurrencyCode::new("EUR")
}

fn parties() -> (Party, Party) {
    (
        Party::new("Debtor", iban::generate("DE", "37040044", "0532013000").unwrap()),
        Party::new("Creditor", iban::generate("GB", "WEST123456", "98765432").unwrap()),
    )
}

fn document(entries: Vec<StatementEntry>) -> String {
    let statement = entries
        .into_iter()
        .fold(Statement::new("PROP"), Statement::with_entry);
    render_statements(&[statement]).unwrap()
}

proptest! {
    // ===================================================================
    // INVARIANT 1: Generated identifiers always validate.
    // ===================================================================
    #[test]
    fn generated_identifiers_validate(country in arb_country(), (bank, account) in arb_bban_parts()) {
        let id = iban::generate(&country, &bank, &account).unwrap();
        prop_assert!(iban::validate(&id), "{} must validate", id);
        prop_assert!(iban::validate_str(&id.to_print_format()));
        prop_assert_eq!(id.to_string().parse::<AccountIdentifier>().unwrap().to_string(), id.to_string());
    }

    // ===================================================================
    // INVARIANT 2: Changing one check digit breaks validation.
    //
    // A single-digit change alters the expanded value by less than 97,
    // so the remainder can never come out right.
    // ===================================================================
    #[test]
    fn single_check_digit_change_detected(
        country in arb_country(),
        (bank, account) in arb_bban_parts(),
        position in 0usize..2,
        delta in 1u32..10,
    ) {
        let id = iban::generate(&country, &bank, &account).unwrap();
        let mut digits: Vec<char> = id.check_digits().chars().collect();
        let original = digits[position].to_digit(10).unwrap();
        digits[position] = char::from_digit((original + delta) % 10, 10).unwrap();
        let tampered = id.with_check_digits(digits.into_iter().collect::<String>());
        prop_assert!(!iban::validate(&tampered), "{} must not validate", tampered);
    }

    // ===================================================================
    // INVARIANT 3: Control sum equals the amount; exactly one transaction.
    // ===================================================================
    #[test]
    fn control_sum_matches_amount(amount in arb_amount()) {
        let (debtor, creditor) = parties();
        let instruction = PaymentInstruction::builder(debtor, creditor, amount, "EUR").build().unwrap();
        prop_assert_eq!(instruction.control_sum(), amount);
        prop_assert_eq!(instruction.transaction_count(), 1);

        let xml = instruction.to_xml().unwrap();
        let rendered = format_amount(amount);
        let ctrl_sum = format!("<CtrlSum>{}</CtrlSum>", rendered);
        let instructed = format!("<InstdAmt Ccy=\"EUR\">{}</InstdAmt>", rendered);
        prop_assert!(xml.contains("<NbOfTxs>1</NbOfTxs>"));
        prop_assert!(xml.contains(&ctrl_sum));
        prop_assert!(xml.contains(&instructed));
    }

    // ===================================================================
    // INVARIANT 4: Long remittance text is cut to exactly 140 characters.
    // ===================================================================
    #[test]
    fn remittance_truncated_to_140(text in "[a-zA-Z0-9 äöüé€]{141,400}") {
        let (debtor, creditor) = parties();
        let instruction = PaymentInstruction::builder(debtor, creditor, dec!(1), "EUR")
            .remittance_info(text.clone())
            .build()
            .unwrap();
        let kept = instruction.remittance_info().unwrap();
        prop_assert_eq!(kept.chars().count(), 140);
        prop_assert!(text.starts_with(kept));
    }

    // ===================================================================
    // INVARIANT 5: Balanced statements reconcile clean with zero drift.
    // ===================================================================
    #[test]
    fn balanced_statement_is_clean(amounts in prop::collection::vec(arb_amount(), 0..40)) {
        let mut entries = Vec::new();
        for amount in &amounts {
            entries.push(StatementEntry::credit(*amount, &eur()));
        }
        for amount in amounts.iter().rev() {
            entries.push(StatementEntry::debit(*amount, &eur()));
        }
        let report = reconcile(&document(entries), dec!(0.01)).unwrap();
        prop_assert!(report.issues().is_empty());
        prop_assert_eq!(report.drift(), Decimal::ZERO);
        prop_assert_eq!(report.total_entries(), amounts.len() * 2);
    }

    // ===================================================================
    // INVARIANT 6: One garbled amount among N valid entries.
    //
    // The garbled entry is counted and reported, never summed.
    // ===================================================================
    #[test]
    fn garbled_amount_is_reported_not_summed(
        signed in prop::collection::vec((arb_amount(), any::<bool>()), 1..30),
        slot in any::<prop::sample::Index>(),
    ) {
        let mut entries: Vec<StatementEntry> = signed
            .iter()
            .map(|(amount, credit)| if *credit {
                StatementEntry::credit(*amount, &eur())
            } else {
                StatementEntry::debit(*amount, &eur())
            })
            .collect();
        let expected: Decimal = signed
            .iter()
            .map(|(amount, credit)| if *credit { *amount } else { -*amount })
            .sum();
        let position = slot.index(entries.len() + 1);
        entries.insert(position, StatementEntry::raw(Some("12,50"), Some("EUR"), Some("CRDT")));

        let engine = ReconciliationEngine::with_tolerance(Decimal::MAX);
        let report = engine.reconcile(&document(entries)).unwrap();
        prop_assert_eq!(report.total_entries(), signed.len() + 1);
        prop_assert_eq!(report.issues().len(), 1);
        prop_assert_eq!(report.issues()[0].entry, position);
        prop_assert_eq!(report.drift(), expected);
    }

    // ===================================================================
    // INVARIANT 7: Drift fails exactly when it exceeds one cent.
    // ===================================================================
    #[test]
    fn drift_fails_iff_over_tolerance(credit in arb_amount(), debit in arb_amount()) {
        let doc = document(vec![
            StatementEntry::credit(credit, &eur()),
            StatementEntry::debit(debit, &eur()),
        ]);
        let drift = credit - debit;
        match reconcile(&doc, dec!(0.01)) {
            Ok(report) => {
                prop_assert!(drift.abs() <= dec!(0.01));
                prop_assert_eq!(report.drift(), drift);
            }
            Err(ReconciliationError::DriftExceeded { drift: reported, .. }) => {
                prop_assert!(drift.abs() > dec!(0.01));
                prop_assert_eq!(reported, drift);
            }
            Err(other) => prop_assert!(false, "unexpected error: {}", other),
        }
    }

    // ===================================================================
    // INVARIANT 8: Reconciliation is deterministic.
    // ===================================================================
    #[test]
    fn reconciliation_is_deterministic(amounts in prop::collection::vec(arb_amount(), 1..20)) {
        let entries: Vec<StatementEntry> = amounts
            .iter()
            .enumerate()
            .map(|(i, amount)| if i % 2 == 0 {
                StatementEntry::credit(*amount, &eur())
            } else {
                StatementEntry::debit(*amount, &eur())
            })
            .collect();
        let doc = document(entries);
        let engine = ReconciliationEngine::with_tolerance(Decimal::MAX);
        prop_assert_eq!(engine.reconcile(&doc).unwrap(), engine.reconcile(&doc).unwrap());
    }

    // ===================================================================
    // INVARIANT 9: Posting the same transfer twice moves money once.
    // ===================================================================
    #[test]
    fn repeated_post_applies_once(amount in 1u128..1_000_000, repeats in 2usize..5) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let (debits, credits) = runtime.block_on(async {
            let gateway = LedgerGateway::new(Arc::new(InMemoryLedger::new()), GatewayConfig::default());
            gateway.create_account(NewAccount::vault(AccountId::new(1))).await.unwrap();
            gateway.create_account(NewAccount::customer_deposit(AccountId::new(2))).await.unwrap();
            let transfer = NewTransfer::new(TransferId::new(77), AccountId::new(2), AccountId::new(1), amount, 1);
            for _ in 0..repeats {
                gateway.post_transfer(transfer.clone()).await.unwrap();
            }
            let vault = gateway.lookup_account(AccountId::new(1)).await.unwrap().unwrap();
            let custody = gateway.lookup_account(AccountId::new(2)).await.unwrap().unwrap();
            (custody.debits_posted, vault.credits_posted)
        });
        prop_assert_eq!(debits, amount);
        prop_assert_eq!(credits, amount);
    }
}
