//! payment-rail CLI
//!
//! Batch tooling around the payment rail core.
//!
//! # Usage
//!
//! ```bash
//! # Generate an account identifier
//! payment-rail iban --country DE --bank 37040044 --account 0532013000
//!
//! # Check identifiers
//! payment-rail validate DE89370400440532013000 "GB82 WEST 1234 5698 7654 32"
//!
//! # Build a pacs.008 instruction
//! payment-rail pacs008 --debtor-name Alice --debtor-iban DE89370400440532013000 \
//!     --creditor-name Bob --creditor-iban GB82WEST12345698765432 --amount 250.00 --currency EUR
//!
//! # Reconcile a camt.053 statement
//! payment-rail reconcile --input statement.xml --format json
//!
//! # Generate a random statement for testing
//! payment-rail generate --entries 500 --balanced
//! ```

use payment_rail::core::currency::CurrencyCode;
use payment_rail::core::iban::{self, AccountIdentifier};
use payment_rail::core::party::Party;
use payment_rail::messaging::pacs008::{PaymentInstruction, SettlementMethod};
use payment_rail::reconciliation::{ReconcileOptions, ReconciliationEngine, ReconciliationError, ReconciliationReport};
use payment_rail::simulation::statement_gen::{generate_statement, StatementConfig};
use rust_decimal::Decimal;
use std::fs;
use std::process;

fn print_usage() {
    eprintln!(
        r#"payment-rail: ISO 20022 payment rail core

USAGE:
    payment-rail <COMMAND> [OPTIONS]

COMMANDS:
    iban        Generate an account identifier with Mod-97-10 check digits
    validate    Validate one or more account identifiers
    pacs008     Build a pacs.008 credit transfer instruction
    reconcile   Reconcile a camt.053 statement
    generate    Generate a random camt.053 statement (for testing)
    help        Show this message

OPTIONS (iban):
    --country <CC>          Two-letter country code
    --bank <CODE>           Bank code
    --account <NUMBER>      Account number
    --format <FORMAT>       Output format: text (default) or json

OPTIONS (pacs008):
    --debtor-name <NAME>    --debtor-iban <IBAN>
    --creditor-name <NAME>  --creditor-iban <IBAN>
    --amount <DECIMAL>      --currency <CCY>
    --end-to-end-id <ID>    --remittance <TEXT>
    --method <CODE>         INST (default), CLRG, INDA, INGA, COVE
    --output <FILE>         Write to file instead of stdout

OPTIONS (reconcile):
    --input <FILE>          Path to camt.053 document
    --tolerance <DECIMAL>   Accepted absolute drift (default: 0.01)
    --currency <CCY>        Report entries in any other currency
    --format <FORMAT>       Output format: text (default) or json

OPTIONS (generate):
    --entries <N>           Number of entries (default: 100)
    --currency <CCY>        Entry currency (default: EUR)
    --invalid-ratio <F>     Share of garbled amounts (default: 0)
    --balanced              Append an entry that zeroes the drift
    --seed <N>              Seed for reproducible amounts
    --output <FILE>         Write to file instead of stdout

EXAMPLES:
    payment-rail iban --country GB --bank WEST123456 --account 98765432
    payment-rail reconcile --input statement.xml --tolerance 0.05
    payment-rail generate --entries 1000 --invalid-ratio 0.02 --output test.xml"#
    );
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}", message);
    process::exit(1);
}

/// Split `--flag value` pairs; bare flags listed in `switches` take no value.
fn parse_options(args: &[String], switches: &[&str]) -> Vec<(String, Option<String>)> {
    let mut options = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        if !flag.starts_with("--") {
            fail(format!("unexpected argument '{}'", flag));
        }
        if switches.contains(&flag) {
            options.push((flag.to_string(), None));
        } else {
            i += 1;
            let value = args
                .get(i)
                .cloned()
                .unwrap_or_else(|| fail(format!("{} requires a value", flag)));
            options.push((flag.to_string(), Some(value)));
        }
        i += 1;
    }
    options
}

fn parse_decimal(flag: &str, value: &str) -> Decimal {
    value
        .parse()
        .unwrap_or_else(|e| fail(format!("invalid {} '{}': {}", flag, value, e)))
}

fn parse_identifier(flag: &str, value: &str) -> AccountIdentifier {
    value
        .parse()
        .unwrap_or_else(|e| fail(format!("invalid {} '{}': {}", flag, value, e)))
}

fn emit(text: &str, output_path: Option<&str>) {
    match output_path {
        Some(path) => {
            fs::write(path, text).unwrap_or_else(|e| fail(format!("writing to '{}': {}", path, e)));
            eprintln!("Wrote {} bytes → {}", text.len(), path);
        }
        None => print!("{}", text),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| fail(e))
}

fn cmd_iban(args: &[String]) {
    let mut country = None;
    let mut bank = None;
    let mut account = None;
    let mut format = "text".to_string();
    for (flag, value) in parse_options(args, &[]) {
        let value = value.unwrap_or_default();
        match flag.as_str() {
            "--country" => country = Some(value),
            "--bank" => bank = Some(value),
            "--account" => account = Some(value),
            "--format" => format = value,
            _ => fail(format!("unknown option: {}", flag)),
        }
    }

    let (Some(country), Some(bank), Some(account)) = (country, bank, account) else {
        fail("--country, --bank and --account are required");
    };
    let identifier = iban::generate(&country, &bank, &account).unwrap_or_else(|e| fail(e));

    if format == "json" {
        #[derive(serde::Serialize)]
        struct IbanOutput {
            electronic: String,
            print: String,
            check_digits: String,
        }
        let output = IbanOutput {
            electronic: identifier.electronic_format(),
            print: identifier.to_print_format(),
            check_digits: identifier.check_digits().to_string(),
        };
        println!("{}", to_json(&output));
    } else {
        println!("{}", identifier);
        println!("{}", identifier.to_print_format());
    }
}

fn cmd_validate(args: &[String]) {
    if args.is_empty() {
        fail("validate requires at least one identifier");
    }
    let mut all_valid = true;
    for candidate in args {
        let valid = iban::validate_str(candidate);
        all_valid &= valid;
        println!("{:<8} {}", if valid { "VALID" } else { "INVALID" }, candidate);
    }
    if !all_valid {
        process::exit(1);
    }
}

fn cmd_pacs008(args: &[String]) {
    let mut debtor_name = None;
    let mut debtor_iban = None;
    let mut creditor_name = None;
    let mut creditor_iban = None;
    let mut amount = None;
    let mut currency = None;
    let mut end_to_end_id = None;
    let mut remittance = None;
    let mut method = SettlementMethod::default();
    let mut output_path = None;

    for (flag, value) in parse_options(args, &[]) {
        let value = value.unwrap_or_default();
        match flag.as_str() {
            "--debtor-name" => debtor_name = Some(value),
            "--debtor-iban" => debtor_iban = Some(parse_identifier(&flag, &value)),
            "--creditor-name" => creditor_name = Some(value),
            "--creditor-iban" => creditor_iban = Some(parse_identifier(&flag, &value)),
            "--amount" => amount = Some(parse_decimal(&flag, &value)),
            "--currency" => currency = Some(value),
            "--end-to-end-id" => end_to_end_id = Some(value),
            "--remittance" => remittance = Some(value),
            "--method" => {
                method = SettlementMethod::from_code(&value)
                    .unwrap_or_else(|| fail(format!("unknown settlement method '{}'", value)))
            }
            "--output" => output_path = Some(value),
            _ => fail(format!("unknown option: {}", flag)),
        }
    }

    let (Some(debtor_name), Some(debtor_iban), Some(creditor_name), Some(creditor_iban), Some(amount), Some(currency)) =
        (debtor_name, debtor_iban, creditor_name, creditor_iban, amount, currency)
    else {
        fail("debtor, creditor, amount and currency options are required");
    };

    let mut builder = PaymentInstruction::builder(
        Party::new(debtor_name, debtor_iban),
        Party::new(creditor_name, creditor_iban),
        amount,
        &currency,
    )
    .settlement_method(method);
    if let Some(id) = end_to_end_id {
        builder = builder.end_to_end_id(id);
    }
    if let Some(text) = remittance {
        builder = builder.remittance_info(text);
    }

    let instruction = builder.build().unwrap_or_else(|e| fail(e));
    let xml = instruction.to_xml().unwrap_or_else(|e| fail(e));
    eprintln!(
        "Instruction {} ({}) for {} {}",
        instruction.message_id(),
        instruction.end_to_end_id(),
        instruction.control_sum(),
        instruction.currency()
    );
    emit(&xml, output_path.as_deref());
}

/// JSON output schema for reconciliation results.
#[derive(serde::Serialize)]
struct ReconcileOutput<'a> {
    balanced: bool,
    tolerance: String,
    #[serde(flatten)]
    report: &'a ReconciliationReport,
    descriptions: Vec<String>,
}

fn print_report(report: &ReconciliationReport) {
    println!("Statements:     {}", report.statements());
    println!("Entries:        {}", report.total_entries());
    println!("Credits:        {}", report.credits());
    println!("Debits:         {}", report.debits());
    println!("Drift:          {}", report.drift());
    println!("Informational:  {}", report.informational());
    println!("Issues:         {}", report.issues().len());
    for description in report.issue_descriptions() {
        println!("  - {}", description);
    }
}

fn cmd_reconcile(args: &[String]) {
    let mut input_path = None;
    let mut options = ReconcileOptions::default();
    let mut format = "text".to_string();
    for (flag, value) in parse_options(args, &[]) {
        let value = value.unwrap_or_default();
        match flag.as_str() {
            "--input" => input_path = Some(value),
            "--tolerance" => options.tolerance = parse_decimal(&flag, &value),
            "--currency" => {
                options.expected_currency = Some(CurrencyCode::parse(&value).unwrap_or_else(|e| fail(e)))
            }
            "--format" => format = value,
            _ => fail(format!("unknown option: {}", flag)),
        }
    }

    let path = input_path.unwrap_or_else(|| fail("--input <FILE> is required"));
    let document =
        fs::read_to_string(&path).unwrap_or_else(|e| fail(format!("reading file '{}': {}", path, e)));

    let tolerance = options.tolerance;
    let engine = ReconciliationEngine::new(options);
    let (report, balanced) = match engine.reconcile(&document) {
        Ok(report) => (report, true),
        Err(ReconciliationError::DriftExceeded { report, .. }) => (*report, false),
        Err(e) => fail(e),
    };

    if format == "json" {
        let output = ReconcileOutput {
            balanced,
            tolerance: tolerance.to_string(),
            report: &report,
            descriptions: report.issue_descriptions(),
        };
        println!("{}", to_json(&output));
    } else {
        print_report(&report);
        if !balanced {
            eprintln!("Error: drift {} exceeds tolerance {}", report.drift(), tolerance);
        }
    }

    if !balanced {
        process::exit(1);
    }
}

fn cmd_generate(args: &[String]) {
    let mut config = StatementConfig::default();
    let mut output_path = None;
    for (flag, value) in parse_options(args, &["--balanced"]) {
        let value = value.unwrap_or_default();
        match flag.as_str() {
            "--entries" => {
                config.entries = value
                    .parse()
                    .unwrap_or_else(|_| fail("--entries requires a number"))
            }
            "--currency" => config.currency = CurrencyCode::parse(&value).unwrap_or_else(|e| fail(e)),
            "--invalid-ratio" => {
                config.invalid_ratio = value
                    .parse()
                    .unwrap_or_else(|_| fail("--invalid-ratio requires a number"))
            }
            "--balanced" => config.balanced = true,
            "--seed" => {
                config.seed = Some(value.parse().unwrap_or_else(|_| fail("--seed requires a number")))
            }
            "--output" => output_path = Some(value),
            _ => fail(format!("unknown option: {}", flag)),
        }
    }

    let generated = generate_statement(&config).unwrap_or_else(|e| fail(e));
    eprintln!(
        "Generated {} entries ({} invalid), expected drift {}",
        generated.total_entries(),
        generated.invalid_entries,
        generated.expected_drift
    );
    emit(&generated.xml, output_path.as_deref());
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let command = args[1].as_str();
    let rest = &args[2..];

    match command {
        "iban" => cmd_iban(rest),
        "validate" => cmd_validate(rest),
        "pacs008" => cmd_pacs008(rest),
        "reconcile" => cmd_reconcile(rest),
        "generate" => cmd_generate(rest),
        "help" | "--help" | "-h" => print_usage(),
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            process::exit(1);
        }
    }
}
