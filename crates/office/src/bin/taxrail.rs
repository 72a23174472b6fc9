//! Taxrail operator CLI

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use taxrail_core::{EntityId, PeriodId, PeriodKey, TaxType};
use taxrail_rpt::TokenSigner;
use taxrail_store::Database;

#[derive(Parser)]
#[command(name = "taxrail")]
#[command(about = "Taxrail - tax remittance back office", long_about = None)]
struct Cli {
    /// Path to the datastore
    #[arg(short, long, default_value = "./taxrail.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the datastore and its schema
    Init,

    /// Verify the audit chain and every period's ledger chain
    Verify,

    /// Print the canonical evidence bundle for a period
    Evidence {
        /// Entity id (e.g. 11-digit org number)
        entity: String,
        /// Tax type (withheld_tax | sales_tax)
        tax_type: String,
        /// Period (YYYY-MM)
        period: String,
    },

    /// Show the period row
    Period {
        entity: String,
        tax_type: String,
        period: String,
    },

    /// List dead-lettered release jobs
    DeadLetters,

    /// Generate a new token signing key
    Keygen {
        /// Output file path
        #[arg(long, default_value = "signer.key")]
        output: PathBuf,
    },
}

fn parse_key(entity: &str, tax_type: &str, period: &str) -> anyhow::Result<PeriodKey> {
    Ok(PeriodKey::new(
        EntityId::new(entity)?,
        TaxType::parse(tax_type)?,
        PeriodId::new(period)?,
    ))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            Database::open(&cli.db)?;
            println!("✅ Datastore ready at {}", cli.db.display());
        }

        Commands::Verify => {
            let db = Database::open(&cli.db)?;
            let report = db.with_tx(|tx| {
                let audit_entries = taxrail_audit::verify_chain(tx)?;
                let keys = taxrail_store::periods::list_keys(tx)?;
                let mut ledger_entries = 0;
                for key in &keys {
                    let entries = taxrail_ledger::entries(tx, key)?;
                    taxrail_ledger::verify_chain(&entries)
                        .map_err(taxrail_ledger::LedgerError::from)?;
                    ledger_entries += entries.len();
                }
                Ok::<_, taxrail_office::OfficeError>((audit_entries, keys.len(), ledger_entries))
            });
            match report {
                Ok((audit, periods, ledger)) => {
                    println!("✅ Audit chain verified ({audit} entries)");
                    println!("✅ Ledger chains verified ({periods} periods, {ledger} entries)");
                }
                Err(e) => {
                    println!("❌ Chain verification failed: {e}");
                    std::process::exit(1);
                }
            }
        }

        Commands::Evidence {
            entity,
            tax_type,
            period,
        } => {
            let db = Database::open(&cli.db)?;
            let key = parse_key(&entity, &tax_type, &period)?;
            let bundle = taxrail_evidence::build(&db, &key)?;
            println!("{}", bundle.canonical_json()?);
        }

        Commands::Period {
            entity,
            tax_type,
            period,
        } => {
            let db = Database::open(&cli.db)?;
            let key = parse_key(&entity, &tax_type, &period)?;
            match db.with_conn(|conn| taxrail_store::periods::load(conn, &key))? {
                Some(row) => println!("{}", serde_json::to_string_pretty(&row)?),
                None => {
                    println!("❌ No period {key}");
                    std::process::exit(1);
                }
            }
        }

        Commands::DeadLetters => {
            let db = Database::open(&cli.db)?;
            let entries = db.with_conn(taxrail_dispatch::list_dead_letters)?;
            if entries.is_empty() {
                println!("✅ No dead letters");
            } else {
                for entry in entries {
                    println!(
                        "💀 {} attempts={} first_seen={} last_error={}",
                        entry.transfer_id, entry.attempts, entry.first_seen_at, entry.last_error
                    );
                }
            }
        }

        Commands::Keygen { output } => {
            let signer = TokenSigner::generate();
            std::fs::write(&output, signer.seed_hex())?;
            println!("✅ Generated signing key");
            println!("   Seed saved to: {}", output.display());
            println!("   Public key: {}", signer.public_key_hex());
            println!("   Key id: {}", signer.kid());
        }
    }

    Ok(())
}
