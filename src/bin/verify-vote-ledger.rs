use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, Command};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use evote_core::config::AppConfig;
use evote_core::database::Database;
use evote_core::voting::{verify_ledger, LedgerAudit};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("verify-vote-ledger")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Verify vote fingerprints and voting rules of an e-voting ledger")
        .arg(
            Arg::new("database")
                .short('d')
                .long("database")
                .value_name("URL")
                .help("Database URL (defaults to the configured database_url)"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .default_value("evote")
                .help("Configuration file, without extension"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print the audit report as JSON"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable verbose output"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .conflicts_with("verbose")
                .help("Suppress output except errors"),
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");
    let quiet = matches.get_flag("quiet");
    let json = matches.get_flag("json");

    let default_level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("evote");
    let mut config = AppConfig::load_with_file(config_path)?;
    if let Some(url) = matches.get_one::<String>("database") {
        config.database_url = url.clone();
    }

    let audit = match run_audit(&config).await {
        Ok(audit) => audit,
        Err(e) => {
            error!("Vote ledger verification failed: {}", e);
            std::process::exit(2);
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&audit)?);
    } else if !quiet {
        print_summary(&audit, verbose);
    }

    if !audit.is_clean() {
        error!(
            "Vote ledger is not clean: {} tampered votes, {} resolutions with duplicate voters, {} single-choice breaches",
            audit.tampered.len(),
            audit.inconsistent_resolutions.len(),
            audit.single_choice_breaches.len()
        );
        std::process::exit(1);
    }

    Ok(())
}

async fn run_audit(config: &AppConfig) -> Result<LedgerAudit> {
    info!("Verifying vote ledger at {}", config.database_url);

    let database = Database::open_read_only(&config.database_url)
        .await
        .map_err(|e| anyhow!("Cannot open vote ledger {}: {}", config.database_url, e))?;
    Ok(verify_ledger(&database).await?)
}

fn print_summary(audit: &LedgerAudit, verbose: bool) {
    println!("Vote Ledger Summary:");
    println!("  Votes checked: {}", audit.records_checked);
    println!("  Resolutions: {}", audit.tallies.len());
    println!("  Tampered votes: {}", audit.tampered.len());
    println!(
        "  Resolutions with duplicate voters: {}",
        audit.inconsistent_resolutions.len()
    );
    println!(
        "  Single-choice breaches: {}",
        audit.single_choice_breaches.len()
    );

    for vote in &audit.tampered {
        println!(
            "  ✗ vote {} ({} on {}) does not match hash {}",
            vote.id, vote.shareholder_id, vote.resolution_id, vote.stored_hash
        );
    }
    for resolution_id in &audit.inconsistent_resolutions {
        println!("  ✗ resolution {} holds more votes than voters", resolution_id);
    }
    for breach in &audit.single_choice_breaches {
        println!(
            "  ✗ {} voted FOR {} director candidates in session {}: {}",
            breach.shareholder_id,
            breach.resolution_ids.len(),
            breach.voting_session_id,
            breach.resolution_ids.join(", ")
        );
    }

    if verbose {
        println!("\nTallies:");
        for tally in &audit.tallies {
            println!(
                "  {}: FOR {} / AGAINST {} / ABSTAIN {} (total {})",
                tally.resolution_id,
                tally.for_count,
                tally.against_count,
                tally.abstain_count,
                tally.total_count
            );
        }
    }

    if audit.is_clean() {
        println!("✓ Vote ledger verification completed successfully");
    }
}
