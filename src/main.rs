//! Trading System Audit CLI
//!
//! Diagnoses and repairs the persisted accounting state of a trading
//! venue: wallet balances, orders, leveraged positions, and the
//! transaction ledger.
//!
//! Usage:
//!   trading-audit --db trading.db diagnose
//!   trading-audit --db trading.db fix --dry-run
//!   trading-audit --db trading.db fix --force-win
//!   trading-audit --db trading.db full --report
//!
//! Exit status is non-zero only for infrastructure failures (unreachable
//! database, failed query or write). Issues found in the data are results,
//! not process failures, and exit 0.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trading_audit::checker::InvariantChecker;
use trading_audit::models::{AuditConfig, RepairMode, DEFAULT_STALE_HOURS};
use trading_audit::repair::RepairEngine;
use trading_audit::report;
use trading_audit::store::Store;
use trading_audit::verify::verify;
use trading_audit::DiagnosisSnapshot;

/// Trading venue accounting audit and repair tool
#[derive(Parser, Debug)]
#[command(name = "trading-audit")]
#[command(about = "Diagnose and repair wallet, order, position and ledger inconsistencies")]
struct Cli {
    /// Path to the SQLite accounting database
    #[arg(long, default_value = "trading.db", env = "TRADING_AUDIT_DB")]
    db: PathBuf,

    /// Open orders older than this many hours are considered stale
    #[arg(long, default_value_t = DEFAULT_STALE_HOURS)]
    stale_hours: i64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the invariant checks and print the findings
    Diagnose {
        /// Also dump the full diagnosis as JSON
        #[arg(long)]
        report: bool,
    },

    /// Diagnose, then repair every issue kind found
    Fix {
        /// Rewrite losing positions to a guaranteed +1% favorable move
        #[arg(long)]
        force_win: bool,

        /// Show what would be repaired without touching the store
        #[arg(long)]
        dry_run: bool,

        /// Verify after fixing and write an HTML report
        #[arg(long)]
        report: bool,
    },

    /// Verify a previous repair (requires an in-process diagnosis)
    Verify,

    /// Full cycle: diagnose, fix, verify, summarize
    Full {
        /// Rewrite losing positions to a guaranteed +1% favorable move
        #[arg(long)]
        force_win: bool,

        /// Write an HTML report of the full cycle
        #[arg(long)]
        report: bool,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = AuditConfig {
        stale_hours: cli.stale_hours,
    };
    let store = Store::open(&cli.db)?;

    match cli.command {
        Commands::Diagnose { report } => run_diagnose(&store, &config, report),
        Commands::Fix {
            force_win,
            dry_run,
            report,
        } => run_fix(&store, &config, mode_for(force_win), dry_run, report),
        Commands::Verify => {
            println!(
                "Verification needs the diagnosis taken before the repair pass; run `full` \
                 to execute diagnose, fix and verify in one invocation."
            );
            Ok(())
        }
        Commands::Full { force_win, report } => {
            run_full(&store, &config, mode_for(force_win), report)
        }
    }
}

fn mode_for(force_win: bool) -> RepairMode {
    if force_win {
        RepairMode::ForceFavorable
    } else {
        RepairMode::Accurate
    }
}

fn run_diagnose(store: &Store, config: &AuditConfig, report: bool) -> Result<()> {
    let checker = InvariantChecker::new(store, config.clone());
    let diagnosis = checker.run_diagnosis()?;

    print_diagnosis(&diagnosis);

    if report {
        let path = report::write_diagnosis_json(&diagnosis)?;
        println!("\nReport saved to: {}", path.display());
    }
    Ok(())
}

fn run_fix(
    store: &Store,
    config: &AuditConfig,
    mode: RepairMode,
    dry_run: bool,
    report: bool,
) -> Result<()> {
    let checker = InvariantChecker::new(store, config.clone());
    let diagnosis = checker.run_diagnosis()?;

    if dry_run {
        println!("DRY RUN - issues that would be repaired:");
        if diagnosis.issues.is_empty() {
            println!("  (none)");
        }
        for issue in &diagnosis.issues {
            println!("  - {}: {}", issue.kind.as_str(), issue.description);
        }
        if mode.is_forced() {
            println!("\n--force-win enabled: losing positions would be made profitable");
        }
        return Ok(());
    }

    let engine = RepairEngine::new(store, config.clone(), mode);
    let outcome = engine.repair(&diagnosis)?;

    println!("Fixes applied: {}", outcome.fixes.len());
    for fix in &outcome.fixes {
        println!("  - {}: {} rows updated", fix.kind.as_str(), fix.rows_updated);
    }

    if report {
        let new_diagnosis = checker.run_diagnosis()?;
        let verification = verify(&diagnosis, &new_diagnosis);
        let path = report::write_html_report(&diagnosis, &outcome, &verification)?;
        println!("\nReport saved to: {}", path.display());
    }
    Ok(())
}

fn run_full(store: &Store, config: &AuditConfig, mode: RepairMode, report: bool) -> Result<()> {
    info!("running full diagnose/fix/verify cycle");
    let checker = InvariantChecker::new(store, config.clone());

    let diagnosis = checker.run_diagnosis()?;
    println!("Found {} issues", diagnosis.issues.len());

    let engine = RepairEngine::new(store, config.clone(), mode);
    let outcome = engine.repair(&diagnosis)?;
    println!("Applied {} fixes", outcome.fixes.len());

    let new_diagnosis = checker.run_diagnosis()?;
    let verification = verify(&diagnosis, &new_diagnosis);
    println!(
        "Successfully fixed: {}",
        verification.fixed_successfully.len()
    );
    if !verification.issues_remaining.is_empty() {
        println!("Remaining issues: {}", verification.issues_remaining.len());
    }

    if report {
        let path = report::write_html_report(&diagnosis, &outcome, &verification)?;
        println!("Report saved to: {}", path.display());
    }

    let initial = diagnosis.issues.len();
    let remaining = verification.issues_remaining.len() + verification.failed_fixes.len();
    let success_rate = (initial.saturating_sub(remaining)) as f64 / initial.max(1) as f64 * 100.0;
    println!("\n{}", "=".repeat(60));
    println!("REPAIR SUMMARY");
    println!("{}", "=".repeat(60));
    println!("Initial issues:   {}", initial);
    println!("Fixes applied:    {}", outcome.fixes.len());
    println!("Remaining issues: {}", verification.issues_remaining.len());
    println!("Success rate:     {:.1}%", success_rate);
    Ok(())
}

fn print_diagnosis(diagnosis: &DiagnosisSnapshot) {
    println!("{}", "=".repeat(60));
    println!("SYSTEM DIAGNOSIS RESULTS");
    println!("{}", "=".repeat(60));
    println!("Run:         {}", diagnosis.run_id);
    println!("Timestamp:   {}", diagnosis.generated_at.to_rfc3339());
    println!("Users:       {}", diagnosis.wallets.total_users);
    println!("Positions:   {}", diagnosis.positions.total_positions);
    println!("Ledger rows: {}", diagnosis.ledger.total_entries);
    println!("Issues:      {}", diagnosis.issues.len());

    if diagnosis.issues.is_empty() {
        println!("\nNo issues found.");
        return;
    }
    println!();
    for issue in &diagnosis.issues {
        println!(
            "  [{}] {}: {}",
            issue.severity.as_str(),
            issue.kind.as_str(),
            issue.description
        );
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trading_audit=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
