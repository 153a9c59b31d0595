//! ADP repair CLI - Main entry point

use adp_common::config::AdpConfig;
use adp_common::db;
use adp_common::error::{AdpError, Result};
use adp_common::logging::{init_logging, LogConfig};
use adp_repair::orphans::OrphanOptions;
use adp_repair::{constraints, duplicates, orphans, remap};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing::error;

#[derive(Debug, Parser)]
#[command(
    name = "adp-repair",
    about = "Restore referential integrity after a bulk load"
)]
struct Cli {
    /// Enable debug logging on the console
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Add primary keys, FK-column indexes, and NOT VALID foreign keys
    Constraints {
        /// Restrict to one table
        #[arg(long)]
        table: Option<String>,
    },

    /// Run VALIDATE CONSTRAINT for every declared foreign key
    Validate {
        /// Restrict to one table
        #[arg(long)]
        table: Option<String>,
    },

    /// Analyze and quarantine child rows with no matching parent
    Orphans {
        /// Restrict to one table
        #[arg(long)]
        table: Option<String>,

        /// Orphan-rate threshold above which cleanup must be confirmed
        #[arg(long)]
        threshold: Option<f64>,

        /// Proceed without interactive confirmation
        #[arg(short, long)]
        yes: bool,

        /// Write manifests only, delete nothing
        #[arg(long)]
        analyze_only: bool,
    },

    /// Collapse exact duplicate key groups, report divergent ones
    Dedupe {
        /// Restrict to one table
        #[arg(long)]
        table: Option<String>,

        /// Classify and report without deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// Rewrite references to merged identifiers to their canonical ones
    Remap {
        /// Directory holding `merged_ids/<entity>/*.csv(.gz)`
        #[arg(long)]
        merged_ids_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::from_env("adp-repair", cli.verbose);
    if let Err(e) = init_logging(&log_config) {
        eprintln!("Error: failed to initialize logging: {}", e);
        process::exit(1);
    }

    if let Err(e) = execute_command(cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn execute_command(cli: Cli) -> Result<()> {
    let config = AdpConfig::load()?;
    let pool = db::connect_pool(&config.database).await?;

    match cli.command {
        Commands::Constraints { table } => {
            let report = constraints::build(&pool, table.as_deref()).await?;
            println!(
                "Constraints: {} PKs added ({} existing), {} indexes added ({} existing), \
                 {} FKs added ({} existing)",
                report.pks_added,
                report.pks_skipped,
                report.indexes_added,
                report.indexes_skipped,
                report.fks_added,
                report.fks_skipped,
            );
            if let Some((table, count)) = report.duplicate_key_tables.first() {
                for (table, count) in &report.duplicate_key_tables {
                    println!("  BLOCKED {}: {} duplicate key group(s), run dedupe", table, count);
                }
                return Err(AdpError::DuplicateKeys {
                    table: table.clone(),
                    count: *count,
                });
            }
            Ok(())
        },

        Commands::Validate { table } => {
            let report = constraints::validate(&pool, table.as_deref()).await?;
            println!(
                "Validation: {} constraint(s) validated, {} failed",
                report.validated.len(),
                report.failures.len()
            );
            for (constraint, message) in &report.failures {
                println!("  FAILED {}: {}", constraint, message);
            }
            if !report.is_clean() {
                return Err(AdpError::State(format!(
                    "{} constraint(s) failed validation",
                    report.failures.len()
                )));
            }
            Ok(())
        },

        Commands::Orphans {
            table,
            threshold,
            yes,
            analyze_only,
        } => {
            let options = OrphanOptions {
                table,
                threshold: threshold.unwrap_or(config.orphan_threshold),
                assume_yes: yes,
                analyze_only,
            };
            let outcome = orphans::run(&pool, &config, &options).await?;
            println!(
                "Orphans: {} edge(s) analyzed, {} row(s) deleted, {} edge(s) declined",
                outcome.analyses.len(),
                outcome.rows_deleted,
                outcome.edges_declined
            );
            for analysis in &outcome.analyses {
                if analysis.orphan_rows > 0 {
                    println!(
                        "  {}.{}: {} of {} referencing rows orphaned ({:.3}%)",
                        analysis.table,
                        analysis.column,
                        analysis.orphan_rows,
                        analysis.referencing_rows,
                        analysis.rate() * 100.0
                    );
                }
            }
            println!("Manifests written to {}", config.manifest_dir.display());
            Ok(())
        },

        Commands::Dedupe { table, dry_run } => {
            let report =
                duplicates::run(&pool, &config.manifest_dir, table.as_deref(), dry_run).await?;
            let action = if dry_run { "would delete" } else { "deleted" };
            println!(
                "Dedupe: {} table(s) scanned, {} group(s) found, {} collapsed, {} row(s) {}",
                report.tables_scanned,
                report.groups_found,
                report.groups_collapsed,
                report.rows_deleted,
                action
            );
            for group in &report.divergent {
                println!(
                    "  DIVERGENT {} key {}: {} member(s), {} distinct payload(s), manual review required",
                    group.table,
                    group.key.join("/"),
                    group.members,
                    group.distinct_payloads
                );
            }
            Ok(())
        },

        Commands::Remap { merged_ids_dir } => {
            let report = remap::run(&pool, &merged_ids_dir).await?;
            println!(
                "Remap: {} entity reference(s) applied, {} column(s) rewritten, {} row(s) updated",
                report.mappings.len(),
                report.columns_rewritten,
                report.rows_updated
            );
            for (entity, count) in &report.mappings {
                println!("  {}: {} mapping(s)", entity, count);
            }
            Ok(())
        },
    }
}
