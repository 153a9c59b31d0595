//! ADP ingest CLI - Main entry point

use adp_common::config::AdpConfig;
use adp_common::db;
use adp_common::error::{AdpError, Result};
use adp_common::logging::{init_logging, LogConfig};
use adp_common::schema::{Entity, ENTITY_LOAD_ORDER};
use adp_ingest::discover::SnapshotFile;
use adp_ingest::orchestrator::{self, EntityStatus, Orchestrator};
use adp_ingest::state::StateStore;
use adp_ingest::writer::WriteMode;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "adp-ingest", about = "Bulk-load scholarly snapshot files into Postgres")]
struct Cli {
    /// Enable debug logging on the console
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Load snapshot files for one or more entity types
    Run {
        /// Entity types to load; all of them when omitted
        #[arg(short, long)]
        entity: Vec<Entity>,

        /// Resume from recorded per-file state (the default)
        #[arg(long, conflicts_with = "no_resume")]
        resume: bool,

        /// Reprocess files the state already records as completed
        #[arg(long)]
        no_resume: bool,

        /// Write strategy
        #[arg(long, value_enum, default_value_t = WriteMode::Clean)]
        mode: WriteMode,

        /// Smoke run: cap each file at a small number of lines
        #[arg(long)]
        test: bool,
    },

    /// Load a single snapshot file, bypassing discovery and state
    File {
        /// Path to one gzip NDJSON part-file
        #[arg(short, long)]
        input_file: PathBuf,

        /// Entity type the file contains
        #[arg(short, long)]
        entity: Entity,

        /// Write strategy
        #[arg(long, value_enum, default_value_t = WriteMode::Clean)]
        mode: WriteMode,

        /// Smoke run: cap the file at a small number of lines
        #[arg(long)]
        test: bool,
    },

    /// Discard recorded progress for one or more entity types
    Reset {
        /// Entity types to reset; all of them when omitted
        #[arg(short, long)]
        entity: Vec<Entity>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::from_env("adp-ingest", cli.verbose);
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

    match cli.command {
        Commands::Run {
            entity,
            resume: _,
            no_resume,
            mode,
            test,
        } => run(config, entity, !no_resume, mode, test).await,
        Commands::File {
            input_file,
            entity,
            mode,
            test,
        } => run_single_file(config, input_file, entity, mode, test).await,
        Commands::Reset { entity } => reset(config, entity),
    }
}

async fn run(
    config: AdpConfig,
    entities: Vec<Entity>,
    resume: bool,
    mode: WriteMode,
    test: bool,
) -> Result<()> {
    let entities = if entities.is_empty() {
        ENTITY_LOAD_ORDER.to_vec()
    } else {
        entities
    };

    let pool = db::connect_pool(&config.database).await?;
    let orchestrator = Orchestrator::new(pool, config, mode, resume, test);
    let summaries = orchestrator.run(&entities).await?;

    println!("Load summary:");
    let mut failed = false;
    for summary in &summaries {
        println!(
            "  {:<14} {:?}: {} files loaded, {} failed, {} skipped, {} rows written, {} rows skipped",
            summary.entity,
            summary.status,
            summary.files_completed,
            summary.files_failed,
            summary.files_skipped,
            summary.totals.rows_written,
            summary.totals.rows_skipped,
        );
        failed |= summary.status == EntityStatus::Failed;
    }

    if failed {
        return Err(AdpError::State(
            "one or more entity types finished with failed files".to_string(),
        ));
    }
    Ok(())
}

async fn run_single_file(
    config: AdpConfig,
    input_file: PathBuf,
    entity: Entity,
    mode: WriteMode,
    test: bool,
) -> Result<()> {
    let file = SnapshotFile {
        relative: input_file.display().to_string(),
        path: input_file,
    };

    let pool = db::connect_pool(&config.database).await?;
    let outcome =
        orchestrator::process_file(pool, config, entity, &file, mode, test).await?;

    info!(
        %entity,
        file = %file.relative,
        rows_written = outcome.rows_written,
        "File complete"
    );
    println!(
        "{}: {} lines, {} decode errors, {} duplicates, {} rows written, {} rows skipped",
        file.relative,
        outcome.lines,
        outcome.malformed,
        outcome.duplicates,
        outcome.rows_written,
        outcome.rows_skipped,
    );
    Ok(())
}

fn reset(config: AdpConfig, entities: Vec<Entity>) -> Result<()> {
    let entities = if entities.is_empty() {
        ENTITY_LOAD_ORDER.to_vec()
    } else {
        entities
    };

    for entity in entities {
        let store = StateStore::open(&config.state_dir, entity)?;
        store.reset()?;
        info!(%entity, "Processing state reset");
        println!("Reset state for {}", entity);
    }
    Ok(())
}
