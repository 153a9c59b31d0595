//! File/entity orchestration
//!
//! Drives one entity at a time through `pending -> running -> {complete |
//! failed}`. Discovered part-files are filtered against the persisted
//! completion set, then fanned out to a bounded pool of tokio tasks, one
//! task per file, each with its own pooled connection and a hard wall-clock
//! budget. A panicking or timed-out task marks only its own file failed.
//!
//! Only the orchestrator writes the state file, after every file, success
//! or failure, so a crash mid-run loses at most the in-flight files'
//! partial progress. Entities run in fixed dependency order: the small
//! reference tables land before the two large fact tables.

use crate::decoder::SnapshotReader;
use crate::discover::{self, SnapshotFile};
use crate::state::StateStore;
use crate::transform::{
    AuthorsTransformer, ConceptsTransformer, EntityTransformer, InstitutionsTransformer,
    SourcesTransformer, WorksTransformer,
};
use crate::writer::{BatchWriter, ErrorLog, WriteMode};
use adp_common::config::{AdpConfig, TEST_LINE_CAP};
use adp_common::error::{AdpError, Result};
use adp_common::schema::{Entity, ENTITY_LOAD_ORDER};
use indicatif::{ProgressBar, ProgressStyle};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout, Duration};
use tracing::{error, info, warn};

/// Counters for one processed file
#[derive(Debug, Clone, Copy, Default)]
pub struct FileOutcome {
    pub lines: u64,
    pub malformed: u64,
    pub duplicates: u64,
    pub missing_id: u64,
    pub rows_written: u64,
    pub rows_skipped: u64,
    pub copy_fallbacks: u64,
}

impl FileOutcome {
    fn accumulate(&mut self, other: &FileOutcome) {
        self.lines += other.lines;
        self.malformed += other.malformed;
        self.duplicates += other.duplicates;
        self.missing_id += other.missing_id;
        self.rows_written += other.rows_written;
        self.rows_skipped += other.rows_skipped;
        self.copy_fallbacks += other.copy_fallbacks;
    }
}

/// Terminal state of one entity's load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityStatus {
    Complete,
    Failed,
}

/// Final per-entity summary
#[derive(Debug, Clone)]
pub struct EntitySummary {
    pub entity: Entity,
    pub status: EntityStatus,
    /// Files skipped because the state file already records them
    pub files_skipped: usize,
    pub files_completed: usize,
    pub files_failed: usize,
    pub totals: FileOutcome,
}

impl EntitySummary {
    pub fn log(&self) {
        info!(
            entity = %self.entity,
            status = ?self.status,
            files_completed = self.files_completed,
            files_failed = self.files_failed,
            files_skipped = self.files_skipped,
            rows_written = self.totals.rows_written,
            rows_skipped = self.totals.rows_skipped,
            duplicates = self.totals.duplicates,
            missing_id = self.totals.missing_id,
            decode_errors = self.totals.malformed,
            copy_fallbacks = self.totals.copy_fallbacks,
            "Entity load finished"
        );
    }
}

/// Drives the full load across entities
pub struct Orchestrator {
    pool: PgPool,
    config: AdpConfig,
    mode: WriteMode,
    resume: bool,
    test: bool,
}

impl Orchestrator {
    pub fn new(pool: PgPool, config: AdpConfig, mode: WriteMode, resume: bool, test: bool) -> Self {
        Self {
            pool,
            config,
            mode,
            resume,
            test,
        }
    }

    /// Process the requested entities in dependency order
    pub async fn run(&self, entities: &[Entity]) -> Result<Vec<EntitySummary>> {
        let mut summaries = Vec::new();
        for entity in ENTITY_LOAD_ORDER.iter().filter(|e| entities.contains(e)) {
            let summary = self.run_entity(*entity).await?;
            summary.log();
            summaries.push(summary);
        }
        Ok(summaries)
    }

    /// Process every pending file for one entity
    pub async fn run_entity(&self, entity: Entity) -> Result<EntitySummary> {
        info!(%entity, mode = ?self.mode, resume = self.resume, "Entity load starting");

        let store = StateStore::open(&self.config.state_dir, entity)?;
        let mut state = store.load()?;

        let discovered = discover::discover(&self.config.snapshot_dir, entity)?;
        let total_discovered = discovered.len();
        let pending: Vec<SnapshotFile> = if self.resume {
            discovered
                .into_iter()
                .filter(|f| !state.is_completed(&f.relative))
                .collect()
        } else {
            discovered
        };
        let files_skipped = total_discovered - pending.len();

        info!(
            %entity,
            discovered = total_discovered,
            pending = pending.len(),
            skipped = files_skipped,
            "Discovered snapshot files"
        );

        let bar = ProgressBar::new(pending.len() as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} files")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar.set_message(entity.to_string());

        let semaphore = Arc::new(Semaphore::new(self.config.max_workers));
        let mut tasks: JoinSet<Result<FileOutcome>> = JoinSet::new();
        let mut task_files: HashMap<tokio::task::Id, String> = HashMap::new();

        for file in pending {
            let pool = self.pool.clone();
            let config = self.config.clone();
            let semaphore = semaphore.clone();
            let mode = self.mode;
            let test = self.test;
            let relative = file.relative.clone();

            let handle = tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| AdpError::Interrupted)?;
                let budget = Duration::from_secs(config.file_timeout_secs);
                match timeout(budget, process_file(pool, config, entity, &file, mode, test)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(AdpError::FileTimeout {
                        path: file.relative,
                        timeout_secs: budget.as_secs(),
                    }),
                }
            });
            task_files.insert(handle.id(), relative);
        }

        let mut totals = FileOutcome::default();
        let mut files_completed = 0usize;
        let mut files_failed = 0usize;

        loop {
            tokio::select! {
                joined = tasks.join_next_with_id() => {
                    let Some(joined) = joined else { break };
                    match joined {
                        Ok((id, Ok(outcome))) => {
                            let relative = task_files.remove(&id).unwrap_or_default();
                            state.mark_completed(&relative);
                            totals.accumulate(&outcome);
                            files_completed += 1;
                            info!(
                                %entity,
                                file = %relative,
                                rows_written = outcome.rows_written,
                                duplicates = outcome.duplicates,
                                decode_errors = outcome.malformed,
                                "File complete"
                            );
                        },
                        Ok((id, Err(e))) => {
                            let relative = task_files.remove(&id).unwrap_or_default();
                            state.mark_failed(&relative, &e.to_string());
                            files_failed += 1;
                            error!(%entity, file = %relative, error = %e, "File failed");
                        },
                        Err(join_err) => {
                            let relative = task_files
                                .remove(&join_err.id())
                                .unwrap_or_default();
                            let message = if join_err.is_panic() {
                                "file worker panicked".to_string()
                            } else {
                                "file worker cancelled".to_string()
                            };
                            state.mark_failed(&relative, &message);
                            files_failed += 1;
                            error!(%entity, file = %relative, error = %message, "File failed");
                        },
                    }
                    // Persist unconditionally so a crash loses at most the
                    // in-flight files.
                    store.save(&state)?;
                    bar.inc(1);
                },
                _ = tokio::signal::ctrl_c() => {
                    warn!(%entity, "Interrupt received, persisting state before exit");
                    tasks.abort_all();
                    store.save(&state)?;
                    bar.abandon();
                    return Err(AdpError::Interrupted);
                },
            }
        }

        bar.finish();

        let status = if files_failed == 0 {
            EntityStatus::Complete
        } else {
            EntityStatus::Failed
        };

        Ok(EntitySummary {
            entity,
            status,
            files_skipped,
            files_completed,
            files_failed,
            totals,
        })
    }
}

/// Process one snapshot file end to end
pub async fn process_file(
    pool: PgPool,
    config: AdpConfig,
    entity: Entity,
    file: &SnapshotFile,
    mode: WriteMode,
    test: bool,
) -> Result<FileOutcome> {
    match entity {
        Entity::Works => load_file::<WorksTransformer>(pool, config, file, mode, test).await,
        Entity::Authors => load_file::<AuthorsTransformer>(pool, config, file, mode, test).await,
        Entity::Institutions => {
            load_file::<InstitutionsTransformer>(pool, config, file, mode, test).await
        },
        Entity::Sources => load_file::<SourcesTransformer>(pool, config, file, mode, test).await,
        Entity::Concepts => load_file::<ConceptsTransformer>(pool, config, file, mode, test).await,
    }
}

/// The decode -> transform -> write chain for one file; strictly sequential
async fn load_file<T: EntityTransformer>(
    pool: PgPool,
    config: AdpConfig,
    file: &SnapshotFile,
    mode: WriteMode,
    test: bool,
) -> Result<FileOutcome> {
    let line_cap = test.then_some(TEST_LINE_CAP);
    let mut reader = SnapshotReader::<T::Record>::open(&file.path, config.progress_interval, line_cap)?;

    let error_log = ErrorLog::new(&config.state_dir, T::ENTITY);
    let mut writer = BatchWriter::new(&pool, mode, config.batch_size, error_log).await?;
    let mut transformer = T::default();

    while let Some(item) = reader.next() {
        let record = item?;
        for (table, row) in transformer.transform(record) {
            writer.add(table, row).await?;
        }
    }

    let write_stats = writer.finish().await?;
    let decode_stats = reader.stats();
    let transform_counts = transformer.counts();

    Ok(FileOutcome {
        lines: decode_stats.lines,
        malformed: decode_stats.malformed,
        duplicates: transform_counts.duplicates,
        missing_id: transform_counts.missing_id,
        rows_written: write_stats.rows_written,
        rows_skipped: write_stats.rows_skipped,
        copy_fallbacks: write_stats.copy_fallbacks,
    })
}
