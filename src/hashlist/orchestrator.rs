//! Orchestration layer for the hashlist ingester
//!
//! This module provides:
//! 1. A run lock so two invocations never interleave cursor writes
//! 2. `run()`: one incremental pass followed by one backfill pass, traced
//!    under a fresh run id with its own resolution cache
//! 3. `full_ingestion()`: repeated runs until backfill completes, progress
//!    stalls or the iteration budget is spent

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::hashlist::checkpoint::{CheckpointError, CheckpointStore, CursorState, ProcessedBlobSet};
use crate::hashlist::config_loader::AppConfig;
use crate::hashlist::logger::log_system_event;
use crate::hashlist::resolver::ResolutionCache;
use crate::hashlist::walker::{CommitWalker, PassStats, WalkerError};

/// Error types for the orchestration layer
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Another instance holds the run lock at {0}")]
    AlreadyRunning(PathBuf),

    #[error("Walker error: {0}")]
    Walker(#[from] WalkerError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

/// Result type for orchestration operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Exclusive marker file holding the owner's PID. Removed on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    _file: File,
}

impl RunLock {
    pub fn acquire(path: impl AsRef<Path>) -> OrchestratorResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(OrchestratorError::AlreadyRunning(path));
            }
            Err(err) => return Err(err.into()),
        };
        writeln!(file, "{}", std::process::id())?;

        log_system_event("lock_acquired", &path.display().to_string());
        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove run lock {}: {}", self.path.display(), err);
        } else {
            log_system_event("lock_released", &self.path.display().to_string());
        }
    }
}

/// Commit budgets for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PassLimits {
    pub incremental_commits: usize,
    pub backfill_commits: usize,
}

impl PassLimits {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            incremental_commits: config.limits.incremental_commits_per_run,
            backfill_commits: config.limits.backfill_commits_per_run,
        }
    }

    fn clamped(self, max_per_page: usize) -> Self {
        Self {
            incremental_commits: self.incremental_commits.min(max_per_page),
            backfill_commits: self.backfill_commits.min(max_per_page),
        }
    }
}

/// Counters for one run, or accumulated over many
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub incremental: PassStats,
    pub backfill: PassStats,
}

impl RunStats {
    pub fn add(&mut self, other: &RunStats) {
        self.incremental.add(&other.incremental);
        self.backfill.add(&other.backfill);
    }

    pub fn is_zero(&self) -> bool {
        self.incremental.is_zero() && self.backfill.is_zero()
    }
}

#[derive(Debug, Clone)]
pub struct FullIngestionOptions {
    pub max_iterations: usize,
    pub limits: PassLimits,
    pub reset_checkpoints: bool,
}

impl FullIngestionOptions {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_iterations: config.limits.full_ingest_max_iterations,
            limits: PassLimits {
                incremental_commits: config.limits.full_ingest_incremental_commits,
                backfill_commits: config.limits.full_ingest_backfill_commits,
            },
            reset_checkpoints: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStatus {
    Success,
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    BackfillComplete,
    NoProgress,
    MaxIterationsReached,
}

/// Cursor positions and blob count at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub state: CursorState,
    pub latest_incremental_sha: Option<String>,
    pub next_backfill_sha: Option<String>,
    pub processed_blobs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FullIngestionReport {
    pub status: IngestionStatus,
    pub backfill_complete: bool,
    pub stopped_reason: StopReason,
    pub iterations_run: usize,
    pub max_iterations: usize,
    pub per_iteration_limits: PassLimits,
    pub totals: RunStats,
    #[serde(flatten)]
    pub final_status: StatusReport,
}

pub struct Orchestrator {
    walker: CommitWalker,
    checkpoints: Arc<dyn CheckpointStore>,
    blobs: Arc<dyn ProcessedBlobSet>,
    limits: PassLimits,
    max_commits_per_page: usize,
}

impl Orchestrator {
    pub fn new(
        walker: CommitWalker,
        checkpoints: Arc<dyn CheckpointStore>,
        blobs: Arc<dyn ProcessedBlobSet>,
        limits: PassLimits,
        max_commits_per_page: usize,
    ) -> Self {
        Self {
            walker,
            checkpoints,
            blobs,
            limits,
            max_commits_per_page: max_commits_per_page.max(1),
        }
    }

    /// One ingestion cycle with the configured budgets
    pub async fn run(&self) -> OrchestratorResult<RunStats> {
        self.run_with_limits(self.limits).await
    }

    pub async fn run_with_limits(&self, limits: PassLimits) -> OrchestratorResult<RunStats> {
        let run_id = Uuid::new_v4();
        let span = info_span!("ingestion_run", run_id = %run_id);
        self.run_cycle(limits).instrument(span).await
    }

    async fn run_cycle(&self, limits: PassLimits) -> OrchestratorResult<RunStats> {
        // Dropped with the run, never shared across runs
        let mut cache = ResolutionCache::new();

        let incremental = self.walker.run_incremental(limits.incremental_commits, &mut cache).await?;
        let backfill = self.walker.run_backfill(limits.backfill_commits, &mut cache).await?;

        info!(
            incremental_commits = incremental.commits_processed,
            incremental_files = incremental.files_processed,
            incremental_streams = incremental.streams_created,
            backfill_commits = backfill.commits_processed,
            backfill_files = backfill.files_processed,
            backfill_streams = backfill.streams_created,
            resolved_keys = cache.len(),
            "Ingestion run complete"
        );

        Ok(RunStats { incremental, backfill })
    }

    /// Run cycles until backfill completes, a cycle makes no progress, or
    /// `max_iterations` cycles have run
    pub async fn full_ingestion(&self, options: FullIngestionOptions) -> OrchestratorResult<FullIngestionReport> {
        if options.reset_checkpoints {
            self.reset().await?;
        }

        let limits = options.limits.clamped(self.max_commits_per_page);
        let max_iterations = options.max_iterations.max(1);
        info!(
            max_iterations,
            incremental_commits = limits.incremental_commits,
            backfill_commits = limits.backfill_commits,
            "Starting full ingestion"
        );

        let mut totals = RunStats::default();
        let mut iterations_run = 0;
        let mut stopped_reason = StopReason::MaxIterationsReached;

        for iteration in 1..=max_iterations {
            let stats = self.run_with_limits(limits).await?;
            iterations_run = iteration;
            totals.add(&stats);

            if self.walker.state().await? == CursorState::BackfillDone {
                stopped_reason = StopReason::BackfillComplete;
                break;
            }
            if stats.is_zero() {
                stopped_reason = StopReason::NoProgress;
                break;
            }
        }

        let final_status = self.status().await?;
        let backfill_complete = final_status.state == CursorState::BackfillDone;
        let report = FullIngestionReport {
            status: if backfill_complete {
                IngestionStatus::Success
            } else {
                IngestionStatus::Partial
            },
            backfill_complete,
            stopped_reason,
            iterations_run,
            max_iterations: options.max_iterations,
            per_iteration_limits: limits,
            totals,
            final_status,
        };

        info!(
            iterations_run,
            stopped_reason = ?report.stopped_reason,
            backfill_complete,
            "Full ingestion finished"
        );
        Ok(report)
    }

    /// Forget both cursors and every processed blob
    pub async fn reset(&self) -> OrchestratorResult<()> {
        self.checkpoints.clear().await?;
        self.blobs.clear().await?;
        log_system_event("checkpoints_reset", "cursors and processed blobs cleared");
        Ok(())
    }

    pub async fn status(&self) -> OrchestratorResult<StatusReport> {
        let checkpoint = self.checkpoints.load().await?;
        Ok(StatusReport {
            state: checkpoint.state(),
            next_backfill_sha: checkpoint.next_backfill.as_stored().map(str::to_string),
            latest_incremental_sha: checkpoint.latest_incremental_sha,
            processed_blobs: self.blobs.count().await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashlist::checkpoint::{BACKFILL_DONE_SENTINEL, BackfillCursor};
    use crate::hashlist::classifier::MediaType;
    use crate::hashlist::pipeline::EntryPipeline;
    use crate::hashlist::resolver::{MetadataResolver, ResolverConfig};
    use crate::hashlist::test_support::{
        FakeCatalog, FakeCommitSource, FakeSearch, MemoryCheckpointStore, MemoryStreamStore, changed_file, raw_url,
        snapshot_html,
    };
    use crate::hashlist::walker::WalkerConfig;
    use tempfile::tempdir;

    struct Harness {
        source: Arc<FakeCommitSource>,
        store: Arc<MemoryCheckpointStore>,
        streams: Arc<MemoryStreamStore>,
        orchestrator: Orchestrator,
    }

    fn harness(limits: PassLimits) -> Harness {
        let source = Arc::new(FakeCommitSource::new());
        let store = Arc::new(MemoryCheckpointStore::new());
        let streams = Arc::new(MemoryStreamStore::new());
        let catalog = Arc::new(FakeCatalog::new());
        catalog.add_media("tt0816692", "Interstellar", Some(2014), MediaType::Movie);
        let resolver = MetadataResolver::new(catalog, Arc::new(FakeSearch::new()), ResolverConfig::default());
        let pipeline = Arc::new(EntryPipeline::new(Arc::new(resolver), streams.clone()));
        let walker = CommitWalker::new(
            source.clone(),
            store.clone(),
            store.clone(),
            pipeline,
            WalkerConfig::default(),
        );
        let orchestrator = Orchestrator::new(walker, store.clone(), store.clone(), limits, 100);
        Harness {
            source,
            store,
            streams,
            orchestrator,
        }
    }

    fn limits(incremental_commits: usize, backfill_commits: usize) -> PassLimits {
        PassLimits {
            incremental_commits,
            backfill_commits,
        }
    }

    /// Linear history `c1..=cN`, one snapshot with a distinct entry per commit
    fn push_history(source: &FakeCommitSource, count: usize) {
        for n in 1..=count {
            let sha = format!("c{}", n);
            let path = format!("{}.html", sha);
            let json = format!(
                r#"[{{"filename":"Interstellar.2014.1080p.BluRay.x264-GRP","hash":"{:040x}","bytes":10}}]"#,
                n
            );
            source.set_raw(&raw_url(&path), &snapshot_html(&json));
            source.push_commit(&sha, vec![changed_file(&path, Some(&format!("blob-{}", sha)))]);
        }
    }

    #[tokio::test]
    async fn test_run_does_incremental_then_backfill() {
        let h = harness(limits(2, 1));
        push_history(&h.source, 4);

        let stats = h.orchestrator.run().await.unwrap();

        // c3, c4 forward; backfill anchors on c4's parent and re-walks c3
        assert_eq!(stats.incremental.commits_processed, 2);
        assert_eq!(stats.backfill.commits_processed, 1);
        assert_eq!(stats.backfill.files_processed, 0);
        assert_eq!(h.streams.len(), 2);

        let status = h.orchestrator.status().await.unwrap();
        assert_eq!(status.state, CursorState::BackfillActive);
        assert_eq!(status.latest_incremental_sha.as_deref(), Some("c4"));
        assert_eq!(status.next_backfill_sha.as_deref(), Some("c2"));
        assert_eq!(status.processed_blobs, 2);
    }

    #[tokio::test]
    async fn test_steady_state_runs_are_idempotent() {
        let h = harness(limits(25, 25));
        push_history(&h.source, 3);

        h.orchestrator.run().await.unwrap();
        let before = h.store.snapshot();
        assert_eq!(before.next_backfill, BackfillCursor::Done);

        let second = h.orchestrator.run().await.unwrap();
        assert!(second.is_zero());
        assert_eq!(h.store.snapshot(), before);
    }

    #[tokio::test]
    async fn test_full_ingestion_stops_when_backfill_completes() {
        let h = harness(limits(25, 25));
        push_history(&h.source, 6);

        let options = FullIngestionOptions {
            max_iterations: 50,
            limits: limits(2, 2),
            reset_checkpoints: false,
        };
        let report = h.orchestrator.full_ingestion(options).await.unwrap();

        assert_eq!(report.stopped_reason, StopReason::BackfillComplete);
        assert_eq!(report.status, IngestionStatus::Success);
        assert!(report.backfill_complete);
        assert_eq!(report.final_status.next_backfill_sha.as_deref(), Some(BACKFILL_DONE_SENTINEL));
        assert_eq!(report.final_status.processed_blobs, 6);
        assert_eq!(h.streams.len(), 6);
        assert!(report.iterations_run < 50);
    }

    #[tokio::test]
    async fn test_full_ingestion_respects_iteration_budget() {
        let h = harness(limits(25, 25));
        push_history(&h.source, 10);

        let options = FullIngestionOptions {
            max_iterations: 0,
            limits: limits(1, 1),
            reset_checkpoints: false,
        };
        let report = h.orchestrator.full_ingestion(options).await.unwrap();

        assert_eq!(report.iterations_run, 1);
        assert_eq!(report.stopped_reason, StopReason::MaxIterationsReached);
        assert_eq!(report.status, IngestionStatus::Partial);
        assert_eq!(report.totals.incremental.commits_processed, 1);
        assert_eq!(report.totals.backfill.commits_processed, 1);
    }

    #[tokio::test]
    async fn test_full_ingestion_stops_without_progress() {
        let h = harness(limits(25, 25));
        push_history(&h.source, 3);
        h.source.set_fail_listing(true);

        let options = FullIngestionOptions {
            max_iterations: 10,
            limits: limits(5, 5),
            reset_checkpoints: false,
        };
        let report = h.orchestrator.full_ingestion(options).await.unwrap();

        assert_eq!(report.stopped_reason, StopReason::NoProgress);
        assert_eq!(report.iterations_run, 1);
        assert!(report.totals.is_zero());
    }

    #[tokio::test]
    async fn test_limits_are_clamped_and_reset_clears_everything() {
        let h = harness(limits(25, 25));
        push_history(&h.source, 2);
        h.orchestrator.run().await.unwrap();
        assert_eq!(h.orchestrator.status().await.unwrap().state, CursorState::BackfillDone);

        let options = FullIngestionOptions {
            max_iterations: 1,
            limits: limits(500, 500),
            reset_checkpoints: true,
        };
        let report = h.orchestrator.full_ingestion(options).await.unwrap();

        assert_eq!(report.per_iteration_limits, limits(100, 100));
        // The reset made both snapshots eligible again, but their streams already exist
        assert_eq!(report.totals.incremental.files_processed, 2);
        assert_eq!(report.totals.incremental.streams_created, 0);
        assert_eq!(h.streams.len(), 2);
    }

    #[tokio::test]
    async fn test_reset_clears_cursors_and_blobs() {
        let h = harness(limits(25, 25));
        push_history(&h.source, 2);
        h.orchestrator.run().await.unwrap();

        h.orchestrator.reset().await.unwrap();

        let status = h.orchestrator.status().await.unwrap();
        assert_eq!(status.state, CursorState::Init);
        assert_eq!(status.processed_blobs, 0);
        assert_eq!(status.latest_incremental_sha, None);
    }

    #[tokio::test]
    async fn test_report_serializes_with_snake_case_reason() {
        let h = harness(limits(25, 25));
        push_history(&h.source, 1);

        let options = FullIngestionOptions {
            max_iterations: 3,
            limits: limits(5, 5),
            reset_checkpoints: false,
        };
        let report = h.orchestrator.full_ingestion(options).await.unwrap();
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["stopped_reason"], "backfill_complete");
        assert_eq!(json["status"], "success");
        assert_eq!(json["state"], "backfill_done");
        assert_eq!(json["totals"]["incremental"]["commits_processed"], 1);
    }

    #[test]
    fn test_run_lock_is_exclusive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data").join("ingest.lock");

        let lock = RunLock::acquire(&path).unwrap();
        assert!(path.exists());
        assert!(matches!(RunLock::acquire(&path), Err(OrchestratorError::AlreadyRunning(_))));

        drop(lock);
        assert!(!path.exists());
        let relocked = RunLock::acquire(&path).unwrap();
        assert_eq!(relocked.path(), path.as_path());
    }
}
