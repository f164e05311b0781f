//! Two-cursor walk over the hashlist commit history
//!
//! The incremental pass follows new commits from the head down to the stored
//! high-water mark. The backfill pass walks first parents from the low-water
//! mark toward the root commit. Both share the per-commit and per-file
//! processing below. Cursors are written once per pass; processed blobs are
//! recorded file by file.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{Instrument, debug, debug_span, info, warn};

use crate::hashlist::checkpoint::{BackfillCursor, CheckpointError, CheckpointStore, CursorState, ProcessedBlobSet};
use crate::hashlist::config_loader::AppConfig;
use crate::hashlist::github::{ChangedFile, CommitDetail, CommitSource};
use crate::hashlist::logger::{SnapshotStatus, log_commit, log_snapshot};
use crate::hashlist::payload::{FragmentExtractor, decode_hashlist_payload};
use crate::hashlist::pipeline::{EntryPipeline, PipelineError};
use crate::hashlist::resolver::ResolutionCache;

const INCREMENTAL_PASS: &str = "incremental";
const BACKFILL_PASS: &str = "backfill";

/// Error types for the commit walker. Remote failures are absorbed; only
/// local storage failures surface here.
#[derive(Error, Debug)]
pub enum WalkerError {
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Result type for the commit walker
pub type WalkerResult<T> = Result<T, WalkerError>;

#[derive(Debug, Clone)]
pub struct WalkerConfig {
    pub snapshot_extension: String,
    pub fragment_host: String,
    pub max_commits_per_page: usize,
}

impl WalkerConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            snapshot_extension: config.source.snapshot_extension.clone(),
            fragment_host: config.source.fragment_host.clone(),
            max_commits_per_page: config.limits.max_commits_per_page.max(1),
        }
    }
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::default())
    }
}

/// Counters for one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassStats {
    pub commits_processed: usize,
    pub files_processed: usize,
    pub streams_created: usize,
}

impl PassStats {
    pub fn add(&mut self, other: &PassStats) {
        self.commits_processed += other.commits_processed;
        self.files_processed += other.files_processed;
        self.streams_created += other.streams_created;
    }

    pub fn is_zero(&self) -> bool {
        *self == PassStats::default()
    }
}

/// What processing one commit yielded
struct ProcessedCommit {
    first_parent: Option<String>,
    files_processed: usize,
    streams_created: usize,
}

pub struct CommitWalker {
    source: Arc<dyn CommitSource>,
    checkpoints: Arc<dyn CheckpointStore>,
    blobs: Arc<dyn ProcessedBlobSet>,
    pipeline: Arc<EntryPipeline>,
    extractor: FragmentExtractor,
    config: WalkerConfig,
}

impl CommitWalker {
    pub fn new(
        source: Arc<dyn CommitSource>,
        checkpoints: Arc<dyn CheckpointStore>,
        blobs: Arc<dyn ProcessedBlobSet>,
        pipeline: Arc<EntryPipeline>,
        config: WalkerConfig,
    ) -> Self {
        let extractor = FragmentExtractor::new(&config.fragment_host);
        Self {
            source,
            checkpoints,
            blobs,
            pipeline,
            extractor,
            config,
        }
    }

    /// Crawl state as derived from the stored cursors
    pub async fn state(&self) -> WalkerResult<CursorState> {
        Ok(self.checkpoints.load().await?.state())
    }

    /// Process commits newer than the high-water mark, oldest first, and move
    /// the mark to the head of the fetched page
    pub async fn run_incremental(&self, limit: usize, cache: &mut ResolutionCache) -> WalkerResult<PassStats> {
        let mut stats = PassStats::default();
        if limit == 0 {
            return Ok(stats);
        }

        let checkpoint = self.checkpoints.load().await?;
        let latest = checkpoint.latest_incremental_sha.as_deref();
        let per_page = limit.min(self.config.max_commits_per_page);

        let commits = match self.source.list_commits(per_page, 1).await {
            Ok(commits) => commits,
            Err(err) => {
                warn!(error = %err, "Failed to list commits, skipping incremental pass");
                return Ok(stats);
            }
        };
        let Some(head) = commits.first() else {
            debug!("Commit listing is empty");
            return Ok(stats);
        };

        let mut pending = Vec::new();
        let mut reached_latest = false;
        for commit in &commits {
            if Some(commit.sha.as_str()) == latest {
                reached_latest = true;
                break;
            }
            pending.push(commit.sha.clone());
        }

        if latest.is_some() && !reached_latest {
            info!(
                fetched = commits.len(),
                "Incremental page capped before the last seen commit, older commits are left to backfill"
            );
        }

        let mut last_processed = None;
        let mut interrupted = false;
        for sha in pending.iter().rev() {
            match self.process_commit(sha, INCREMENTAL_PASS, cache).await? {
                Some(processed) => {
                    stats.commits_processed += 1;
                    stats.files_processed += processed.files_processed;
                    stats.streams_created += processed.streams_created;
                    last_processed = Some(sha.as_str());
                }
                None => {
                    interrupted = true;
                    break;
                }
            }
        }

        // An interrupted batch only advances as far as it got
        let new_latest = if interrupted { last_processed } else { Some(head.sha.as_str()) };
        if let Some(sha) = new_latest {
            if Some(sha) != latest {
                self.checkpoints.save_latest_incremental(sha).await?;
            }
        }

        Ok(stats)
    }

    /// Walk first parents from the low-water mark, at most `limit` commits
    pub async fn run_backfill(&self, limit: usize, cache: &mut ResolutionCache) -> WalkerResult<PassStats> {
        let mut stats = PassStats::default();
        if limit == 0 {
            return Ok(stats);
        }

        let checkpoint = self.checkpoints.load().await?;
        let start = match checkpoint.next_backfill {
            BackfillCursor::Done => {
                debug!("Backfill already complete");
                return Ok(stats);
            }
            BackfillCursor::At(sha) => sha,
            BackfillCursor::Unset => match self.backfill_start(checkpoint.latest_incremental_sha).await? {
                Some(sha) => sha,
                None => return Ok(stats),
            },
        };

        let mut current = Some(start);
        while let Some(sha) = current.clone() {
            if stats.commits_processed >= limit {
                break;
            }
            match self.process_commit(&sha, BACKFILL_PASS, cache).await? {
                Some(processed) => {
                    stats.commits_processed += 1;
                    stats.files_processed += processed.files_processed;
                    stats.streams_created += processed.streams_created;
                    current = processed.first_parent;
                }
                // Keep the cursor on the failed commit so the next run retries it
                None => break,
            }
        }

        let cursor = match current {
            Some(sha) => BackfillCursor::At(sha),
            None => {
                info!("Backfill reached the root commit");
                BackfillCursor::Done
            }
        };
        self.checkpoints.save_next_backfill(&cursor).await?;

        Ok(stats)
    }

    /// First backfill commit: the parent of the high-water mark, or of the
    /// current head when no incremental pass has run yet
    async fn backfill_start(&self, latest: Option<String>) -> WalkerResult<Option<String>> {
        let anchor = match latest {
            Some(sha) => sha,
            None => match self.source.list_commits(1, 1).await {
                Ok(commits) => match commits.into_iter().next() {
                    Some(head) => head.sha,
                    None => return Ok(None),
                },
                Err(err) => {
                    warn!(error = %err, "Failed to list commits, skipping backfill pass");
                    return Ok(None);
                }
            },
        };

        let detail = match self.source.get_commit(&anchor).await {
            Ok(detail) => detail,
            Err(err) => {
                warn!(commit = %anchor, error = %err, "Failed to fetch backfill anchor");
                return Ok(None);
            }
        };

        match detail.first_parent() {
            Some(parent) => Ok(Some(parent.to_string())),
            None => {
                info!(commit = %anchor, "Backfill anchor has no parent, nothing to backfill");
                self.checkpoints.save_next_backfill(&BackfillCursor::Done).await?;
                Ok(None)
            }
        }
    }

    /// `None` when the commit detail could not be fetched
    async fn process_commit(
        &self,
        sha: &str,
        pass: &'static str,
        cache: &mut ResolutionCache,
    ) -> WalkerResult<Option<ProcessedCommit>> {
        let span = debug_span!("commit", pass, commit = %sha);
        self.process_commit_files(sha, pass, cache).instrument(span).await
    }

    async fn process_commit_files(
        &self,
        sha: &str,
        pass: &'static str,
        cache: &mut ResolutionCache,
    ) -> WalkerResult<Option<ProcessedCommit>> {
        let detail = match self.source.get_commit(sha).await {
            Ok(detail) => detail,
            Err(err) => {
                warn!(error = %err, "Failed to fetch commit detail");
                return Ok(None);
            }
        };

        let mut files_processed = 0;
        let mut streams_created = 0;
        for file in detail
            .files
            .iter()
            .filter(|file| file.path.ends_with(&self.config.snapshot_extension))
        {
            if let Some(stored) = self.process_file(&detail, file, cache).await? {
                files_processed += 1;
                streams_created += stored;
            }
        }

        log_commit(pass, sha, files_processed, streams_created);
        Ok(Some(ProcessedCommit {
            first_parent: detail.first_parent().map(str::to_string),
            files_processed,
            streams_created,
        }))
    }

    /// Number of streams stored, or `None` when the file was skipped
    async fn process_file(
        &self,
        commit: &CommitDetail,
        file: &ChangedFile,
        cache: &mut ResolutionCache,
    ) -> WalkerResult<Option<usize>> {
        let blob = file.blob_sha.as_deref();
        let report = |status: SnapshotStatus, detail: Option<&str>| {
            log_snapshot(&commit.sha, &file.path, blob, status, detail);
        };

        if let Some(blob) = blob {
            if self.blobs.contains(blob).await? {
                report(SnapshotStatus::AlreadyProcessed, None);
                return Ok(None);
            }
        }

        let html = match self.source.fetch_raw(&file.raw_url).await {
            Ok(html) => html,
            Err(err) => {
                report(SnapshotStatus::FetchFailed, Some(err.to_string().as_str()));
                return Ok(None);
            }
        };

        let Some(fragment) = self.extractor.extract(&html) else {
            self.mark_processed(blob).await?;
            report(SnapshotStatus::NoFragment, None);
            return Ok(None);
        };

        let entries = match decode_hashlist_payload(fragment) {
            Ok(entries) => entries,
            Err(err) if err.is_permanent() => {
                self.mark_processed(blob).await?;
                report(SnapshotStatus::Malformed, Some(err.to_string().as_str()));
                return Ok(None);
            }
            Err(err) => {
                report(SnapshotStatus::DecodeFailed, Some(err.to_string().as_str()));
                return Ok(None);
            }
        };

        let summary = self
            .pipeline
            .store_entries(entries, commit.author_date, cache)
            .await?;
        self.mark_processed(blob).await?;
        report(SnapshotStatus::Stored, None);

        Ok(Some(summary.stored))
    }

    async fn mark_processed(&self, blob: Option<&str>) -> WalkerResult<()> {
        if let Some(blob) = blob {
            self.blobs.insert(blob).await?;
        }
        Ok(())
    }
}
