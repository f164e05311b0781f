//! Entry pipeline for one decoded snapshot
//!
//! Entries go through classify -> resolve -> build -> store. Filtered and
//! unresolved entries are dropped silently; the summary event records how many
//! fell out at each step.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::hashlist::classifier::{MediaType, contains_adult_keywords, is_likely_sports_broadcast_title};
use crate::hashlist::payload::{HashlistTorrentEntry, deduplicate_entries_by_info_hash};
use crate::hashlist::resolver::{MetadataResolver, ResolutionCache, ResolutionKey, ResolutionRequest, ResolverError};
use crate::hashlist::streams::{StreamStore, StreamStoreError, build_stream_record};
use crate::hashlist::title_parser::{ParsedTitleMetadata, parse_title};

/// Error types for the entry pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Resolver error: {0}")]
    Resolver(#[from] ResolverError),

    #[error("Stream store error: {0}")]
    Store(#[from] StreamStoreError),
}

/// Result type for the entry pipeline
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Per-file counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreSummary {
    pub total: usize,
    pub unique: usize,
    pub adult_skipped: usize,
    pub sports_skipped: usize,
    pub metadata_keys: usize,
    pub resolved: usize,
    pub payloads: usize,
    pub stored: usize,
}

struct Candidate {
    entry: HashlistTorrentEntry,
    parsed: ParsedTitleMetadata,
    key: ResolutionKey,
}

pub struct EntryPipeline {
    resolver: Arc<MetadataResolver>,
    streams: Arc<dyn StreamStore>,
}

impl EntryPipeline {
    pub fn new(resolver: Arc<MetadataResolver>, streams: Arc<dyn StreamStore>) -> Self {
        Self { resolver, streams }
    }

    /// Store the entries of one snapshot. `created_at` is stamped on every
    /// new record; `cache` belongs to the current run.
    pub async fn store_entries(
        &self,
        entries: Vec<HashlistTorrentEntry>,
        created_at: DateTime<Utc>,
        cache: &mut ResolutionCache,
    ) -> PipelineResult<StoreSummary> {
        let mut summary = StoreSummary {
            total: entries.len(),
            ..StoreSummary::default()
        };
        if entries.is_empty() {
            return Ok(summary);
        }

        let unique = deduplicate_entries_by_info_hash(entries);
        summary.unique = unique.len();

        let mut candidates = Vec::with_capacity(unique.len());
        let mut requests = Vec::new();
        let mut seen_keys = HashSet::new();

        for entry in unique {
            if contains_adult_keywords(&entry.filename) {
                summary.adult_skipped += 1;
                continue;
            }

            let parsed = parse_title(&entry.filename);
            if parsed.title.is_empty() {
                continue;
            }
            let media_type = parsed.media_type();
            if media_type == MediaType::Movie && is_likely_sports_broadcast_title(&entry.filename) {
                summary.sports_skipped += 1;
                continue;
            }

            // The first release name seen for a key drives anime detection
            let request = ResolutionRequest::new(&parsed.title, parsed.year, media_type, &entry.filename);
            let key = request.key.clone();
            if seen_keys.insert(key.clone()) {
                requests.push(request);
            }
            candidates.push(Candidate { entry, parsed, key });
        }
        summary.metadata_keys = requests.len();

        self.resolver.resolve_all(&requests, cache).await?;
        summary.resolved = requests
            .iter()
            .filter(|request| matches!(cache.get(&request.key), Some(Some(_))))
            .count();

        let records: Vec<_> = candidates
            .iter()
            .filter_map(|candidate| {
                let meta_id = cache.get(&candidate.key).flatten()?;
                Some(build_stream_record(
                    &candidate.entry,
                    &candidate.parsed,
                    meta_id,
                    created_at,
                    candidate.key.media_type,
                ))
            })
            .collect();
        summary.payloads = records.len();

        summary.stored = self.streams.store_new_streams(&records).await?;

        info!(
            total = summary.total,
            unique = summary.unique,
            adult_skipped = summary.adult_skipped,
            sports_skipped = summary.sports_skipped,
            metadata_keys = summary.metadata_keys,
            resolved = summary.resolved,
            payloads = summary.payloads,
            stored = summary.stored,
            "Hashlist store summary"
        );

        Ok(summary)
    }
}
