//! In-memory collaborators and payload builders for tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::hashlist::catalog::{
    CatalogMedia, CatalogResult, MediaCatalog, MetadataPayload, MetadataSearch, SearchCandidate, SearchQuery,
};
use crate::hashlist::checkpoint::{
    BackfillCursor, Checkpoint, CheckpointResult, CheckpointStore, ProcessedBlobSet,
};
use crate::hashlist::classifier::MediaType;
use crate::hashlist::github::{
    ChangedFile, CommitDetail, CommitSource, CommitSummary, FetchError, FetchResult,
};
use crate::hashlist::lzstring::URI_SAFE_ALPHABET;
use crate::hashlist::streams::{NormalizedStreamRecord, StreamStore, StreamStoreResult};

/// Encode `text` as a literal-only LZ-String stream. Every UTF-16 unit is
/// written as a fresh literal, which any conforming decoder accepts.
pub fn encode_literals(text: &str) -> String {
    let alphabet: Vec<char> = URI_SAFE_ALPHABET.chars().collect();
    let mut writer = BitWriter::new(&alphabet);
    let units: Vec<u16> = text.encode_utf16().collect();

    let Some((&first, rest)) = units.split_first() else {
        return String::new();
    };

    let mut num_bits = 3;
    let mut enlarge_in = 4u32;
    let mut consume = |num_bits: &mut u32| {
        enlarge_in -= 1;
        if enlarge_in == 0 {
            enlarge_in = 1 << *num_bits;
            *num_bits += 1;
        }
    };

    writer.write_literal(2, first);
    for &unit in rest {
        writer.write_literal(num_bits, unit);
        consume(&mut num_bits);
        consume(&mut num_bits);
    }
    writer.write(num_bits, 2);
    writer.finish()
}

struct BitWriter<'a> {
    alphabet: &'a [char],
    output: String,
    value: usize,
    position: u32,
}

impl<'a> BitWriter<'a> {
    fn new(alphabet: &'a [char]) -> Self {
        Self {
            alphabet,
            output: String::new(),
            value: 0,
            position: 0,
        }
    }

    fn write(&mut self, bit_count: u32, value: u32) {
        for shift in 0..bit_count {
            let bit = ((value >> shift) & 1) as usize;
            self.value = (self.value << 1) | bit;
            if self.position == 5 {
                self.output.push(self.alphabet[self.value]);
                self.value = 0;
                self.position = 0;
            } else {
                self.position += 1;
            }
        }
    }

    fn write_literal(&mut self, code_bits: u32, unit: u16) {
        if unit < 256 {
            self.write(code_bits, 0);
            self.write(8, unit as u32);
        } else {
            self.write(code_bits, 1);
            self.write(16, unit as u32);
        }
    }

    fn finish(mut self) -> String {
        loop {
            self.value <<= 1;
            if self.position == 5 {
                self.output.push(self.alphabet[self.value]);
                break;
            }
            self.position += 1;
        }
        self.output
    }
}

/// A snapshot page embedding `json` the way the viewer links it
pub fn snapshot_html(json: &str) -> String {
    format!(
        r#"<html><body><iframe src="https://debridmediamanager.com/hashlist#{}"></iframe></body></html>"#,
        encode_literals(json)
    )
}

pub fn changed_file(path: &str, blob_sha: Option<&str>) -> ChangedFile {
    ChangedFile {
        path: path.to_string(),
        blob_sha: blob_sha.map(str::to_string),
        raw_url: raw_url(path),
    }
}

pub fn raw_url(path: &str) -> String {
    format!("https://raw.test/{}", path)
}

#[derive(Default)]
struct SourceState {
    /// Oldest first
    commits: Vec<CommitDetail>,
    raw: HashMap<String, String>,
    failing_raw: HashSet<String>,
    failing_commits: HashSet<String>,
    fail_listing: bool,
    raw_fetches: HashMap<String, usize>,
    commit_fetches: usize,
}

/// Linear commit history held in memory
#[derive(Default)]
pub struct FakeCommitSource {
    state: Mutex<SourceState>,
}

impl FakeCommitSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a commit on top of the current head
    pub fn push_commit(&self, sha: &str, files: Vec<ChangedFile>) {
        let mut state = self.state.lock();
        let parents = state.commits.last().map(|head| vec![head.sha.clone()]).unwrap_or_default();
        let author_date = DateTime::<Utc>::from_timestamp(1_700_000_000 + state.commits.len() as i64 * 60, 0)
            .unwrap_or_default();
        state.commits.push(CommitDetail {
            sha: sha.to_string(),
            author_date,
            parents,
            files,
        });
    }

    pub fn set_raw(&self, url: &str, body: &str) {
        self.state.lock().raw.insert(url.to_string(), body.to_string());
    }

    pub fn fail_raw(&self, url: &str) {
        self.state.lock().failing_raw.insert(url.to_string());
    }

    pub fn heal_raw(&self, url: &str) {
        self.state.lock().failing_raw.remove(url);
    }

    pub fn fail_commit(&self, sha: &str) {
        self.state.lock().failing_commits.insert(sha.to_string());
    }

    pub fn heal_commit(&self, sha: &str) {
        self.state.lock().failing_commits.remove(sha);
    }

    pub fn set_fail_listing(&self, fail: bool) {
        self.state.lock().fail_listing = fail;
    }

    pub fn raw_fetch_count(&self, url: &str) -> usize {
        self.state.lock().raw_fetches.get(url).copied().unwrap_or(0)
    }

    pub fn commit_fetch_count(&self) -> usize {
        self.state.lock().commit_fetches
    }
}

fn unavailable(url: &str) -> FetchError {
    FetchError::Status {
        url: url.to_string(),
        status: 503,
    }
}

#[async_trait]
impl CommitSource for FakeCommitSource {
    async fn list_commits(&self, per_page: usize, page: usize) -> FetchResult<Vec<CommitSummary>> {
        let state = self.state.lock();
        if state.fail_listing {
            return Err(unavailable("commits"));
        }
        let skip = page.saturating_sub(1) * per_page;
        Ok(state
            .commits
            .iter()
            .rev()
            .skip(skip)
            .take(per_page)
            .map(|commit| CommitSummary {
                sha: commit.sha.clone(),
                author_date: Some(commit.author_date),
            })
            .collect())
    }

    async fn get_commit(&self, sha: &str) -> FetchResult<CommitDetail> {
        let mut state = self.state.lock();
        state.commit_fetches += 1;
        if state.failing_commits.contains(sha) {
            return Err(unavailable(sha));
        }
        state
            .commits
            .iter()
            .find(|commit| commit.sha == sha)
            .cloned()
            .ok_or_else(|| FetchError::Status {
                url: sha.to_string(),
                status: 404,
            })
    }

    async fn fetch_raw(&self, url: &str) -> FetchResult<String> {
        let mut state = self.state.lock();
        *state.raw_fetches.entry(url.to_string()).or_insert(0) += 1;
        if state.failing_raw.contains(url) {
            return Err(unavailable(url));
        }
        state.raw.get(url).cloned().ok_or_else(|| FetchError::Status {
            url: url.to_string(),
            status: 404,
        })
    }
}

/// Cursor and blob store held in memory
#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoint: Mutex<Checkpoint>,
    blobs: Mutex<HashSet<String>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Checkpoint {
        self.checkpoint.lock().clone()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self) -> CheckpointResult<Checkpoint> {
        Ok(self.checkpoint.lock().clone())
    }

    async fn save_latest_incremental(&self, sha: &str) -> CheckpointResult<()> {
        self.checkpoint.lock().latest_incremental_sha = Some(sha.to_string());
        Ok(())
    }

    async fn save_next_backfill(&self, cursor: &BackfillCursor) -> CheckpointResult<()> {
        self.checkpoint.lock().next_backfill = cursor.clone();
        Ok(())
    }

    async fn clear(&self) -> CheckpointResult<()> {
        *self.checkpoint.lock() = Checkpoint::default();
        Ok(())
    }
}

#[async_trait]
impl ProcessedBlobSet for MemoryCheckpointStore {
    async fn contains(&self, blob_id: &str) -> CheckpointResult<bool> {
        Ok(self.blobs.lock().contains(blob_id))
    }

    async fn insert(&self, blob_id: &str) -> CheckpointResult<()> {
        self.blobs.lock().insert(blob_id.to_string());
        Ok(())
    }

    async fn count(&self) -> CheckpointResult<u64> {
        Ok(self.blobs.lock().len() as u64)
    }

    async fn clear(&self) -> CheckpointResult<()> {
        self.blobs.lock().clear();
        Ok(())
    }
}

/// Catalog held in memory. Search returns every row of the requested type.
#[derive(Default)]
pub struct FakeCatalog {
    media: Mutex<Vec<CatalogMedia>>,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, external_id: Option<&str>, title: &str, year: Option<i32>, media_type: MediaType, adult: bool) {
        let mut media = self.media.lock();
        let id = media.len() as i64 + 1;
        media.push(CatalogMedia {
            id,
            external_id: external_id.map(str::to_string),
            title: title.to_string(),
            year,
            end_year: None,
            media_type,
            adult,
        });
    }

    pub fn add_media(&self, external_id: &str, title: &str, year: Option<i32>, media_type: MediaType) {
        self.push(Some(external_id), title, year, media_type, false);
    }

    pub fn add_adult_media(&self, external_id: &str, title: &str, year: Option<i32>, media_type: MediaType) {
        self.push(Some(external_id), title, year, media_type, true);
    }

    pub fn add_unlinked_media(&self, title: &str, year: Option<i32>, media_type: MediaType) {
        self.push(None, title, year, media_type, false);
    }

    pub fn media_count(&self) -> usize {
        self.media.lock().len()
    }
}

#[async_trait]
impl MediaCatalog for FakeCatalog {
    async fn search(&self, _title: &str, media_type: MediaType, limit: usize) -> CatalogResult<Vec<CatalogMedia>> {
        Ok(self
            .media
            .lock()
            .iter()
            .filter(|media| media.media_type == media_type)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_or_create(&self, payload: &MetadataPayload, media_type: MediaType) -> CatalogResult<Option<CatalogMedia>> {
        let existing = self
            .media
            .lock()
            .iter()
            .find(|media| media.external_id.as_deref() == Some(payload.id.as_str()))
            .cloned();
        if existing.is_some() {
            return Ok(existing);
        }

        self.push(Some(&payload.id), &payload.title, payload.year, media_type, false);
        Ok(self.media.lock().last().cloned())
    }

    async fn canonical_external_id(&self, media_id: i64) -> CatalogResult<Option<String>> {
        Ok(self
            .media
            .lock()
            .iter()
            .find(|media| media.id == media_id)
            .and_then(|media| media.external_id.clone()))
    }
}

#[derive(Default)]
struct SearchState {
    results: HashMap<String, Vec<SearchCandidate>>,
    failing: bool,
    delay: Option<Duration>,
    queries: Vec<SearchQuery>,
}

/// Metadata search answering from a title-keyed table
#[derive(Default)]
pub struct FakeSearch {
    state: Mutex<SearchState>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeSearch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Results for a lowercased title
    pub fn add_results(&self, title: &str, candidates: Vec<SearchCandidate>) {
        self.state.lock().results.insert(title.to_string(), candidates);
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = Some(delay);
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().queries.len()
    }

    pub fn queries(&self) -> Vec<SearchQuery> {
        self.state.lock().queries.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataSearch for FakeSearch {
    async fn search_multiple_results(&self, query: &SearchQuery) -> CatalogResult<Vec<SearchCandidate>> {
        let (delay, failing, results) = {
            let mut state = self.state.lock();
            state.queries.push(query.clone());
            (
                state.delay,
                state.failing,
                state.results.get(&query.title.to_lowercase()).cloned().unwrap_or_default(),
            )
        };

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if failing {
            return Err(crate::hashlist::catalog::CatalogError::Status(500));
        }
        Ok(results)
    }
}

/// Stream store keyed by info hash
#[derive(Default)]
pub struct MemoryStreamStore {
    records: Mutex<Vec<NormalizedStreamRecord>>,
}

impl MemoryStreamStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<NormalizedStreamRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }
}

#[async_trait]
impl StreamStore for MemoryStreamStore {
    async fn store_new_streams(&self, records: &[NormalizedStreamRecord]) -> StreamStoreResult<usize> {
        let mut stored = self.records.lock();
        let mut inserted = 0;
        for record in records {
            if stored.iter().any(|existing| existing.info_hash == record.info_hash) {
                continue;
            }
            stored.push(record.clone());
            inserted += 1;
        }
        Ok(inserted)
    }
}
