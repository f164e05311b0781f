//! Metadata resolution
//!
//! Maps a parsed (title, year, media type) to a canonical media id. The local
//! catalog is tried first; the external search only runs when the catalog has
//! nothing that passes validation. Lookups for distinct keys run concurrently
//! behind a semaphore, and every outcome (including "no match") is remembered
//! for the rest of the run.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::debug;

use crate::hashlist::catalog::{CatalogError, MediaCatalog, MetadataPayload, MetadataSearch, SearchQuery};
use crate::hashlist::classifier::{MediaType, is_likely_anime_title, is_valid_metadata_match};
use crate::hashlist::config_loader::AppConfig;

/// Error types for metadata resolution
#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Resolver semaphore closed")]
    SemaphoreClosed,
}

/// Result type for metadata resolution
pub type ResolverResult<T> = Result<T, ResolverError>;

/// Entries sharing a key share one resolution outcome
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolutionKey {
    pub title: String,
    pub year: Option<i32>,
    pub media_type: MediaType,
}

impl ResolutionKey {
    pub fn new(title: &str, year: Option<i32>, media_type: MediaType) -> Self {
        Self {
            title: title.to_lowercase(),
            year,
            media_type,
        }
    }
}

/// Everything needed to resolve one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionRequest {
    pub key: ResolutionKey,
    /// Parsed title in its original case
    pub title: String,
    /// The release name the key was first seen with
    pub torrent_title: String,
}

impl ResolutionRequest {
    pub fn new(title: &str, year: Option<i32>, media_type: MediaType, torrent_title: &str) -> Self {
        Self {
            key: ResolutionKey::new(title, year, media_type),
            title: title.to_string(),
            torrent_title: torrent_title.to_string(),
        }
    }
}

/// Outcomes for one run. Created by the run and dropped with it.
#[derive(Debug, Default)]
pub struct ResolutionCache {
    entries: HashMap<ResolutionKey, Option<String>>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Some(None)` means the key was resolved to "no match"
    pub fn get(&self, key: &ResolutionKey) -> Option<Option<&str>> {
        self.entries.get(key).map(|meta_id| meta_id.as_deref())
    }

    pub fn contains(&self, key: &ResolutionKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, key: ResolutionKey, meta_id: Option<String>) {
        self.entries.insert(key, meta_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolver tuning
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub min_similarity: u32,
    pub search_timeout: Duration,
    pub concurrency: usize,
    pub local_candidate_limit: usize,
    pub external_candidate_limit: usize,
}

impl ResolverConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            min_similarity: config.resolver.min_similarity,
            search_timeout: Duration::from_secs(config.resolver.search_timeout_secs),
            concurrency: config.resolver.resolve_concurrency.max(1),
            local_candidate_limit: config.resolver.local_candidate_limit,
            external_candidate_limit: config.resolver.external_candidate_limit,
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::default())
    }
}

/// Two-phase resolver: local catalog, then external search
pub struct MetadataResolver {
    catalog: Arc<dyn MediaCatalog>,
    search: Arc<dyn MetadataSearch>,
    config: ResolverConfig,
    semaphore: Arc<Semaphore>,
}

impl MetadataResolver {
    pub fn new(catalog: Arc<dyn MediaCatalog>, search: Arc<dyn MetadataSearch>, config: ResolverConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            catalog,
            search,
            config,
            semaphore,
        }
    }

    /// Resolve every request whose key is not cached yet and record the
    /// outcomes in `cache`
    pub async fn resolve_all(&self, requests: &[ResolutionRequest], cache: &mut ResolutionCache) -> ResolverResult<()> {
        let mut seen = HashSet::new();
        let pending: Vec<&ResolutionRequest> = requests
            .iter()
            .filter(|request| !cache.contains(&request.key))
            .filter(|request| seen.insert(request.key.clone()))
            .collect();

        if pending.is_empty() {
            return Ok(());
        }

        let outcomes = join_all(pending.iter().map(|request| self.resolve_bounded(request))).await;

        let mut first_error = None;
        for (request, outcome) in pending.into_iter().zip(outcomes) {
            match outcome {
                Ok(meta_id) => cache.insert(request.key.clone(), meta_id),
                Err(err) if first_error.is_none() => first_error = Some(err),
                Err(_) => {}
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn resolve_bounded(&self, request: &ResolutionRequest) -> ResolverResult<Option<String>> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ResolverError::SemaphoreClosed)?;
        self.resolve(request).await
    }

    /// Resolve one key without consulting the cache
    pub async fn resolve(&self, request: &ResolutionRequest) -> ResolverResult<Option<String>> {
        if let Some(meta_id) = self.resolve_from_catalog(request).await? {
            return Ok(Some(meta_id));
        }

        let meta_id = self.resolve_from_search(request).await?;
        if meta_id.is_none() {
            debug!(
                title = %request.title,
                media_type = %request.key.media_type,
                "No confident metadata match"
            );
        }
        Ok(meta_id)
    }

    async fn resolve_from_catalog(&self, request: &ResolutionRequest) -> ResolverResult<Option<String>> {
        let media_type = request.key.media_type;
        let results = match self
            .catalog
            .search(&request.title, media_type, self.config.local_candidate_limit)
            .await
        {
            Ok(results) => results,
            Err(err) => {
                debug!(title = %request.title, error = %err, "Catalog search failed");
                return Ok(None);
            }
        };

        for media in results {
            if media.adult || media.external_id.is_none() {
                continue;
            }
            if !is_valid_metadata_match(
                &request.title,
                request.key.year,
                media_type,
                &media.as_candidate(),
                self.config.min_similarity,
                Some(&request.torrent_title),
            ) {
                continue;
            }
            return Ok(self.catalog.canonical_external_id(media.id).await?);
        }

        Ok(None)
    }

    async fn resolve_from_search(&self, request: &ResolutionRequest) -> ResolverResult<Option<String>> {
        let media_type = request.key.media_type;
        let query = SearchQuery {
            title: request.title.clone(),
            year: request.key.year,
            media_type,
            limit: self.config.external_candidate_limit,
            min_similarity: self.config.min_similarity,
            include_anime: is_likely_anime_title(&request.torrent_title, Some(media_type)),
        };

        let candidates = match timeout(self.config.search_timeout, self.search.search_multiple_results(&query)).await {
            Ok(Ok(candidates)) => candidates,
            Ok(Err(err)) => {
                debug!(title = %request.title, error = %err, "Metadata search failed");
                return Ok(None);
            }
            Err(_) => {
                debug!(title = %request.title, "Metadata search timed out");
                return Ok(None);
            }
        };

        for candidate in candidates {
            if !is_valid_metadata_match(
                &request.title,
                request.key.year,
                media_type,
                &candidate.as_candidate(),
                self.config.min_similarity,
                Some(&request.torrent_title),
            ) {
                continue;
            }

            let Some(payload) = MetadataPayload::from_candidate(&candidate, &request.title, request.key.year) else {
                continue;
            };
            if let Some(media) = self.catalog.get_or_create(&payload, media_type).await? {
                return Ok(self.catalog.canonical_external_id(media.id).await?);
            }
        }

        Ok(None)
    }
}
