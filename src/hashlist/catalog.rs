//! Media catalog collaborators
//!
//! The resolver consults two services: the local catalog of known titles and
//! an external metadata search used when the catalog has no confident match.
//! Both sit behind traits; this module also carries the SQLite catalog and an
//! HTTP search client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::hashlist::classifier::{MatchCandidate, MediaType, max_similarity_ratio};
use crate::hashlist::database::SharedConnection;

/// Rows pulled from SQLite before similarity ranking
const CATALOG_SCAN_LIMIT: usize = 200;

/// Error types for catalog and search operations
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Search service returned HTTP {0}")]
    Status(u16),
}

/// Result type for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;

/// A title known to the local catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogMedia {
    pub id: i64,
    pub external_id: Option<String>,
    pub title: String,
    pub year: Option<i32>,
    pub end_year: Option<i32>,
    pub media_type: MediaType,
    pub adult: bool,
}

impl CatalogMedia {
    pub fn as_candidate(&self) -> MatchCandidate {
        MatchCandidate {
            title: Some(self.title.clone()),
            year: self.year,
            end_year: self.end_year,
            media_type: Some(self.media_type),
            adult: self.adult,
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let media_type: String = row.get("media_type")?;
        Ok(Self {
            id: row.get("id")?,
            external_id: row.get("external_id")?,
            title: row.get("title")?,
            year: row.get("year")?,
            end_year: row.get("end_year")?,
            media_type: media_type.parse().unwrap_or(MediaType::Movie),
            adult: row.get("adult")?,
        })
    }
}

/// One result from the external metadata search
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCandidate {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_year")]
    pub year: Option<i32>,
    #[serde(default, deserialize_with = "lenient_year")]
    pub end_year: Option<i32>,
    #[serde(default, rename = "type", deserialize_with = "lenient_media_type")]
    pub media_type: Option<MediaType>,
    #[serde(default)]
    pub adult: bool,
    #[serde(default)]
    pub poster: Option<String>,
    #[serde(default)]
    pub background: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub imdb_id: Option<String>,
    #[serde(default)]
    pub tmdb_id: Option<String>,
    #[serde(default)]
    pub tvdb_id: Option<String>,
}

impl SearchCandidate {
    pub fn as_candidate(&self) -> MatchCandidate {
        MatchCandidate {
            title: self.title.clone(),
            year: self.year,
            end_year: self.end_year,
            media_type: self.media_type,
            adult: self.adult,
        }
    }

    /// IMDb id when present, otherwise the provider's own id
    pub fn external_id(&self) -> Option<&str> {
        self.imdb_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .or_else(|| self.id.as_deref().filter(|id| !id.is_empty()))
    }
}

fn lenient_year<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(number)) => number.as_i64().map(|year| year as i32),
        Some(Value::String(text)) => text.get(..4).and_then(|year| year.parse().ok()),
        _ => None,
    })
}

fn lenient_media_type<'de, D>(deserializer: D) -> Result<Option<MediaType>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.and_then(|kind| kind.parse().ok()))
}

/// What gets written to the catalog for a new external match
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataPayload {
    pub id: String,
    pub title: String,
    pub year: Option<i32>,
    pub poster: Option<String>,
    pub background: Option<String>,
    pub description: Option<String>,
    pub genres: Vec<String>,
    pub imdb_id: Option<String>,
    pub tmdb_id: Option<String>,
    pub tvdb_id: Option<String>,
}

impl MetadataPayload {
    /// Build from a validated search result, falling back to the parsed
    /// title and year. `None` when the result carries no usable id.
    pub fn from_candidate(candidate: &SearchCandidate, title: &str, year: Option<i32>) -> Option<Self> {
        let id = candidate.external_id()?.to_string();
        Some(Self {
            id,
            title: candidate.title.clone().unwrap_or_else(|| title.to_string()),
            year: candidate.year.or(year),
            poster: candidate.poster.clone(),
            background: candidate.background.clone(),
            description: candidate.description.clone(),
            genres: candidate.genres.clone(),
            imdb_id: candidate.imdb_id.clone(),
            tmdb_id: candidate.tmdb_id.clone(),
            tvdb_id: candidate.tvdb_id.clone(),
        })
    }
}

/// Parameters of one external search
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchQuery {
    pub title: String,
    pub year: Option<i32>,
    pub media_type: MediaType,
    pub limit: usize,
    pub min_similarity: u32,
    pub include_anime: bool,
}

/// The local catalog of known titles
#[async_trait]
pub trait MediaCatalog: Send + Sync {
    /// Best local candidates of one media type for a title
    async fn search(&self, title: &str, media_type: MediaType, limit: usize) -> CatalogResult<Vec<CatalogMedia>>;

    /// Find the record for an external id, creating it if needed
    async fn get_or_create(&self, payload: &MetadataPayload, media_type: MediaType) -> CatalogResult<Option<CatalogMedia>>;

    /// The externally visible id of a catalog record
    async fn canonical_external_id(&self, media_id: i64) -> CatalogResult<Option<String>>;
}

/// The external metadata search service
#[async_trait]
pub trait MetadataSearch: Send + Sync {
    async fn search_multiple_results(&self, query: &SearchQuery) -> CatalogResult<Vec<SearchCandidate>>;
}

/// Catalog stored in the `media` table
#[derive(Clone)]
pub struct SqliteCatalog {
    conn: SharedConnection,
}

impl SqliteCatalog {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }
}

/// Longest word of a title, used to narrow the SQL scan
fn search_token(title: &str) -> String {
    title
        .split(|c: char| !c.is_alphanumeric())
        .max_by_key(|word| word.chars().count())
        .unwrap_or("")
        .to_lowercase()
}

#[async_trait]
impl MediaCatalog for SqliteCatalog {
    async fn search(&self, title: &str, media_type: MediaType, limit: usize) -> CatalogResult<Vec<CatalogMedia>> {
        let pattern = format!("%{}%", search_token(title));
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, external_id, title, year, end_year, media_type, adult
             FROM media
             WHERE media_type = ?1 AND LOWER(title) LIKE ?2
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![media_type.as_str(), pattern, CATALOG_SCAN_LIMIT as i64],
            CatalogMedia::from_row,
        )?;

        let mut scored = rows
            .map(|row| row.map(|media| (max_similarity_ratio(title, &media.title), media)))
            .collect::<Result<Vec<_>, _>>()?;
        scored.sort_by(|left, right| right.0.cmp(&left.0).then(left.1.id.cmp(&right.1.id)));

        Ok(scored.into_iter().take(limit).map(|(_, media)| media).collect())
    }

    async fn get_or_create(&self, payload: &MetadataPayload, media_type: MediaType) -> CatalogResult<Option<CatalogMedia>> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO media (
                external_id, title, year, media_type, poster, description, genres,
                imdb_id, tmdb_id, tvdb_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                payload.id,
                payload.title,
                payload.year,
                media_type.as_str(),
                payload.poster,
                payload.description,
                serde_json::to_string(&payload.genres)?,
                payload.imdb_id,
                payload.tmdb_id,
                payload.tvdb_id,
                Utc::now().timestamp(),
            ],
        )?;

        let media = conn
            .query_row(
                "SELECT id, external_id, title, year, end_year, media_type, adult
                 FROM media WHERE external_id = ?1",
                params![payload.id],
                CatalogMedia::from_row,
            )
            .optional()?;
        Ok(media)
    }

    async fn canonical_external_id(&self, media_id: i64) -> CatalogResult<Option<String>> {
        let conn = self.conn.lock().await;
        let external_id: Option<Option<String>> = conn
            .query_row(
                "SELECT external_id FROM media WHERE id = ?1",
                params![media_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(external_id.flatten())
    }
}

/// HTTP client for a metadata search service answering
/// `GET <endpoint>?title=..&type=..` with a JSON array of candidates
pub struct HttpMetadataSearch {
    client: Client,
    endpoint: Option<String>,
}

impl HttpMetadataSearch {
    pub fn new(endpoint: Option<String>, user_agent: &str, timeout: Duration) -> CatalogResult<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .gzip(true)
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.filter(|url| !url.is_empty()),
        })
    }
}

#[async_trait]
impl MetadataSearch for HttpMetadataSearch {
    async fn search_multiple_results(&self, query: &SearchQuery) -> CatalogResult<Vec<SearchCandidate>> {
        let Some(endpoint) = &self.endpoint else {
            return Ok(Vec::new());
        };

        let mut params = vec![
            ("title", query.title.clone()),
            ("type", query.media_type.to_string()),
            ("limit", query.limit.to_string()),
            ("min_similarity", query.min_similarity.to_string()),
            ("include_anime", query.include_anime.to_string()),
        ];
        if let Some(year) = query.year {
            params.push(("year", year.to_string()));
        }

        let response = self.client.get(endpoint).query(&params).send().await?;
        if !response.status().is_success() {
            return Err(CatalogError::Status(response.status().as_u16()));
        }
        let candidates: Vec<SearchCandidate> = response.json().await?;
        debug!(title = %query.title, count = candidates.len(), "External search returned candidates");
        Ok(candidates)
    }
}
