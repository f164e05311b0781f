//! Normalized stream records and their persistence
//!
//! A stream is one torrent linked to a canonical media id. Records are
//! written once; an info hash that already exists is left untouched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hashlist::classifier::MediaType;
use crate::hashlist::database::SharedConnection;
use crate::hashlist::payload::HashlistTorrentEntry;
use crate::hashlist::title_parser::ParsedTitleMetadata;

/// Source label stored on every record from this feed
pub const SOURCE_NAME: &str = "DMM Hashlist";

/// Error types for stream persistence
#[derive(Error, Debug)]
pub enum StreamStoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for stream persistence
pub type StreamStoreResult<T> = Result<T, StreamStoreError>;

/// One playable file inside a torrent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFile {
    pub file_index: u32,
    pub filename: String,
    pub file_type: String,
    pub season_number: Option<u32>,
    pub episode_number: Option<u32>,
}

/// Release flags carried over from the parsed name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityFlags {
    pub remastered: bool,
    pub upscaled: bool,
    pub proper: bool,
    pub repack: bool,
    pub extended: bool,
    pub complete: bool,
    pub dubbed: bool,
    pub subbed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedStreamRecord {
    pub info_hash: String,
    pub meta_id: String,
    pub name: String,
    pub size: u64,
    pub source: String,
    pub resolution: Option<String>,
    pub codec: Option<String>,
    pub quality: Option<String>,
    pub bit_depth: Option<String>,
    pub release_group: Option<String>,
    pub audio_formats: Vec<String>,
    pub channels: Vec<String>,
    pub hdr_formats: Vec<String>,
    pub languages: Vec<String>,
    pub flags: QualityFlags,
    pub files: Vec<StreamFile>,
    pub created_at: DateTime<Utc>,
}

/// Per-episode rows for series with a parsed season, otherwise one row per
/// season starting at episode 1. Movies carry no file breakdown.
pub fn build_file_breakdown(filename: &str, parsed: &ParsedTitleMetadata, media_type: MediaType) -> Vec<StreamFile> {
    let Some(&first_season) = parsed.seasons.first() else {
        return Vec::new();
    };
    if media_type != MediaType::Series {
        return Vec::new();
    }

    let video = |season: u32, episode: u32| StreamFile {
        file_index: 0,
        filename: filename.to_string(),
        file_type: "video".to_string(),
        season_number: Some(season),
        episode_number: Some(episode),
    };

    if parsed.episodes.is_empty() {
        parsed.seasons.iter().map(|&season| video(season, 1)).collect()
    } else {
        parsed.episodes.iter().map(|&episode| video(first_season, episode)).collect()
    }
}

/// Build the record stored for one resolved entry
pub fn build_stream_record(
    entry: &HashlistTorrentEntry,
    parsed: &ParsedTitleMetadata,
    meta_id: &str,
    created_at: DateTime<Utc>,
    media_type: MediaType,
) -> NormalizedStreamRecord {
    NormalizedStreamRecord {
        info_hash: entry.info_hash.clone(),
        meta_id: meta_id.to_string(),
        name: entry.filename.clone(),
        size: entry.size,
        source: SOURCE_NAME.to_string(),
        resolution: parsed.resolution.clone(),
        codec: parsed.codec.clone(),
        quality: parsed.quality.clone(),
        bit_depth: parsed.bit_depth.clone(),
        release_group: parsed.release_group.clone(),
        audio_formats: parsed.audio.clone(),
        channels: parsed.channels.clone(),
        hdr_formats: parsed.hdr.clone(),
        languages: parsed.languages.clone(),
        flags: QualityFlags {
            remastered: parsed.remastered,
            upscaled: parsed.upscaled,
            proper: parsed.proper,
            repack: parsed.repack,
            extended: parsed.extended,
            complete: parsed.complete,
            dubbed: parsed.dubbed,
            subbed: parsed.subbed,
        },
        files: build_file_breakdown(&entry.filename, parsed, media_type),
        created_at,
    }
}

/// Bulk idempotent persistence of stream records
#[async_trait]
pub trait StreamStore: Send + Sync {
    /// Insert records whose info hash is new. Returns how many were inserted.
    async fn store_new_streams(&self, records: &[NormalizedStreamRecord]) -> StreamStoreResult<usize>;
}

/// Streams stored in the `streams` and `stream_files` tables
#[derive(Clone)]
pub struct SqliteStreamStore {
    conn: SharedConnection,
}

impl SqliteStreamStore {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    pub async fn stream_count(&self) -> StreamStoreResult<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM streams", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl StreamStore for SqliteStreamStore {
    async fn store_new_streams(&self, records: &[NormalizedStreamRecord]) -> StreamStoreResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let mut stored = 0;

        {
            let mut insert_stream = tx.prepare_cached(
                "INSERT OR IGNORE INTO streams (
                    info_hash, meta_id, name, size, source, resolution, codec, quality,
                    bit_depth, release_group, audio_formats, channels, hdr_formats, languages,
                    is_remastered, is_upscaled, is_proper, is_repack, is_extended, is_complete,
                    is_dubbed, is_subbed, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                          ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
            )?;
            let mut insert_file = tx.prepare_cached(
                "INSERT INTO stream_files (
                    info_hash, file_index, filename, file_type, season_number, episode_number
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;

            for record in records {
                let inserted = insert_stream.execute(params![
                    record.info_hash,
                    record.meta_id,
                    record.name,
                    record.size.min(i64::MAX as u64) as i64,
                    record.source,
                    record.resolution,
                    record.codec,
                    record.quality,
                    record.bit_depth,
                    record.release_group,
                    serde_json::to_string(&record.audio_formats)?,
                    serde_json::to_string(&record.channels)?,
                    serde_json::to_string(&record.hdr_formats)?,
                    serde_json::to_string(&record.languages)?,
                    record.flags.remastered,
                    record.flags.upscaled,
                    record.flags.proper,
                    record.flags.repack,
                    record.flags.extended,
                    record.flags.complete,
                    record.flags.dubbed,
                    record.flags.subbed,
                    record.created_at.to_rfc3339(),
                ])?;

                // Existing info hash: leave the stored row and its files alone
                if inserted == 0 {
                    continue;
                }
                stored += 1;

                for file in &record.files {
                    insert_file.execute(params![
                        record.info_hash,
                        file.file_index,
                        file.filename,
                        file.file_type,
                        file.season_number,
                        file.episode_number,
                    ])?;
                }
            }
        }

        tx.commit()?;
        Ok(stored)
    }
}
