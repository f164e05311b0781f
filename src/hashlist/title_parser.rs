//! Release name parsing
//!
//! Pulls the title, year, season/episode numbers and quality attributes out of
//! scene-style names such as `Show.Name.S01E02.1080p.WEB-DL.DDP5.1.H.264-GRP`.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::hashlist::classifier::MediaType;

lazy_static! {
    static ref VIDEO_EXTENSION: Regex = Regex::new(r"(?i)\.(mkv|mp4|avi|m4v|wmv|ts)$").unwrap();
    static ref LEADING_GROUP: Regex = Regex::new(r"^\[([^\]]+)\]\s*").unwrap();
    static ref TRAILING_GROUP: Regex = Regex::new(r"-([A-Za-z0-9]+)$").unwrap();

    static ref YEAR: Regex = Regex::new(r"\b(19\d{2}|20\d{2})\b").unwrap();
    static ref SEASON_RANGE: Regex = Regex::new(r"(?i)\bS(\d{1,2})-S?(\d{1,2})\b").unwrap();
    static ref SEASON: Regex = Regex::new(r"(?i)\bS(\d{1,2})(?:E\d|\b)").unwrap();
    static ref SEASON_WORD: Regex = Regex::new(r"(?i)\bSeason\s*(\d{1,2})\b").unwrap();
    static ref EPISODE: Regex = Regex::new(r"(?i)\bS\d{1,2}E(\d{1,4})(?:-?E?(\d{1,4}))?\b").unwrap();
    static ref CROSS_EPISODE: Regex = Regex::new(r"(?i)\b(\d{1,2})x(\d{1,3})\b").unwrap();
    static ref ABSOLUTE_EPISODE: Regex = Regex::new(r"\s-\s(\d{1,4})\b").unwrap();

    static ref RESOLUTION: Regex =
        Regex::new(r"(?i)\b(2160p|4k|uhd|1440p|1080p|1080i|720p|576p|480p)\b").unwrap();
    static ref QUALITY_BOUNDARY: Regex = Regex::new(
        r"(?i)\b(2160p|4k|uhd|1440p|1080p|1080i|720p|576p|480p|web-?dl|webrip|web|blu-?ray|bdrip|brrip|hdtv|dvdrip|hdrip|remux|x264|x265|h264|h265|hevc|avc|proper|repack)\b"
    )
    .unwrap();
    static ref BIT_DEPTH: Regex = Regex::new(r"(?i)\b(8|10|12)[ -]?bit\b").unwrap();
    static ref CHANNELS: Regex = Regex::new(r"(?:^|[^\d])([257])\.([01])(?:[^\d]|$)").unwrap();

    static ref CODECS: Vec<(Regex, &'static str)> = vec![
        (Regex::new(r"(?i)\b(x\.?265|h\.?265|hevc)\b").unwrap(), "hevc"),
        (Regex::new(r"(?i)\b(x\.?264|h\.?264|avc)\b").unwrap(), "avc"),
        (Regex::new(r"(?i)\bav1\b").unwrap(), "av1"),
        (Regex::new(r"(?i)\bxvid\b").unwrap(), "xvid"),
    ];

    static ref QUALITIES: Vec<(Regex, &'static str)> = vec![
        (Regex::new(r"(?i)\bremux\b").unwrap(), "BluRay REMUX"),
        (Regex::new(r"(?i)\bweb-?dl\b").unwrap(), "WEB-DL"),
        (Regex::new(r"(?i)\bwebrip\b").unwrap(), "WEBRip"),
        (Regex::new(r"(?i)\bblu-?ray\b").unwrap(), "BluRay"),
        (Regex::new(r"(?i)\bbdrip\b").unwrap(), "BDRip"),
        (Regex::new(r"(?i)\bbrrip\b").unwrap(), "BRRip"),
        (Regex::new(r"(?i)\bhdtv\b").unwrap(), "HDTV"),
        (Regex::new(r"(?i)\bdvdrip\b").unwrap(), "DVDRip"),
        (Regex::new(r"(?i)\bhdrip\b").unwrap(), "HDRip"),
        (Regex::new(r"(?i)\bweb\b").unwrap(), "WEB"),
        (Regex::new(r"(?i)\b(cam|hdcam|telesync)\b").unwrap(), "CAM"),
    ];

    static ref AUDIO: Vec<(Regex, &'static str)> = vec![
        (Regex::new(r"(?i)\b(ddp|dd\+|e-?ac-?3)").unwrap(), "Dolby Digital Plus"),
        (Regex::new(r"(?i)\b(dd|ac-?3)(\d|\b)").unwrap(), "Dolby Digital"),
        (Regex::new(r"(?i)\bdts-?hd(\s*ma)?\b").unwrap(), "DTS Lossless"),
        (Regex::new(r"(?i)\bdts(\d|\b)").unwrap(), "DTS"),
        (Regex::new(r"(?i)\btruehd\b").unwrap(), "TrueHD"),
        (Regex::new(r"(?i)\batmos\b").unwrap(), "Atmos"),
        (Regex::new(r"(?i)\baac(\d|\b)").unwrap(), "AAC"),
        (Regex::new(r"(?i)\bflac\b").unwrap(), "FLAC"),
        (Regex::new(r"(?i)\bopus\b").unwrap(), "OPUS"),
    ];

    static ref HDR: Vec<(Regex, &'static str)> = vec![
        (Regex::new(r"(?i)\b(dv|dovi|dolby\s*vision)\b").unwrap(), "DV"),
        (Regex::new(r"(?i)\bhdr10(\+|plus)").unwrap(), "HDR10+"),
        (Regex::new(r"(?i)\bhdr10\b").unwrap(), "HDR10"),
        (Regex::new(r"(?i)\bhdr\b").unwrap(), "HDR"),
    ];

    static ref LANGUAGES: Vec<(Regex, &'static str)> = vec![
        (Regex::new(r"(?i)\b(english|eng)\b").unwrap(), "en"),
        (Regex::new(r"(?i)\b(french|truefrench|vff|vostfr)\b").unwrap(), "fr"),
        (Regex::new(r"(?i)\b(german|ger)\b").unwrap(), "de"),
        (Regex::new(r"(?i)\b(spanish|castellano|esp)\b").unwrap(), "es"),
        (Regex::new(r"(?i)\blatino\b").unwrap(), "la"),
        (Regex::new(r"(?i)\b(italian|ita)\b").unwrap(), "it"),
        (Regex::new(r"(?i)\b(japanese|jpn)\b").unwrap(), "ja"),
        (Regex::new(r"(?i)\b(korean|kor)\b").unwrap(), "ko"),
        (Regex::new(r"(?i)\bhindi\b").unwrap(), "hi"),
        (Regex::new(r"(?i)\b(russian|rus)\b").unwrap(), "ru"),
        (Regex::new(r"(?i)\b(portuguese|por)\b").unwrap(), "pt"),
        (Regex::new(r"(?i)\bmulti\b").unwrap(), "multi"),
    ];

    static ref REMASTERED: Regex = Regex::new(r"(?i)\bremaster(ed)?\b").unwrap();
    static ref UPSCALED: Regex = Regex::new(r"(?i)\b(upscaled?|ai\s*upscale)\b").unwrap();
    static ref PROPER: Regex = Regex::new(r"(?i)\bproper\b").unwrap();
    static ref REPACK: Regex = Regex::new(r"(?i)\brepack\b").unwrap();
    static ref EXTENDED: Regex = Regex::new(r"(?i)\bextended\b").unwrap();
    static ref COMPLETE: Regex = Regex::new(r"(?i)\bcomplete\b").unwrap();
    static ref DUBBED: Regex = Regex::new(r"(?i)\b(dubbed|dub)\b").unwrap();
    static ref SUBBED: Regex = Regex::new(r"(?i)\b(subbed|multi\s*subs?|vostfr)\b").unwrap();
}

/// Tokens after the final hyphen that are part of a quality tag, not a group
const NOT_A_GROUP: [&str; 3] = ["dl", "rip", "ray"];

/// Everything recoverable from a release name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedTitleMetadata {
    pub title: String,
    pub year: Option<i32>,
    pub seasons: Vec<u32>,
    pub episodes: Vec<u32>,
    pub resolution: Option<String>,
    pub codec: Option<String>,
    pub quality: Option<String>,
    pub bit_depth: Option<String>,
    pub release_group: Option<String>,
    pub audio: Vec<String>,
    pub channels: Vec<String>,
    pub hdr: Vec<String>,
    pub languages: Vec<String>,
    pub remastered: bool,
    pub upscaled: bool,
    pub proper: bool,
    pub repack: bool,
    pub extended: bool,
    pub complete: bool,
    pub dubbed: bool,
    pub subbed: bool,
}

impl ParsedTitleMetadata {
    /// Anything with season or episode numbers is a series
    pub fn media_type(&self) -> MediaType {
        if self.seasons.is_empty() && self.episodes.is_empty() {
            MediaType::Movie
        } else {
            MediaType::Series
        }
    }
}

/// Parse a release name. The title falls back to the full name when nothing
/// precedes the first recognised token.
pub fn parse_title(name: &str) -> ParsedTitleMetadata {
    let raw = VIDEO_EXTENSION.replace(name.trim(), "").to_string();
    let mut normalized = raw.replace(['.', '_'], " ");

    let mut release_group = None;
    if let Some(captures) = LEADING_GROUP.captures(&normalized) {
        release_group = Some(captures[1].trim().to_string());
        let consumed = captures[0].len();
        normalized = normalized[consumed..].to_string();
    }
    if release_group.is_none() {
        release_group = TRAILING_GROUP
            .captures(&raw)
            .map(|captures| captures[1].to_string())
            .filter(|group| !NOT_A_GROUP.contains(&group.to_lowercase().as_str()));
    }

    let year_match = YEAR.find_iter(&normalized).find(|found| found.start() > 0);
    let year = year_match.and_then(|found| found.as_str().parse::<i32>().ok());

    let seasons = parse_seasons(&normalized);
    let episodes = parse_episodes(&normalized);

    let title_end = [
        year_match.map(|found| found.start()),
        SEASON_RANGE.find(&normalized).map(|found| found.start()),
        SEASON.find(&normalized).map(|found| found.start()),
        SEASON_WORD.find(&normalized).map(|found| found.start()),
        CROSS_EPISODE.find(&normalized).map(|found| found.start()),
        ABSOLUTE_EPISODE.find(&normalized).map(|found| found.start()),
        QUALITY_BOUNDARY.find(&normalized).map(|found| found.start()),
        normalized.find(['[', '(']).filter(|index| *index > 0),
    ]
    .into_iter()
    .flatten()
    .filter(|index| *index > 0)
    .min()
    .unwrap_or(normalized.len());

    let mut title = normalized[..title_end]
        .trim()
        .trim_end_matches(['-', ' '])
        .trim()
        .to_string();
    if title.is_empty() {
        title = normalized.trim().to_string();
    }

    let resolution = RESOLUTION.captures(&normalized).map(|captures| {
        match captures[1].to_lowercase().as_str() {
            "4k" | "uhd" => "2160p".to_string(),
            "1080i" => "1080p".to_string(),
            other => other.to_string(),
        }
    });

    ParsedTitleMetadata {
        title,
        year,
        seasons,
        episodes,
        resolution,
        codec: first_label(&CODECS, &raw).map(str::to_string),
        quality: first_label(&QUALITIES, &normalized).map(str::to_string),
        bit_depth: BIT_DEPTH
            .captures(&normalized)
            .map(|captures| format!("{}bit", &captures[1])),
        release_group,
        audio: all_labels(&AUDIO, &raw),
        channels: CHANNELS
            .captures_iter(&raw)
            .map(|captures| format!("{}.{}", &captures[1], &captures[2]))
            .fold(Vec::new(), push_unique),
        hdr: parse_hdr(&normalized),
        languages: all_labels(&LANGUAGES, &normalized),
        remastered: REMASTERED.is_match(&normalized),
        upscaled: UPSCALED.is_match(&normalized),
        proper: PROPER.is_match(&normalized),
        repack: REPACK.is_match(&normalized),
        extended: EXTENDED.is_match(&normalized),
        complete: COMPLETE.is_match(&normalized),
        dubbed: DUBBED.is_match(&normalized),
        subbed: SUBBED.is_match(&normalized),
    }
}

fn parse_seasons(normalized: &str) -> Vec<u32> {
    if let Some(captures) = SEASON_RANGE.captures(normalized) {
        let first: u32 = captures[1].parse().unwrap_or(0);
        let last: u32 = captures[2].parse().unwrap_or(0);
        if first <= last {
            return (first..=last).collect();
        }
    }

    let mut seasons = SEASON
        .captures_iter(normalized)
        .chain(SEASON_WORD.captures_iter(normalized))
        .chain(CROSS_EPISODE.captures_iter(normalized))
        .filter_map(|captures| captures[1].parse::<u32>().ok())
        .fold(Vec::new(), push_unique);
    seasons.sort_unstable();
    seasons
}

fn parse_episodes(normalized: &str) -> Vec<u32> {
    if let Some(captures) = EPISODE.captures(normalized) {
        let first: u32 = captures[1].parse().unwrap_or(0);
        let last = captures
            .get(2)
            .and_then(|found| found.as_str().parse::<u32>().ok())
            .filter(|last| *last >= first)
            .unwrap_or(first);
        return (first..=last).collect();
    }

    if let Some(captures) = CROSS_EPISODE.captures(normalized) {
        return captures[2].parse::<u32>().into_iter().collect();
    }

    ABSOLUTE_EPISODE
        .captures(normalized)
        .and_then(|captures| captures[1].parse::<u32>().ok())
        .into_iter()
        .collect()
}

fn parse_hdr(normalized: &str) -> Vec<String> {
    let mut formats = all_labels(&HDR, normalized);
    if formats.iter().any(|format| format == "HDR10+") {
        formats.retain(|format| format != "HDR10");
    }
    formats
}

fn first_label(table: &[(Regex, &'static str)], text: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(pattern, _)| pattern.is_match(text))
        .map(|(_, label)| *label)
}

fn all_labels(table: &[(Regex, &'static str)], text: &str) -> Vec<String> {
    table
        .iter()
        .filter(|(pattern, _)| pattern.is_match(text))
        .map(|(_, label)| label.to_string())
        .fold(Vec::new(), push_unique)
}

fn push_unique<T: PartialEq>(mut items: Vec<T>, item: T) -> Vec<T> {
    if !items.contains(&item) {
        items.push(item);
    }
    items
}
