//! Heuristic entry classification
//!
//! Release names in the hashlists are free text. These checks decide which
//! entries are worth resolving and whether a catalog candidate is a believable
//! match for a parsed title.

use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Minimum title similarity (0-100) for a candidate to be linked
pub const DEFAULT_MIN_SIMILARITY: u32 = 87;

lazy_static! {
    static ref SPORTS_BROADCASTER_PATTERN: Regex =
        Regex::new(r"(?i)Sky\s*F1(?:UHD|HD)?|Sky\s*Sports|F1TV|V\s*Sport|MotoGP\s*VideoPass").unwrap();
    static ref SPORTS_DOMAIN_PATTERN: Regex = Regex::new(
        r"(?i)\b(UFC|WWE|AEW|NBA|NFL|MLB|NHL|F1|Formula\s*1|MotoGP|WRC|Premier\s*League|La\s*Liga|Bundesliga|Serie\s*A)\b"
    )
    .unwrap();
    static ref SPORTS_EVENT_PATTERN: Regex = Regex::new(
        r"(?i)\b(Grand\s*Prix|Prelims|Main\s*Card|Qualifying|Race\s*Day|vs\.?|Playoffs?|R\d{1,2}|Raw|SmackDown)\b"
    )
    .unwrap();
    static ref DATE_STAMP_PATTERN: Regex = Regex::new(r"\b20\d{2}[.\-_ ]\d{2}[.\-_ ]\d{2}\b").unwrap();
    static ref ANIME_RELEASE_GROUP_PATTERN: Regex =
        Regex::new(r"(?i)\[(subsplease|erai-raws|horriblesubs|judas|ember|anime-time|nyaa)\]").unwrap();
    static ref ANIME_KEYWORD_PATTERN: Regex = Regex::new(r"(?i)\b(anime|ova|ona|vostfr|dual\s?audio)\b").unwrap();
    static ref SEASON_EPISODE_PATTERN: Regex = Regex::new(r"(?i)\bS\d{1,2}E\d{1,3}\b").unwrap();
    static ref ANIME_EPISODE_NUMBER_PATTERN: Regex = Regex::new(r"\b\d{3,4}\b").unwrap();
    static ref ADULT_KEYWORD_PATTERN: Regex = Regex::new(
        r"(?i)\b(xxx|porn|porno|pornhub|hentai|brazzers|bangbros|naughty\s*america|realitykings|onlyfans|blacked|tushy|vixen\.com|milf|jav|nsfw|erotica|camgirl)\b"
    )
    .unwrap();
    static ref LEADING_ARTICLE_PATTERN: Regex = Regex::new(r"^(the|a|an)\s+").unwrap();
    static ref NON_ALPHANUMERIC_PATTERN: Regex = Regex::new(r"[^\p{L}\p{N}]+").unwrap();
}

/// Resolution numbers that show up in release names and are not episodes
const COMMON_VIDEO_NUMBER_TOKENS: [u32; 7] = [480, 540, 576, 720, 1080, 1440, 2160];

/// Kind of media a release is linked to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Series,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Series => "series",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "movie" => Ok(MediaType::Movie),
            "series" => Ok(MediaType::Series),
            other => Err(format!("unknown media type: {}", other)),
        }
    }
}

/// The fields of a catalog or search result that matter for matching
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchCandidate {
    pub title: Option<String>,
    pub year: Option<i32>,
    /// Last airing year of a series; `None` means ongoing or unknown
    pub end_year: Option<i32>,
    pub media_type: Option<MediaType>,
    pub adult: bool,
}

/// Word-boundary match against known adult terms
pub fn contains_adult_keywords(name: &str) -> bool {
    ADULT_KEYWORD_PATTERN.is_match(name)
}

/// A broadcaster name alone is enough. A sports league needs an event word
/// or a date stamp next to it.
pub fn is_likely_sports_broadcast_title(title: &str) -> bool {
    if SPORTS_BROADCASTER_PATTERN.is_match(title) {
        return true;
    }
    if !SPORTS_DOMAIN_PATTERN.is_match(title) {
        return false;
    }
    SPORTS_EVENT_PATTERN.is_match(title) || DATE_STAMP_PATTERN.is_match(title)
}

/// Guess whether a release is anime, used to widen external searches
pub fn is_likely_anime_title(title: &str, media_type: Option<MediaType>) -> bool {
    if ANIME_RELEASE_GROUP_PATTERN.is_match(title) || ANIME_KEYWORD_PATTERN.is_match(title) {
        return true;
    }
    if media_type == Some(MediaType::Movie) || SEASON_EPISODE_PATTERN.is_match(title) {
        return false;
    }

    // Absolute episode numbering, e.g. "One.Piece.1089"
    ANIME_EPISODE_NUMBER_PATTERN
        .find_iter(title)
        .filter_map(|token| token.as_str().parse::<u32>().ok())
        .any(|number| {
            !COMMON_VIDEO_NUMBER_TOKENS.contains(&number)
                && !(1900..=2099).contains(&number)
                && number >= 100
        })
}

fn normalize_title(title: &str) -> String {
    let lowered = title.to_lowercase();
    NON_ALPHANUMERIC_PATTERN
        .replace_all(&lowered, " ")
        .trim()
        .to_string()
}

/// Similarity of two titles on a 0-100 scale
pub fn similarity_ratio(left: &str, right: &str) -> u32 {
    let left = normalize_title(left);
    let right = normalize_title(right);
    (strsim::normalized_levenshtein(&left, &right) * 100.0).round() as u32
}

/// Best similarity with and without a leading article on either side
pub fn max_similarity_ratio(left: &str, right: &str) -> u32 {
    let left = normalize_title(left);
    let right = normalize_title(right);
    let stripped_left = LEADING_ARTICLE_PATTERN.replace(&left, "");
    let stripped_right = LEADING_ARTICLE_PATTERN.replace(&right, "");

    [
        similarity_ratio(&left, &right),
        similarity_ratio(&stripped_left, &stripped_right),
    ]
    .into_iter()
    .max()
    .unwrap_or(0)
}

/// Decide whether `candidate` is an acceptable identity for a parsed release
pub fn is_valid_metadata_match(
    parsed_title: &str,
    parsed_year: Option<i32>,
    media_type: MediaType,
    candidate: &MatchCandidate,
    min_similarity: u32,
    torrent_title: Option<&str>,
) -> bool {
    let candidate_title = match candidate.title.as_deref() {
        Some(title) if !title.is_empty() => title,
        _ => return false,
    };
    if candidate.adult {
        return false;
    }
    if media_type == MediaType::Movie && torrent_title.is_some_and(is_likely_sports_broadcast_title) {
        return false;
    }
    if candidate.media_type.is_some_and(|kind| kind != media_type) {
        return false;
    }

    if max_similarity_ratio(parsed_title, candidate_title) < min_similarity {
        return false;
    }

    let Some(parsed_year) = parsed_year else {
        return true;
    };

    match media_type {
        MediaType::Movie => candidate.year.is_none_or(|year| year == parsed_year),
        MediaType::Series => match (candidate.year, candidate.end_year) {
            (None, _) => true,
            (Some(start), Some(end)) => (start..=end).contains(&parsed_year),
            (Some(start), None) => parsed_year >= start,
        },
    }
}
