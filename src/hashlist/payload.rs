//! Hashlist snapshot parsing
//!
//! Snapshots are HTML files whose only interesting content is an iframe link
//! with the compressed torrent table in its URL fragment:
//! `<iframe src="https://<host>/hashlist#<payload>"></iframe>`

use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::hashlist::lzstring::{LzError, decompress_from_encoded_uri_component};

/// Host serving the hashlist viewer
pub const DEFAULT_FRAGMENT_HOST: &str = "debridmediamanager.com";

lazy_static! {
    static ref INFO_HASH_PATTERN: Regex = Regex::new(r"^[0-9a-fA-F]{40}$").unwrap();
    static ref DEFAULT_EXTRACTOR: FragmentExtractor = FragmentExtractor::new(DEFAULT_FRAGMENT_HOST);
}

/// Error types for payload decoding
#[derive(Error, Debug)]
pub enum PayloadError {
    /// The decompressor could not read the fragment at all
    #[error("Decode error: {0}")]
    Decode(LzError),

    /// The fragment decoded but the result is not a usable torrent table
    #[error("Malformed payload: {0}")]
    Malformed(String),
}

impl PayloadError {
    /// Whether the snapshot should be remembered as processed despite the failure
    pub fn is_permanent(&self) -> bool {
        matches!(self, PayloadError::Malformed(_))
    }
}

impl From<LzError> for PayloadError {
    fn from(err: LzError) -> Self {
        match err {
            LzError::InvalidBackReference { .. } => PayloadError::Malformed(err.to_string()),
            other => PayloadError::Decode(other),
        }
    }
}

impl From<serde_json::Error> for PayloadError {
    fn from(err: serde_json::Error) -> Self {
        PayloadError::Malformed(err.to_string())
    }
}

/// Result type for payload decoding
pub type PayloadResult<T> = Result<T, PayloadError>;

/// One torrent row from a hashlist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashlistTorrentEntry {
    pub filename: String,
    /// 40 lowercase hex characters
    pub info_hash: String,
    pub size: u64,
}

/// Locates the embedded payload for a given viewer host
pub struct FragmentExtractor {
    pattern: Regex,
}

impl FragmentExtractor {
    pub fn new(host: &str) -> Self {
        let pattern = format!(
            r#"<iframe\s+src="https://{}/hashlist#([^"]+)""#,
            regex::escape(host)
        );
        Self {
            // The host is escaped, so the pattern is always valid
            pattern: Regex::new(&pattern).unwrap(),
        }
    }

    /// Return the fragment of the first matching iframe
    pub fn extract<'a>(&self, html: &'a str) -> Option<&'a str> {
        self.pattern
            .captures(html)
            .and_then(|captures| captures.get(1))
            .map(|fragment| fragment.as_str())
    }
}

/// Extract the payload fragment using the default viewer host
pub fn extract_hash_fragment_from_html(html: &str) -> Option<&str> {
    DEFAULT_EXTRACTOR.extract(html)
}

/// Decode a payload fragment into validated torrent rows
pub fn decode_hashlist_payload(payload: &str) -> PayloadResult<Vec<HashlistTorrentEntry>> {
    let decoded = decompress_from_encoded_uri_component(payload)?;
    parse_hashlist_json(&decoded)
}

/// Parse decoded hashlist JSON. Accepts a bare array of rows or an object
/// with a `torrents` array.
pub fn parse_hashlist_json(decoded: &str) -> PayloadResult<Vec<HashlistTorrentEntry>> {
    if decoded.is_empty() {
        return Ok(Vec::new());
    }

    let payload: Value = serde_json::from_str(decoded)?;
    let rows = match &payload {
        Value::Array(rows) => rows.as_slice(),
        Value::Object(object) => match object.get("torrents") {
            Some(Value::Array(rows)) => rows.as_slice(),
            Some(_) => {
                return Err(PayloadError::Malformed(
                    "\"torrents\" is not an array".to_string(),
                ));
            }
            None => &[],
        },
        _ => {
            return Err(PayloadError::Malformed(
                "payload is neither an array nor an object".to_string(),
            ));
        }
    };

    Ok(rows.iter().filter_map(parse_row).collect())
}

fn parse_row(row: &Value) -> Option<HashlistTorrentEntry> {
    let row = row.as_object()?;

    let filename = match row.get("filename")? {
        Value::String(name) if !name.is_empty() => name.clone(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };

    let info_hash = row.get("hash")?.as_str()?;
    if !INFO_HASH_PATTERN.is_match(info_hash) {
        return None;
    }

    let size = row
        .get("bytes")
        .or_else(|| row.get("size"))
        .map(coerce_size)
        .unwrap_or(0);

    Some(HashlistTorrentEntry {
        filename,
        info_hash: info_hash.to_lowercase(),
        size,
    })
}

/// Coerce a JSON size to bytes, clamping negatives and defaulting to 0
fn coerce_size(value: &Value) -> u64 {
    let signed = match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_u64().map(|n| n.min(i64::MAX as u64) as i64))
            .or_else(|| number.as_f64().map(|n| n.trunc() as i64)),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        Value::Bool(flag) => Some(*flag as i64),
        _ => None,
    };
    signed.unwrap_or(0).max(0) as u64
}

/// Keep the first row seen for every info hash, preserving order
pub fn deduplicate_entries_by_info_hash(entries: Vec<HashlistTorrentEntry>) -> Vec<HashlistTorrentEntry> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|entry| seen.insert(entry.info_hash.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashlist::test_support::encode_literals;

    const HASH_A: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

    fn entry(filename: &str, info_hash: &str, size: u64) -> HashlistTorrentEntry {
        HashlistTorrentEntry {
            filename: filename.to_string(),
            info_hash: info_hash.to_string(),
            size,
        }
    }

    #[test]
    fn test_extract_hash_fragment_from_html() {
        let html = r#"
            <html>
              <body>
                <iframe src="https://debridmediamanager.com/hashlist#abc123"></iframe>
                <iframe src="https://debridmediamanager.com/hashlist#second"></iframe>
              </body>
            </html>
        "#;
        assert_eq!(extract_hash_fragment_from_html(html), Some("abc123"));
    }

    #[test]
    fn test_extract_ignores_other_hosts() {
        let html = r#"<iframe src="https://example.org/hashlist#abc123"></iframe>"#;
        assert_eq!(extract_hash_fragment_from_html(html), None);
        assert_eq!(FragmentExtractor::new("example.org").extract(html), Some("abc123"));
        assert_eq!(extract_hash_fragment_from_html("<html></html>"), None);
    }

    #[test]
    fn test_golden_payload_decodes_to_single_entry() {
        let encoded = "N4IgLglmA2CmIC4QHUCG0DWEB2BzABACayqEgA04A9gE42zZgDOiA2qAGYRzaoC28JABUAFrHxpMOAgBES\
hfAGUSTKtnwAWfAAoAjAAYAHPoAO+AB4AmAGwBWfACkqATwCUFECNRMRiEAE5YXVQAZgAjAGNbf39bW0sI\
1F1-DmsQ2wiNS11rWAB2MNh0vI0Q3UJDXQiPMOcwWBYEQ0NbUpj-a10AXwBdLqA";

        let entries = decode_hashlist_payload(encoded).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].info_hash, "9e1a3bc599552ca19f635c4216e7be357431d81c");
        assert_eq!(entries[0].size, 8854399961);
    }

    #[test]
    fn test_object_wrapper_yields_lowercase_hash() {
        let json = format!(
            r#"{{"title":"Example","torrents":[{{"filename":"Example.Movie.2025.1080p.WEB-DL","hash":"{}","bytes":1234}}]}}"#,
            HASH_A
        );
        let entries = decode_hashlist_payload(&encode_literals(&json)).unwrap();

        assert_eq!(entries, vec![entry("Example.Movie.2025.1080p.WEB-DL", &HASH_A.to_lowercase(), 1234)]);
    }

    #[test]
    fn test_array_and_object_wrappers_agree() {
        let row = format!(r#"{{"filename":"Example.Series.S01E01.1080p.WEB-DL","hash":"{}","bytes":4321}}"#, HASH_A);
        let as_array = parse_hashlist_json(&format!("[{}]", row)).unwrap();
        let as_object = parse_hashlist_json(&format!(r#"{{"torrents":[{}]}}"#, row)).unwrap();

        assert_eq!(as_array.len(), 1);
        assert_eq!(as_array, as_object);
    }

    #[test]
    fn test_invalid_rows_are_dropped() {
        let json = format!(
            r#"[
                {{"filename":"Good","hash":"{hash}","bytes":1}},
                {{"filename":"Invalid.Hash","hash":"not_a_hash","bytes":1}},
                {{"filename":"Short.Hash","hash":"abcdef","bytes":1}},
                {{"filename":"","hash":"{hash}","bytes":1}},
                {{"hash":"{hash}","bytes":1}},
                "not an object"
            ]"#,
            hash = HASH_A
        );
        let entries = parse_hashlist_json(&json).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].filename, "Good");
    }

    #[test]
    fn test_sizes_are_coerced_and_clamped() {
        let json = format!(
            r#"[
                {{"filename":"Negative","hash":"{hash}","bytes":-50}},
                {{"filename":"Text","hash":"{hash}","bytes":"2048"}},
                {{"filename":"Garbage","hash":"{hash}","bytes":"lots"}},
                {{"filename":"Missing","hash":"{hash}"}},
                {{"filename":"Fallback","hash":"{hash}","size":77}},
                {{"filename":"Float","hash":"{hash}","bytes":12.9}}
            ]"#,
            hash = HASH_A
        );
        let sizes: Vec<u64> = parse_hashlist_json(&json).unwrap().iter().map(|e| e.size).collect();
        assert_eq!(sizes, vec![0, 2048, 0, 0, 77, 12]);
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        let err = decode_hashlist_payload(&encode_literals("this is not json")).unwrap_err();
        assert!(err.is_permanent());

        let err = parse_hashlist_json("42").unwrap_err();
        assert!(matches!(err, PayloadError::Malformed(_)));
    }

    #[test]
    fn test_undecodable_fragment_is_not_permanent() {
        let err = decode_hashlist_payload("*abcdef").unwrap_err();
        assert!(matches!(err, PayloadError::Decode(_)));
        assert!(!err.is_permanent());
    }

    #[test]
    fn test_empty_payload_has_no_entries() {
        assert!(decode_hashlist_payload("").unwrap().is_empty());
        assert!(parse_hashlist_json(r#"{"title":"none"}"#).unwrap().is_empty());
    }

    #[test]
    fn test_deduplicate_keeps_first_occurrence() {
        let c = "cccccccccccccccccccccccccccccccccccccccc";
        let d = "dddddddddddddddddddddddddddddddddddddddd";
        let deduped = deduplicate_entries_by_info_hash(vec![
            entry("First", c, 10),
            entry("Duplicate", c, 20),
            entry("Second", d, 30),
        ]);

        assert_eq!(deduped, vec![entry("First", c, 10), entry("Second", d, 30)]);
    }
}
