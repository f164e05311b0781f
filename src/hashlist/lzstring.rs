//! LZ-String decompressor for URI-safe encoded payloads
//!
//! Hashlist snapshots carry their torrent table as the output of the JavaScript
//! `lz-string` library's `compressToEncodedURIComponent`. Only the decode
//! direction is implemented here.
//!
//! The decoder is split in two pieces:
//! 1. `BitReader` - walks the alphabet-indexed input a bit at a time
//! 2. `Dictionary` - the growable table of UTF-16 sequences seen so far

use std::collections::HashMap;

use lazy_static::lazy_static;
use thiserror::Error;

/// Alphabet used by `compressToEncodedURIComponent`
pub const URI_SAFE_ALPHABET: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+-$";

/// Each alphabet character carries six bits, read from the high bit down
const RESET_VALUE: u32 = 32;

lazy_static! {
    static ref REVERSE_ALPHABET: HashMap<char, u32> = URI_SAFE_ALPHABET
        .chars()
        .enumerate()
        .map(|(index, ch)| (ch, index as u32))
        .collect();
}

/// Error types for payload decompression
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LzError {
    #[error("Character {character:?} at offset {offset} is outside the URI-safe alphabet")]
    InvalidCharacter { character: char, offset: usize },

    #[error("Invalid initial op-code {0}")]
    InvalidInitialCode(u32),

    #[error("Back-reference {code} is beyond dictionary size {dict_size}")]
    InvalidBackReference { code: u32, dict_size: u32 },
}

/// Result type for decompression
pub type LzResult<T> = Result<T, LzError>;

/// Bit-level reader over an alphabet-encoded string
pub struct BitReader {
    input: Vec<char>,
    value: u32,
    position: u32,
    index: usize,
}

impl BitReader {
    /// Create a reader positioned on the first input character
    pub fn new(input: &str) -> LzResult<Self> {
        let input: Vec<char> = input.chars().collect();
        let value = match input.first() {
            Some(_) => Self::value_at(&input, 0)?,
            None => 0,
        };

        Ok(Self {
            input,
            value,
            position: RESET_VALUE,
            index: 1,
        })
    }

    fn value_at(input: &[char], offset: usize) -> LzResult<u32> {
        let character = input[offset];
        REVERSE_ALPHABET
            .get(&character)
            .copied()
            .ok_or(LzError::InvalidCharacter { character, offset })
    }

    /// Read `bit_count` bits, least significant first
    pub fn read_bits(&mut self, bit_count: u32) -> LzResult<u32> {
        let mut bits = 0;
        let mut power = 1u32;
        let max_power = 1u32 << bit_count;

        while power != max_power {
            let bit = self.value & self.position;
            self.position >>= 1;
            if self.position == 0 {
                self.position = RESET_VALUE;
                self.value = if self.index < self.input.len() {
                    Self::value_at(&self.input, self.index)?
                } else {
                    0
                };
                self.index += 1;
            }

            if bit > 0 {
                bits |= power;
            }
            power <<= 1;
        }

        Ok(bits)
    }

    /// True once the reader has moved past the final input character
    pub fn is_exhausted(&self) -> bool {
        self.index > self.input.len()
    }
}

/// Growable code table. Indices 0-2 are reserved for the op-codes.
pub struct Dictionary {
    entries: Vec<Vec<u16>>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self {
            entries: vec![Vec::new(), Vec::new(), Vec::new()],
        }
    }

    /// Number of codes allocated so far, reserved ones included
    pub fn size(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn push(&mut self, entry: Vec<u16>) {
        self.entries.push(entry);
    }

    pub fn get(&self, code: u32) -> Option<&[u16]> {
        self.entries.get(code as usize).map(Vec::as_slice)
    }
}

impl Default for Dictionary {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks when the code width has to grow
struct CodeWidth {
    num_bits: u32,
    enlarge_in: u32,
}

impl CodeWidth {
    fn consume(&mut self) {
        self.enlarge_in -= 1;
        if self.enlarge_in == 0 {
            self.enlarge_in = 1 << self.num_bits;
            self.num_bits += 1;
        }
    }
}

/// Decode a string produced by `compressToEncodedURIComponent`.
///
/// Empty input decodes to an empty string. When the bit stream runs out before
/// an end marker the text accumulated so far is returned.
pub fn decompress_from_encoded_uri_component(compressed: &str) -> LzResult<String> {
    if compressed.is_empty() {
        return Ok(String::new());
    }

    // Form encoding turns '+' into ' ' on the way through some links
    let normalized = compressed.replace(' ', "+");
    let mut reader = BitReader::new(&normalized)?;
    let mut dictionary = Dictionary::new();
    let mut width = CodeWidth {
        num_bits: 3,
        enlarge_in: 4,
    };

    let first = match reader.read_bits(2)? {
        0 => reader.read_bits(8)? as u16,
        1 => reader.read_bits(16)? as u16,
        2 => return Ok(String::new()),
        code => return Err(LzError::InvalidInitialCode(code)),
    };
    dictionary.push(vec![first]);

    let mut previous = vec![first];
    let mut result = vec![first];

    loop {
        if reader.is_exhausted() {
            return Ok(String::from_utf16_lossy(&result));
        }

        let mut code = reader.read_bits(width.num_bits)?;
        match code {
            0 | 1 => {
                let literal_bits = if code == 0 { 8 } else { 16 };
                let literal = reader.read_bits(literal_bits)? as u16;
                dictionary.push(vec![literal]);
                code = dictionary.size() - 1;
                width.consume();
            }
            2 => return Ok(String::from_utf16_lossy(&result)),
            _ => {}
        }

        let entry = match dictionary.get(code) {
            Some(entry) => entry.to_vec(),
            None if code == dictionary.size() => {
                let mut entry = previous.clone();
                entry.push(previous[0]);
                entry
            }
            None => {
                return Err(LzError::InvalidBackReference {
                    code,
                    dict_size: dictionary.size(),
                });
            }
        };

        result.extend_from_slice(&entry);

        let mut grown = previous;
        grown.push(entry[0]);
        dictionary.push(grown);
        width.consume();

        previous = entry;
    }
}
