//! External key (ISBN) validation
//!
//! Only the shape is checked. The upstream service is the authority on whether a
//! well-formed key exists, so checksums are not verified here.

use thiserror::Error;

/// Why an external key was rejected before any upstream call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("missing external key")]
    Missing,

    #[error("invalid external key: {0}")]
    Invalid(String),
}

/// ISBN flavour, as the lookup API wants it spelled out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsbnKind {
    Isbn10,
    Isbn13,
}

impl IsbnKind {
    pub fn id_type(self) -> &'static str {
        match self {
            IsbnKind::Isbn10 => "ISBN",
            IsbnKind::Isbn13 => "ISBN13",
        }
    }
}

/// Strip separators and check the key is a 10- or 13-character ISBN
pub fn normalize(raw: Option<&str>) -> Result<String, KeyError> {
    let raw = raw.map(str::trim).filter(|r| !r.is_empty()).ok_or(KeyError::Missing)?;

    let key: String = raw
        .chars()
        .filter(|c| *c != '-' && !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();

    match kind(&key) {
        Some(_) => Ok(key),
        None => Err(KeyError::Invalid(raw.to_string())),
    }
}

/// Classify an already-normalized key
pub fn kind(key: &str) -> Option<IsbnKind> {
    let bytes = key.as_bytes();
    match bytes.len() {
        13 if bytes.iter().all(u8::is_ascii_digit) => Some(IsbnKind::Isbn13),
        10 if bytes[..9].iter().all(u8::is_ascii_digit)
            && (bytes[9].is_ascii_digit() || bytes[9] == b'X') =>
        {
            Some(IsbnKind::Isbn10)
        }
        _ => None,
    }
}
