//! EPC identifiers and scanner input normalization.
//!
//! An EPC (Electronic Product Code) read from a bag tag is a fixed-length
//! string of 24 uppercase hexadecimal characters. Keyboard-wedge scanners
//! deliver it as ordinary keystrokes, so raw input is normalized before it is
//! ever considered for a session.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of hexadecimal characters in an EPC.
pub const EPC_LEN: usize = 24;

/// Errors produced when strictly parsing an EPC.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EpcError {
    /// The input did not have exactly [`EPC_LEN`] characters.
    #[error("EPC must be {EPC_LEN} hex characters, got {len}")]
    Length {
        /// Length of the rejected input.
        len: usize,
    },

    /// The input contained a non-hexadecimal character.
    #[error("EPC contains non-hex character {found:?} at position {position}")]
    NotHex {
        /// The offending character.
        found: char,
        /// Zero-based character position.
        position: usize,
    },
}

/// Normalize raw scanner input into the canonical buffer form.
///
/// Upper-cases the input, drops every character outside `[0-9A-F]` and
/// truncates the result to [`EPC_LEN`] characters. The result may be shorter
/// than an EPC; use [`Epc::from_normalized`] to check for completeness.
///
/// Normalization is idempotent: `normalize(&normalize(s)) == normalize(s)`.
#[must_use]
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .map(|c| c.to_ascii_uppercase())
        .filter(char::is_ascii_hexdigit)
        .take(EPC_LEN)
        .collect()
}

/// A validated 24-character uppercase hexadecimal tag identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Epc(String);

impl Epc {
    /// Strictly parse an EPC.
    ///
    /// Lowercase hex is accepted and upper-cased; any other character, or a
    /// length other than [`EPC_LEN`], is rejected. Use [`normalize`] first
    /// when the input comes straight from a scanner.
    ///
    /// # Errors
    ///
    /// Returns [`EpcError`] if the input is not exactly 24 hex characters.
    pub fn parse(input: &str) -> Result<Self, EpcError> {
        if let Some((position, found)) = input
            .chars()
            .enumerate()
            .find(|(_, c)| !c.is_ascii_hexdigit())
        {
            return Err(EpcError::NotHex { found, position });
        }

        let len = input.chars().count();
        if len != EPC_LEN {
            return Err(EpcError::Length { len });
        }

        Ok(Self(input.to_ascii_uppercase()))
    }

    /// Build an EPC from an already-normalized buffer.
    ///
    /// Returns `None` unless the buffer holds exactly [`EPC_LEN`] characters.
    #[must_use]
    pub fn from_normalized(buffer: &str) -> Option<Self> {
        (buffer.len() == EPC_LEN && buffer.chars().all(|c| matches!(c, '0'..='9' | 'A'..='F')))
            .then(|| Self(buffer.to_string()))
    }

    /// The EPC as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A shortened form for log lines and narrow table columns.
    #[must_use]
    pub fn short(&self) -> String {
        format!("{}…{}", &self.0[..6], &self.0[EPC_LEN - 4..])
    }
}

impl fmt::Display for Epc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Epc {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Epc {
    type Err = EpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Epc {
    type Error = EpcError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Epc> for String {
    fn from(epc: Epc) -> Self {
        epc.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "E2801160600002054A1B2C3D";

    #[test]
    fn test_normalize_uppercases() {
        assert_eq!(normalize("e2801160600002054a1b2c3d"), SAMPLE);
    }

    #[test]
    fn test_normalize_strips_non_hex() {
        assert_eq!(normalize("E2-80 11:60 6000\t0205\r\n4A1B2C3D"), SAMPLE);
        assert_eq!(normalize("xyz"), "");
        assert_eq!(normalize("G1H2"), "12");
    }

    #[test]
    fn test_normalize_truncates() {
        let long = format!("{SAMPLE}FFFF");
        assert_eq!(normalize(&long), SAMPLE);
    }

    #[test]
    fn test_normalize_short_input_kept() {
        assert_eq!(normalize("abc"), "ABC");
    }

    #[test]
    fn test_normalize_idempotent_on_complete_epc() {
        assert_eq!(normalize(SAMPLE), SAMPLE);
        assert_eq!(normalize(&normalize("  e280 1160 ")), normalize("  e280 1160 "));
    }

    #[test]
    fn test_normalize_ignores_non_ascii() {
        assert_eq!(normalize("ÄÉ12ab"), "12AB");
    }

    #[test]
    fn test_parse_valid() {
        let epc = Epc::parse(SAMPLE).unwrap();
        assert_eq!(epc.as_str(), SAMPLE);
    }

    #[test]
    fn test_parse_lowercase() {
        let epc = Epc::parse(&SAMPLE.to_lowercase()).unwrap();
        assert_eq!(epc.as_str(), SAMPLE);
    }

    #[test]
    fn test_parse_wrong_length() {
        assert_eq!(Epc::parse("ABC"), Err(EpcError::Length { len: 3 }));
        assert_eq!(Epc::parse(""), Err(EpcError::Length { len: 0 }));
    }

    #[test]
    fn test_parse_not_hex() {
        let err = Epc::parse("E2801160600002054A1B2C3Z").unwrap_err();
        assert_eq!(
            err,
            EpcError::NotHex {
                found: 'Z',
                position: 23
            }
        );
    }

    #[test]
    fn test_from_normalized() {
        assert!(Epc::from_normalized(SAMPLE).is_some());
        assert!(Epc::from_normalized("ABC").is_none());
        assert!(Epc::from_normalized(&SAMPLE.to_lowercase()).is_none());
    }

    #[test]
    fn test_short() {
        let epc = Epc::parse(SAMPLE).unwrap();
        assert_eq!(epc.short(), "E28011…2C3D");
    }

    #[test]
    fn test_from_str() {
        let epc: Epc = SAMPLE.parse().unwrap();
        assert_eq!(epc.to_string(), SAMPLE);
    }

    #[test]
    fn test_serde_transparent() {
        let epc = Epc::parse(SAMPLE).unwrap();
        let json = serde_json::to_string(&epc).unwrap();
        assert_eq!(json, format!("\"{SAMPLE}\""));

        let back: Epc = serde_json::from_str(&json).unwrap();
        assert_eq!(back, epc);
    }

    #[test]
    fn test_serde_rejects_invalid() {
        let result: Result<Epc, _> = serde_json::from_str("\"not-an-epc\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_error_display() {
        let err = EpcError::Length { len: 5 };
        assert_eq!(err.to_string(), "EPC must be 24 hex characters, got 5");
    }
}
