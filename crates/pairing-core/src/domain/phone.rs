//! Phone number normalisation.
//!
//! The protocol identifies accounts by the international phone number with
//! every formatting character removed (`+62 812-3456-789` → `628123456789`).
//! The normalised form is also used as the session directory name, so it must
//! never contain path separators; keeping digits only guarantees that.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Error returned when a phone number cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhoneError {
    /// The input was absent, blank, or contained no digits at all.
    #[error("phone number is missing")]
    Missing,
}

/// A phone number reduced to its digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Strips every non-digit character from `raw`.
    ///
    /// # Errors
    ///
    /// Returns [`PhoneError::Missing`] if nothing is left after stripping.
    pub fn parse(raw: &str) -> Result<Self, PhoneError> {
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        if digits.is_empty() {
            return Err(PhoneError::Missing);
        }
        Ok(Self(digits))
    }

    /// Parses an optional raw value, treating `None` as missing.
    pub fn from_optional(raw: Option<&str>) -> Result<Self, PhoneError> {
        raw.map_or(Err(PhoneError::Missing), Self::parse)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PhoneNumber {
    type Err = PhoneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
