//! Pairing code handling: capture slot, response normalisation and display
//! formatting.
//!
//! # Where do codes come from?
//!
//! A pairing session can learn a code three ways:
//!
//! ```text
//! request_pairing_code(phone)  ──►  "ABCD1234" or {"code":"ABCD1234"}
//! connection update            ──►  {"qr": "2@abc..."}
//! connection update            ──►  {"pairingCode": "ABCD1234"}
//! ```
//!
//! Whichever arrives first is kept in a [`PairingCodeSlot`]; later codes are
//! dropped so the user never sees the code change under them.

use serde::Deserialize;
use serde_json::Value;

/// Maximum number of characters in one display group.
const GROUP_LEN: usize = 4;

/// Groups `code` into hyphen-separated chunks of at most four characters.
///
/// This is a display nicety for log output only.  The code itself is opaque
/// and is never parsed.
///
/// # Example
///
/// ```rust
/// use pairing_core::format_pairing_code;
///
/// assert_eq!(format_pairing_code("ABCD1234"), "ABCD-1234");
/// assert_eq!(format_pairing_code("ABCDE"), "ABCD-E");
/// assert_eq!(format_pairing_code(""), "");
/// ```
pub fn format_pairing_code(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    chars
        .chunks(GROUP_LEN)
        .map(|group| group.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("-")
}

/// Formats a loosely-typed code value.
///
/// String values are grouped with [`format_pairing_code`]; any other JSON
/// shape is returned unchanged.
pub fn format_code_value(value: &Value) -> Value {
    match value {
        Value::String(code) => Value::String(format_pairing_code(code)),
        other => other.clone(),
    }
}

/// Result of a pairing-code request.
///
/// Client implementations disagree on the shape: some return the bare code,
/// some wrap it in an object.  Both are accepted.  The wrapped `code` is kept
/// as raw JSON because nothing guarantees it is a string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PairingCodeResponse {
    /// `"ABCD1234"`
    Bare(String),
    /// `{"code": "ABCD1234"}`
    Structured { code: Value },
}

impl PairingCodeResponse {
    /// Returns the code value regardless of the response shape.
    pub fn into_value(self) -> Value {
        match self {
            Self::Bare(code) => Value::String(code),
            Self::Structured { code } => code,
        }
    }
}

impl From<String> for PairingCodeResponse {
    fn from(code: String) -> Self {
        Self::Bare(code)
    }
}

/// Where a captured code came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeSource {
    /// Returned by an explicit pairing-code request.
    Requested,
    /// Carried by a connection update as a scannable QR payload.
    Qr,
    /// Carried by a connection update as a pairing code.
    PairingEvent,
}

impl CodeSource {
    /// Short label for log output.
    pub fn label(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Qr => "qr",
            Self::PairingEvent => "pairing-event",
        }
    }
}

/// A code held by a [`PairingCodeSlot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedCode {
    pub source: CodeSource,
    pub code: String,
}

impl CapturedCode {
    /// The code grouped for human display.
    pub fn display(&self) -> String {
        format_pairing_code(&self.code)
    }
}

/// Write-once holder for the session's pairing code.
#[derive(Debug, Default)]
pub struct PairingCodeSlot {
    captured: Option<CapturedCode>,
}

impl PairingCodeSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `code` if the slot is still empty.
    ///
    /// Returns `true` when the code was stored, `false` when an earlier code
    /// was already captured (the slot is left untouched).
    pub fn capture(&mut self, source: CodeSource, code: impl Into<String>) -> bool {
        if self.captured.is_some() {
            return false;
        }
        self.captured = Some(CapturedCode {
            source,
            code: code.into(),
        });
        true
    }

    pub fn get(&self) -> Option<&CapturedCode> {
        self.captured.as_ref()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
