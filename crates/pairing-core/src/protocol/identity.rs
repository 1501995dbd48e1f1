//! Protocol version and client identity.
//!
//! Both values are passed to the protocol client at construction time.  The
//! version is fetched from the client library on every handshake; the
//! identity is configured once at startup.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A three-part protocol version, e.g. `2.3000.1015901307`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolVersion(pub [u32; 3]);

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [major, minor, patch] = self.0;
        write!(f, "{major}.{minor}.{patch}")
    }
}

/// Error returned when a client identity string is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("client identity must be three comma-separated values, got '{0}'")]
pub struct IdentityParseError(pub String);

/// How the client presents itself to the primary device
/// (shown in the phone's "linked devices" list).
///
/// Serialised as a three-element array: `["Ubuntu","Chrome","20.0.04"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[String; 3]", into = "[String; 3]")]
pub struct ClientIdentity {
    pub platform: String,
    pub browser: String,
    pub version: String,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            platform: "Ubuntu".to_string(),
            browser: "Chrome".to_string(),
            version: "20.0.04".to_string(),
        }
    }
}

impl From<[String; 3]> for ClientIdentity {
    fn from([platform, browser, version]: [String; 3]) -> Self {
        Self {
            platform,
            browser,
            version,
        }
    }
}

impl From<ClientIdentity> for [String; 3] {
    fn from(identity: ClientIdentity) -> Self {
        [identity.platform, identity.browser, identity.version]
    }
}

impl FromStr for ClientIdentity {
    type Err = IdentityParseError;

    /// Parses `"platform,browser,version"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        match parts.as_slice() {
            [platform, browser, version]
                if !platform.is_empty() && !browser.is_empty() && !version.is_empty() =>
            {
                Ok(Self {
                    platform: (*platform).to_string(),
                    browser: (*browser).to_string(),
                    version: (*version).to_string(),
                })
            }
            _ => Err(IdentityParseError(s.to_string())),
        }
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.platform, self.browser, self.version)
    }
}
