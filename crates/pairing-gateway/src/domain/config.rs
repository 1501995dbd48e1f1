//! Gateway configuration types.
//!
//! [`ServerConfig`] is built once at startup (from CLI arguments and
//! environment variables, see `main.rs`) and shared read-only by every
//! request afterwards.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use pairing_core::{ClientIdentity, PhoneNumber};

/// Default handshake deadline.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_millis(90_000);

/// Delay between a terminal handshake outcome and client logout/end.
pub const DEFAULT_TEARDOWN_DELAY: Duration = Duration::from_millis(1_000);

/// All runtime configuration for the gateway.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP server binds to.
    pub bind_addr: SocketAddr,

    /// Parent directory for per-phone session directories.
    ///
    /// Each request works in `<session_path>/<phone digits>`.
    pub session_path: PathBuf,

    /// How long to wait for the connection to open before giving up.
    pub auth_timeout: Duration,

    /// How long after the outcome the client is logged out and ended.
    pub teardown_delay: Duration,

    /// Identity strings shown in the phone's linked-devices list.
    pub client_identity: ClientIdentity,

    /// WebSocket URL of the protocol daemon.
    pub protocol_endpoint: String,
}

impl ServerConfig {
    /// Returns the session directory used for `phone`.
    pub fn session_dir_for(&self, phone: &PhoneNumber) -> PathBuf {
        self.session_path.join(phone.as_str())
    }
}

impl Default for ServerConfig {
    /// | Field             | Default                 |
    /// |-------------------|-------------------------|
    /// | bind_addr         | `0.0.0.0:3000`          |
    /// | session_path      | `<temp dir>/sessions`   |
    /// | auth_timeout      | 90 seconds              |
    /// | teardown_delay    | 1 second                |
    /// | client_identity   | `Ubuntu,Chrome,20.0.04` |
    /// | protocol_endpoint | `ws://127.0.0.1:8787`   |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            session_path: std::env::temp_dir().join("sessions"),
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            teardown_delay: DEFAULT_TEARDOWN_DELAY,
            client_identity: ClientIdentity::default(),
            protocol_endpoint: "ws://127.0.0.1:8787".to_string(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
