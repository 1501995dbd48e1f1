//! Ports: the interfaces the handshake needs from the outside world.
//!
//! ```text
//! Handshake ──► CredentialStore::load(dir) ──► CredentialSession
//!           ──► ClientFactory::fetch_latest_version()
//!           ──► ClientFactory::connect(options) ──► ClientConnection
//!                                                    ├─ client: ProtocolClient
//!                                                    └─ events: mpsc::Receiver<ClientEvent>
//! ```
//!
//! Concrete implementations live in `infrastructure` (`sidecar_client`,
//! `auth_store`, `mock_client`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use pairing_core::{
    AuthState, ClientEvent, ClientIdentity, CredentialUpdate, PairingCodeResponse, PhoneNumber,
    ProtocolVersion,
};

// ── Error types ───────────────────────────────────────────────────────────────

/// Failure reported by a protocol client or its factory.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The client is gone (connection dropped or already ended).
    #[error("protocol client is not connected")]
    NotConnected,

    /// The client refused or failed a request.
    #[error("protocol client request failed: {0}")]
    Request(String),

    /// The link to the client failed.
    #[error("protocol transport error: {0}")]
    Transport(String),

    /// The client answered with something we did not ask for.
    #[error("unexpected reply from protocol client: {0}")]
    UnexpectedReply(String),
}

/// Failure while loading or persisting credential state.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

// ── Protocol client ───────────────────────────────────────────────────────────

/// Everything a client is constructed with.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub version: ProtocolVersion,
    pub auth: AuthState,
    pub identity: ClientIdentity,
    /// Print QR codes to the terminal.  Always `false` for the gateway: codes
    /// are reported through events and logs instead.
    pub print_qr_in_terminal: bool,
    /// Suppress the client's own log output.
    pub silent_logger: bool,
}

/// A freshly created client together with its event stream.
pub struct ClientConnection {
    pub client: Arc<dyn ProtocolClient>,
    /// Connection and credential events in arrival order.  The stream ends
    /// when the client is ended.
    pub events: mpsc::Receiver<ClientEvent>,
}

/// Creates protocol clients.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Asks the client library which protocol version to speak.
    async fn fetch_latest_version(&self) -> Result<ProtocolVersion, ClientError>;

    /// Creates a client bound to `options.auth` and starts connecting.
    async fn connect(&self, options: ClientOptions) -> Result<ClientConnection, ClientError>;
}

/// One live protocol client.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// The pairing-code capability, when this client offers one.
    ///
    /// Clients without it can still pair through QR / pairing-code events.
    fn pairing_code_requester(&self) -> Option<&dyn PairingCodeRequester>;

    /// Logs the linked device out on the server side.
    async fn logout(&self) -> Result<(), ClientError>;

    /// Closes the connection and ends the event stream.
    async fn end(&self) -> Result<(), ClientError>;
}

/// Optional capability: request a pairing code for a phone number.
#[async_trait]
pub trait PairingCodeRequester: Send + Sync {
    async fn request_pairing_code(
        &self,
        phone: &PhoneNumber,
    ) -> Result<PairingCodeResponse, ClientError>;
}

// ── Credential persistence ────────────────────────────────────────────────────

/// Loads credential state from a session directory.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Loads (or initialises) the state stored in `dir`.
    async fn load(&self, dir: &Path) -> Result<Box<dyn CredentialSession>, CredentialError>;
}

/// Credential state of one session plus the means to persist updates.
#[async_trait]
pub trait CredentialSession: Send {
    /// State as loaded, including every update applied since.
    fn state(&self) -> &AuthState;

    /// Applies `update` in memory and writes it to disk.
    async fn apply(&mut self, update: CredentialUpdate) -> Result<(), CredentialError>;
}
