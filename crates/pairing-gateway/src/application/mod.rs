//! Application layer for pairing-gateway.
//!
//! # Responsibilities
//!
//! - Running the pairing handshake for one phone number
//!   ([`handshake::Handshake`])
//! - Defining the ports the handshake drives: protocol client factory,
//!   protocol client, credential store ([`ports`])
//! - Serialising requests that target the same session directory
//!   ([`session_locks::SessionLocks`])
//!
//! # What does NOT belong here?
//!
//! - HTTP routing and status codes (infrastructure)
//! - Concrete clients or stores (infrastructure)
//! - Zip encoding (infrastructure)

pub mod handshake;
pub mod ports;
pub mod session_locks;

pub use handshake::{Handshake, HandshakeError, HandshakeOutcome, HandshakeSettings};
pub use ports::{
    ClientConnection, ClientError, ClientFactory, ClientOptions, CredentialError,
    CredentialSession, CredentialStore, PairingCodeRequester, ProtocolClient,
};
pub use session_locks::{SessionLease, SessionLocks};
