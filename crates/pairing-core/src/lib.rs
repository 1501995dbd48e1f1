//! # pairing-core
//!
//! Shared types for the pairing gateway.  This crate has no I/O, no async
//! runtime and no network code: everything in here can be unit tested with
//! plain `#[test]` functions.
//!
//! # Architecture overview (for beginners)
//!
//! The gateway drives a messaging-protocol client through its companion
//! login flow ("pairing"): the client asks the protocol servers for a short
//! pairing code, the user types that code on their phone, and once the phone
//! approves, the connection switches to *open* and the client holds a set of
//! credential files that can be reused later without pairing again.
//!
//! This crate defines the vocabulary the gateway uses to talk about that flow:
//!
//! - **`protocol`** – What the client tells us.  Connection-state updates
//!   (QR available, pairing code available, open, close) and credential
//!   updates (new `creds.json` content, new signal keys), plus the version and
//!   identity values handed to the client when it is created.
//!
//! - **`domain`** – Pure business rules.  Phone number normalisation, the
//!   "first code wins" pairing-code slot, and the cosmetic pairing-code
//!   formatter used in log output.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `pairing_core::ConnectionUpdate` instead of the longer module path.
pub use domain::pairing_code::{
    format_code_value, format_pairing_code, CapturedCode, CodeSource, PairingCodeResponse,
    PairingCodeSlot,
};
pub use domain::phone::{PhoneError, PhoneNumber};
pub use protocol::credentials::{AuthState, CredentialUpdate, CREDS_FILE};
pub use protocol::events::{
    disconnect_reason, ClientEvent, ConnectionState, ConnectionUpdate, LastDisconnect, Resolution,
};
pub use protocol::identity::{ClientIdentity, ProtocolVersion};
