//! Domain layer for pairing-gateway.
//!
//! Plain data: the server configuration and the JSON body returned on
//! errors.  Reading environment variables and parsing arguments happens in
//! `main.rs`; this layer only describes the result.

pub mod config;
pub mod messages;

pub use config::ServerConfig;
pub use messages::ApiResponse;
