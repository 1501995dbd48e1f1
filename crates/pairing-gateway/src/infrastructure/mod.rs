//! Infrastructure layer for pairing-gateway.
//!
//! Contains the I/O-facing adapters: the HTTP server, the zip encoder, the
//! on-disk credential store and the protocol clients.
//!
//! **Dependency rule**: this layer may depend on `application`, `domain` and
//! `pairing_core`, but MUST NOT be imported by the `application` or domain
//! layers.
//!
//! # Sub-modules
//!
//! - **`http_server`** – axum router for `GET /api/auth`, error-to-status
//!   mapping and the server entry point.
//!
//! - **`archive`** – packs the regular files of a session directory into an
//!   in-memory zip.
//!
//! - **`auth_store`** – multi-file credential store: `creds.json` plus one
//!   JSON file per signal key.
//!
//! - **`sidecar_client`** – protocol client that drives a protocol daemon over
//!   a local WebSocket.
//!
//! - **`mock_client`** – scripted in-memory protocol client that records the
//!   calls made on it.  Used by unit and integration tests.

pub mod archive;
pub mod auth_store;
pub mod http_server;
pub mod mock_client;
pub mod sidecar_client;
