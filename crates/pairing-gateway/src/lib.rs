//! pairing-gateway library crate.
//!
//! This crate exposes one HTTP endpoint, `GET /api/auth?phone=...`, that pairs
//! a messaging-protocol client with the given phone number and returns the
//! resulting credential files as `sessions.zip`.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! HTTP client  (GET /api/auth?phone=62...)
//!         ↕
//! [pairing-gateway]
//!   ├── domain/           ServerConfig, JSON error body
//!   ├── application/      Handshake orchestrator, client/credential ports,
//!   │                     per-directory session locks
//!   └── infrastructure/
//!         ├── http_server/    axum router and request handler
//!         ├── archive/        zip builder for the session directory
//!         ├── auth_store/     multi-file credential persistence
//!         ├── sidecar_client/ WebSocket adapter to the protocol daemon
//!         └── mock_client/    scripted client for tests
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async code.
//! - `application` depends on `domain`, `pairing-core` and the traits in
//!   `application::ports`; it never names a concrete client or store.
//! - `infrastructure` implements the ports and wires everything to HTTP.

/// Domain layer: configuration and response types (no I/O).
pub mod domain;

/// Application layer: the pairing handshake and the ports it drives.
pub mod application;

/// Infrastructure layer: HTTP server, archive builder, adapters.
pub mod infrastructure;
