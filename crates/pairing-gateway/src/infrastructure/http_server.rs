//! HTTP surface: `GET /api/auth`.
//!
//! # Request flow
//!
//! ```text
//! GET /api/auth?phone=62812...          GET /api/auth/62812...
//!            └──────────────┬──────────────┘
//!                           ▼
//!              PhoneNumber::from_optional          missing/malformed → 400
//!                           ▼
//!        SessionLocks::acquire(<session_path>/<digits>)
//!                           ▼
//!                    Handshake::run               failure → 500
//!                           ▼
//!                    build_archive                failure → 500
//!                           ▼
//!              200 application/zip (sessions.zip)
//! ```
//!
//! The session lease is shared with the handshake's teardown, so the next
//! request for the same phone starts only after this one has built its
//! archive and the previous client has ended.
//!
//! Any other method on these paths gets 405.  Every error body is an
//! [`ApiResponse`]; internal details (paths, I/O errors, daemon messages) go
//! to the log only.
//!
//! Each request runs inside a `pairing` tracing span carrying a fresh UUID, so
//! the log lines of concurrent requests can be told apart.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use pairing_core::{PhoneError, PhoneNumber};

use crate::application::{
    ClientFactory, CredentialStore, Handshake, HandshakeError, HandshakeSettings, SessionLocks,
};
use crate::domain::config::ServerConfig;
use crate::domain::messages::{
    ApiResponse, ARCHIVE_CONTENT_TYPE, ARCHIVE_FILE_NAME, METHOD_NOT_ALLOWED_MESSAGE,
    MISSING_PHONE_MESSAGE,
};
use crate::infrastructure::archive::{build_archive, ArchiveError};

// ── State ─────────────────────────────────────────────────────────────────────

/// Shared state of every request handler.  Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    config: Arc<ServerConfig>,
    handshake: Arc<Handshake>,
    locks: SessionLocks,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        factory: Arc<dyn ClientFactory>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        let settings = HandshakeSettings {
            timeout: config.auth_timeout,
            teardown_delay: config.teardown_delay,
            identity: config.client_identity.clone(),
        };
        Self {
            config: Arc::new(config),
            handshake: Arc::new(Handshake::new(factory, store, settings)),
            locks: SessionLocks::new(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Everything that can go wrong while serving one export request.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    MissingPhone(#[from] PhoneError),

    #[error("malformed query string: {0}")]
    InvalidQuery(#[from] QueryRejection),

    #[error("malformed path: {0}")]
    InvalidPath(#[from] PathRejection),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

impl ExportError {
    pub fn status(&self) -> StatusCode {
        match self {
            ExportError::MissingPhone(_)
            | ExportError::InvalidQuery(_)
            | ExportError::InvalidPath(_) => StatusCode::BAD_REQUEST,
            ExportError::Handshake(_) | ExportError::Archive(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn is_rejection(&self) -> bool {
        self.status() == StatusCode::BAD_REQUEST
    }

    /// Message safe to return to the caller.
    pub fn public_message(&self) -> String {
        match self {
            ExportError::MissingPhone(_)
            | ExportError::InvalidQuery(_)
            | ExportError::InvalidPath(_) => MISSING_PHONE_MESSAGE.to_string(),
            ExportError::Handshake(HandshakeError::Timeout(timeout)) => format!(
                "Timed out after {} ms waiting for the connection to open",
                timeout.as_millis()
            ),
            ExportError::Handshake(HandshakeError::Closed(reason)) => {
                format!("Connection closed: {reason}")
            }
            ExportError::Handshake(HandshakeError::StreamEnded) => {
                "Connection ended before it opened".to_string()
            }
            ExportError::Handshake(_) => "Failed to start the pairing session".to_string(),
            ExportError::Archive(_) => "Failed to build the session archive".to_string(),
        }
    }
}

impl IntoResponse for ExportError {
    fn into_response(self) -> Response {
        (self.status(), Json(ApiResponse::failure(self.public_message()))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────────────

/// Query string of `GET /api/auth`.
#[derive(Debug, Default, Deserialize)]
pub struct AuthQuery {
    #[serde(default)]
    pub phone: Option<String>,
}

/// Builds the gateway router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/auth",
            get(export_from_query).fallback(method_not_allowed),
        )
        .route(
            "/api/auth/{phone}",
            get(export_from_path).fallback(method_not_allowed),
        )
        .with_state(state)
}

async fn export_from_query(
    State(state): State<AppState>,
    query: Result<Query<AuthQuery>, QueryRejection>,
) -> Response {
    let raw_phone = query.map(|Query(query)| query.phone).map_err(ExportError::from);
    export(state, raw_phone).await
}

async fn export_from_path(
    State(state): State<AppState>,
    phone: Result<Path<String>, PathRejection>,
) -> Response {
    let raw_phone = phone.map(|Path(phone)| Some(phone)).map_err(ExportError::from);
    export(state, raw_phone).await
}

async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(ApiResponse::failure(METHOD_NOT_ALLOWED_MESSAGE)),
    )
        .into_response()
}

async fn export(state: AppState, raw_phone: Result<Option<String>, ExportError>) -> Response {
    let span = info_span!("pairing", session = %Uuid::new_v4());

    async move {
        match run_export(&state, raw_phone).await {
            Ok(archive) => archive_response(archive),
            Err(e) => {
                if e.is_rejection() {
                    debug!("rejected request: {e}");
                } else {
                    warn!("export failed: {e}");
                }
                e.into_response()
            }
        }
    }
    .instrument(span)
    .await
}

/// Pairs the phone and returns the archived session directory.
async fn run_export(
    state: &AppState,
    raw_phone: Result<Option<String>, ExportError>,
) -> Result<Vec<u8>, ExportError> {
    let phone = PhoneNumber::from_optional(raw_phone?.as_deref())?;
    let dir = state.config.session_dir_for(&phone);

    let lease = state.locks.acquire(&dir).await;
    info!("pairing {phone} in {}", dir.display());

    let outcome = state.handshake.run(&phone, &dir, lease.clone()).await?;
    if let Some(code) = &outcome.pairing_code {
        debug!("session paired via {} code", code.source.label());
    }

    let archive = build_archive(&dir).await?;
    drop(lease);
    Ok(archive)
}

fn archive_response(archive: Vec<u8>) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, ARCHIVE_CONTENT_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={ARCHIVE_FILE_NAME}"),
            ),
        ],
        archive,
    )
        .into_response()
}

// ── Server ────────────────────────────────────────────────────────────────────

/// Serves the gateway until `shutdown` completes.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound (port in use, missing
/// permission) or the server fails while running.
pub async fn run_server(
    config: ServerConfig,
    factory: Arc<dyn ClientFactory>,
    store: Arc<dyn CredentialStore>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let bind_addr = config.bind_addr;
    let state = AppState::new(config, factory, store);

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {bind_addr}"))?;
    info!(
        "pairing gateway listening on http://{} (sessions in {})",
        bind_addr,
        state.config().session_path.display()
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server error")?;

    info!("pairing gateway stopped");
    Ok(())
}
