//! Pairing handshake: from an empty session directory to an open connection.
//!
//! # Sequence
//!
//! ```text
//! create session dir
//!   └─► CredentialStore::load(dir)              credential state + persister
//!   └─► ClientFactory::fetch_latest_version()
//!   └─► ClientFactory::connect(options)          client + event stream
//!   └─► request_pairing_code(phone)              optional, bounded by the
//!                                                timeout, failure is non-fatal
//!   └─► race:  first terminal event  vs.  timeout
//!         open   → Ok
//!         close  → HandshakeError::Closed(reason)
//!         timer  → HandshakeError::Timeout
//!   └─► teardown after `teardown_delay`: logout, end (errors dropped),
//!       drain the event pump, release the session lease
//! ```
//!
//! # Event pump
//!
//! One spawned task owns the event stream and handles events strictly in
//! arrival order:
//!
//! - credential updates are written to disk before the next event is looked
//!   at, so by the time `open` resolves the handshake every update that came
//!   before it is on disk;
//! - the first terminal connection update is sent through a `oneshot`
//!   channel; the sender is consumed by that send, so nothing later can
//!   change the outcome;
//! - if the handshake already timed out the receiver is gone, and late events
//!   are ignored the same way.
//!
//! The pump keeps persisting credential updates after resolution and stops
//! when the client is ended and its stream closes.  The teardown task holds
//! the caller's [`SessionLease`] until then, so the next request for the same
//! directory never loads files the previous session is still writing.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument, Span};

use pairing_core::{
    format_code_value, CapturedCode, ClientEvent, ClientIdentity, CodeSource, ConnectionUpdate,
    PairingCodeSlot, PhoneNumber, Resolution,
};

use crate::application::ports::{
    ClientConnection, ClientError, ClientFactory, ClientOptions, CredentialError,
    CredentialSession, CredentialStore, ProtocolClient,
};
use crate::application::session_locks::SessionLease;

/// How long teardown waits for the event stream to close after `end`.
const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

// ── Error type ────────────────────────────────────────────────────────────────

/// Ways a handshake can fail.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("failed to prepare session directory {}: {source}", path.display())]
    SessionDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load credentials: {0}")]
    Credentials(#[from] CredentialError),

    #[error("protocol client error: {0}")]
    Client(#[from] ClientError),

    /// No terminal event arrived within the configured timeout.
    #[error("connection not open after {} ms", .0.as_millis())]
    Timeout(Duration),

    /// The transport closed before opening.  Carries the extracted reason.
    #[error("connection closed: {0}")]
    Closed(String),

    /// The client's event stream ended without a terminal event.
    #[error("event stream ended before the connection opened")]
    StreamEnded,
}

// ── Settings and outcome ──────────────────────────────────────────────────────

/// Per-gateway handshake settings.
#[derive(Debug, Clone)]
pub struct HandshakeSettings {
    /// Deadline for the connection to open.  Must be non-zero.
    pub timeout: Duration,
    /// Delay before the detached logout/end.
    pub teardown_delay: Duration,
    pub identity: ClientIdentity,
}

/// Result of a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeOutcome {
    /// The first pairing code seen during the session, if any.
    pub pairing_code: Option<CapturedCode>,
}

type SharedSlot = Arc<Mutex<PairingCodeSlot>>;

// ── Orchestrator ──────────────────────────────────────────────────────────────

/// Runs pairing handshakes.  One instance serves every request; each call to
/// [`Handshake::run`] creates and owns its own client.
pub struct Handshake {
    factory: Arc<dyn ClientFactory>,
    store: Arc<dyn CredentialStore>,
    settings: HandshakeSettings,
}

impl Handshake {
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        store: Arc<dyn CredentialStore>,
        settings: HandshakeSettings,
    ) -> Self {
        Self {
            factory,
            store,
            settings,
        }
    }

    /// Pairs a client for `phone` using the credential files in `session_dir`.
    ///
    /// Resolves once the connection reports `open`.  Whatever the outcome,
    /// once a client exists a teardown (logout + end) is scheduled
    /// `teardown_delay` later.  `lease` is kept by that teardown until the
    /// client's last credential update is on disk.
    ///
    /// # Errors
    ///
    /// - [`HandshakeError::Timeout`] when neither `open` nor `close` arrives
    ///   within the timeout.
    /// - [`HandshakeError::Closed`] when `close` arrives first.
    /// - [`HandshakeError::StreamEnded`] when the client stops emitting events
    ///   without either.
    /// - `SessionDir`, `Credentials` or `Client` when setup fails.
    pub async fn run(
        &self,
        phone: &PhoneNumber,
        session_dir: &Path,
        lease: SessionLease,
    ) -> Result<HandshakeOutcome, HandshakeError> {
        tokio::fs::create_dir_all(session_dir)
            .await
            .map_err(|source| HandshakeError::SessionDir {
                path: session_dir.to_path_buf(),
                source,
            })?;

        let credentials = self.store.load(session_dir).await?;
        if credentials.state().is_fresh() {
            debug!("no stored credentials in {}; starting fresh", session_dir.display());
        }

        let version = self.factory.fetch_latest_version().await?;
        debug!("using protocol version {version}");

        let options = ClientOptions {
            version,
            auth: credentials.state().clone(),
            identity: self.settings.identity.clone(),
            print_qr_in_terminal: false,
            silent_logger: true,
        };
        let ClientConnection { client, events } = self.factory.connect(options).await?;

        let slot: SharedSlot = Arc::new(Mutex::new(PairingCodeSlot::new()));
        let request = request_pairing_code(client.as_ref(), phone, &slot);
        if tokio::time::timeout(self.settings.timeout, request).await.is_err() {
            warn!(
                "pairing code request for {phone} unanswered after {} ms; waiting for events",
                self.settings.timeout.as_millis()
            );
        }

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let pump = tokio::spawn(
            pump_events(events, credentials, Arc::clone(&slot), outcome_tx)
                .instrument(Span::current()),
        );

        let result = match tokio::time::timeout(self.settings.timeout, outcome_rx).await {
            Ok(Ok(Resolution::Open)) => Ok(()),
            Ok(Ok(Resolution::Closed { reason })) => Err(HandshakeError::Closed(reason)),
            Ok(Err(_)) => Err(HandshakeError::StreamEnded),
            Err(_) => Err(HandshakeError::Timeout(self.settings.timeout)),
        };

        match &result {
            Ok(()) => info!("connection open for {phone}"),
            Err(e) => warn!("handshake for {phone} failed: {e}"),
        }

        schedule_teardown(client, self.settings.teardown_delay, pump, lease);

        let pairing_code = slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get()
            .cloned();
        result.map(|()| HandshakeOutcome { pairing_code })
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Stores `code` in the slot and logs it when it is the first one.
fn capture_code(slot: &SharedSlot, source: CodeSource, code: &str) {
    let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
    if slot.capture(source, code) {
        if let Some(captured) = slot.get() {
            info!("pairing code ({}): {}", source.label(), captured.display());
        }
    } else {
        debug!("ignoring {} code; a code was already captured", source.label());
    }
}

/// Captures a requested code.  Only string codes can be captured; anything
/// else is logged as received.
fn capture_requested_code(slot: &SharedSlot, code: Value) {
    match code {
        Value::String(code) => capture_code(slot, CodeSource::Requested, &code),
        other => warn!(
            "pairing code response is not a string, not captured: {}",
            format_code_value(&other)
        ),
    }
}

/// Asks the client for a pairing code, if it can.  Never fails: a missing
/// capability or a failed request leaves pairing to the event stream.
async fn request_pairing_code(client: &dyn ProtocolClient, phone: &PhoneNumber, slot: &SharedSlot) {
    let Some(requester) = client.pairing_code_requester() else {
        debug!("client cannot request pairing codes; waiting for events");
        return;
    };

    match requester.request_pairing_code(phone).await {
        Ok(response) => capture_requested_code(slot, response.into_value()),
        Err(e) => warn!("pairing code request for {phone} failed: {e}"),
    }
}

/// Captures a QR or pairing code carried by `update`.  QR wins when both are
/// present.
fn capture_offered_code(update: &ConnectionUpdate, slot: &SharedSlot) {
    if let Some(qr) = update.qr.as_deref() {
        capture_code(slot, CodeSource::Qr, qr);
    } else if let Some(code) = update.pairing_code.as_deref() {
        capture_code(slot, CodeSource::PairingEvent, code);
    }
}

/// Consumes the client's events until the stream closes.
async fn pump_events(
    mut events: mpsc::Receiver<ClientEvent>,
    mut credentials: Box<dyn CredentialSession>,
    slot: SharedSlot,
    outcome_tx: oneshot::Sender<Resolution>,
) {
    let mut outcome_tx = Some(outcome_tx);

    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::Credentials(update) => {
                if let Err(e) = credentials.apply(update).await {
                    warn!("failed to persist credential update: {e}");
                }
            }
            ClientEvent::Connection(update) => {
                let tx = match outcome_tx.take() {
                    Some(tx) if !tx.is_closed() => tx,
                    _ => {
                        debug!("ignoring connection update after resolution: {update:?}");
                        continue;
                    }
                };

                capture_offered_code(&update, &slot);

                match update.resolution() {
                    Some(resolution) => {
                        debug!("terminal connection update: {resolution:?}");
                        // The receiver may have timed out in the meantime; the
                        // outcome is then already decided.
                        let _ = tx.send(resolution);
                    }
                    None => outcome_tx = Some(tx),
                }
            }
        }
    }

    debug!("client event stream closed");
}

/// Logs out and ends `client` after `delay`, on a detached task, then waits
/// for `pump` to flush the last events before releasing `lease`.
fn schedule_teardown(
    client: Arc<dyn ProtocolClient>,
    delay: Duration,
    mut pump: JoinHandle<()>,
    lease: SessionLease,
) {
    tokio::spawn(
        async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = client.logout().await {
                debug!("teardown: logout failed (ignored): {e}");
            }
            if let Err(e) = client.end().await {
                debug!("teardown: end failed (ignored): {e}");
            }
            if tokio::time::timeout(PUMP_DRAIN_TIMEOUT, &mut pump).await.is_err() {
                warn!(
                    "event stream still open {} ms after end; stopping the pump",
                    PUMP_DRAIN_TIMEOUT.as_millis()
                );
                pump.abort();
            }
            drop(lease);
            debug!("teardown complete");
        }
        .instrument(Span::current()),
    );
}

// ── Tests ─────────────────────────────────────────────────────────────────────
