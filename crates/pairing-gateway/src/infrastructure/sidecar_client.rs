//! Protocol client backed by an external protocol daemon.
//!
//! The messaging protocol itself is spoken by a separate daemon process.  The
//! gateway drives it over a local WebSocket with JSON text frames tagged by
//! `"type"`:
//!
//! ```text
//! gateway → daemon                      daemon → gateway
//! ────────────────────────────────      ─────────────────────────────────────
//! {"type":"FetchVersion"}               {"type":"Version","version":[2,3000,1]}
//! {"type":"Connect", version, browser,  {"type":"ConnectionUpdate",
//!   print_qr, silent, creds, keys}        "connection":"open", ...}
//! {"type":"RequestPairingCode",         {"type":"CredsUpdate","creds":{..}}
//!   "phone":"6281..."}                  {"type":"KeysUpdate","category":..,
//! {"type":"Logout"}                       "entries":{"1":{..},"2":null}}
//! {"type":"End"}                        {"type":"PairingCode","code":"ABCD1234"}
//!                                       {"type":"Error","message":"..."}
//! ```
//!
//! `fetch_latest_version` uses a short-lived connection of its own.  Each
//! `connect` opens one WebSocket per client and runs two tasks on it:
//!
//! - **writer**: drains the client's outbound queue into the socket and
//!   closes it after `End`;
//! - **reader**: turns update frames into [`ClientEvent`]s and hands
//!   `PairingCode` / `Error` replies to the pending pairing request.
//!
//! When the socket closes the reader drops the event sender, which ends the
//! client's event stream.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use pairing_core::{
    ClientEvent, ClientIdentity, ConnectionUpdate, CredentialUpdate, PairingCodeResponse,
    PhoneNumber, ProtocolVersion,
};

use crate::application::ports::{
    ClientConnection, ClientError, ClientFactory, ClientOptions, PairingCodeRequester,
    ProtocolClient,
};

/// Default deadline for a daemon reply (version, pairing code).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const EVENT_BUFFER: usize = 64;
const OUTBOUND_BUFFER: usize = 16;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingPairing = Arc<Mutex<Option<oneshot::Sender<Result<PairingCodeResponse, ClientError>>>>>;

// ── Wire frames ───────────────────────────────────────────────────────────────

/// Frames sent to the daemon.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
enum Outbound {
    FetchVersion,
    Connect {
        version: ProtocolVersion,
        browser: ClientIdentity,
        print_qr: bool,
        silent: bool,
        creds: Value,
        keys: BTreeMap<String, Value>,
    },
    RequestPairingCode {
        phone: String,
    },
    Logout,
    End,
}

/// Frames received from the daemon.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Inbound {
    Version {
        version: ProtocolVersion,
    },
    ConnectionUpdate(ConnectionUpdate),
    CredsUpdate {
        creds: Value,
    },
    KeysUpdate {
        category: String,
        entries: BTreeMap<String, Option<Value>>,
    },
    PairingCode {
        code: PairingCodeResponse,
    },
    Error {
        message: String,
    },
}

enum Frame {
    Inbound(Inbound),
    Closed,
    Skip,
}

fn decode(message: WsMessage) -> Frame {
    match message {
        WsMessage::Text(text) => match serde_json::from_str(&text) {
            Ok(inbound) => Frame::Inbound(inbound),
            Err(e) => {
                warn!("malformed frame from protocol daemon (ignored): {e}");
                Frame::Skip
            }
        },
        WsMessage::Close(_) => Frame::Closed,
        // Ping/Pong are answered by tungstenite itself.
        _ => Frame::Skip,
    }
}

fn encode(frame: &Outbound) -> Result<WsMessage, ClientError> {
    serde_json::to_string(frame)
        .map(WsMessage::Text)
        .map_err(|e| ClientError::Request(format!("failed to encode frame: {e}")))
}

fn transport(e: WsError) -> ClientError {
    ClientError::Transport(e.to_string())
}

// ── Factory ───────────────────────────────────────────────────────────────────

/// [`ClientFactory`] that creates one daemon-backed client per connection.
#[derive(Debug, Clone)]
pub struct SidecarClientFactory {
    endpoint: String,
    request_timeout: Duration,
}

impl SidecarClientFactory {
    /// `endpoint` is the daemon's WebSocket URL, e.g. `ws://127.0.0.1:8787`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    async fn open(&self) -> Result<WsStream, ClientError> {
        let (ws, _response) = connect_async(self.endpoint.as_str())
            .await
            .map_err(transport)?;
        debug!("connected to protocol daemon at {}", self.endpoint);
        Ok(ws)
    }
}

#[async_trait]
impl ClientFactory for SidecarClientFactory {
    async fn fetch_latest_version(&self) -> Result<ProtocolVersion, ClientError> {
        let mut ws = self.open().await?;
        ws.send(encode(&Outbound::FetchVersion)?)
            .await
            .map_err(transport)?;

        let reply = timeout(self.request_timeout, async {
            while let Some(message) = ws.next().await {
                let message = match message {
                    Ok(message) => message,
                    Err(e) => return Err(transport(e)),
                };
                match decode(message) {
                    Frame::Inbound(Inbound::Version { version }) => return Ok(version),
                    Frame::Inbound(Inbound::Error { message }) => {
                        return Err(ClientError::Request(message))
                    }
                    Frame::Inbound(other) => {
                        debug!("ignoring {other:?} while waiting for version")
                    }
                    Frame::Closed => break,
                    Frame::Skip => {}
                }
            }
            Err(ClientError::NotConnected)
        })
        .await
        .map_err(|_| ClientError::Transport("timed out waiting for protocol version".into()))?;

        // The version connection is single-use.
        let _ = ws.close(None).await;
        reply
    }

    async fn connect(&self, options: ClientOptions) -> Result<ClientConnection, ClientError> {
        let ws = self.open().await?;
        let (mut sink, stream) = ws.split();

        let hello = Outbound::Connect {
            version: options.version,
            browser: options.identity,
            print_qr: options.print_qr_in_terminal,
            silent: options.silent_logger,
            creds: options.auth.creds,
            keys: options.auth.keys,
        };
        sink.send(encode(&hello)?).await.map_err(transport)?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let pending: PendingPairing = Arc::new(Mutex::new(None));

        tokio::spawn(write_frames(sink, outbound_rx));
        tokio::spawn(read_frames(stream, events_tx, Arc::clone(&pending)));

        let client = SidecarClient {
            outbound: outbound_tx,
            pending,
            request_timeout: self.request_timeout,
        };
        Ok(ClientConnection {
            client: Arc::new(client),
            events: events_rx,
        })
    }
}

// ── Socket tasks ──────────────────────────────────────────────────────────────

async fn write_frames(
    mut sink: SplitSink<WsStream, WsMessage>,
    mut outbound: mpsc::Receiver<Outbound>,
) {
    while let Some(frame) = outbound.recv().await {
        let is_end = matches!(frame, Outbound::End);
        let message = match encode(&frame) {
            Ok(message) => message,
            Err(e) => {
                warn!("{e}");
                continue;
            }
        };
        if let Err(e) = sink.send(message).await {
            debug!("protocol daemon write failed: {e}");
            break;
        }
        if is_end {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_frames(
    mut stream: SplitStream<WsStream>,
    events: mpsc::Sender<ClientEvent>,
    pending: PendingPairing,
) {
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                debug!("protocol daemon connection lost: {e}");
                break;
            }
        };

        let event = match decode(message) {
            Frame::Inbound(Inbound::ConnectionUpdate(update)) => ClientEvent::Connection(update),
            Frame::Inbound(Inbound::CredsUpdate { creds }) => {
                ClientEvent::Credentials(CredentialUpdate::Creds(creds))
            }
            Frame::Inbound(Inbound::KeysUpdate { category, entries }) => {
                ClientEvent::Credentials(CredentialUpdate::Keys { category, entries })
            }
            Frame::Inbound(Inbound::PairingCode { code }) => {
                if !resolve_pairing(&pending, Ok(code)) {
                    debug!("unsolicited pairing code frame ignored");
                }
                continue;
            }
            Frame::Inbound(Inbound::Error { message }) => {
                if !resolve_pairing(&pending, Err(ClientError::Request(message.clone()))) {
                    warn!("protocol daemon reported: {message}");
                }
                continue;
            }
            Frame::Inbound(Inbound::Version { .. }) | Frame::Skip => continue,
            Frame::Closed => break,
        };

        if events.send(event).await.is_err() {
            break;
        }
    }

    resolve_pairing(&pending, Err(ClientError::NotConnected));
    info!("protocol daemon connection closed");
}

/// Completes the pending pairing request, if any.  Returns `false` when no
/// request was waiting.
fn resolve_pairing(
    pending: &PendingPairing,
    result: Result<PairingCodeResponse, ClientError>,
) -> bool {
    let waiter = pending.lock().unwrap_or_else(PoisonError::into_inner).take();
    match waiter {
        Some(tx) => {
            let _ = tx.send(result);
            true
        }
        None => false,
    }
}

// ── Client ────────────────────────────────────────────────────────────────────

/// One daemon-backed protocol client.
struct SidecarClient {
    outbound: mpsc::Sender<Outbound>,
    pending: PendingPairing,
    request_timeout: Duration,
}

impl SidecarClient {
    async fn send(&self, frame: Outbound) -> Result<(), ClientError> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| ClientError::NotConnected)
    }

    fn clear_pending(&self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

#[async_trait]
impl ProtocolClient for SidecarClient {
    fn pairing_code_requester(&self) -> Option<&dyn PairingCodeRequester> {
        Some(self)
    }

    async fn logout(&self) -> Result<(), ClientError> {
        self.send(Outbound::Logout).await
    }

    async fn end(&self) -> Result<(), ClientError> {
        self.send(Outbound::End).await
    }
}

#[async_trait]
impl PairingCodeRequester for SidecarClient {
    async fn request_pairing_code(
        &self,
        phone: &PhoneNumber,
    ) -> Result<PairingCodeResponse, ClientError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut slot = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_some() {
                return Err(ClientError::Request(
                    "a pairing code request is already pending".into(),
                ));
            }
            *slot = Some(tx);
        }

        let request = Outbound::RequestPairingCode {
            phone: phone.as_str().to_owned(),
        };
        if let Err(e) = self.send(request).await {
            self.clear_pending();
            return Err(e);
        }

        match timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::NotConnected),
            Err(_) => {
                self.clear_pending();
                Err(ClientError::Request("timed out waiting for pairing code".into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairing_core::{AuthState, ConnectionState};
    use serde_json::json;
    use std::future::Future;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    type DaemonSocket = WebSocketStream<TcpStream>;

    /// Starts a one-connection fake daemon and returns its URL.
    async fn spawn_daemon<F, Fut>(script: F) -> String
    where
        F: FnOnce(DaemonSocket) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            script(ws).await;
        });
        format!("ws://{addr}")
    }

    async fn recv_json(ws: &mut DaemonSocket) -> Value {
        loop {
            match ws.next().await.unwrap().unwrap() {
                WsMessage::Text(text) => return serde_json::from_str(&text).unwrap(),
                _ => continue,
            }
        }
    }

    async fn send_json(ws: &mut DaemonSocket, value: Value) {
        ws.send(WsMessage::Text(value.to_string())).await.unwrap();
    }

    fn options() -> ClientOptions {
        ClientOptions {
            version: ProtocolVersion([2, 3000, 1]),
            auth: AuthState::fresh(),
            identity: ClientIdentity::default(),
            print_qr_in_terminal: false,
            silent_logger: true,
        }
    }

    fn phone() -> PhoneNumber {
        PhoneNumber::parse("628123456789").unwrap()
    }

    #[tokio::test]
    async fn test_fetch_latest_version() {
        // Arrange
        let url = spawn_daemon(|mut ws| async move {
            let request = recv_json(&mut ws).await;
            assert_eq!(request, json!({"type": "FetchVersion"}));
            send_json(&mut ws, json!({"type": "Version", "version": [2, 3000, 1015901307]})).await;
        })
        .await;

        // Act
        let version = SidecarClientFactory::new(url).fetch_latest_version().await;

        // Assert
        assert_eq!(version.unwrap(), ProtocolVersion([2, 3000, 1015901307]));
    }

    #[tokio::test]
    async fn test_connect_routes_events_and_pairing_code() {
        // Arrange
        let url = spawn_daemon(|mut ws| async move {
            let hello = recv_json(&mut ws).await;
            assert_eq!(hello["type"], "Connect");
            assert_eq!(hello["browser"], json!(["Ubuntu", "Chrome", "20.0.04"]));
            assert_eq!(hello["print_qr"], json!(false));

            let request = recv_json(&mut ws).await;
            assert_eq!(request, json!({"type": "RequestPairingCode", "phone": "628123456789"}));
            send_json(&mut ws, json!({"type": "PairingCode", "code": "ABCD1234"})).await;
            send_json(&mut ws, json!({"type": "CredsUpdate", "creds": {"registered": true}})).await;
            send_json(
                &mut ws,
                json!({"type": "KeysUpdate", "category": "pre-key", "entries": {"1": {"k": 1}, "2": null}}),
            )
            .await;
            send_json(&mut ws, json!({"type": "ConnectionUpdate", "connection": "open"})).await;

            let end = recv_json(&mut ws).await;
            assert_eq!(end, json!({"type": "End"}));
            let _ = ws.close(None).await;
        })
        .await;
        let factory = SidecarClientFactory::new(url);

        // Act
        let mut conn = factory.connect(options()).await.unwrap();
        let code = conn
            .client
            .pairing_code_requester()
            .unwrap()
            .request_pairing_code(&phone())
            .await
            .unwrap();
        let creds = conn.events.recv().await.unwrap();
        let keys = conn.events.recv().await.unwrap();
        let open = conn.events.recv().await.unwrap();
        conn.client.end().await.unwrap();
        let closed = tokio::time::timeout(Duration::from_secs(2), conn.events.recv()).await;

        // Assert
        assert_eq!(code.into_value(), json!("ABCD1234"));
        assert_eq!(
            creds,
            ClientEvent::Credentials(CredentialUpdate::Creds(json!({"registered": true})))
        );
        match keys {
            ClientEvent::Credentials(CredentialUpdate::Keys { category, entries }) => {
                assert_eq!(category, "pre-key");
                assert_eq!(entries["1"], Some(json!({"k": 1})));
                assert_eq!(entries["2"], None);
            }
            other => panic!("expected key update, got {other:?}"),
        }
        match open {
            ClientEvent::Connection(update) => {
                assert_eq!(update.connection, Some(ConnectionState::Open))
            }
            other => panic!("expected connection update, got {other:?}"),
        }
        assert_eq!(closed.unwrap(), None, "event stream should end after End");
    }

    #[tokio::test]
    async fn test_error_frame_fails_pending_pairing_request() {
        let url = spawn_daemon(|mut ws| async move {
            recv_json(&mut ws).await; // Connect
            recv_json(&mut ws).await; // RequestPairingCode
            send_json(&mut ws, json!({"type": "Error", "message": "rate-overlimit"})).await;
            // Hold the socket until the client goes away.
            while ws.next().await.is_some() {}
        })
        .await;
        let conn = SidecarClientFactory::new(url).connect(options()).await.unwrap();

        let result = conn
            .client
            .pairing_code_requester()
            .unwrap()
            .request_pairing_code(&phone())
            .await;

        assert!(matches!(result, Err(ClientError::Request(ref m)) if m.contains("rate-overlimit")));
    }

    #[tokio::test]
    async fn test_pairing_request_times_out() {
        let url = spawn_daemon(|mut ws| async move {
            while ws.next().await.is_some() {}
        })
        .await;
        let factory =
            SidecarClientFactory::new(url).with_request_timeout(Duration::from_millis(50));
        let conn = factory.connect(options()).await.unwrap();

        let result = conn
            .client
            .pairing_code_requester()
            .unwrap()
            .request_pairing_code(&phone())
            .await;

        assert!(matches!(result, Err(ClientError::Request(_))));
    }

    #[tokio::test]
    async fn test_unreachable_daemon_is_transport_error() {
        // Arrange: reserve a port, then free it so nothing is listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        // Act
        let result = SidecarClientFactory::new(format!("ws://{addr}"))
            .fetch_latest_version()
            .await;

        // Assert
        assert!(matches!(result, Err(ClientError::Transport(_))));
    }
}
