//! Scripted protocol client for testing.
//!
//! # Why a scripted client?
//!
//! A real protocol client needs a protocol daemon, network access and a phone
//! to scan the code.  The handshake only cares about the *sequence of events*
//! a client emits and about the calls made on it, so tests describe that
//! sequence up front and inspect the recorded calls afterwards.
//!
//! # Usage in tests
//!
//! ```ignore
//! let factory = ScriptedClientFactory::new()
//!     .with_credentials(CredentialUpdate::Creds(json!({"registered": true})))
//!     .with_connection(ConnectionUpdate::open());
//! let calls = factory.calls();
//!
//! let handshake = Handshake::new(Arc::new(factory), store, settings);
//! let lease = SessionLocks::new().acquire(dir).await;
//! handshake.run(&phone, dir, lease).await?;
//!
//! assert_eq!(calls.connects.lock().unwrap().len(), 1);
//! ```
//!
//! Every client created by the factory plays the same script.  After the last
//! step the event stream stays open until `end()` is called, like a real
//! client that simply never hears back from the server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use pairing_core::{
    ClientEvent, ConnectionUpdate, CredentialUpdate, PairingCodeResponse, PhoneNumber,
    ProtocolVersion,
};

use crate::application::ports::{
    ClientConnection, ClientError, ClientFactory, ClientOptions, PairingCodeRequester,
    ProtocolClient,
};

/// Version reported by [`ScriptedClientFactory::fetch_latest_version`].
pub const SCRIPTED_VERSION: ProtocolVersion = ProtocolVersion([2, 3000, 1015901307]);

/// How a scripted client answers a pairing-code request.
#[derive(Debug, Clone)]
pub enum PairingBehaviour {
    /// The client has no pairing-code capability.
    Unsupported,
    /// The request succeeds with this response.
    Returns(PairingCodeResponse),
    /// The request fails with [`ClientError::Request`].
    Fails(String),
    /// The request never answers, like a daemon that went quiet.
    Hangs,
}

/// Calls recorded across every client created by one factory.
#[derive(Debug, Default)]
pub struct MockCalls {
    /// Options passed to each `connect`.
    pub connects: Mutex<Vec<ClientOptions>>,
    /// Phone numbers passed to `request_pairing_code`.
    pub pairing_requests: Mutex<Vec<String>>,
    pub logouts: AtomicUsize,
    pub ends: AtomicUsize,
}

#[derive(Debug, Clone)]
enum Step {
    Emit(ClientEvent),
    Wait(Duration),
}

/// [`ClientFactory`] whose clients replay a fixed event script.
#[derive(Debug)]
pub struct ScriptedClientFactory {
    script: Vec<Step>,
    pairing: PairingBehaviour,
    close_after_script: bool,
    fail_teardown: bool,
    connect_error: Option<ClientError>,
    calls: Arc<MockCalls>,
}

impl Default for ScriptedClientFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedClientFactory {
    /// A factory with an empty script whose clients support pairing codes
    /// and answer `"ABCD1234"`.
    pub fn new() -> Self {
        Self {
            script: Vec::new(),
            pairing: PairingBehaviour::Returns(PairingCodeResponse::Bare("ABCD1234".into())),
            close_after_script: false,
            fail_teardown: false,
            connect_error: None,
            calls: Arc::new(MockCalls::default()),
        }
    }

    /// Appends a connection update to the script.
    pub fn with_connection(mut self, update: ConnectionUpdate) -> Self {
        self.script.push(Step::Emit(ClientEvent::Connection(update)));
        self
    }

    /// Appends a pause followed by a connection update.
    pub fn with_delayed_connection(mut self, delay: Duration, update: ConnectionUpdate) -> Self {
        self.script.push(Step::Wait(delay));
        self.with_connection(update)
    }

    /// Appends a credential update to the script.
    pub fn with_credentials(mut self, update: CredentialUpdate) -> Self {
        self.script.push(Step::Emit(ClientEvent::Credentials(update)));
        self
    }

    pub fn with_pairing(mut self, behaviour: PairingBehaviour) -> Self {
        self.pairing = behaviour;
        self
    }

    /// Closes the event stream right after the last scripted step.
    pub fn closing_stream(mut self) -> Self {
        self.close_after_script = true;
        self
    }

    /// Makes `logout` and `end` fail.  Both calls are still recorded.
    pub fn failing_teardown(mut self) -> Self {
        self.fail_teardown = true;
        self
    }

    /// Makes `connect` fail with `error`.
    pub fn failing_connect(mut self, error: ClientError) -> Self {
        self.connect_error = Some(error);
        self
    }

    /// Handle to the calls recorded by this factory's clients.
    pub fn calls(&self) -> Arc<MockCalls> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl ClientFactory for ScriptedClientFactory {
    async fn fetch_latest_version(&self) -> Result<ProtocolVersion, ClientError> {
        Ok(SCRIPTED_VERSION)
    }

    async fn connect(&self, options: ClientOptions) -> Result<ClientConnection, ClientError> {
        self.calls
            .connects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(options);
        if let Some(error) = &self.connect_error {
            return Err(error.clone());
        }

        let (events_tx, events_rx) = mpsc::channel(64);
        let (ended_tx, ended_rx) = watch::channel(false);
        tokio::spawn(play_script(
            self.script.clone(),
            self.close_after_script,
            events_tx,
            ended_rx,
        ));

        let client = ScriptedClient {
            pairing: self.pairing.clone(),
            fail_teardown: self.fail_teardown,
            ended: ended_tx,
            calls: Arc::clone(&self.calls),
        };
        Ok(ClientConnection {
            client: Arc::new(client),
            events: events_rx,
        })
    }
}

/// Emits the script, then holds the stream open until the client ends.
async fn play_script(
    script: Vec<Step>,
    close_after_script: bool,
    events: mpsc::Sender<ClientEvent>,
    mut ended: watch::Receiver<bool>,
) {
    for step in script {
        if *ended.borrow() {
            return;
        }
        match step {
            Step::Emit(event) => {
                if events.send(event).await.is_err() {
                    return;
                }
            }
            Step::Wait(delay) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = wait_until_ended(&mut ended) => return,
                }
            }
        }
    }

    if !close_after_script {
        wait_until_ended(&mut ended).await;
    }
}

async fn wait_until_ended(ended: &mut watch::Receiver<bool>) {
    // Err means the client was dropped, which ends the stream as well.
    let _ = ended.wait_for(|ended| *ended).await;
}

/// One client created by [`ScriptedClientFactory`].
struct ScriptedClient {
    pairing: PairingBehaviour,
    fail_teardown: bool,
    ended: watch::Sender<bool>,
    calls: Arc<MockCalls>,
}

#[async_trait]
impl ProtocolClient for ScriptedClient {
    fn pairing_code_requester(&self) -> Option<&dyn PairingCodeRequester> {
        match self.pairing {
            PairingBehaviour::Unsupported => None,
            _ => Some(self),
        }
    }

    async fn logout(&self) -> Result<(), ClientError> {
        self.calls.logouts.fetch_add(1, Ordering::SeqCst);
        if self.fail_teardown {
            return Err(ClientError::NotConnected);
        }
        Ok(())
    }

    async fn end(&self) -> Result<(), ClientError> {
        self.calls.ends.fetch_add(1, Ordering::SeqCst);
        self.ended.send_replace(true);
        if self.fail_teardown {
            return Err(ClientError::Transport("socket already closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PairingCodeRequester for ScriptedClient {
    async fn request_pairing_code(
        &self,
        phone: &PhoneNumber,
    ) -> Result<PairingCodeResponse, ClientError> {
        self.calls
            .pairing_requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(phone.as_str().to_owned());
        match &self.pairing {
            PairingBehaviour::Returns(response) => Ok(response.clone()),
            PairingBehaviour::Fails(message) => Err(ClientError::Request(message.clone())),
            PairingBehaviour::Hangs => std::future::pending().await,
            PairingBehaviour::Unsupported => Err(ClientError::NotConnected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairing_core::{AuthState, ClientIdentity};

    fn options() -> ClientOptions {
        ClientOptions {
            version: SCRIPTED_VERSION,
            auth: AuthState::fresh(),
            identity: ClientIdentity::default(),
            print_qr_in_terminal: false,
            silent_logger: true,
        }
    }

    #[tokio::test]
    async fn test_script_is_played_in_order() {
        // Arrange
        let factory = ScriptedClientFactory::new()
            .with_connection(ConnectionUpdate::default())
            .with_connection(ConnectionUpdate::open())
            .closing_stream();

        // Act
        let mut conn = factory.connect(options()).await.unwrap();
        let mut received = Vec::new();
        while let Some(event) = conn.events.recv().await {
            received.push(event);
        }

        // Assert
        assert_eq!(
            received,
            vec![
                ClientEvent::Connection(ConnectionUpdate::default()),
                ClientEvent::Connection(ConnectionUpdate::open()),
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_stays_open_until_end() {
        let factory = ScriptedClientFactory::new();
        let mut conn = factory.connect(options()).await.unwrap();

        let idle = tokio::time::timeout(Duration::from_millis(30), conn.events.recv()).await;
        assert!(idle.is_err(), "stream should still be open");

        conn.client.end().await.unwrap();
        let closed = tokio::time::timeout(Duration::from_secs(1), conn.events.recv()).await;
        assert_eq!(closed.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unsupported_pairing_has_no_requester() {
        let factory = ScriptedClientFactory::new().with_pairing(PairingBehaviour::Unsupported);
        let conn = factory.connect(options()).await.unwrap();

        assert!(conn.client.pairing_code_requester().is_none());
    }

    #[tokio::test]
    async fn test_hanging_pairing_request_never_answers() {
        let factory = ScriptedClientFactory::new().with_pairing(PairingBehaviour::Hangs);
        let conn = factory.connect(options()).await.unwrap();
        let phone = PhoneNumber::parse("6281").unwrap();
        let requester = conn.client.pairing_code_requester().unwrap();

        let answer =
            tokio::time::timeout(Duration::from_millis(30), requester.request_pairing_code(&phone))
                .await;

        assert!(answer.is_err(), "request should still be pending");
    }

    #[tokio::test]
    async fn test_failing_connect_is_recorded() {
        let factory = ScriptedClientFactory::new()
            .failing_connect(ClientError::Transport("refused".into()));
        let calls = factory.calls();

        let result = factory.connect(options()).await;

        assert!(matches!(result, Err(ClientError::Transport(_))));
        assert_eq!(calls.connects.lock().unwrap().len(), 1);
    }
}
