//! Session client
//!
//! [`Client`] owns the complete state for one logical session with a peer:
//! - the lifecycle state machine (bind, handshake, heartbeat, teardown,
//!   rebind),
//! - the two UDP sockets (inbound listener, outbound sender),
//! - the heartbeat task that re-announces presence,
//! - the receive loop feeding decoded datagrams into the pipeline.
//!
//! At most one active session exists per instance: `init` always tears the
//! previous session fully down (sockets released, heartbeat cancelled)
//! before binding anything new.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::codec;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::message::{MessageContext, SessionHandle};
use crate::pipeline::{self, Stage};

/// Lifecycle state of a [`Client`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session; sockets released, heartbeat stopped.
    Closed,
    /// `init` is binding sockets and sending the handshake.
    Binding,
    /// Handshake sent; heartbeat running; datagrams being dispatched.
    Active,
}

/// Result of a successful handshake, returned by [`Client::init`].
///
/// This is the typed form of the `connect` event.
#[derive(Debug, Clone)]
pub struct ConnectInfo {
    /// Address the inbound socket is bound to.
    pub local_addr: SocketAddr,
    /// Resolved peer address the announcement was sent to.
    pub peer_addr: SocketAddr,
    /// Bytes accepted by the transport for the handshake send.
    pub bytes_sent: usize,
}

type ErrorSink = Box<dyn Fn(&Error) + Send + Sync>;
type StageList = Arc<RwLock<Vec<Arc<dyn Stage>>>>;

/// Client half of the handshake/heartbeat protocol.
///
/// Announces itself to the peer with `"ClientHello <port>"`, keeps the
/// session alive with periodic re-announcements, and threads every inbound
/// datagram through the registered stage chain.
pub struct Client {
    config: SessionConfig,
    stages: StageList,
    state: ConnectionState,
    inbound: Option<Arc<UdpSocket>>,
    outbound: Option<Arc<UdpSocket>>,
    reader: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    error_sink: Arc<RwLock<ErrorSink>>,
}

impl Client {
    /// Create a client; no socket is touched until [`Client::init`].
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            stages: Arc::new(RwLock::new(Vec::new())),
            state: ConnectionState::Closed,
            inbound: None,
            outbound: None,
            reader: None,
            heartbeat: None,
            error_sink: Arc::new(RwLock::new(Box::new(|e: &Error| {
                tracing::error!(error = %e, "pipeline run failed");
            }))),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Append a stage to the processing chain. Chainable.
    ///
    /// The dispatch engine reads the current stage list per message, so a
    /// stage registered after `init` still applies to every datagram
    /// received from then on.
    pub fn use_stage<S: Stage + 'static>(&mut self, stage: S) -> &mut Self {
        self.stages.write().push(Arc::new(stage));
        self
    }

    /// Replace the sink that observes failed pipeline runs.
    ///
    /// The default sink logs at error level; a run failure is never
    /// silently discarded.
    pub fn on_pipeline_error<F>(&mut self, sink: F) -> &mut Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        *self.error_sink.write() = Box::new(sink);
        self
    }

    /// Establish the session: tear down any previous one, bind the sockets,
    /// announce `"ClientHello <port>"`, and start the heartbeat.
    ///
    /// On failure everything opened so far is released and the client is
    /// left [`ConnectionState::Closed`]; there is no automatic retry.
    pub async fn init(&mut self) -> Result<ConnectInfo> {
        self.close().await;
        self.state = ConnectionState::Binding;
        match self.open_session().await {
            Ok(info) => {
                self.state = ConnectionState::Active;
                info!(local = %info.local_addr, peer = %info.peer_addr, "session established");
                Ok(info)
            }
            Err(e) => {
                self.close().await;
                Err(e)
            }
        }
    }

    /// Alias for [`Client::init`]. Call after
    /// the stages you want for the first messages are registered.
    pub async fn listen(&mut self) -> Result<ConnectInfo> {
        self.init().await
    }

    /// Best-effort single send of a UTF-8 payload to the configured peer.
    ///
    /// No delivery or ordering guarantee; this mirrors the transport.
    pub async fn send(&self, payload: &str) -> Result<usize> {
        let outbound = self.outbound.as_ref().ok_or(Error::SessionClosed)?;
        outbound
            .send(payload.as_bytes())
            .await
            .map_err(|e| Error::transport("send", e))
    }

    /// Cloneable send path for event-driven hosts and pipeline stages.
    pub fn handle(&self) -> Result<SessionHandle> {
        let outbound = self.outbound.as_ref().ok_or(Error::SessionClosed)?;
        let peer = outbound.peer_addr().map_err(|e| Error::transport("connect", e))?;
        Ok(SessionHandle::from_socket(outbound, peer))
    }

    /// Tear the session down: cancel the heartbeat, stop the receive loop,
    /// release both sockets. Idempotent; a second call is a no-op.
    pub async fn close(&mut self) {
        let tasks = [self.heartbeat.take(), self.reader.take()];
        for task in tasks.into_iter().flatten() {
            task.abort();
            // Await actual task destruction so the sockets it holds are
            // released before a caller rebinds the same port.
            let _ = task.await;
        }
        self.inbound.take();
        self.outbound.take();
        self.state = ConnectionState::Closed;
    }

    async fn open_session(&mut self) -> Result<ConnectInfo> {
        let inbound = UdpSocket::bind(("0.0.0.0", self.config.client_port))
            .await
            .map_err(|e| Error::transport("bind", e))?;
        let local_addr = inbound.local_addr().map_err(|e| Error::transport("bind", e))?;

        let outbound = UdpSocket::bind(("0.0.0.0", 0))
            .await
            .map_err(|e| Error::transport("bind", e))?;
        outbound
            .connect((self.config.server_host.as_str(), self.config.server_port))
            .await
            .map_err(|e| Error::transport("connect", e))?;
        let peer_addr = outbound.peer_addr().map_err(|e| Error::transport("connect", e))?;

        let inbound = Arc::new(inbound);
        let outbound = Arc::new(outbound);
        self.inbound = Some(inbound.clone());
        self.outbound = Some(outbound.clone());

        // Start listening before the announcement so no reply can race it.
        self.reader = Some(tokio::spawn(receive_loop(
            inbound,
            Arc::downgrade(&outbound),
            peer_addr,
            self.stages.clone(),
            self.error_sink.clone(),
        )));

        let hello = codec::encode_hello(local_addr.port());
        let bytes_sent = outbound
            .send(hello.as_bytes())
            .await
            .map_err(|e| Error::transport("send", e))?;
        debug!(payload = %hello, "handshake sent");

        let period = Duration::from_millis(self.config.heartbeat_interval_ms.max(1));
        self.heartbeat = Some(tokio::spawn(heartbeat_loop(
            Arc::downgrade(&outbound),
            hello,
            period,
        )));

        Ok(ConnectInfo {
            local_addr,
            peer_addr,
            bytes_sent,
        })
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // Best effort: a leaked client must not strand a heartbeat task.
        if let Some(task) = self.heartbeat.take() {
            task.abort();
        }
        if let Some(task) = self.reader.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state)
            .field("server_host", &self.config.server_host)
            .field("server_port", &self.config.server_port)
            .field("stages", &self.stages.read().len())
            .finish()
    }
}

/// Receive datagrams until the task is cancelled.
///
/// A datagram that fails to decode is reported and skipped; the listener
/// keeps serving. Each decoded message runs its pipeline on its own task,
/// over a snapshot of the stage list taken at dispatch time, so runs for
/// different messages may interleave.
async fn receive_loop(
    inbound: Arc<UdpSocket>,
    outbound: Weak<UdpSocket>,
    peer: SocketAddr,
    stages: StageList,
    error_sink: Arc<RwLock<ErrorSink>>,
) {
    let mut buf = vec![0u8; 65_535];
    loop {
        let (len, from) = match inbound.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!(error = %e, "inbound socket read failed");
                break;
            }
        };
        let content = match codec::decode(&buf[..len]) {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, peer = %from, "dropping undecodable datagram");
                continue;
            }
        };

        let handle = SessionHandle::new(outbound.clone(), peer);
        let ctx = MessageContext::new(content, from, handle);
        debug!(message_id = %ctx.message_id, peer = %from, tokens = ctx.content.len(), "dispatching message");

        let snapshot: Vec<Arc<dyn Stage>> = stages.read().clone();
        let sink = error_sink.clone();
        tokio::spawn(async move {
            let mut ctx = ctx;
            if let Err(e) = pipeline::run(&snapshot, &mut ctx).await {
                (sink.read())(&e);
            }
        });
    }
}

/// Re-announce presence every `period` until cancelled. Fire-and-forget:
/// a failed send is logged and the timer keeps running.
async fn heartbeat_loop(outbound: Weak<UdpSocket>, hello: String, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first interval tick fires immediately; the handshake already
    // announced us, so wait one full period.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(socket) = outbound.upgrade() else {
            break;
        };
        match socket.send(hello.as_bytes()).await {
            Ok(_) => debug!(payload = %hello, "heartbeat sent"),
            Err(e) => warn!(error = %e, "heartbeat send failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Next;
    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    async fn peer_socket() -> (Arc<UdpSocket>, u16) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        (Arc::new(socket), port)
    }

    fn config_for(server_port: u16, client_port: u16) -> SessionConfig {
        SessionConfig {
            server_host: "127.0.0.1".to_string(),
            server_port,
            client_port,
            ..Default::default()
        }
    }

    /// Forwards every dispatched content vector to a channel.
    struct Record {
        sender: mpsc::UnboundedSender<Vec<String>>,
    }

    #[async_trait]
    impl Stage for Record {
        async fn handle(&self, ctx: &mut MessageContext, mut next: Next<'_>) -> Result<()> {
            let _ = self.sender.send(ctx.content.clone());
            next.run(ctx).await
        }
    }

    #[tokio::test]
    async fn test_handshake_payload() {
        let (server, server_port) = peer_socket().await;
        let mut client = Client::new(config_for(server_port, 27788));
        client.init().await.unwrap();

        let mut buf = [0u8; 128];
        let (len, _) = timeout(WAIT, server.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"ClientHello 27788");
        assert_eq!(client.state(), ConnectionState::Active);
        client.close().await;
    }

    #[tokio::test]
    async fn test_init_then_close_releases_resources() {
        let (_server, server_port) = peer_socket().await;
        let mut client = Client::new(config_for(server_port, 0));
        let info = client.init().await.unwrap();
        let bound_port = info.local_addr.port();
        client.close().await;
        assert_eq!(client.state(), ConnectionState::Closed);

        // The inbound port is free again.
        UdpSocket::bind(("0.0.0.0", bound_port)).await.unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (_server, server_port) = peer_socket().await;
        let mut client = Client::new(config_for(server_port, 0));
        client.init().await.unwrap();
        client.close().await;
        client.close().await;
        assert_eq!(client.state(), ConnectionState::Closed);

        // Also a no-op on a never-initialized client.
        let mut fresh = Client::default();
        fresh.close().await;
        assert_eq!(fresh.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_reinit_never_holds_two_inbound_sockets() {
        let (_server, server_port) = peer_socket().await;

        // Reserve a concrete port, then free it for the client.
        let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client_port = probe.local_addr().unwrap().port();
        drop(probe);

        let mut client = Client::new(config_for(server_port, client_port));
        client.init().await.unwrap();
        // A second init on the same port only succeeds if the first
        // session's socket was fully released beforehand.
        client.init().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Active);
        client.close().await;
    }

    #[tokio::test]
    async fn test_failed_init_leaves_client_closed() {
        // Occupy the client port so the bind fails.
        let blocker = UdpSocket::bind("0.0.0.0:0").await.unwrap();
        let taken_port = blocker.local_addr().unwrap().port();

        let mut client = Client::new(config_for(11235, taken_port));
        let err = client.init().await.unwrap_err();
        assert!(matches!(err, Error::Transport { op: "bind", .. }));
        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(client.handle().is_err());
    }

    #[tokio::test]
    async fn test_inbound_dispatch_through_stage() {
        let (server, server_port) = peer_socket().await;
        let (sender, mut receiver) = mpsc::unbounded_channel();

        let mut client = Client::new(config_for(server_port, 0));
        client.use_stage(Record { sender });
        let info = client.init().await.unwrap();

        let payload = BASE64.encode("hello world");
        server
            .send_to(payload.as_bytes(), ("127.0.0.1", info.local_addr.port()))
            .await
            .unwrap();

        let content = timeout(WAIT, receiver.recv()).await.unwrap().unwrap();
        assert_eq!(content, vec!["hello", "world"]);
        client.close().await;
    }

    #[tokio::test]
    async fn test_stage_registered_after_init_sees_messages() {
        let (server, server_port) = peer_socket().await;
        let (sender, mut receiver) = mpsc::unbounded_channel();

        let mut client = Client::new(config_for(server_port, 0));
        let info = client.init().await.unwrap();

        // Registered after the handshake; the engine reads the stage list
        // at dispatch time.
        client.use_stage(Record { sender });

        let payload = BASE64.encode("late registration");
        server
            .send_to(payload.as_bytes(), ("127.0.0.1", info.local_addr.port()))
            .await
            .unwrap();

        let content = timeout(WAIT, receiver.recv()).await.unwrap().unwrap();
        assert_eq!(content, vec!["late", "registration"]);
        client.close().await;
    }

    #[tokio::test]
    async fn test_undecodable_datagram_does_not_stop_listener() {
        let (server, server_port) = peer_socket().await;
        let (sender, mut receiver) = mpsc::unbounded_channel();

        let mut client = Client::new(config_for(server_port, 0));
        client.use_stage(Record { sender });
        let info = client.init().await.unwrap();
        let target = ("127.0.0.1", info.local_addr.port());

        server.send_to(b"!!!not-base64!!!", target).await.unwrap();
        let good = BASE64.encode("still alive");
        server.send_to(good.as_bytes(), target).await.unwrap();

        let content = timeout(WAIT, receiver.recv()).await.unwrap().unwrap();
        assert_eq!(content, vec!["still", "alive"]);
        client.close().await;
    }

    #[tokio::test]
    async fn test_heartbeat_reannounces() {
        let (server, server_port) = peer_socket().await;
        let mut config = config_for(server_port, 0);
        config.heartbeat_interval_ms = 50;

        let mut client = Client::new(config);
        let info = client.init().await.unwrap();
        let expected = format!("ClientHello {}", info.local_addr.port());

        // Handshake plus at least two heartbeat ticks.
        let mut buf = [0u8; 128];
        for _ in 0..3 {
            let (len, _) = timeout(WAIT, server.recv_from(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(&buf[..len], expected.as_bytes());
        }
        client.close().await;
    }

    #[tokio::test]
    async fn test_pipeline_failure_reaches_error_sink() {
        struct AlwaysFail;

        #[async_trait]
        impl Stage for AlwaysFail {
            async fn handle(&self, _ctx: &mut MessageContext, _next: Next<'_>) -> Result<()> {
                Err(Error::stage("intentional"))
            }
        }

        let (server, server_port) = peer_socket().await;
        let (sender, mut receiver) = mpsc::unbounded_channel();

        let mut client = Client::new(config_for(server_port, 0));
        client.use_stage(AlwaysFail);
        client.on_pipeline_error(move |e| {
            let _ = sender.send(e.to_string());
        });
        let info = client.init().await.unwrap();

        let payload = BASE64.encode("boom");
        server
            .send_to(payload.as_bytes(), ("127.0.0.1", info.local_addr.port()))
            .await
            .unwrap();

        let reported = timeout(WAIT, receiver.recv()).await.unwrap().unwrap();
        assert!(reported.contains("intentional"));
        client.close().await;
    }

    #[tokio::test]
    async fn test_handle_outlives_session_but_not_its_socket() {
        let (_server, server_port) = peer_socket().await;
        let mut client = Client::new(config_for(server_port, 0));
        client.init().await.unwrap();

        let handle = client.handle().unwrap();
        assert!(handle.is_open());
        handle.send("ping").await.unwrap();

        client.close().await;
        assert!(!handle.is_open());
        let err = handle.send("ping").await.unwrap_err();
        assert!(matches!(err, Error::SessionClosed));
    }

    #[tokio::test]
    async fn test_send_requires_active_session() {
        let client = Client::default();
        let err = client.send("hello").await.unwrap_err();
        assert!(matches!(err, Error::SessionClosed));
    }
}
