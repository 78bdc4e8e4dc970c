//! The client orchestrator.
//!
//! Owns the server session, the listener, the peer registry and the send
//! dispatcher, and routes server replies to whoever is waiting on them.
//! Peer sends are queued per token and delivered in order, retrying while a
//! handshake for that token is still in progress.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::Token;
use crate::config::ClientConfig;
use crate::constants::{ConnectionType, UserStatus};
use crate::event::ClientEvent;
use crate::handshake::{HandshakeRecord, HandshakeState};
use crate::listen::ListenSession;
use crate::peer::PeerMessage;
use crate::protocol::MessageWrite;
use crate::registry::PeerRegistry;
use crate::server::{ServerRequest, ServerResponse};
use crate::session::{PeerHandle, ServerSession};
use crate::{Error, Result};

/// What the server told us on a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginInfo {
    pub greeting: String,
    pub own_ip: Ipv4Addr,
}

/// State shared by the client handle and its background tasks.
///
/// Long-lived tasks hold a `Weak` so dropping the last [`Client`] tears
/// everything down.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) config: ClientConfig,
    pub(crate) username: String,
    pub(crate) server: ServerSession,
    pub(crate) listen: ListenSession,
    pub(crate) registry: Arc<PeerRegistry>,
    pub(crate) events: mpsc::UnboundedSender<ClientEvent>,
    pub(crate) cant_connect: Mutex<HashMap<Token, oneshot::Sender<()>>>,
    address_waiters: Mutex<HashMap<String, Vec<oneshot::Sender<SocketAddrV4>>>>,
    login_waiter: Mutex<Option<oneshot::Sender<ServerResponse>>>,
    commands: mpsc::UnboundedSender<PeerCommand>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Debug)]
struct PeerCommand {
    token: Token,
    frame: Bytes,
    /// Handshake record for the token when the send was issued.
    seen: Option<HandshakeRecord>,
    reply: oneshot::Sender<Result<()>>,
}

/// FIFO delivery queue for one token.
struct PeerWorker {
    tx: mpsc::UnboundedSender<PeerCommand>,
    pending: Arc<AtomicUsize>,
}

impl PeerWorker {
    fn spawn(shared: Weak<Shared>, token: Token) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<PeerCommand>();
        let pending = Arc::new(AtomicUsize::new(0));
        let counter = pending.clone();

        tokio::spawn(async move {
            while let Some(PeerCommand { frame, seen, reply, .. }) = rx.recv().await {
                let result = match shared.upgrade() {
                    Some(shared) => shared.deliver(token, frame, seen).await,
                    None => Err(Error::ConnectionClosed),
                };
                counter.fetch_sub(1, Ordering::AcqRel);
                let _ = reply.send(result);
            }
        });

        PeerWorker { tx, pending }
    }

    fn is_idle(&self) -> bool {
        self.pending.load(Ordering::Acquire) == 0
    }
}

async fn run_dispatcher(shared: Weak<Shared>, mut commands: mpsc::UnboundedReceiver<PeerCommand>) {
    let mut workers: HashMap<Token, PeerWorker> = HashMap::new();

    while let Some(command) = commands.recv().await {
        workers.retain(|_, w| !w.is_idle());

        let token = command.token;
        let worker = workers
            .entry(token)
            .or_insert_with(|| PeerWorker::spawn(shared.clone(), token));
        worker.pending.fetch_add(1, Ordering::AcqRel);
        if let Err(mpsc::error::SendError(command)) = worker.tx.send(command) {
            worker.pending.fetch_sub(1, Ordering::AcqRel);
            let _ = command.reply.send(Err(Error::ConnectionClosed));
        }
    }
    debug!("dispatcher stopped");
}

async fn route_server_messages(
    shared: Weak<Shared>,
    mut inbound: mpsc::UnboundedReceiver<ServerResponse>,
) {
    while let Some(msg) = inbound.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.on_server_message(&msg).await;
        let _ = shared.events.send(ClientEvent::Server(msg));
    }

    if let Some(shared) = shared.upgrade() {
        shared.login_waiter.lock().await.take();
        shared.address_waiters.lock().await.clear();
        let _ = shared.events.send(ClientEvent::ServerDisconnected);
    }
}

impl Shared {
    async fn on_server_message(self: &Arc<Self>, msg: &ServerResponse) {
        match msg {
            ServerResponse::LoginSuccess { .. } | ServerResponse::LoginFailure { .. } => {
                if let Some(waiter) = self.login_waiter.lock().await.take() {
                    let _ = waiter.send(msg.clone());
                }
            }
            ServerResponse::PeerAddress { username, ip, port } => {
                let waiters = self.address_waiters.lock().await.remove(username);
                let addr = SocketAddrV4::new(*ip, u16::try_from(*port).unwrap_or(0));
                for waiter in waiters.into_iter().flatten() {
                    let _ = waiter.send(addr);
                }
            }
            ServerResponse::ConnectToPeer {
                username,
                connection_type: ConnectionType::Peer,
                ip,
                port,
                token,
                ..
            } => {
                let addr = SocketAddrV4::new(*ip, u16::try_from(*port).unwrap_or(0));
                let shared = self.clone();
                let username = username.clone();
                let token = *token;
                tokio::spawn(async move {
                    shared.answer_connect_request(username, addr, token).await;
                });
            }
            ServerResponse::ConnectToPeer {
                username,
                connection_type,
                token,
                ..
            } => {
                debug!(
                    token,
                    username = %username,
                    connection_type = connection_type.as_str(),
                    "ignoring connect request for unsupported connection type"
                );
            }
            ServerResponse::CantConnectToPeer { token, .. } => {
                if let Some(abort) = self.cant_connect.lock().await.remove(token) {
                    let _ = abort.send(());
                }
            }
            ServerResponse::Unknown { code, .. } => {
                debug!(code, "unhandled server message");
            }
        }
    }

    pub(crate) async fn request_peer_address(&self, username: &str) -> Result<SocketAddrV4> {
        if !self.server.is_open() {
            return Err(Error::ConnectionClosed);
        }
        let (tx, rx) = oneshot::channel();
        self.address_waiters
            .lock()
            .await
            .entry(username.to_string())
            .or_default()
            .push(tx);
        self.server.send(&ServerRequest::GetPeerAddress {
            username: username.to_string(),
        })?;

        let timeout = self.config.address_timeout();
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(addr)) => Ok(addr),
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                let mut waiters = self.address_waiters.lock().await;
                if let Some(pending) = waiters.get_mut(username) {
                    pending.retain(|w| !w.is_closed());
                    if pending.is_empty() {
                        waiters.remove(username);
                    }
                }
                Err(Error::Timeout(timeout))
            }
        }
    }

    pub(crate) async fn handshake_state(&self, token: Token) -> Option<HandshakeState> {
        self.registry.handshake(token).await.map(|r| r.state)
    }

    /// Hand `frame` to the session bound to `token`, retrying while the token
    /// is unbound.
    ///
    /// Retrying stops early only when a handshake fails after the send was
    /// queued; a failure left over from an earlier negotiation is ignored.
    async fn deliver(&self, token: Token, frame: Bytes, seen: Option<HandshakeRecord>) -> Result<()> {
        let max_attempts = self.config.send_max_attempts.max(1);
        let delay = self.config.send_retry_delay();
        let mut attempts = 0;

        while attempts < max_attempts {
            attempts += 1;
            if let Some(handle) = self.registry.lookup(token).await {
                match handle.send_frame(frame.clone()) {
                    Ok(()) => {
                        debug!(token, attempts, "peer message queued");
                        return Ok(());
                    }
                    Err(e) => debug!(token, attempts, error = %e, "send attempt failed"),
                }
            }
            let now = self.registry.handshake(token).await;
            if now.is_some_and(|now| now.failed_since(seen)) {
                break;
            }
            if attempts < max_attempts {
                self.registry.wait_for(token, delay).await;
            }
        }

        warn!(token, attempts, "dropping peer message");
        Err(Error::PeerUnreachable { token, attempts })
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.server.close();
        self.listen.close();
        if let Ok(tasks) = self.tasks.get_mut() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

/// A logged-in (or logging-in) client. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    /// Bind the listener, connect to the server and start the background
    /// tasks. Nothing is sent until [`login`](Self::login).
    pub async fn start(
        config: ClientConfig,
        username: impl Into<String>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>)> {
        let username = username.into();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(PeerRegistry::new());

        let listen = ListenSession::bind(
            &config.listen_host,
            config.listen_port,
            registry.clone(),
            events_tx.clone(),
        )
        .await?;

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let server = match ServerSession::connect(&config.server_host, config.server_port, server_tx).await {
            Ok(server) => server,
            Err(e) => {
                listen.close();
                return Err(e);
            }
        };

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            config,
            username,
            server,
            listen,
            registry,
            events: events_tx,
            cant_connect: Mutex::new(HashMap::new()),
            address_waiters: Mutex::new(HashMap::new()),
            login_waiter: Mutex::new(None),
            commands: commands_tx,
            tasks: std::sync::Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&shared);
        let dispatcher = tokio::spawn(run_dispatcher(weak.clone(), commands_rx));
        let router = tokio::spawn(route_server_messages(weak, server_rx));
        if let Ok(mut tasks) = shared.tasks.lock() {
            tasks.push(dispatcher);
            tasks.push(router);
        }

        Ok((Client { shared }, events_rx))
    }

    pub fn username(&self) -> &str {
        &self.shared.username
    }

    /// Address the peer listener is bound to.
    pub fn listen_addr(&self) -> SocketAddr {
        self.shared.listen.local_addr()
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.shared.registry
    }

    /// Log in, then announce our listen port, status and share counts.
    pub async fn login(
        &self,
        password: &str,
        status: UserStatus,
        shared_folders: i32,
        shared_files: i32,
    ) -> Result<LoginInfo> {
        let (tx, rx) = oneshot::channel();
        *self.shared.login_waiter.lock().await = Some(tx);
        self.send_to_server(&ServerRequest::login(&self.shared.username, password))?;

        let timeout = self.shared.config.login_timeout();
        let response = tokio::time::timeout(timeout, rx)
            .await
            .map_err(|_| Error::Timeout(timeout))?
            .map_err(|_| Error::ConnectionClosed)?;

        match response {
            ServerResponse::LoginSuccess {
                greeting, own_ip, ..
            } => {
                info!(username = %self.shared.username, %own_ip, "logged in");
                let port = i32::from(self.listen_addr().port());
                self.send_to_server(&ServerRequest::SetListenPort { port })?;
                self.send_to_server(&ServerRequest::SetStatus { status })?;
                self.send_to_server(&ServerRequest::SharedFoldersFiles {
                    dirs: shared_folders,
                    files: shared_files,
                })?;
                Ok(LoginInfo { greeting, own_ip })
            }
            ServerResponse::LoginFailure { reason } => {
                warn!(username = %self.shared.username, %reason, "login rejected");
                Err(Error::LoginRejected(reason))
            }
            other => Err(Error::Protocol(format!("unexpected login reply: {other:?}"))),
        }
    }

    /// Queue a message on the server connection. Messages reach the server
    /// in call order.
    pub fn send_to_server(&self, msg: &ServerRequest) -> Result<()> {
        self.shared.server.send(msg)
    }

    /// Deliver `message` to the peer bound to `token`.
    ///
    /// If no session is bound yet the message waits, retrying up to the
    /// configured attempt count; a handshake for the token that fails after
    /// this call ends the wait early. Messages to one token are delivered in
    /// call order.
    pub async fn send_to_peer(&self, token: Token, message: PeerMessage) -> Result<()> {
        let frame = message.to_frame()?;
        let seen = self.shared.registry.handshake(token).await;
        let (reply, rx) = oneshot::channel();
        self.shared
            .commands
            .send(PeerCommand {
                token,
                frame,
                seen,
                reply,
            })
            .map_err(|_| Error::ConnectionClosed)?;
        rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Open a P connection to `username` under `token`.
    ///
    /// `addr` skips the address lookup when the caller already knows it.
    pub async fn connect_to_peer(
        &self,
        username: &str,
        token: Token,
        addr: Option<SocketAddrV4>,
    ) -> Result<PeerHandle> {
        self.shared.negotiate(username, token, addr).await
    }

    /// Ask the server where `username` listens.
    pub async fn request_peer_address(&self, username: &str) -> Result<SocketAddrV4> {
        self.shared.request_peer_address(username).await
    }

    pub async fn handshake_state(&self, token: Token) -> Option<HandshakeState> {
        self.shared.handshake_state(token).await
    }

    /// Close every connection and stop the background tasks.
    pub async fn shutdown(&self) {
        info!("shutting down");
        self.shared.registry.close_all().await;
        self.shared.server.close();
        self.shared.listen.close();
        if let Ok(mut tasks) = self.shared.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}
