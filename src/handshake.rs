//! Peer connection establishment.
//!
//! A connection to a peer is tried directly first; if that fails the server
//! is asked to have the peer dial us instead (the peer answers on our listen
//! port with PierceFirewall). Whichever path binds the token first wins.
//!
//! ```text
//! RequestingAddress ─► DirectAttempt ─► Established
//!         │                 │
//!         └────────► IndirectAttempt ─► Established | Failed
//! ```

use std::net::SocketAddrV4;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::Token;
use crate::client::Shared;
use crate::constants::ConnectionType;
use crate::event::ClientEvent;
use crate::frame::FrameAssembler;
use crate::peer_init::PeerInitMessage;
use crate::protocol::MessageWrite;
use crate::server::ServerRequest;
use crate::session::{PeerHandle, PeerSession};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeState {
    /// Waiting for the server to tell us where the peer is.
    RequestingAddress,
    /// Dialing the peer's advertised address.
    DirectAttempt,
    /// Waiting for the peer to dial us after a server-brokered request.
    IndirectAttempt,
    Established,
    Failed,
}

impl HandshakeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, HandshakeState::Established | HandshakeState::Failed)
    }
}

/// Latest state of one negotiation. `epoch` changes every time a new
/// negotiation starts for the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HandshakeRecord {
    pub(crate) epoch: u64,
    pub(crate) state: HandshakeState,
}

impl HandshakeRecord {
    /// Whether `self` is a failure that happened after `seen` was observed.
    /// A failure already on record at that point does not count.
    pub(crate) fn failed_since(self, seen: Option<HandshakeRecord>) -> bool {
        if self.state != HandshakeState::Failed {
            return false;
        }
        match seen {
            Some(seen) => seen.epoch != self.epoch || !seen.state.is_terminal(),
            None => true,
        }
    }
}

/// An advertised address of 0.0.0.0 or port 0 means the user is offline or
/// not accepting direct connections.
fn dialable(addr: SocketAddrV4) -> Option<SocketAddrV4> {
    (!addr.ip().is_unspecified() && addr.port() != 0).then_some(addr)
}

/// Open a TCP connection within `timeout`.
async fn dial(addr: SocketAddrV4, timeout: Duration) -> Result<TcpStream> {
    tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| Error::Timeout(timeout))?
        .map_err(Error::from)
}

impl Shared {
    async fn transition(&self, token: Token, epoch: u64, username: &str, state: HandshakeState) {
        self.registry.record_handshake(token, epoch, state).await;
        debug!(token, epoch, username, ?state, "handshake");
        let _ = self.events.send(ClientEvent::Handshake {
            token,
            username: username.to_string(),
            state,
        });
    }

    /// Establish a P connection to `username` under `token`.
    pub(crate) async fn negotiate(
        &self,
        username: &str,
        token: Token,
        addr: Option<SocketAddrV4>,
    ) -> Result<PeerHandle> {
        let epoch = self.registry.begin_handshake(token).await;
        if let Some(handle) = self.registry.lookup(token).await {
            self.transition(token, epoch, username, HandshakeState::Established).await;
            return Ok(handle);
        }

        let addr = match addr {
            Some(addr) => dialable(addr),
            None => {
                self.transition(token, epoch, username, HandshakeState::RequestingAddress)
                    .await;
                match self.request_peer_address(username).await {
                    Ok(addr) => dialable(addr),
                    Err(e) => {
                        warn!(token, username, error = %e, "address lookup failed");
                        None
                    }
                }
            }
        };

        let mut attempts = 0;
        if let Some(addr) = addr {
            attempts += 1;
            self.transition(token, epoch, username, HandshakeState::DirectAttempt).await;
            match self.connect_direct(username, token, addr).await {
                Ok(handle) => {
                    info!(token, username, %addr, "direct connection established");
                    self.transition(token, epoch, username, HandshakeState::Established).await;
                    return Ok(handle);
                }
                Err(e) => debug!(token, username, %addr, error = %e, "direct connection failed"),
            }
        }

        attempts += 1;
        self.transition(token, epoch, username, HandshakeState::IndirectAttempt).await;
        match self.connect_indirect(username, token).await {
            Some(handle) => {
                info!(token, username, "indirect connection established");
                self.transition(token, epoch, username, HandshakeState::Established).await;
                Ok(handle)
            }
            None => {
                warn!(token, username, "peer unreachable");
                self.transition(token, epoch, username, HandshakeState::Failed).await;
                Err(Error::PeerUnreachable { token, attempts })
            }
        }
    }

    async fn connect_direct(
        &self,
        username: &str,
        token: Token,
        addr: SocketAddrV4,
    ) -> Result<PeerHandle> {
        let mut stream = dial(addr, self.config.peer_connect_timeout()).await?;
        let init = PeerInitMessage::PeerInit {
            username: self.username.clone(),
            connection_type: ConnectionType::Peer,
            token,
        };
        stream.write_all(&init.to_frame()?).await?;

        let session = PeerSession::new(
            stream,
            token,
            Some(username.to_string()),
            FrameAssembler::new(),
        )?;
        let handle = session.handle();
        if self.registry.bind_if_absent(handle.clone()).await {
            session.spawn(self.registry.clone(), self.events.clone());
            return Ok(handle);
        }
        // Lost the race to a pierce on the listener; use that session.
        self.registry
            .lookup(token)
            .await
            .ok_or(Error::ConnectionClosed)
    }

    /// Ask the server to broker the connection and wait for the peer to
    /// pierce. Ends early if the server reports the peer could not connect.
    async fn connect_indirect(&self, username: &str, token: Token) -> Option<PeerHandle> {
        let (cant_tx, cant_rx) = oneshot::channel();
        self.cant_connect.lock().await.insert(token, cant_tx);

        let request = ServerRequest::ConnectToPeer {
            token,
            username: username.to_string(),
            connection_type: ConnectionType::Peer,
        };
        let handle = match self.server.send(&request) {
            Ok(()) => {
                tokio::select! {
                    handle = self.registry.wait_for(token, self.config.indirect_timeout()) => handle,
                    _ = cant_rx => {
                        debug!(token, username, "server reports peer cannot connect");
                        None
                    }
                }
            }
            Err(e) => {
                warn!(token, username, error = %e, "could not reach server");
                None
            }
        };

        self.cant_connect.lock().await.remove(&token);
        handle
    }

    /// Dial a peer that asked the server to have us connect, and pierce its
    /// firewall. The server is told if we cannot.
    pub(crate) async fn answer_connect_request(
        &self,
        username: String,
        addr: SocketAddrV4,
        token: Token,
    ) {
        match self.pierce_firewall(&username, addr, token).await {
            Ok(handle) => {
                info!(token, username = %username, %addr, "pierced firewall for peer");
                let _ = self.events.send(ClientEvent::InboundPeerConnected {
                    token,
                    username: Some(username),
                    addr: handle.addr(),
                });
            }
            Err(e) => {
                warn!(token, username = %username, %addr, error = %e, "cannot connect to peer");
                if let Err(e) = self.server.send(&ServerRequest::CantConnectToPeer { token, username }) {
                    warn!(token, error = %e, "could not report failed connection");
                }
            }
        }
    }

    async fn pierce_firewall(
        &self,
        username: &str,
        addr: SocketAddrV4,
        token: Token,
    ) -> Result<PeerHandle> {
        let addr = dialable(addr).ok_or(Error::PeerUnreachable { token, attempts: 0 })?;
        let mut stream = dial(addr, self.config.peer_connect_timeout()).await?;
        stream
            .write_all(&PeerInitMessage::PierceFirewall { token }.to_frame()?)
            .await?;

        let session = PeerSession::new(
            stream,
            token,
            Some(username.to_string()),
            FrameAssembler::new(),
        )?;
        let handle = session.handle();
        if !self.registry.bind_if_absent(handle.clone()).await {
            return Err(Error::Protocol(format!("token {token} already bound")));
        }
        session.spawn(self.registry.clone(), self.events.clone());
        Ok(handle)
    }
}
