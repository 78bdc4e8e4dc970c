//! Inbound peer connections.
//!
//! Every socket accepted on the listen port opens with one peer-init frame
//! that says who is calling and why. The listener reads that frame, then
//! hands the socket (with anything read past the frame) to a peer session.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::Token;
use crate::constants::ConnectionType;
use crate::event::ClientEvent;
use crate::frame::FrameAssembler;
use crate::peer_init::PeerInitMessage;
use crate::protocol::decode_frame;
use crate::registry::PeerRegistry;
use crate::session::PeerSession;
use crate::{Error, Result};

/// What an inbound socket announced in its first frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundKind {
    /// Answer to our indirect connection request.
    PierceFirewall { token: Token },
    /// A peer dialing us directly for a P connection.
    Peer { username: String, token: Token },
    /// A file or distributed connection; not handled here.
    Unsupported {
        username: String,
        connection_type: ConnectionType,
        token: Token,
    },
}

/// Classify the first frame of an inbound connection.
pub fn classify(frame: &Bytes) -> Result<InboundKind> {
    match decode_frame::<PeerInitMessage>(frame)? {
        PeerInitMessage::PierceFirewall { token } => Ok(InboundKind::PierceFirewall { token }),
        PeerInitMessage::PeerInit {
            username,
            connection_type: ConnectionType::Peer,
            token,
        } => Ok(InboundKind::Peer { username, token }),
        PeerInitMessage::PeerInit {
            username,
            connection_type,
            token,
        } => Ok(InboundKind::Unsupported {
            username,
            connection_type,
            token,
        }),
        PeerInitMessage::Unknown { code, .. } => Err(Error::UnknownMessageCode(code)),
    }
}

/// The accept loop on our listen port.
#[derive(Debug)]
pub struct ListenSession {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ListenSession {
    pub async fn bind(
        host: &str,
        port: u16,
        registry: Arc<PeerRegistry>,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Result<Self> {
        let listener = TcpListener::bind((host, port)).await?;
        Self::spawn(listener, registry, events)
    }

    pub fn spawn(
        listener: TcpListener,
        registry: Arc<PeerRegistry>,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Result<Self> {
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "listening for peers");

        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        debug!(%addr, "inbound connection");
                        let registry = registry.clone();
                        let events = events.clone();
                        tokio::spawn(async move {
                            if let Err(e) = accept_peer(stream, addr, registry, events).await {
                                warn!(%addr, error = %e, "inbound connection dropped");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                    }
                }
            }
        });

        Ok(ListenSession { local_addr, task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn close(&self) {
        self.task.abort();
    }
}

async fn accept_peer(
    mut stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<PeerRegistry>,
    events: mpsc::UnboundedSender<ClientEvent>,
) -> Result<()> {
    let mut assembler = FrameAssembler::new();
    let Some(frame) = assembler.read_frame(&mut stream).await? else {
        debug!(%addr, "closed before sending an init frame");
        return Ok(());
    };

    match classify(&frame)? {
        InboundKind::PierceFirewall { token } => {
            let session = PeerSession::new(stream, token, None, assembler)?;
            if !registry.bind_if_absent(session.handle()).await {
                warn!(%addr, token, "pierce firewall for a token already in use");
                return Ok(());
            }
            info!(%addr, token, "peer pierced firewall");
            let _ = events.send(ClientEvent::InboundPeerConnected {
                token,
                username: None,
                addr,
            });
            session.spawn(registry, events);
        }
        InboundKind::Peer { username, token } => {
            let session = PeerSession::new(stream, token, Some(username.clone()), assembler)?;
            if registry.bind_if_absent(session.handle()).await {
                info!(%addr, token, username = %username, "peer connected");
            } else {
                // Keep serving it, but the existing session keeps the token.
                warn!(%addr, token, username = %username, "token already bound; session left unbound");
            }
            let _ = events.send(ClientEvent::InboundPeerConnected {
                token,
                username: Some(username),
                addr,
            });
            session.spawn(registry, events);
        }
        InboundKind::Unsupported {
            username,
            connection_type,
            token,
        } => {
            debug!(
                %addr,
                token,
                username = %username,
                connection_type = connection_type.as_str(),
                "ignoring unsupported connection type"
            );
        }
    }
    Ok(())
}
