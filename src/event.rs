//! Events surfaced to the caller of [`Client`](crate::client::Client).

use std::net::SocketAddr;

use crate::Token;
use crate::handshake::HandshakeState;
use crate::peer::PeerMessage;
use crate::server::ServerResponse;

/// Everything the client observes, in per-connection arrival order.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A message decoded from the server connection.
    Server(ServerResponse),

    /// The server connection closed.
    ServerDisconnected,

    /// A message decoded from a peer connection.
    Peer { token: Token, message: PeerMessage },

    /// A single peer message could not be decoded; the connection stays up.
    PeerDecodeFailed { token: Token, error: String },

    /// A session the remote peer initiated, either by dialing our listener
    /// or by asking the server to have us dial it.
    InboundPeerConnected {
        token: Token,
        username: Option<String>,
        addr: SocketAddr,
    },

    /// A peer session ended. `error` is set when it ended on a fault.
    PeerDisconnected { token: Token, error: Option<String> },

    /// A handshake moved to a new state.
    Handshake {
        token: Token,
        username: String,
        state: HandshakeState,
    },
}
