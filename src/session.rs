//! Connection plumbing shared by the server and peer sessions.
//!
//! Each session splits its socket: the read half is owned by one read loop
//! task, the write half by a writer task fed from an unbounded queue, so any
//! task may send while the loop is blocked in a read.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::Token;
use crate::event::ClientEvent;
use crate::frame::FrameAssembler;
use crate::peer::PeerMessage;
use crate::protocol::{MessageRead, MessageWrite, decode_frame};
use crate::registry::PeerRegistry;
use crate::server::{ServerRequest, ServerResponse};
use crate::{Error, Result};

static SESSION_ID: AtomicU64 = AtomicU64::new(1);

fn next_session_id() -> u64 {
    SESSION_ID.fetch_add(1, Ordering::SeqCst)
}

/// Drain a queue of encoded frames into `writer` until the queue closes or a
/// write fails.
fn spawn_writer<W>(mut writer: W, addr: SocketAddr) -> (mpsc::UnboundedSender<Bytes>, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    let handle = tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if let Err(e) = writer.write_all(&data).await {
                warn!(%addr, error = %e, "write failed");
                break;
            }
            if let Err(e) = writer.flush().await {
                warn!(%addr, error = %e, "flush failed");
                break;
            }
        }
    });
    (tx, handle)
}

/// Read frames until the connection closes, handing each decoded message to
/// `on_frame` in arrival order.
///
/// Decode errors that leave the stream intact (unparseable compressed data,
/// a bad enum value) are handed to `on_frame` and reading continues. Errors
/// that desynchronize the stream end the loop.
pub async fn read_loop<M, R, F>(
    reader: &mut R,
    assembler: &mut FrameAssembler,
    mut on_frame: F,
) -> Result<()>
where
    M: MessageRead,
    R: AsyncRead + Unpin,
    F: FnMut(Result<M>),
{
    while let Some(frame) = assembler.read_frame(reader).await? {
        match decode_frame::<M>(&frame) {
            Ok(msg) => on_frame(Ok(msg)),
            Err(e) if e.is_connection_fatal() => return Err(e),
            Err(e) => on_frame(Err(e)),
        }
    }
    Ok(())
}

/// The single connection to the central server.
#[derive(Debug)]
pub struct ServerSession {
    tx: mpsc::UnboundedSender<Bytes>,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl ServerSession {
    /// Connect to the server. Decoded messages are pushed into `inbound`;
    /// the channel closes when the connection does, after the session has
    /// been marked closed.
    pub async fn connect(
        host: &str,
        port: u16,
        inbound: mpsc::UnboundedSender<ServerResponse>,
    ) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        Self::spawn(stream, inbound)
    }

    pub fn spawn(stream: TcpStream, inbound: mpsc::UnboundedSender<ServerResponse>) -> Result<Self> {
        stream.set_nodelay(true)?;
        let addr = stream.peer_addr()?;
        let (mut read_half, write_half) = stream.into_split();
        let (tx, writer) = spawn_writer(write_half, addr);
        let writer_abort = writer.abort_handle();
        let closed = Arc::new(AtomicBool::new(false));
        let reader_closed = closed.clone();

        let reader = tokio::spawn(async move {
            let mut assembler = FrameAssembler::new();
            let result = read_loop::<ServerResponse, _, _>(
                &mut read_half,
                &mut assembler,
                |decoded| match decoded {
                    Ok(msg) => {
                        let _ = inbound.send(msg);
                    }
                    Err(e) => warn!(%addr, error = %e, "dropping undecodable server message"),
                },
            )
            .await;
            match result {
                Ok(()) => info!(%addr, "server closed the connection"),
                Err(e) => warn!(%addr, error = %e, "server connection failed"),
            }

            // Sends must fail before anyone hears about the disconnect.
            reader_closed.store(true, Ordering::Release);
            writer_abort.abort();
            drop(inbound);
        });

        info!(%addr, "connected to server");
        Ok(ServerSession {
            tx,
            closed,
            reader,
            writer,
        })
    }

    pub fn send(&self, msg: &ServerRequest) -> Result<()> {
        self.send_frame(msg.to_frame()?)
    }

    pub fn send_frame(&self, frame: Bytes) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ConnectionClosed);
        }
        self.tx.send(frame).map_err(|_| Error::ConnectionClosed)
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.reader.abort();
        self.writer.abort();
    }
}

/// Cloneable send side of a live peer session.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    id: u64,
    token: Token,
    username: Option<String>,
    addr: SocketAddr,
    tx: mpsc::UnboundedSender<Bytes>,
    closed: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl PeerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    pub fn send(&self, msg: &PeerMessage) -> Result<()> {
        self.send_frame(msg.to_frame()?)
    }

    pub fn send_frame(&self, frame: Bytes) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ConnectionClosed);
        }
        self.tx.send(frame).map_err(|_| Error::ConnectionClosed)
    }

    /// Ask the session to stop. Its read loop ends promptly and the registry
    /// entry is released.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.shutdown.notify_one();
    }
}

/// One peer connection, inbound or outbound, not yet reading.
///
/// Build it, publish its [`PeerHandle`], then [`spawn`](Self::spawn) the read
/// loop. Dropping an unspawned session closes the socket.
#[derive(Debug)]
pub struct PeerSession {
    handle: PeerHandle,
    reader: OwnedReadHalf,
    assembler: FrameAssembler,
    writer: JoinHandle<()>,
}

impl PeerSession {
    /// Wrap an established socket. `assembler` carries any bytes already read
    /// past the init frame.
    pub fn new(
        stream: TcpStream,
        token: Token,
        username: Option<String>,
        assembler: FrameAssembler,
    ) -> Result<Self> {
        stream.set_nodelay(true)?;
        let addr = stream.peer_addr()?;
        let (reader, write_half) = stream.into_split();
        let (tx, writer) = spawn_writer(write_half, addr);
        let handle = PeerHandle {
            id: next_session_id(),
            token,
            username,
            addr,
            tx,
            closed: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
        };
        Ok(PeerSession {
            handle,
            reader,
            assembler,
            writer,
        })
    }

    pub fn handle(&self) -> PeerHandle {
        self.handle.clone()
    }

    /// Run the read loop. On exit the session's registry entry is removed
    /// and `PeerDisconnected` is emitted.
    pub fn spawn(
        self,
        registry: Arc<PeerRegistry>,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> JoinHandle<()> {
        let PeerSession {
            handle,
            mut reader,
            mut assembler,
            writer,
        } = self;

        tokio::spawn(async move {
            let token = handle.token;
            let addr = handle.addr;
            debug!(token, %addr, "peer session started");

            let loop_events = events.clone();
            let result = tokio::select! {
                res = read_loop::<PeerMessage, _, _>(&mut reader, &mut assembler, |decoded| {
                    let event = match decoded {
                        Ok(message) => ClientEvent::Peer { token, message },
                        Err(e) => {
                            warn!(token, %addr, error = %e, "undecodable peer message");
                            ClientEvent::PeerDecodeFailed { token, error: e.to_string() }
                        }
                    };
                    let _ = loop_events.send(event);
                }) => res,
                _ = handle.shutdown.notified() => Ok(()),
            };

            handle.closed.store(true, Ordering::Release);
            writer.abort();
            registry.remove(token, handle.id).await;

            let error = match result {
                Ok(()) => {
                    debug!(token, %addr, "peer session closed");
                    None
                }
                Err(e) => {
                    warn!(token, %addr, error = %e, "peer session failed");
                    Some(e.to_string())
                }
            };
            let _ = events.send(ClientEvent::PeerDisconnected { token, error });
        })
    }
}
