//! Token → live peer session map.
//!
//! Bound from the listener's accept tasks and from handshakes, read by the
//! dispatcher. All mutation goes through the methods here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, RwLock};
use tracing::debug;

use crate::Token;
use crate::handshake::{HandshakeRecord, HandshakeState};
use crate::session::PeerHandle;

#[derive(Debug, Default)]
pub struct PeerRegistry {
    sessions: RwLock<HashMap<Token, PeerHandle>>,
    bound: Notify,
    handshakes: RwLock<HashMap<Token, HandshakeRecord>>,
    epochs: AtomicU64,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handle` under its token unless a live session already holds it.
    ///
    /// A dead entry left behind by a closed session is replaced.
    pub async fn bind_if_absent(&self, handle: PeerHandle) -> bool {
        let token = handle.token();
        {
            let mut sessions = self.sessions.write().await;
            if sessions.get(&token).is_some_and(|h| h.is_open()) {
                return false;
            }
            sessions.insert(token, handle);
        }
        debug!(token, "token bound");
        self.bound.notify_waiters();
        true
    }

    /// The live session bound to `token`, if any.
    pub async fn lookup(&self, token: Token) -> Option<PeerHandle> {
        let sessions = self.sessions.read().await;
        sessions.get(&token).filter(|h| h.is_open()).cloned()
    }

    pub async fn is_live(&self, token: Token) -> bool {
        self.lookup(token).await.is_some()
    }

    /// Remove the entry for `token` if it still belongs to session `id`.
    ///
    /// A newer session bound under the same token is left alone.
    ///
    /// An `Established` handshake record for the token goes with it.
    pub async fn remove(&self, token: Token, id: u64) -> bool {
        {
            let mut sessions = self.sessions.write().await;
            if !sessions.get(&token).is_some_and(|h| h.id() == id) {
                return false;
            }
            sessions.remove(&token);
        }
        let mut handshakes = self.handshakes.write().await;
        if handshakes
            .get(&token)
            .is_some_and(|r| r.state == HandshakeState::Established)
        {
            handshakes.remove(&token);
        }
        debug!(token, "token released");
        true
    }

    /// Wait up to `timeout` for `token` to have a live session.
    ///
    /// Returns as soon as any path binds the token.
    pub async fn wait_for(&self, token: Token, timeout: Duration) -> Option<PeerHandle> {
        tokio::time::timeout(timeout, async {
            loop {
                // Register interest before checking so a bind in between
                // is not missed.
                let notified = self.bound.notified();
                if let Some(handle) = self.lookup(token).await {
                    return handle;
                }
                notified.await;
            }
        })
        .await
        .ok()
    }

    /// Start a fresh handshake record for `token`, dropping any earlier one.
    pub(crate) async fn begin_handshake(&self, token: Token) -> u64 {
        let epoch = self.epochs.fetch_add(1, Ordering::SeqCst) + 1;
        self.handshakes.write().await.remove(&token);
        epoch
    }

    pub(crate) async fn record_handshake(&self, token: Token, epoch: u64, state: HandshakeState) {
        self.handshakes
            .write()
            .await
            .insert(token, HandshakeRecord { epoch, state });
    }

    pub(crate) async fn handshake(&self, token: Token) -> Option<HandshakeRecord> {
        self.handshakes.read().await.get(&token).copied()
    }

    /// Close every bound session.
    pub async fn close_all(&self) {
        let sessions = self.sessions.read().await;
        for handle in sessions.values() {
            handle.close();
        }
    }
}
