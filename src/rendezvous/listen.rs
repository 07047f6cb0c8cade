use std::{
    io,
    net::{SocketAddr, TcpListener, TcpStream},
    sync::Arc,
};

use smol::{Async, Timer};

use super::slot::{RelayPairSlot, Side};
use crate::{
    config::{Endpoint, Limits},
    error::Result,
    net,
    session::{Session, SessionRegistry, Slot},
    shutdown::Shutdown,
    tcp::ACCEPT_BACKOFF,
};

/// `listen` mode: the public half of a rendezvous.
///
/// Two ports are opened. Connections are accepted strictly in turn, one on
/// port A then one on port B, and each such pair is joined into a session.
/// A second connection on A stays in the kernel backlog until the first
/// has been paired.
pub struct ListenForwarder {
    listeners: [Async<TcpListener>; 2],
    limits: Limits,
    sessions: Arc<SessionRegistry>,
}

impl ListenForwarder {
    pub async fn bind(a: &Endpoint, b: &Endpoint, limits: Limits) -> Result<Self> {
        let first = net::bind_tcp(a).await?;
        let second = net::bind_tcp(b).await?;
        Ok(Self {
            listeners: [first, second],
            sessions: SessionRegistry::new(limits.max_sessions),
            limits,
        })
    }

    pub fn local_addr(&self, side: Side) -> io::Result<SocketAddr> {
        self.listeners[side.index()].get_ref().local_addr()
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    #[tracing::instrument(name = "listen", skip_all)]
    pub async fn run(self, shutdown: Shutdown) {
        for side in [Side::A, Side::B] {
            match self.local_addr(side) {
                Ok(addr) => tracing::info!("port {} listening on {}", side, addr),
                Err(e) => tracing::warn!("port {} listening on unknown address: {}", side, e),
            }
        }

        let mut pending: RelayPairSlot<(Async<TcpStream>, SocketAddr)> = RelayPairSlot::new();
        let mut reserved: Option<Slot> = None;

        loop {
            if reserved.is_none() {
                let Some(slot) = shutdown.guard(self.sessions.reserve()).await else {
                    break;
                };
                reserved = Some(slot);
            }

            let side = pending.expected();
            let listener = &self.listeners[side.index()];
            tracing::info!("waiting for a connection on port {}", side);
            let Some(accepted) = shutdown.guard(listener.accept()).await else {
                break;
            };
            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!("accept on port {} failed: {}", side, e);
                    Timer::after(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            net::tune(&stream);
            tracing::info!("connection on port {} from {}", side, peer);

            let pair = match pending.offer(side, (stream, peer)) {
                Ok(Some(pair)) => pair,
                Ok(None) => continue,
                Err((_, peer)) => {
                    tracing::error!("connection from {} on port {} out of turn", peer, side);
                    continue;
                }
            };
            let slot = match reserved.take() {
                Some(slot) => slot,
                None => self.sessions.reserve().await,
            };

            let ((a, a_peer), (b, b_peer)) = pair;
            let id = slot.id;
            tracing::info!(session = id, "pairing {} with {}", a_peer, b_peer);
            let buffer_size = self.limits.buffer_size;
            self.sessions.spawn(slot, async move {
                Session::new(id, a, b, buffer_size).run().await;
            });
        }

        if let Some((_, peer)) = pending.clear() {
            tracing::info!("dropping unpaired connection from {}", peer);
        }
        tracing::info!("stopped accepting");
        self.sessions.drain(self.limits.drain_timeout).await;
    }
}
