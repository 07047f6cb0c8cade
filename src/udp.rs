//! `Utrans` mode and the datagram helpers shared with the UDP rendezvous
//! modes.
//!
//! UDP has no connections, so the forwarder remembers the last sender it
//! heard from and routes every reply there. A second client talking
//! through the same port takes over the slot; replies for the first one
//! then go to the second.

use std::{
    io,
    net::{SocketAddr, UdpSocket},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use smol::{Async, Timer};

use crate::{
    config::Endpoint,
    error::Result,
    net,
    shutdown::Shutdown,
};

/// Large enough for any UDP payload, so datagrams are never truncated.
pub const DATAGRAM_BUFFER: usize = 65_535;

/// Pause after a non-transient socket error.
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// The most recently seen client address.
#[derive(Debug, Default)]
pub struct PeerSlot {
    peer: Mutex<Option<SocketAddr>>,
}

impl PeerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `addr` and returns the address it replaced.
    pub fn record(&self, addr: SocketAddr) -> Option<SocketAddr> {
        self.peer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(addr)
    }

    pub fn current(&self) -> Option<SocketAddr> {
        *self.peer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct UdpForwarder {
    inbound: Arc<Async<UdpSocket>>,
    upstream: Arc<Async<UdpSocket>>,
    target: Endpoint,
    peer: Arc<PeerSlot>,
}

impl UdpForwarder {
    /// Binds the local port and connects the upstream socket. The target
    /// is resolved once, here.
    pub async fn bind(local: &Endpoint, target: Endpoint) -> Result<Self> {
        let inbound = net::bind_udp(local).await?;
        let upstream = net::connect_udp(&target).await?;
        Ok(Self {
            inbound: Arc::new(inbound),
            upstream: Arc::new(upstream),
            target,
            peer: Arc::new(PeerSlot::new()),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inbound.get_ref().local_addr()
    }

    /// Relays datagrams in both directions until shutdown.
    #[tracing::instrument(name = "Utrans", skip_all, fields(target = %self.target))]
    pub async fn run(self, shutdown: Shutdown) {
        match self.local_addr() {
            Ok(addr) => tracing::info!("Bound on {}", addr),
            Err(e) => tracing::warn!("Bound on unknown address: {}", e),
        }

        let outbound = smol::spawn(outbound(
            self.inbound.clone(),
            self.upstream.clone(),
            self.peer.clone(),
            self.target.clone(),
        ));
        let replies = smol::spawn(replies(self.inbound, self.upstream, self.peer));

        shutdown.wait().await;
        outbound.cancel().await;
        replies.cancel().await;
        tracing::info!("stopped");
    }
}

/// Client to upstream: remember the sender, then pass the datagram on.
async fn outbound(
    inbound: Arc<Async<UdpSocket>>,
    upstream: Arc<Async<UdpSocket>>,
    peer: Arc<PeerSlot>,
    target: Endpoint,
) {
    let mut buf = vec![0u8; DATAGRAM_BUFFER];
    loop {
        let (n, from) = recv_from(&inbound, &mut buf).await;
        match peer.record(from) {
            None => tracing::info!("connection from {}, relaying to {}", from, target),
            Some(previous) if previous != from => {
                tracing::info!(%previous, "peer changed to {}", from)
            }
            Some(_) => {}
        }
        if send(&upstream, &buf[..n]).await {
            tracing::info!(bytes = n, "{} -> {}", from, target);
        }
    }
}

/// Upstream to client: deliver to whoever spoke last.
async fn replies(
    inbound: Arc<Async<UdpSocket>>,
    upstream: Arc<Async<UdpSocket>>,
    peer: Arc<PeerSlot>,
) {
    let mut buf = vec![0u8; DATAGRAM_BUFFER];
    loop {
        let n = recv(&upstream, &mut buf).await;
        let Some(to) = peer.current() else {
            tracing::debug!(bytes = n, "reply before any client, dropped");
            continue;
        };
        if send_to(&inbound, &buf[..n], to).await {
            tracing::info!(bytes = n, "upstream -> {}", to);
        }
    }
}

/// Receives the next datagram. Per-datagram failures are logged and
/// skipped; this only returns with data.
pub(crate) async fn recv_from(socket: &Async<UdpSocket>, buf: &mut [u8]) -> (usize, SocketAddr) {
    loop {
        match socket.recv_from(buf).await {
            Ok(received) => return received,
            Err(e) => absorb("receive", &e).await,
        }
    }
}

/// [`recv_from`] for a connected socket.
pub(crate) async fn recv(socket: &Async<UdpSocket>, buf: &mut [u8]) -> usize {
    loop {
        match socket.recv(buf).await {
            Ok(n) => return n,
            Err(e) => absorb("receive", &e).await,
        }
    }
}

/// Sends a datagram, reporting whether it went out. Failures drop the
/// datagram.
pub(crate) async fn send_to(socket: &Async<UdpSocket>, data: &[u8], to: SocketAddr) -> bool {
    match socket.send_to(data, to).await {
        Ok(_) => true,
        Err(e) => {
            tracing::error!(%to, "send failed, datagram dropped: {}", e);
            false
        }
    }
}

/// [`send_to`] for a connected socket.
pub(crate) async fn send(socket: &Async<UdpSocket>, data: &[u8]) -> bool {
    match socket.send(data).await {
        Ok(_) => true,
        Err(e) if net::is_transient_udp_error(&e) => {
            tracing::debug!("send refused, datagram dropped: {}", e);
            false
        }
        Err(e) => {
            tracing::error!("send failed, datagram dropped: {}", e);
            false
        }
    }
}

async fn absorb(op: &str, e: &io::Error) {
    if net::is_transient_udp_error(e) {
        tracing::debug!("{} interrupted: {}", op, e);
    } else {
        tracing::error!("{} failed: {}", op, e);
        Timer::after(ERROR_BACKOFF).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_sender_wins() {
        let slot = PeerSlot::new();
        let first: SocketAddr = "127.0.0.1:1000".parse().unwrap();
        let second: SocketAddr = "127.0.0.1:2000".parse().unwrap();

        assert_eq!(slot.current(), None);
        assert_eq!(slot.record(first), None);
        assert_eq!(slot.record(first), Some(first));
        assert_eq!(slot.record(second), Some(first));
        assert_eq!(slot.current(), Some(second));
    }

    #[test]
    fn concurrent_writers_leave_one_of_their_values() {
        let slot = Arc::new(PeerSlot::new());
        let writers: Vec<_> = (1..=8u16)
            .map(|port| {
                let slot = slot.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        slot.record(SocketAddr::from(([127, 0, 0, 1], port)));
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        let port = slot.current().unwrap().port();
        assert!((1..=8).contains(&port));
    }
}
