use std::{
    io,
    net::{SocketAddr, UdpSocket},
    sync::{Arc, Mutex, PoisonError},
};

use smol::Async;

use super::slot::{RelayPairSlot, Side};
use crate::{
    config::Endpoint,
    error::Result,
    net,
    shutdown::Shutdown,
    udp::{self, DATAGRAM_BUFFER},
};

/// What to do with a datagram that arrived at the relay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Send it out of the other port to `to`.
    Relay { to: SocketAddr },
    /// The sender was recorded as the first half of a new pair.
    Registered,
    /// The sender completed a pair. `relay` says whether the datagram
    /// carries data for the partner.
    Paired {
        a: SocketAddr,
        b: SocketAddr,
        relay: bool,
    },
    /// An empty datagram from a known peer.
    Keepalive,
    /// The sender is registered but has no partner yet.
    Unpaired,
    /// A new sender on the port that is not next in turn.
    OutOfTurn,
}

/// Address bookkeeping for `Ulisten`.
///
/// New senders are recorded through a [`RelayPairSlot`], so registrations
/// alternate A, B, A, B. A completed pair becomes the active one and
/// replaces any previous pair. Traffic between the active peers is relayed
/// as is, except empty datagrams, which only keep the registration alive.
#[derive(Debug, Default)]
pub struct Pairing {
    pending: RelayPairSlot<SocketAddr>,
    active: Option<[SocketAddr; 2]>,
}

impl Pairing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<(SocketAddr, SocketAddr)> {
        self.active.map(|[a, b]| (a, b))
    }

    pub fn on_datagram(&mut self, side: Side, from: SocketAddr, len: usize) -> Verdict {
        // A waiting A is completed by the next sender on B, even one that
        // already belongs to the active pair.
        if side == Side::B && self.pending.waiting().is_some_and(|a| *a != from) {
            if let Ok(Some((a, b))) = self.pending.offer(Side::B, from) {
                self.active = Some([a, b]);
                return Verdict::Paired {
                    a,
                    b,
                    relay: len > 0,
                };
            }
        }

        if let Some(peers) = self.active {
            if peers[side.index()] == from {
                if len == 0 {
                    return Verdict::Keepalive;
                }
                return Verdict::Relay {
                    to: peers[side.other().index()],
                };
            }
        }

        if self.pending.waiting() == Some(&from) {
            return Verdict::Unpaired;
        }

        match self.pending.offer(side, from) {
            Ok(None) => Verdict::Registered,
            Ok(Some((a, b))) => {
                self.active = Some([a, b]);
                Verdict::Paired {
                    a,
                    b,
                    relay: len > 0,
                }
            }
            Err(_) => Verdict::OutOfTurn,
        }
    }
}

/// `Ulisten` mode: the public half of a UDP rendezvous.
pub struct UdpListenForwarder {
    sockets: [Arc<Async<UdpSocket>>; 2],
    pairing: Arc<Mutex<Pairing>>,
}

impl UdpListenForwarder {
    pub async fn bind(a: &Endpoint, b: &Endpoint) -> Result<Self> {
        let first = net::bind_udp(a).await?;
        let second = net::bind_udp(b).await?;
        Ok(Self {
            sockets: [Arc::new(first), Arc::new(second)],
            pairing: Arc::new(Mutex::new(Pairing::new())),
        })
    }

    pub fn local_addr(&self, side: Side) -> io::Result<SocketAddr> {
        self.sockets[side.index()].get_ref().local_addr()
    }

    #[tracing::instrument(name = "Ulisten", skip_all)]
    pub async fn run(self, shutdown: Shutdown) {
        for side in [Side::A, Side::B] {
            match self.local_addr(side) {
                Ok(addr) => tracing::info!("port {} bound on {}", side, addr),
                Err(e) => tracing::warn!("port {} bound on unknown address: {}", side, e),
            }
        }

        let a = smol::spawn(port_loop(Side::A, self.sockets.clone(), self.pairing.clone()));
        let b = smol::spawn(port_loop(Side::B, self.sockets.clone(), self.pairing.clone()));

        shutdown.wait().await;
        a.cancel().await;
        b.cancel().await;
        tracing::info!("stopped");
    }
}

async fn port_loop(side: Side, sockets: [Arc<Async<UdpSocket>>; 2], pairing: Arc<Mutex<Pairing>>) {
    let own = &sockets[side.index()];
    let other = &sockets[side.other().index()];
    let mut buf = vec![0u8; DATAGRAM_BUFFER];

    loop {
        let (n, from) = udp::recv_from(own, &mut buf).await;
        let verdict = pairing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .on_datagram(side, from, n);

        match verdict {
            Verdict::Relay { to } => {
                if udp::send_to(other, &buf[..n], to).await {
                    tracing::info!(bytes = n, "{} -> {}", from, to);
                }
            }
            Verdict::Registered => {
                tracing::info!("connection from {} on port {}, waiting for a partner", from, side);
            }
            Verdict::Paired { a, b, relay } => {
                tracing::info!("connection from {} on port {}, paired {} with {}", from, side, a, b);
                if relay && udp::send_to(other, &buf[..n], a).await {
                    tracing::info!(bytes = n, "{} -> {}", from, a);
                }
            }
            Verdict::Keepalive => tracing::trace!("keepalive from {}", from),
            Verdict::Unpaired => {
                tracing::debug!(bytes = n, "{} has no partner yet, dropped", from)
            }
            Verdict::OutOfTurn => {
                tracing::warn!("{} on port {} is out of turn, dropped", from, side)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([192, 0, 2, 1], port))
    }

    #[test]
    fn registers_then_pairs_in_turn() {
        let mut pairing = Pairing::new();
        assert_eq!(pairing.on_datagram(Side::A, addr(1), 0), Verdict::Registered);
        assert_eq!(pairing.on_datagram(Side::A, addr(1), 0), Verdict::Unpaired);
        assert_eq!(
            pairing.on_datagram(Side::B, addr(2), 5),
            Verdict::Paired {
                a: addr(1),
                b: addr(2),
                relay: true
            }
        );
        assert_eq!(pairing.active(), Some((addr(1), addr(2))));
    }

    #[test]
    fn b_before_a_is_out_of_turn() {
        let mut pairing = Pairing::new();
        assert_eq!(pairing.on_datagram(Side::B, addr(2), 3), Verdict::OutOfTurn);
        assert_eq!(pairing.on_datagram(Side::A, addr(1), 0), Verdict::Registered);
        assert_eq!(pairing.on_datagram(Side::A, addr(3), 0), Verdict::OutOfTurn);
    }

    #[test]
    fn active_peers_relay_to_each_other() {
        let mut pairing = Pairing::new();
        pairing.on_datagram(Side::A, addr(1), 0);
        pairing.on_datagram(Side::B, addr(2), 0);

        assert_eq!(pairing.on_datagram(Side::A, addr(1), 4), Verdict::Relay { to: addr(2) });
        assert_eq!(pairing.on_datagram(Side::B, addr(2), 4), Verdict::Relay { to: addr(1) });
        assert_eq!(pairing.on_datagram(Side::A, addr(1), 0), Verdict::Keepalive);
        // The same address on the wrong port is a newcomer, not a peer.
        assert_eq!(pairing.on_datagram(Side::B, addr(1), 4), Verdict::OutOfTurn);
    }

    #[test]
    fn a_new_pair_replaces_the_active_one() {
        let mut pairing = Pairing::new();
        pairing.on_datagram(Side::A, addr(1), 0);
        pairing.on_datagram(Side::B, addr(2), 0);

        // A restarted slave registers from a new address.
        assert_eq!(pairing.on_datagram(Side::A, addr(3), 0), Verdict::Registered);
        // Until B speaks again the old pair keeps working from A's side.
        assert_eq!(pairing.on_datagram(Side::A, addr(1), 1), Verdict::Relay { to: addr(2) });
        // The existing B client completes the new pair.
        assert_eq!(
            pairing.on_datagram(Side::B, addr(2), 7),
            Verdict::Paired {
                a: addr(3),
                b: addr(2),
                relay: true
            }
        );
        assert_eq!(pairing.on_datagram(Side::B, addr(2), 1), Verdict::Relay { to: addr(3) });
    }

    #[test]
    fn empty_completion_is_not_relayed() {
        let mut pairing = Pairing::new();
        pairing.on_datagram(Side::A, addr(1), 0);
        assert_eq!(
            pairing.on_datagram(Side::B, addr(2), 0),
            Verdict::Paired {
                a: addr(1),
                b: addr(2),
                relay: false
            }
        );
    }
}
