//! Rendezvous forwarding for hosts that cannot accept connections.
//!
//! A publicly reachable relay runs `listen` (or `Ulisten`) on two ports.
//! The host behind NAT runs `slave` (or `Uslave`), which dials both its
//! local service and the relay's first port. A client then reaches the
//! service through the relay's second port. Both private ends only ever
//! make outbound connections.

mod listen;
mod slave;
pub mod slot;
mod udp_listen;
mod udp_slave;

pub use listen::ListenForwarder;
pub use slave::SlaveForwarder;
pub use slot::{RelayPairSlot, Side};
pub use udp_listen::{Pairing, UdpListenForwarder, Verdict};
pub use udp_slave::UdpSlaveForwarder;
