//! A TCP and UDP traffic relay.
//!
//! Six modes share one set of building blocks:
//!
//! - `trans` / `Utrans` forward a local port to a fixed remote endpoint.
//! - `listen` / `Ulisten` run on a public host and join connections (or
//!   datagram senders) arriving on two ports, in arrival order.
//! - `slave` / `Uslave` run behind NAT and dial both a local service and the
//!   public relay, exposing the service without any inbound port.
//!
//! Traffic is relayed byte for byte; nothing is parsed, encrypted or
//! multiplexed.

pub mod cli;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod logging;
pub mod net;
pub mod pump;
pub mod rendezvous;
pub mod session;
pub mod shutdown;
pub mod tcp;
pub mod udp;

#[cfg(test)]
mod testing;

pub use config::{Endpoint, ForwardConfig, Limits};
pub use error::{ForwardError, Result};
pub use forwarder::Forwarder;
pub use shutdown::{Shutdown, ShutdownTrigger};
