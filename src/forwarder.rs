//! Mode dispatch.

use std::net::SocketAddr;

use crate::{
    cli::Mode,
    config::ForwardConfig,
    error::Result,
    rendezvous::{ListenForwarder, Side, SlaveForwarder, UdpListenForwarder, UdpSlaveForwarder},
    shutdown::Shutdown,
    tcp::TcpForwarder,
    udp::UdpForwarder,
};

/// A forwarder for one of the six modes, with its sockets already bound.
pub enum Forwarder {
    Tcp(TcpForwarder),
    Udp(UdpForwarder),
    Listen(ListenForwarder),
    Slave(SlaveForwarder),
    UdpListen(UdpListenForwarder),
    UdpSlave(UdpSlaveForwarder),
}

impl Forwarder {
    /// Builds the forwarder `config.mode` calls for and binds its ports.
    ///
    /// This is the only step that can fail: once bound, [`run`](Self::run)
    /// handles every error itself.
    pub async fn bind(config: ForwardConfig) -> Result<Self> {
        let ForwardConfig {
            mode,
            local,
            remote,
            limits,
        } = config;
        tracing::debug!(?mode, %local, %remote, "binding");

        Ok(match mode {
            Mode::Trans => Forwarder::Tcp(TcpForwarder::bind(&local, remote, limits).await?),
            Mode::UdpTrans => Forwarder::Udp(UdpForwarder::bind(&local, remote).await?),
            Mode::Listen => Forwarder::Listen(ListenForwarder::bind(&local, &remote, limits).await?),
            Mode::UdpListen => Forwarder::UdpListen(UdpListenForwarder::bind(&local, &remote).await?),
            Mode::Slave => Forwarder::Slave(SlaveForwarder::new(local, remote, limits)),
            Mode::UdpSlave => Forwarder::UdpSlave(UdpSlaveForwarder::new(local, remote, limits)),
        })
    }

    pub fn mode(&self) -> Mode {
        match self {
            Forwarder::Tcp(_) => Mode::Trans,
            Forwarder::Udp(_) => Mode::UdpTrans,
            Forwarder::Listen(_) => Mode::Listen,
            Forwarder::Slave(_) => Mode::Slave,
            Forwarder::UdpListen(_) => Mode::UdpListen,
            Forwarder::UdpSlave(_) => Mode::UdpSlave,
        }
    }

    /// Addresses the forwarder is bound to, in A, B order for the listen
    /// modes. Slaves bind nothing.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        let addrs = match self {
            Forwarder::Tcp(f) => vec![f.local_addr()],
            Forwarder::Udp(f) => vec![f.local_addr()],
            Forwarder::Listen(f) => vec![f.local_addr(Side::A), f.local_addr(Side::B)],
            Forwarder::UdpListen(f) => vec![f.local_addr(Side::A), f.local_addr(Side::B)],
            Forwarder::Slave(_) | Forwarder::UdpSlave(_) => Vec::new(),
        };
        addrs.into_iter().filter_map(|addr| addr.ok()).collect()
    }

    /// Runs until `shutdown` fires.
    pub async fn run(self, shutdown: Shutdown) {
        match self {
            Forwarder::Tcp(f) => f.run(shutdown).await,
            Forwarder::Udp(f) => f.run(shutdown).await,
            Forwarder::Listen(f) => f.run(shutdown).await,
            Forwarder::Slave(f) => f.run(shutdown).await,
            Forwarder::UdpListen(f) => f.run(shutdown).await,
            Forwarder::UdpSlave(f) => f.run(shutdown).await,
        }
    }
}
