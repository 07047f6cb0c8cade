//! `trans` mode: a local TCP port forwarded to a fixed upstream.

use std::{
    io,
    net::{SocketAddr, TcpListener},
    sync::Arc,
    time::Duration,
};

use smol::{Async, Timer};

use crate::{
    config::{Endpoint, Limits},
    error::Result,
    net,
    session::{Session, SessionRegistry},
    shutdown::Shutdown,
};

/// Pause after a failed accept, so a persistent error such as running out
/// of file descriptors does not spin the loop.
pub(crate) const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct TcpForwarder {
    listener: Async<TcpListener>,
    target: Endpoint,
    limits: Limits,
    sessions: Arc<SessionRegistry>,
}

impl TcpForwarder {
    /// Binds the local port. Failing to bind is fatal for the forwarder.
    pub async fn bind(local: &Endpoint, target: Endpoint, limits: Limits) -> Result<Self> {
        let listener = net::bind_tcp(local).await?;
        Ok(Self {
            listener,
            target,
            sessions: SessionRegistry::new(limits.max_sessions),
            limits,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.get_ref().local_addr()
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Accepts clients until shutdown, pairing each with a fresh upstream
    /// connection.
    ///
    /// The upstream dial happens inside the session task, so a slow or
    /// failing upstream never holds up the next accept.
    #[tracing::instrument(name = "trans", skip_all, fields(target = %self.target))]
    pub async fn run(self, shutdown: Shutdown) {
        match self.local_addr() {
            Ok(addr) => tracing::info!("Listening on {}", addr),
            Err(e) => tracing::warn!("Listening on unknown address: {}", e),
        }

        loop {
            let Some(slot) = shutdown.guard(self.sessions.reserve()).await else {
                break;
            };
            let Some(accepted) = shutdown.guard(self.listener.accept()).await else {
                break;
            };
            let (client, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!("accept failed: {}", e);
                    Timer::after(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            net::tune(&client);

            let id = slot.id;
            tracing::info!(session = id, "connection from {}, connecting to {}", peer, self.target);

            let target = self.target.clone();
            let timeout = self.limits.connect_timeout;
            let buffer_size = self.limits.buffer_size;
            self.sessions.spawn(slot, async move {
                match net::dial_tcp(&target, timeout).await {
                    Ok(upstream) => {
                        tracing::info!(session = id, "connected to {}, relaying", target);
                        Session::new(id, client, upstream, buffer_size).run().await;
                    }
                    Err(e) => {
                        // Dropping the client closes it.
                        tracing::error!(session = id, %peer, "{}", e);
                    }
                }
            });
        }

        tracing::info!("stopped accepting");
        self.sessions.drain(self.limits.drain_timeout).await;
    }
}
