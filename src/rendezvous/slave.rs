use std::{net::TcpStream, sync::Arc, time::Instant};

use smol::{Async, Timer};

use crate::{
    config::{Endpoint, Limits},
    error::Result,
    net,
    session::{Session, SessionRegistry, Slot},
    shutdown::Shutdown,
};

/// `slave` mode: the private half of a rendezvous.
///
/// Runs behind NAT with no listening socket. It dials the local service and
/// then the public relay and joins the two. Each tunnel is handed to its
/// own session and the next rendezvous starts straight away, so tunnels
/// for several clients can be up at once. Attempts are paced at one per
/// retry delay whether they succeed or fail, and `--max-sessions` caps how
/// many tunnels may be open. Dial failures are expected while the relay is
/// unreachable and are retried forever.
pub struct SlaveForwarder {
    service: Endpoint,
    relay: Endpoint,
    limits: Limits,
    sessions: Arc<SessionRegistry>,
}

impl SlaveForwarder {
    pub fn new(service: Endpoint, relay: Endpoint, limits: Limits) -> Self {
        Self {
            service,
            relay,
            sessions: SessionRegistry::new(limits.max_sessions),
            limits,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    #[tracing::instrument(name = "slave", skip_all, fields(service = %self.service, relay = %self.relay))]
    pub async fn run(self, shutdown: Shutdown) {
        loop {
            let Some(slot) = shutdown.guard(self.sessions.reserve()).await else {
                break;
            };
            let started = Instant::now();
            let delay = match shutdown.guard(self.rendezvous(slot)).await {
                None => break,
                // The tunnel is up; only the remainder of the interval is left.
                Some(Ok(())) => self.limits.retry_delay.saturating_sub(started.elapsed()),
                Some(Err(e)) => {
                    tracing::error!("{}", e);
                    tracing::info!("retrying in {:?}", self.limits.retry_delay);
                    self.limits.retry_delay
                }
            };
            if shutdown.guard(Timer::after(delay)).await.is_none() {
                break;
            }
        }

        tracing::info!("stopped");
        self.sessions.drain(self.limits.drain_timeout).await;
    }

    /// Dials both ends and hands them to a new session.
    async fn rendezvous(&self, slot: Slot) -> Result<()> {
        let (service, relay) = self.connect_pair().await?;

        let id = slot.id;
        tracing::info!(session = id, "tunnel open, waiting for a client on the relay");
        let buffer_size = self.limits.buffer_size;
        self.sessions.spawn(slot, async move {
            Session::new(id, service, relay, buffer_size).run().await;
        });
        Ok(())
    }

    async fn connect_pair(&self) -> Result<(Async<TcpStream>, Async<TcpStream>)> {
        let timeout = self.limits.connect_timeout;

        tracing::info!("connecting to {}", self.service);
        let service = net::dial_tcp(&self.service, timeout).await?;
        tracing::info!("connected to {}", self.service);

        tracing::info!("connecting to {}", self.relay);
        let relay = net::dial_tcp(&self.relay, timeout).await?;
        tracing::info!("connected to {}", self.relay);

        Ok((service, relay))
    }
}
