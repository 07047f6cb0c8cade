use std::{net::UdpSocket, sync::Arc, time::Duration};

use smol::{Async, Timer};

use crate::{
    config::{Endpoint, Limits},
    error::Result,
    net,
    shutdown::Shutdown,
    udp::{self, DATAGRAM_BUFFER},
};

/// `Uslave` mode: the private half of a UDP rendezvous.
///
/// One socket is connected to the local service and one to the relay. An
/// empty datagram registers this host with the relay and is repeated every
/// retry delay to keep both the registration and any NAT mapping alive.
/// Setup failures are retried after the same delay, forever.
pub struct UdpSlaveForwarder {
    service: Endpoint,
    relay: Endpoint,
    limits: Limits,
}

impl UdpSlaveForwarder {
    pub fn new(service: Endpoint, relay: Endpoint, limits: Limits) -> Self {
        Self {
            service,
            relay,
            limits,
        }
    }

    #[tracing::instrument(name = "Uslave", skip_all, fields(service = %self.service, relay = %self.relay))]
    pub async fn run(self, shutdown: Shutdown) {
        loop {
            match shutdown.guard(self.connect()).await {
                None => break,
                Some(Ok((service, relay))) => {
                    self.relay(service, relay, &shutdown).await;
                    break;
                }
                Some(Err(e)) => {
                    tracing::error!("{}", e);
                    tracing::info!("retrying in {:?}", self.limits.retry_delay);
                    if shutdown.guard(Timer::after(self.limits.retry_delay)).await.is_none() {
                        break;
                    }
                }
            }
        }
        tracing::info!("stopped");
    }

    async fn connect(&self) -> Result<(Async<UdpSocket>, Async<UdpSocket>)> {
        let service = net::connect_udp(&self.service).await?;
        let relay = net::connect_udp(&self.relay).await?;
        tracing::info!("connected to {} and {}", self.service, self.relay);
        Ok((service, relay))
    }

    async fn relay(&self, service: Async<UdpSocket>, relay: Async<UdpSocket>, shutdown: &Shutdown) {
        let service = Arc::new(service);
        let relay = Arc::new(relay);

        let up = smol::spawn(forward(
            service.clone(),
            relay.clone(),
            format!("{} -> {}", self.service, self.relay),
        ));
        let down = smol::spawn(forward(
            relay.clone(),
            service,
            format!("{} -> {}", self.relay, self.service),
        ));
        let keepalive = smol::spawn(keepalive(relay, self.limits.retry_delay));

        shutdown.wait().await;
        up.cancel().await;
        down.cancel().await;
        keepalive.cancel().await;
    }
}

async fn forward(from: Arc<Async<UdpSocket>>, to: Arc<Async<UdpSocket>>, route: String) {
    let mut buf = vec![0u8; DATAGRAM_BUFFER];
    loop {
        let n = udp::recv(&from, &mut buf).await;
        if udp::send(&to, &buf[..n]).await {
            tracing::info!(bytes = n, "{}", route);
        }
    }
}

async fn keepalive(relay: Arc<Async<UdpSocket>>, every: Duration) {
    loop {
        if udp::send(&relay, &[]).await {
            tracing::debug!("registration sent");
        }
        Timer::after(every).await;
    }
}
