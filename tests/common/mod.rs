//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::{
    future::Future,
    net::{SocketAddr, TcpListener, TcpStream, UdpSocket},
    time::Duration,
};

use forward::{
    cli::Mode, shutdown, Endpoint, ForwardConfig, Forwarder, Limits, Shutdown, ShutdownTrigger,
};
use smol::{
    future,
    io::{AsyncReadExt, AsyncWriteExt},
    Async, Task, Timer,
};

/// Upper bound on any single wait.
pub const WAIT: Duration = Duration::from_secs(5);

/// Runs `fut`, panicking if it takes longer than [`WAIT`].
pub async fn within<F: Future>(fut: F) -> F::Output {
    future::or(async { Some(fut.await) }, async {
        Timer::after(WAIT).await;
        None
    })
    .await
    .expect("timed out")
}

/// Polls `check` until it holds or [`WAIT`] elapses.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    within(async {
        while !check() {
            Timer::after(Duration::from_millis(10)).await;
        }
    })
    .await
}

pub fn loopback() -> Endpoint {
    Endpoint::new("127.0.0.1", 0)
}

/// Limits with short timers, so retry paths finish quickly.
pub fn fast_limits() -> Limits {
    Limits {
        connect_timeout: Duration::from_secs(2),
        retry_delay: Duration::from_millis(100),
        drain_timeout: Duration::from_millis(200),
        ..Limits::default()
    }
}

/// A loopback port that nothing is listening on.
pub fn closed_port() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

/// A running forwarder. Dropping it fires shutdown.
pub struct Running {
    pub addrs: Vec<SocketAddr>,
    pub trigger: ShutdownTrigger,
    pub task: Task<()>,
}

impl Running {
    /// Fires shutdown and waits for the forwarder to finish.
    pub async fn stop(self) {
        self.trigger.fire();
        within(self.task).await;
    }
}

pub async fn start(mode: Mode, local: Endpoint, remote: Endpoint) -> Running {
    start_with(ForwardConfig::new(mode, local, remote).with_limits(fast_limits())).await
}

pub async fn start_with(config: ForwardConfig) -> Running {
    let forwarder = Forwarder::bind(config).await.expect("forwarder binds");
    let addrs = forwarder.local_addrs();
    let (trigger, shutdown) = shutdown::channel();
    let task = smol::spawn(forwarder.run(shutdown));
    Running {
        addrs,
        trigger,
        task,
    }
}

pub fn shutdown_pair() -> (ShutdownTrigger, Shutdown) {
    shutdown::channel()
}

/// A TCP echo server. Returns its address and the task serving it.
pub fn echo_server() -> (SocketAddr, Task<()>) {
    let listener = Async::<TcpListener>::bind(([127, 0, 0, 1], 0)).unwrap();
    let addr = listener.get_ref().local_addr().unwrap();
    let task = smol::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                continue;
            };
            smol::spawn(async move {
                let _ = smol::io::copy(&stream, &mut &stream).await;
            })
            .detach();
        }
    });
    (addr, task)
}

pub async fn connect(addr: SocketAddr) -> Async<TcpStream> {
    within(Async::<TcpStream>::connect(addr)).await.unwrap()
}

/// Writes `data` and reads back exactly as many bytes.
pub async fn round_trip(stream: &mut Async<TcpStream>, data: &[u8]) -> Vec<u8> {
    stream.write_all(data).await.unwrap();
    let mut buf = vec![0u8; data.len()];
    within(stream.read_exact(&mut buf)).await.unwrap();
    buf
}

pub async fn read_exactly(stream: &mut Async<TcpStream>, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    within(stream.read_exact(&mut buf)).await.unwrap();
    buf
}

pub fn udp_socket() -> Async<UdpSocket> {
    Async::<UdpSocket>::bind(([127, 0, 0, 1], 0)).unwrap()
}

pub async fn recv_datagram(socket: &Async<UdpSocket>) -> (Vec<u8>, SocketAddr) {
    let mut buf = vec![0u8; 65_535];
    let (n, from) = within(socket.recv_from(&mut buf)).await.unwrap();
    buf.truncate(n);
    (buf, from)
}
