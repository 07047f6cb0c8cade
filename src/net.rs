//! Socket construction shared by the forwarders.

use std::{
    io,
    net::{SocketAddr, TcpListener, TcpStream, UdpSocket},
    time::Duration,
};

use smol::{future, Async, Timer};
use socket2::{Domain, Protocol, Socket, Type};

use crate::{
    config::Endpoint,
    error::{ForwardError, Result},
};

/// Pending connections the kernel queues per listener.
const LISTEN_BACKLOG: i32 = 1024;

/// Binds a TCP listener with address reuse enabled, so a restarted relay
/// does not trip over sockets lingering in TIME_WAIT.
pub async fn bind_tcp(endpoint: &Endpoint) -> Result<Async<TcpListener>> {
    let addr = endpoint.resolve_first().await?;
    let bind = || -> io::Result<Async<TcpListener>> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(LISTEN_BACKLOG)?;
        Async::new(TcpListener::from(socket))
    };
    bind().map_err(|source| ForwardError::Bind { addr, source })
}

/// Binds a UDP socket with address reuse enabled.
pub async fn bind_udp(endpoint: &Endpoint) -> Result<Async<UdpSocket>> {
    let addr = endpoint.resolve_first().await?;
    bind_udp_addr(addr).map_err(|source| ForwardError::Bind { addr, source })
}

fn bind_udp_addr(addr: SocketAddr) -> io::Result<Async<UdpSocket>> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    Async::new(UdpSocket::from(socket))
}

/// Opens a TCP connection to `endpoint`, trying each resolved address in
/// turn. The whole attempt, resolution included, is bounded by `timeout`.
pub async fn dial_tcp(endpoint: &Endpoint, timeout: Duration) -> Result<Async<TcpStream>> {
    let expire = async {
        Timer::after(timeout).await;
        Err(ForwardError::Timeout {
            endpoint: endpoint.clone(),
        })
    };
    future::or(connect_any(endpoint), expire).await
}

async fn connect_any(endpoint: &Endpoint) -> Result<Async<TcpStream>> {
    let mut last_err = None;
    for addr in endpoint.resolve().await? {
        match Async::<TcpStream>::connect(addr).await {
            Ok(stream) => {
                tune(&stream);
                return Ok(stream);
            }
            Err(e) => {
                tracing::debug!(%endpoint, %addr, "connect attempt failed: {}", e);
                last_err = Some(e);
            }
        }
    }
    Err(ForwardError::Connect {
        endpoint: endpoint.clone(),
        source: last_err.unwrap_or_else(|| io::ErrorKind::AddrNotAvailable.into()),
    })
}

/// Creates a UDP socket bound to an ephemeral port and connected to
/// `endpoint`, so that only datagrams from that endpoint are received.
pub async fn connect_udp(endpoint: &Endpoint) -> Result<Async<UdpSocket>> {
    let target = endpoint.resolve_first().await?;
    let local: SocketAddr = match target {
        SocketAddr::V4(_) => (std::net::Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (std::net::Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = Async::<UdpSocket>::bind(local).map_err(|source| ForwardError::Bind {
        addr: local,
        source,
    })?;
    socket
        .get_ref()
        .connect(target)
        .map_err(|source| ForwardError::Connect {
            endpoint: endpoint.clone(),
            source,
        })?;
    Ok(socket)
}

/// Disables Nagle's algorithm on relayed streams; the relay writes exactly
/// what it read and should not add latency on top.
pub fn tune(stream: &Async<TcpStream>) {
    if let Err(e) = stream.get_ref().set_nodelay(true) {
        tracing::debug!("failed to set TCP_NODELAY: {}", e);
    }
}

/// Whether a UDP error only concerns a single datagram, typically an ICMP
/// port-unreachable reflected back from an earlier send.
pub fn is_transient_udp_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use smol::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    fn loopback() -> Endpoint {
        Endpoint::new("127.0.0.1", 0)
    }

    #[test]
    fn binds_and_dials() {
        smol::block_on(async {
            let listener = bind_tcp(&loopback()).await.unwrap();
            let addr = listener.get_ref().local_addr().unwrap();

            let endpoint = Endpoint::from(addr);
            let dial = dial_tcp(&endpoint, Duration::from_secs(5));
            let (client, accepted) = future::zip(dial, listener.accept()).await;
            let mut client = client.unwrap();
            let (mut server, _) = accepted.unwrap();

            client.write_all(b"hi").await.unwrap();
            let mut buf = [0u8; 2];
            server.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"hi");
        });
    }

    #[test]
    fn occupied_port_is_a_bind_error() {
        smol::block_on(async {
            let first = bind_tcp(&loopback()).await.unwrap();
            let taken = Endpoint::from(first.get_ref().local_addr().unwrap());
            match bind_tcp(&taken).await {
                Err(ForwardError::Bind { addr, .. }) => assert_eq!(addr.port(), taken.port),
                other => panic!("expected bind error, got {:?}", other.map(|_| ())),
            }
        });
    }

    #[test]
    fn refused_dial_is_reported() {
        smol::block_on(async {
            let closed = {
                let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
                listener.local_addr().unwrap()
            };
            let err = dial_tcp(&Endpoint::from(closed), Duration::from_secs(5))
                .await
                .unwrap_err();
            assert!(matches!(err, ForwardError::Connect { .. }), "{err}");
        });
    }

    #[test]
    fn udp_connect_round_trip() {
        smol::block_on(async {
            let server = bind_udp(&loopback()).await.unwrap();
            let server_addr = server.get_ref().local_addr().unwrap();
            let client = connect_udp(&Endpoint::from(server_addr)).await.unwrap();

            client.send(b"dgram").await.unwrap();
            let mut buf = [0u8; 16];
            let (n, from) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"dgram");

            server.send_to(b"back", from).await.unwrap();
            let n = client.recv(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"back");
        });
    }

    #[test]
    fn transient_udp_errors() {
        assert!(is_transient_udp_error(&io::ErrorKind::ConnectionRefused.into()));
        assert!(!is_transient_udp_error(&io::ErrorKind::PermissionDenied.into()));
    }
}
