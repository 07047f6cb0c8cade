//! Helpers for unit tests.

use std::{
    future::Future,
    net::{TcpListener, TcpStream},
    time::Duration,
};

use smol::{future, Async, Timer};

/// Upper bound on any single wait in a test.
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

/// A connected pair of loopback TCP streams.
pub async fn stream_pair() -> (Async<TcpStream>, Async<TcpStream>) {
    let listener = Async::<TcpListener>::bind(([127, 0, 0, 1], 0)).unwrap();
    let addr = listener.get_ref().local_addr().unwrap();
    let (client, accepted) = future::zip(Async::<TcpStream>::connect(addr), listener.accept()).await;
    (client.unwrap(), accepted.unwrap().0)
}
