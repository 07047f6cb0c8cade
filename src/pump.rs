//! One-way byte pump between two connected streams.

use std::fmt;

use smol::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Bytes moved per read/write cycle unless configured otherwise.
pub const DEFAULT_BUFFER_SIZE: usize = 10_240;

/// Identifies a pump in log output.
#[derive(Clone, Debug)]
pub struct Route {
    pub session: u64,
    pub source: String,
    pub destination: String,
}

impl Route {
    pub fn new(session: u64, source: impl fmt::Display, destination: impl fmt::Display) -> Self {
        Self {
            session,
            source: source.to_string(),
            destination: destination.to_string(),
        }
    }

    /// The same pair, traversed the other way.
    pub fn reversed(&self) -> Self {
        Self {
            session: self.session,
            source: self.destination.clone(),
            destination: self.source.clone(),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.destination)
    }
}

/// Why a pump stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PumpEnd {
    /// The source returned an empty read.
    Eof,
    /// Reading the source failed (reset, aborted, closed under us).
    ReadFailed,
    /// Writing the destination failed.
    WriteFailed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PumpOutcome {
    pub bytes: u64,
    pub end: PumpEnd,
}

/// Copies `reader` into `writer` until the reader reports end of stream or
/// either side fails.
///
/// Every chunk is written in full before the next read, so bytes arrive in
/// the order they were read and a slow writer stalls the reader. Errors
/// never escape: they end the pump and are reported in the outcome.
pub async fn pump<R, W>(
    mut reader: R,
    mut writer: W,
    route: &Route,
    buffer_size: usize,
) -> PumpOutcome
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut bytes = 0u64;

    let end = loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!(session = route.session, %route, "source closed");
                break PumpEnd::Eof;
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::error!(session = route.session, %route, "connection closed: {}", e);
                break PumpEnd::ReadFailed;
            }
        };

        if let Err(e) = writer.write_all(&buf[..n]).await {
            tracing::error!(session = route.session, %route, "connection closed: {}", e);
            break PumpEnd::WriteFailed;
        }
        bytes += n as u64;
        tracing::info!(session = route.session, %route, bytes = n, "relayed");
    };

    PumpOutcome { bytes, end }
}
