//! Error types shared by every forwarder.

use std::{io, net::SocketAddr};

use thiserror::Error;

use crate::config::Endpoint;

/// Errors surfaced by the relay.
///
/// Only [`ForwardError::Bind`] and [`ForwardError::Config`] ever stop a
/// forwarder. Everything else is reported per session or per dial attempt
/// and logged by the caller.
#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to resolve {endpoint}: {source}")]
    Resolve {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },

    #[error("{endpoint} did not resolve to any address")]
    NoAddress { endpoint: Endpoint },

    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },

    #[error("timed out connecting to {endpoint}")]
    Timeout { endpoint: Endpoint },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T, E = ForwardError> = std::result::Result<T, E>;
