//! Endpoints and validated forwarder configuration.

use std::{fmt, net::SocketAddr, time::Duration};

use crate::{
    cli::{Cli, Mode},
    error::{ForwardError, Result},
    pump::DEFAULT_BUFFER_SIZE,
};

/// Host used for bind endpoints when `--lhost` is omitted.
const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Host used for the slave's local service when `--lhost` is omitted.
const DEFAULT_SERVICE_HOST: &str = "127.0.0.1";

/// A host and port pair.
///
/// The host may be an IP literal or a DNS name; it is resolved on every
/// dial so that a relay whose address changes is picked up by retries.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Resolves the endpoint into one or more socket addresses.
    pub async fn resolve(&self) -> Result<Vec<SocketAddr>> {
        let addrs = smol::net::resolve((self.host.as_str(), self.port))
            .await
            .map_err(|source| ForwardError::Resolve {
                endpoint: self.clone(),
                source,
            })?;
        if addrs.is_empty() {
            return Err(ForwardError::NoAddress {
                endpoint: self.clone(),
            });
        }
        Ok(addrs)
    }

    /// Resolves the endpoint and returns the first address.
    pub async fn resolve_first(&self) -> Result<SocketAddr> {
        let addrs = self.resolve().await?;
        Ok(addrs[0])
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Tuning knobs shared by every mode.
#[derive(Clone, Debug)]
pub struct Limits {
    /// Per-direction TCP relay buffer.
    pub buffer_size: usize,
    /// Concurrent session cap, `None` for unbounded.
    pub max_sessions: Option<usize>,
    pub connect_timeout: Duration,
    /// Delay between slave reconnect attempts and UDP keepalives.
    pub retry_delay: Duration,
    /// Grace period for in-flight sessions on shutdown.
    pub drain_timeout: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_sessions: None,
            connect_timeout: Duration::from_secs(10),
            retry_delay: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// A fully validated forwarder configuration.
///
/// The meaning of `local` and `remote` depends on the mode:
///
/// | mode               | `local`                 | `remote`                |
/// |--------------------|-------------------------|-------------------------|
/// | `trans`, `Utrans`  | bind address            | forward target          |
/// | `listen`,`Ulisten` | first relay port (A)    | second relay port (B)   |
/// | `slave`, `Uslave`  | local service to expose | public relay to dial    |
#[derive(Clone, Debug)]
pub struct ForwardConfig {
    pub mode: Mode,
    pub local: Endpoint,
    pub remote: Endpoint,
    pub limits: Limits,
}

impl ForwardConfig {
    pub fn new(mode: Mode, local: Endpoint, remote: Endpoint) -> Self {
        Self {
            mode,
            local,
            remote,
            limits: Limits::default(),
        }
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Builds a configuration from parsed command line arguments, checking
    /// that the mode has every endpoint it needs.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let lport = require(cli.lport, "--lport", cli.mode)?;
        let rport = require(cli.rport, "--rport", cli.mode)?;

        let (local, remote) = match cli.mode {
            Mode::Trans | Mode::UdpTrans => {
                let lhost = cli.lhost.as_deref().unwrap_or(DEFAULT_BIND_HOST);
                let rhost = require(cli.rhost.clone(), "--rhost", cli.mode)?;
                (Endpoint::new(lhost, lport), Endpoint::new(rhost, rport))
            }
            Mode::Listen | Mode::UdpListen => {
                if lport == rport {
                    return Err(ForwardError::Config(format!(
                        "--lport and --rport must differ in {:?} mode",
                        cli.mode
                    )));
                }
                let host = cli.lhost.as_deref().unwrap_or(DEFAULT_BIND_HOST);
                (Endpoint::new(host, lport), Endpoint::new(host, rport))
            }
            Mode::Slave | Mode::UdpSlave => {
                let lhost = cli.lhost.as_deref().unwrap_or(DEFAULT_SERVICE_HOST);
                let rhost = require(cli.rhost.clone(), "--rhost", cli.mode)?;
                (Endpoint::new(lhost, lport), Endpoint::new(rhost, rport))
            }
        };

        if cli.buffer_size == 0 {
            return Err(ForwardError::Config("--buffer-size must be positive".into()));
        }
        if cli.max_sessions == Some(0) {
            return Err(ForwardError::Config("--max-sessions must be positive".into()));
        }

        let limits = Limits {
            buffer_size: cli.buffer_size,
            max_sessions: cli.max_sessions,
            connect_timeout: Duration::from_secs(cli.connect_timeout),
            retry_delay: Duration::from_secs(cli.retry_delay),
            drain_timeout: Duration::from_secs(cli.drain_timeout),
        };

        Ok(Self::new(cli.mode, local, remote).with_limits(limits))
    }
}

fn require<T>(value: Option<T>, flag: &str, mode: Mode) -> Result<T> {
    value.ok_or_else(|| ForwardError::Config(format!("{flag} is required in {mode:?} mode")))
}
