use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Forwarding mode, selected once at startup.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Forward a local TCP port to a remote TCP endpoint.
    #[value(name = "trans")]
    Trans,
    /// Dial the local service and the public relay, then join them (TCP).
    #[value(name = "slave")]
    Slave,
    /// Accept on two ports alternately and join each pair (TCP).
    #[value(name = "listen")]
    Listen,
    /// Forward a local UDP port to a remote UDP endpoint.
    #[value(name = "Utrans")]
    UdpTrans,
    /// UDP counterpart of `slave`.
    #[value(name = "Uslave")]
    UdpSlave,
    /// UDP counterpart of `listen`.
    #[value(name = "Ulisten")]
    UdpListen,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Forwarding mode.
    #[clap(short, long, value_enum)]
    pub mode: Mode,

    /// Local host: bind address for trans/listen, local service for slave.
    #[clap(long)]
    pub lhost: Option<String>,

    /// Local port: bind port for trans, first relay port for listen,
    /// local service port for slave.
    #[clap(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub lport: Option<u16>,

    /// Remote host: forward target for trans, public relay for slave.
    #[clap(long)]
    pub rhost: Option<String>,

    /// Remote port: forward target port for trans, second relay port for
    /// listen, public relay port for slave.
    #[clap(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub rport: Option<u16>,

    /// Log verbosity threshold; lower is more verbose (10 debug, 20 info,
    /// 30 warning, 40 error).
    #[clap(long, default_value_t = 20)]
    pub debug: u8,

    /// Size of the per-direction relay buffer in bytes.
    #[clap(long, default_value_t = crate::pump::DEFAULT_BUFFER_SIZE)]
    pub buffer_size: usize,

    /// Maximum number of concurrent sessions, unbounded by default.
    #[clap(long)]
    pub max_sessions: Option<usize>,

    /// Seconds to wait for an upstream connection.
    #[clap(long, default_value_t = 10)]
    pub connect_timeout: u64,

    /// Seconds between slave rendezvous attempts, and the Uslave keepalive interval.
    #[clap(long, default_value_t = 10)]
    pub retry_delay: u64,

    /// Seconds in-flight sessions get to finish on shutdown.
    #[clap(long, default_value_t = 5)]
    pub drain_timeout: u64,

    /// Number of threads to use, defaults to the number of logical CPUs.
    #[clap(short = 'T', long)]
    pub threads: Option<usize>,

    /// Log file path.
    #[clap(long, default_value = "forward.log")]
    pub log_file: PathBuf,

    /// Rotate the log file daily instead of appending to a single file.
    #[clap(long)]
    pub rotate_daily: bool,
}
