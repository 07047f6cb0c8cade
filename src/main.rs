//! A TCP and UDP traffic relay with NAT-traversing rendezvous modes.
//!
//! ## Usage
//!
//! ```text
//! Usage: forward [OPTIONS] --mode <MODE>
//!
//! Options:
//!   -m, --mode <MODE>                    Forwarding mode [possible values: trans, slave, listen, Utrans, Uslave, Ulisten]
//!       --lhost <LHOST>                  Local host
//!       --lport <LPORT>                  Local port
//!       --rhost <RHOST>                  Remote host
//!       --rport <RPORT>                  Remote port
//!       --debug <DEBUG>                  Log verbosity threshold [default: 20]
//!       --buffer-size <BUFFER_SIZE>      Per-direction relay buffer [default: 10240]
//!       --max-sessions <MAX_SESSIONS>    Maximum number of concurrent sessions
//!       --connect-timeout <SECONDS>      Upstream connect timeout [default: 10]
//!       --retry-delay <SECONDS>          Slave reconnect delay [default: 10]
//!       --drain-timeout <SECONDS>        Shutdown grace period [default: 5]
//!   -T, --threads <THREADS>              Number of threads to use
//!       --log-file <LOG_FILE>            Log file path [default: forward.log]
//!       --rotate-daily                   Rotate the log file daily
//! ```
//!
//! ## Examples
//!
//! Forward local port 8083 to SSH on the same machine:
//!
//! ```sh
//! forward --mode trans --lhost 0.0.0.0 --lport 8083 --rhost 127.0.0.1 --rport 22
//! ```
//!
//! Expose SSH on an intranet machine through a public host `x.x.x.x`:
//!
//! ```sh
//! # on the public host
//! forward --mode listen --lport 8089 --rport 8088
//! # on the intranet machine
//! forward --mode slave --lhost 127.0.0.1 --lport 22 --rhost x.x.x.x --rport 8089
//! # anywhere
//! ssh name@x.x.x.x -p 8088
//! ```

use anyhow::Context;
use clap::Parser;
use forward::{
    cli::Cli,
    logging::{self, LogOptions},
    shutdown, ForwardConfig, Forwarder,
};

fn main() -> anyhow::Result<()> {
    // Parse command line arguments.
    let cli = Cli::parse();

    // Initialize logging; the guard flushes the log file on exit.
    let _log_guard = logging::init(&LogOptions {
        threshold: cli.debug,
        file: cli.log_file.clone(),
        rotate_daily: cli.rotate_daily,
    });

    let config = ForwardConfig::from_cli(&cli)?;
    tracing::debug!(?config);

    // Number of threads to use, defaults to the number of logical CPUs.
    // The global executor reads this on first spawn.
    let threads = cli.threads.unwrap_or_else(num_cpus::get).max(1);
    std::env::set_var("SMOL_THREADS", threads.to_string());
    tracing::debug!(threads);

    // Ctrl-C or SIGTERM stops accepting and lets open sessions finish.
    let shutdown = shutdown::on_signal().context("failed to install the signal handler")?;

    smol::block_on(async {
        let mode = config.mode;
        let forwarder = match Forwarder::bind(config).await {
            Ok(forwarder) => forwarder,
            Err(e) => {
                tracing::error!("{}", e);
                return Err(e).with_context(|| format!("failed to start {mode:?} forwarder"));
            }
        };
        forwarder.run(shutdown).await;
        tracing::info!("{:?} forwarder stopped", mode);
        Ok(())
    })
}
