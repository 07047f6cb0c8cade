//! Broadcast shutdown signal.
//!
//! Nothing is ever sent on the channel; dropping (or firing) the trigger
//! closes it, which wakes every clone of [`Shutdown`] at once. The binary
//! fires it from a signal handler.

use std::future::Future;

use smol::{
    channel::{self, Receiver, Sender},
    future,
};

/// Fires the shutdown signal when dropped or when [`fire`](Self::fire) is
/// called.
#[derive(Debug)]
pub struct ShutdownTrigger(Sender<()>);

impl ShutdownTrigger {
    pub fn fire(self) {
        self.0.close();
    }
}

/// Listens for the shutdown signal.
#[derive(Clone, Debug)]
pub struct Shutdown(Receiver<()>);

pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = channel::bounded(1);
    (ShutdownTrigger(tx), Shutdown(rx))
}

/// Requests shutdown on the first SIGINT or SIGTERM. A second signal exits
/// the process at once.
pub fn on_signal() -> Result<Shutdown, ctrlc::Error> {
    let (trigger, shutdown) = channel();
    ctrlc::set_handler(signal_handler(trigger))?;
    Ok(shutdown)
}

fn signal_handler(trigger: ShutdownTrigger) -> impl FnMut() + Send + 'static {
    let mut trigger = Some(trigger);
    move || match trigger.take() {
        Some(trigger) => {
            tracing::info!("shutdown requested, finishing sessions");
            trigger.fire();
        }
        None => {
            tracing::warn!("second signal, exiting now");
            std::process::exit(130);
        }
    }
}

impl Shutdown {
    /// Completes once shutdown has been requested.
    pub async fn wait(&self) {
        while self.0.recv().await.is_ok() {}
    }

    /// Runs `fut` to completion unless shutdown is requested first.
    pub async fn guard<F: Future>(&self, fut: F) -> Option<F::Output> {
        future::or(async { Some(fut.await) }, async {
            self.wait().await;
            None
        })
        .await
    }
}
