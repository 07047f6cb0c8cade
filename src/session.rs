//! Sessions: two sockets joined by a pair of pumps, and the registry that
//! tracks them per forwarder.

use std::{
    collections::HashMap,
    future::Future,
    net::{Shutdown, TcpStream},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, Weak,
    },
    time::Duration,
};

use smol::{
    future,
    lock::{Semaphore, SemaphoreGuardArc},
    Async, Task, Timer,
};

use crate::pump::{pump, PumpEnd, PumpOutcome, Route};

/// Closes both sockets of a session, once.
///
/// Both pumps and the session itself may race to close; only the first
/// call touches the sockets.
#[derive(Debug)]
pub struct CloseGuard {
    closed: AtomicBool,
    a: Arc<Async<TcpStream>>,
    b: Arc<Async<TcpStream>>,
}

impl CloseGuard {
    pub fn new(a: Arc<Async<TcpStream>>, b: Arc<Async<TcpStream>>) -> Self {
        Self {
            closed: AtomicBool::new(false),
            a,
            b,
        }
    }

    /// Shuts down both sockets. Returns `false` if they were already closed.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        // The peer may have torn the connection down already.
        let _ = self.a.get_ref().shutdown(Shutdown::Both);
        let _ = self.b.get_ref().shutdown(Shutdown::Both);
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Byte counts for a finished session.
#[derive(Clone, Copy, Debug)]
pub struct SessionSummary {
    /// A to B.
    pub forward: PumpOutcome,
    /// B to A.
    pub reverse: PumpOutcome,
}

/// Two connected sockets relayed into each other.
///
/// Socket `a` is the side that initiated the session (the accepted client,
/// or the local service for a slave); `b` is the other end.
pub struct Session {
    id: u64,
    a: Arc<Async<TcpStream>>,
    b: Arc<Async<TcpStream>>,
    route: Route,
    buffer_size: usize,
}

impl Session {
    pub fn new(id: u64, a: Async<TcpStream>, b: Async<TcpStream>, buffer_size: usize) -> Self {
        let route = Route::new(id, peer_label(&a), peer_label(&b));
        Self {
            id,
            a: Arc::new(a),
            b: Arc::new(b),
            route,
            buffer_size,
        }
    }

    /// Relays both directions until they have both ended.
    ///
    /// Each direction runs as its own task. A clean end of stream only
    /// half-closes the destination, so the opposite direction keeps
    /// flowing; a failure closes both sockets, which also stops the other
    /// pump. Both sockets are closed when this returns.
    pub async fn run(self) -> SessionSummary {
        let Session {
            id,
            a,
            b,
            route,
            buffer_size,
        } = self;
        tracing::info!(session = id, %route, "session started");

        let guard = Arc::new(CloseGuard::new(a.clone(), b.clone()));
        let forward = smol::spawn(direction(
            a.clone(),
            b.clone(),
            route.clone(),
            guard.clone(),
            buffer_size,
        ));
        let reverse = smol::spawn(direction(
            b,
            a,
            route.reversed(),
            guard.clone(),
            buffer_size,
        ));

        let (forward, reverse) = future::zip(forward, reverse).await;
        guard.close();
        tracing::info!(
            session = id,
            %route,
            sent = forward.bytes,
            received = reverse.bytes,
            "session closed"
        );

        SessionSummary { forward, reverse }
    }
}

async fn direction(
    src: Arc<Async<TcpStream>>,
    dst: Arc<Async<TcpStream>>,
    route: Route,
    guard: Arc<CloseGuard>,
    buffer_size: usize,
) -> PumpOutcome {
    let outcome = pump(&*src, &*dst, &route, buffer_size).await;
    match outcome.end {
        PumpEnd::Eof if !guard.is_closed() => {
            if let Err(e) = dst.get_ref().shutdown(Shutdown::Write) {
                tracing::debug!(session = route.session, %route, "half-close failed: {}", e);
                guard.close();
            }
        }
        _ => {
            guard.close();
        }
    }
    outcome
}

fn peer_label(stream: &Async<TcpStream>) -> String {
    stream
        .get_ref()
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "<unconnected>".into())
}

/// A reserved place in the registry: an id and, when sessions are capped,
/// the permit that counts against the cap.
pub struct Slot {
    pub id: u64,
    _permit: Option<SemaphoreGuardArc>,
}

/// Tracks every session task a forwarder owns.
///
/// Tasks remove themselves when they finish. On shutdown the registry
/// gives the remainder a grace period and then cancels them, which drops
/// (and so closes) their sockets.
pub struct SessionRegistry {
    next_id: AtomicU64,
    tasks: Mutex<HashMap<u64, Task<()>>>,
    limit: Option<Arc<Semaphore>>,
}

impl SessionRegistry {
    pub fn new(max_sessions: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            tasks: Mutex::new(HashMap::new()),
            limit: max_sessions.map(|n| Arc::new(Semaphore::new(n))),
        })
    }

    /// Waits for room under the session cap and assigns the next id.
    pub async fn reserve(&self) -> Slot {
        let permit = match &self.limit {
            Some(limit) => Some(limit.acquire_arc().await),
            None => None,
        };
        Slot {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            _permit: permit,
        }
    }

    /// Spawns `fut` as the task for `slot`. The slot is released when the
    /// task finishes or is cancelled.
    pub fn spawn<F>(self: &Arc<Self>, slot: Slot, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = slot.id;
        let registry: Weak<Self> = Arc::downgrade(self);

        // Hold the lock across spawn so the task cannot deregister before
        // it has been registered.
        let mut tasks = self.lock();
        let task = smol::spawn(async move {
            fut.await;
            drop(slot);
            if let Some(registry) = registry.upgrade() {
                if let Some(task) = registry.lock().remove(&id) {
                    task.detach();
                }
            }
        });
        tasks.insert(id, task);
    }

    /// Number of sessions still running.
    pub fn active(&self) -> usize {
        self.lock().len()
    }

    /// Gives running sessions up to `grace` to finish, then cancels the
    /// rest.
    pub async fn drain(&self, grace: Duration) {
        let mut pending: Vec<(u64, Task<()>)> = self.lock().drain().collect();
        if pending.is_empty() {
            return;
        }
        tracing::info!(sessions = pending.len(), "waiting for sessions to finish");

        let finished = future::or(
            async {
                while let Some((_, task)) = pending.last_mut() {
                    task.await;
                    pending.pop();
                }
                true
            },
            async {
                Timer::after(grace).await;
                false
            },
        )
        .await;

        if !finished {
            tracing::warn!(sessions = pending.len(), "cancelling sessions");
            for (_, task) in pending.drain(..) {
                task.cancel().await;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Task<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
