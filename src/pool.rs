//! Per-origin agent pool.
//!
//! Bounds concurrent agents per origin, parks acquirers FIFO when the
//! bound is reached, retains a capped set of idle connections, and evicts
//! agents that sit idle past the configured timeout.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::agent::Agent;
use crate::error::{FetchError, FetchResult};
use crate::origin::Origin;
use crate::request::Request;
use crate::response::Response;

/// Upper bound on the evictor's sleep between sweeps.
const EVICTION_INTERVAL_CAP: Duration = Duration::from_secs(10);

/// Per-origin pool limits.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum concurrent agents per origin (`None` = unbounded). The
    /// effective minimum is 1.
    pub max_per_host: Option<usize>,
    /// Upper bound on retained idle agents per origin.
    pub max_idle_per_host: usize,
    /// How long an idle agent may linger before eviction (`None` disables
    /// the evictor; idle agents are then retained indefinitely subject to
    /// `max_idle_per_host`).
    pub idle_timeout: Option<Duration>,
    /// Limit on TCP connect plus TLS handshake per connection attempt.
    pub connect_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_per_host: None,
            max_idle_per_host: 0,
            idle_timeout: Some(Duration::from_secs(30)),
            connect_timeout: Some(Duration::from_secs(30)),
        }
    }
}

struct IdleEntry {
    agent: Agent,
    since: Instant,
}

struct PoolState {
    /// Agents with an open socket awaiting reuse, most recent last.
    idle: Vec<IdleEntry>,
    /// Every live agent created by this pool, busy or idle.
    all: Vec<Agent>,
    /// Parked acquirers in FIFO order.
    waiters: VecDeque<oneshot::Sender<Agent>>,
    closed: bool,
}

struct PoolInner {
    origin: Origin,
    config: PoolConfig,
    state: Mutex<PoolState>,
    shutdown: CancellationToken,
}

fn pool_closed() -> FetchError {
    FetchError::ConnectionFailed("pool is closed".into())
}

fn forget(state: &mut PoolState, agent: &Agent) {
    if let Some(index) = state.all.iter().position(|a| a.ptr_eq(agent)) {
        state.all.swap_remove(index);
    }
}

impl PoolInner {
    fn acquire_or_park(&self) -> FetchResult<Result<Agent, oneshot::Receiver<Agent>>> {
        let mut st = self.state.lock();
        if st.closed {
            return Err(pool_closed());
        }
        if let Some(entry) = st.idle.pop() {
            debug!(origin = %self.origin, "acquired idle agent");
            return Ok(Ok(entry.agent));
        }
        let cap = self.config.max_per_host.unwrap_or(usize::MAX).max(1);
        if st.all.len() < cap {
            let agent = Agent::new(self.origin.clone(), self.config.connect_timeout);
            st.all.push(agent.clone());
            return Ok(Ok(agent));
        }
        let (tx, rx) = oneshot::channel();
        st.waiters.push_back(tx);
        Ok(Err(rx))
    }

    async fn acquire(&self, cancel: Option<&CancellationToken>) -> FetchResult<Agent> {
        let mut waiter = match self.acquire_or_park()? {
            Ok(agent) => return Ok(agent),
            Err(waiter) => waiter,
        };
        debug!(origin = %self.origin, "pool at capacity, waiting for a release");
        match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => {
                    // Closing the channel makes any later handoff fail, so
                    // the release moves on to the next waiter. An agent
                    // handed over before the close is force-closed and its
                    // slot returned to the pool.
                    waiter.close();
                    if let Ok(agent) = waiter.try_recv() {
                        agent.force_close();
                        self.release(agent);
                    }
                    Err(FetchError::Aborted)
                }
                agent = &mut waiter => agent.map_err(|_| pool_closed()),
            },
            None => waiter.await.map_err(|_| pool_closed()),
        }
    }

    /// Return an agent to the pool: serve the oldest live waiter, else pool
    /// the connection when one is open and the idle cap allows, else
    /// destroy the agent and free its slot.
    fn release(&self, agent: Agent) {
        let mut st = self.state.lock();
        if st.closed {
            forget(&mut st, &agent);
            agent.force_close();
            return;
        }

        let mut handoff = agent;
        while let Some(waiter) = st.waiters.pop_front() {
            if handoff.is_closed() {
                // Replace a retired agent so the slot count holds.
                forget(&mut st, &handoff);
                handoff = Agent::new(self.origin.clone(), self.config.connect_timeout);
                st.all.push(handoff.clone());
            }
            match waiter.send(handoff) {
                Ok(()) => return,
                Err(back) => handoff = back,
            }
        }

        if handoff.is_closed() || !handoff.has_live_connection() {
            forget(&mut st, &handoff);
            handoff.force_close();
            return;
        }
        if st.idle.len() >= self.config.max_idle_per_host {
            debug!(origin = %self.origin, "idle cap reached, discarding connection");
            forget(&mut st, &handoff);
            handoff.force_close();
            return;
        }
        st.idle.push(IdleEntry {
            agent: handoff,
            since: Instant::now(),
        });
    }

    fn evict(&self, idle_timeout: Duration) {
        let now = Instant::now();
        let mut st = self.state.lock();
        let mut evicted = Vec::new();
        st.idle.retain(|entry| {
            if now.duration_since(entry.since) >= idle_timeout {
                evicted.push(entry.agent.clone());
                false
            } else {
                true
            }
        });
        for agent in evicted {
            debug!(origin = %self.origin, "evicting idle agent");
            forget(&mut st, &agent);
            agent.force_close();
        }
    }
}

/// A bounded, per-origin set of agents with queueing and idle eviction.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.inner.state.lock();
        f.debug_struct("Pool")
            .field("origin", &self.inner.origin.to_string())
            .field("live", &st.all.len())
            .field("idle", &st.idle.len())
            .field("waiters", &st.waiters.len())
            .field("closed", &st.closed)
            .finish()
    }
}

impl Pool {
    /// Create a pool for `origin` and schedule its evictor (unless the
    /// idle timeout is disabled).
    ///
    /// Must be called from within a Tokio runtime; the evictor runs as a
    /// background task holding only a weak reference to the pool.
    pub fn new(origin: Origin, config: PoolConfig) -> Self {
        let inner = Arc::new(PoolInner {
            origin,
            config,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                all: Vec::new(),
                waiters: VecDeque::new(),
                closed: false,
            }),
            shutdown: CancellationToken::new(),
        });
        Self::spawn_evictor(&inner);
        Pool { inner }
    }

    fn spawn_evictor(inner: &Arc<PoolInner>) {
        let Some(idle_timeout) = inner.config.idle_timeout else {
            return;
        };
        let interval = idle_timeout.min(EVICTION_INTERVAL_CAP);
        let weak = Arc::downgrade(inner);
        let shutdown = inner.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let Some(pool) = weak.upgrade() else { break };
                pool.evict(idle_timeout);
            }
        });
    }

    /// Origin this pool serves.
    pub fn origin(&self) -> &Origin {
        &self.inner.origin
    }

    /// Number of live agents (busy or idle).
    pub fn live_count(&self) -> usize {
        self.inner.state.lock().all.len()
    }

    /// Number of idle agents retaining an open connection.
    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Dispatch one request through the pool.
    ///
    /// Acquires an agent (waiting FIFO at capacity; a cancellation token on
    /// the request also aborts the wait), sends, and binds the agent's next
    /// idle transition back to the pool so the agent never learns about it.
    pub async fn send(&self, request: Request) -> FetchResult<Response> {
        let cancel = request.cancel.clone();
        let agent = self.inner.acquire(cancel.as_ref()).await?;
        match agent.send(request).await {
            Ok(response) => {
                let inner = Arc::clone(&self.inner);
                let watched = agent.clone();
                tokio::spawn(async move {
                    watched.when_idle().await;
                    inner.release(watched);
                });
                Ok(response)
            }
            Err(e) => {
                self.inner.release(agent);
                Err(e)
            }
        }
    }

    /// Force-close every agent (aborting in-flight requests), fail parked
    /// waiters, and reject further acquisitions. Idempotent.
    pub fn close(&self) {
        self.inner.shutdown.cancel();
        let (agents, waiters) = {
            let mut st = self.inner.state.lock();
            if st.closed {
                return;
            }
            st.closed = true;
            st.idle.clear();
            (
                std::mem::take(&mut st.all),
                std::mem::take(&mut st.waiters),
            )
        };
        debug!(origin = %self.inner.origin, agents = agents.len(), "closing pool");
        for agent in &agents {
            agent.force_close();
        }
        // Dropping the senders fails every parked acquirer.
        drop(waiters);
    }
}
