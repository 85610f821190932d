//! Node lifecycle for the remote endpoint: the health state probes report
//! and the remote exchanges admitted but not yet answered.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::Notify;

/// Starting -> Ready -> Draining -> Stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Starting,
    /// Admitting remote exchanges.
    Ready,
    /// Refusing new exchanges while admitted ones finish.
    Draining,
    Stopped,
}

impl HealthState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

/// Health of one node plus the remote exchanges it is processing.
#[derive(Debug)]
pub struct NodeLifecycle {
    state: ArcSwap<HealthState>,
    in_flight: Arc<InFlight>,
}

impl NodeLifecycle {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ArcSwap::from_pointee(HealthState::Starting),
            in_flight: Arc::default(),
        }
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.state.load()
    }

    pub fn set_ready(&self) {
        self.state.store(Arc::new(HealthState::Ready));
    }

    /// Stops admitting remote exchanges.
    pub fn begin_drain(&self) {
        self.state.store(Arc::new(HealthState::Draining));
    }

    /// Admits one remote exchange, or `None` unless the node is `Ready`.
    ///
    /// The exchange counts as in flight until the guard is dropped. It is
    /// counted before the state check so a concurrent drain cannot miss it.
    #[must_use]
    pub fn admit(&self) -> Option<ExchangeGuard> {
        self.in_flight.count.fetch_add(1, Ordering::AcqRel);
        let guard = ExchangeGuard(Arc::clone(&self.in_flight));
        (self.health_state() == HealthState::Ready).then_some(guard)
    }

    /// Remote exchanges admitted and not yet answered.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.count.load(Ordering::Acquire)
    }

    /// Waits up to `timeout` for admitted exchanges to finish.
    ///
    /// Returns `true` and moves to `Stopped` once none remain; on timeout
    /// returns `false` and the state is left as it was.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let in_flight = &self.in_flight;
        let drained = tokio::time::timeout(timeout, async {
            loop {
                let idle = in_flight.idle.notified();
                if in_flight.count.load(Ordering::Acquire) == 0 {
                    return;
                }
                idle.await;
            }
        })
        .await
        .is_ok();

        if drained {
            self.state.store(Arc::new(HealthState::Stopped));
        }
        drained
    }
}

impl Default for NodeLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// One admitted remote exchange.
#[derive(Debug)]
pub struct ExchangeGuard(Arc<InFlight>);

impl Drop for ExchangeGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}
