//! Caps the number of exchanges in flight on the bus.
//!
//! Each exchange holds one slot from acceptance until it leaves the
//! pipeline. An exchange that arrives with every slot taken is shed with
//! `DispatchError::Overloaded` and never reaches the handler chain.

use std::future::{self, Future};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use esb_core::Exchange;
use tokio::sync::Semaphore;
use tower::{Layer, Service};
use tracing::debug;

use crate::bus::dispatch::DispatchError;

type DispatchFuture = Pin<Box<dyn Future<Output = Result<Exchange, DispatchError>> + Send>>;

/// Exchange slots shared by every clone of the pipeline.
#[derive(Debug, Clone)]
pub struct ExchangeSlots {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl ExchangeSlots {
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        let capacity = capacity as usize;
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Exchanges currently holding a slot.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }
}

#[derive(Debug, Clone)]
pub struct ExchangeLimitLayer {
    slots: ExchangeSlots,
}

impl ExchangeLimitLayer {
    #[must_use]
    pub fn new(max_concurrent_exchanges: u32) -> Self {
        Self {
            slots: ExchangeSlots::new(max_concurrent_exchanges),
        }
    }

    #[must_use]
    pub fn slots(&self) -> &ExchangeSlots {
        &self.slots
    }
}

impl<S> Layer<S> for ExchangeLimitLayer {
    type Service = ExchangeLimit<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ExchangeLimit {
            inner,
            slots: self.slots.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExchangeLimit<S> {
    inner: S,
    slots: ExchangeSlots,
}

impl<S> Service<Exchange> for ExchangeLimit<S>
where
    S: Service<Exchange, Response = Exchange, Error = DispatchError> + Send,
    S::Future: Send + 'static,
{
    type Response = Exchange;
    type Error = DispatchError;
    type Future = DispatchFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, exchange: Exchange) -> Self::Future {
        match Arc::clone(&self.slots.permits).try_acquire_owned() {
            Ok(slot) => {
                let fut = self.inner.call(exchange);
                Box::pin(async move {
                    let _slot = slot;
                    fut.await
                })
            }
            Err(_) => {
                let service = exchange.contract().service.to_string();
                debug!(
                    exchange_id = %exchange.id(),
                    %service,
                    capacity = self.slots.capacity,
                    "exchange shed, bus at capacity"
                );
                metrics::counter!("esb_exchanges_shed_total", "service" => service).increment(1);
                Box::pin(future::ready(Err(DispatchError::Overloaded)))
            }
        }
    }
}
