//! Metrics middleware for exchanges.
//!
//! Records dispatch duration and outcome as `metrics` counters and
//! histograms labeled by service, and logs one line per exchange.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use esb_core::Exchange;
use tower::{Layer, Service};

use crate::bus::dispatch::DispatchError;

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments exchanges with timing and outcome counters.
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records exchange duration and outcome.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

fn outcome(result: &Result<Exchange, DispatchError>) -> &'static str {
    match result {
        Ok(ex) if ex.is_faulted() => "fault",
        Ok(_) => "ok",
        Err(DispatchError::Overloaded) => "overloaded",
        Err(DispatchError::Contract(_)) => "error",
    }
}

impl<S> Service<Exchange> for MetricsService<S>
where
    S: Service<Exchange, Response = Exchange, Error = DispatchError> + Send,
    S::Future: Send + 'static,
{
    type Response = Exchange;
    type Error = DispatchError;
    type Future = Pin<Box<dyn Future<Output = Result<Exchange, DispatchError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, exchange: Exchange) -> Self::Future {
        let service = exchange.contract().service.to_string();
        let exchange_id = exchange.id();
        let fut = self.inner.call(exchange);

        Box::pin(async move {
            let start = Instant::now();
            let result = fut.await;
            let elapsed = start.elapsed();
            let outcome = outcome(&result);

            metrics::counter!("esb_exchanges_total", "service" => service.clone(), "outcome" => outcome)
                .increment(1);
            metrics::histogram!("esb_exchange_duration_seconds", "service" => service.clone())
                .record(elapsed.as_secs_f64());

            #[allow(clippy::cast_possible_truncation)]
            let duration_ms = elapsed.as_millis() as u64;
            tracing::info!(
                service = %service,
                exchange_id = %exchange_id,
                duration_ms = duration_ms,
                outcome = outcome,
                "exchange complete"
            );

            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
