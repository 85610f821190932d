//! Pipeline composition: wraps the bus with the dispatch middleware.

use std::sync::Arc;

use esb_core::Exchange;
use tower::util::BoxCloneService;
use tower::ServiceBuilder;

use super::exchange_limit::ExchangeLimitLayer;
use super::metrics::MetricsLayer;
use crate::bus::config::BusConfig;
use crate::bus::dispatch::{BusService, DispatchError, ExchangeBus};

/// Type-erased dispatch pipeline.
pub type DispatchPipeline = BoxCloneService<Exchange, Exchange, DispatchError>;

/// Build the dispatch pipeline around `bus`.
///
/// Layer order (outermost to innermost):
/// 1. `ExchangeLimitLayer` -- shed exchanges once the bus is at capacity
/// 2. `MetricsLayer` -- record timing and outcome
///
/// Timeouts are left to the transports.
#[must_use]
pub fn build_dispatch_pipeline(bus: Arc<ExchangeBus>, config: &BusConfig) -> DispatchPipeline {
    let svc = ServiceBuilder::new()
        .layer(ExchangeLimitLayer::new(config.max_concurrent_exchanges))
        .layer(MetricsLayer)
        .service(BusService::new(bus));
    BoxCloneService::new(svc)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
