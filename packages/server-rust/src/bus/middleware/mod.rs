//! Tower middleware layers for the dispatch pipeline.
//!
//! - [`metrics`]: Exchange timing and outcome counters
//! - [`exchange_limit`]: Caps exchanges in flight
//! - [`pipeline`]: Composes all layers around the bus

pub mod exchange_limit;
pub mod metrics;
pub mod pipeline;

pub use exchange_limit::{ExchangeLimitLayer, ExchangeSlots};
pub use metrics::MetricsLayer;
pub use pipeline::{build_dispatch_pipeline, DispatchPipeline};
