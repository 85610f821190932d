//! HTTP endpoint: configuration, middleware, probes, the remote route and
//! node lifecycle.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod lifecycle;
pub mod module;

pub use config::NetworkConfig;
pub use handlers::AppState;
pub use module::NetworkModule;
pub use lifecycle::{ExchangeGuard, HealthState, NodeLifecycle};
