//! axum handlers for the node's HTTP endpoint.
//!
//! `AppState` is the shared state carried through axum extractors.

pub mod health;
pub mod remote;

pub use health::{health_handler, liveness_handler, readiness_handler};
pub use remote::remote_handler;

use std::sync::Arc;
use std::time::Instant;

use super::{NetworkConfig, NodeLifecycle};
use crate::bus::ServiceDomain;

/// Shared state passed to every handler via `State` extraction.
#[derive(Clone)]
pub struct AppState {
    /// Local service domain remote exchanges are dispatched into.
    pub domain: Arc<ServiceDomain>,
    /// Health state and admitted exchanges.
    pub lifecycle: Arc<NodeLifecycle>,
    pub config: Arc<NetworkConfig>,
    /// Process start time, used for uptime.
    pub start_time: Instant,
}
