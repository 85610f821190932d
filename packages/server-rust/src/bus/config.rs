/// Service-domain configuration.
///
/// Controls the domain name stamped on remote messages and the concurrency
/// limit enforced by the dispatch pipeline.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Name of this service domain.
    pub domain: String,
    /// Maximum number of concurrent exchanges before load shedding.
    pub max_concurrent_exchanges: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            domain: "default".to_string(),
            max_concurrent_exchanges: 1000,
        }
    }
}
