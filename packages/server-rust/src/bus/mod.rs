//! Exchange bus and service domain.
//!
//! 1. **Handlers** (`handler`): the handler contract and the ordered chain
//! 2. **Dispatch** (`dispatch`): IN pass, policy check, provider, reply and
//!    fault passes
//! 3. **Middleware** (`middleware`): Tower layers (load-shedding, metrics)
//! 4. **Registry** (`registry`): deployed services with lifecycle ordering
//! 5. **Domain** (`domain`): registry, bus and pipeline behind one API

pub mod config;
pub mod dispatch;
pub mod domain;
pub mod handler;
pub mod middleware;
pub mod registry;

pub use config::BusConfig;
pub use dispatch::{BusService, DispatchError, ExchangeBus};
pub use domain::{InvocationError, Invoker, ServiceDomain, ServiceDomainBuilder};
pub use handler::{ChainError, ExchangeHandler, HandlerChain};
pub use registry::{RegisteredService, RegistrationError, ServiceRegistry};
