//! Exchange bus runtime: handler chain, policy handlers, service domain,
//! local transaction manager, HTTP remote invoker and endpoint.

pub mod bus;
pub mod handlers;
pub mod network;
pub mod remote;
pub mod traits;
pub mod transaction;

pub use bus::{InvocationError, ServiceDomain};
pub use traits::{RemoteInvoker, ServiceImplementation, ServiceRequest};
