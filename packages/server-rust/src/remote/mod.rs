//! Remote invocation: the HTTP/JSON client edge and a proxy service that
//! forwards local exchanges to a remote bus.

pub mod error;
pub mod http_invoker;
pub mod proxy;

pub use error::RemoteError;
pub use http_invoker::{HttpInvoker, InvokerConfig, SERVICE_HEADER, WS_SECURITY_HEADER};
pub use proxy::{ProxyError, RemoteProxy};
