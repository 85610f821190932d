//! Built-in exchange handlers.
//!
//! The default chain order is transaction, security, transformation,
//! validation; [`ServiceInvocationHandler`] is the terminal provider.

pub mod provider;
pub mod security;
pub mod transaction;
pub mod transform;
pub mod validate;

pub use provider::ServiceInvocationHandler;
pub use security::{Authenticator, SecurityHandler, StaticAuthenticator};
pub use transaction::TransactionHandler;
pub use transform::TransformHandler;
pub use validate::ValidationHandler;
