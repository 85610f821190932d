use async_trait::async_trait;
use esb_core::{Context, Message, Principal, QName, ServiceOperation, TransactionId};
use esb_core::wire::RemoteMessage;

use crate::remote::RemoteError;

/// Everything a service implementation sees of one invocation.
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    /// Service the exchange was addressed to.
    pub service: QName,
    /// Operation resolved from the service interface.
    pub operation: ServiceOperation,
    /// Request message, including its message-scoped properties.
    pub message: Message,
    /// Exchange-scoped properties at the time of invocation.
    pub context: Context,
    /// Authenticated caller, if any.
    pub principal: Option<Principal>,
    /// Transaction associated with the exchange, if any.
    pub transaction: Option<TransactionId>,
}

/// Business logic behind a registered service.
///
/// Implementations are shared across concurrent exchanges. Errors returned
/// from `invoke` become exchange faults; if the error is the operation's
/// declared fault type the consumer receives it unwrapped.
#[async_trait]
pub trait ServiceImplementation: Send + Sync {
    /// Handles one request. The returned message is the reply for `IN_OUT`
    /// operations and is ignored for `IN_ONLY` ones.
    async fn invoke(&self, request: ServiceRequest) -> anyhow::Result<Message>;

    /// Called once when the owning domain starts.
    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once when the owning domain stops.
    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Sends a request to a remote bus instance.
#[async_trait]
pub trait RemoteInvoker: Send + Sync {
    /// Returns the remote reply, or `None` when the remote side answered
    /// without one (for example a non-success HTTP status).
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Io` when the remote side cannot be reached.
    async fn invoke(&self, request: &RemoteMessage) -> Result<Option<RemoteMessage>, RemoteError>;
}
