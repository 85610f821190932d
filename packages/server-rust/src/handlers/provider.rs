//! Terminal handler: invokes the registered service implementation.

use std::sync::Arc;

use async_trait::async_trait;
use esb_core::{Exchange, ExchangePattern, Fault, FaultCause, HandlerError, Message};
use tracing::debug;

use crate::bus::handler::ExchangeHandler;
use crate::bus::registry::ServiceRegistry;
use crate::traits::ServiceRequest;

/// Resolves the exchange's service and operation in the registry and calls
/// the implementation.
///
/// A successful `IN_OUT` invocation becomes the reply. A failed invocation
/// faults the exchange: an `IN_OUT` operation's declared fault type is passed
/// through unwrapped, anything else is wrapped in a handler error.
pub struct ServiceInvocationHandler {
    registry: Arc<ServiceRegistry>,
}

impl ServiceInvocationHandler {
    pub const NAME: &'static str = "provider";

    #[must_use]
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ExchangeHandler for ServiceInvocationHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn handle_message(&self, exchange: &mut Exchange) -> Result<(), HandlerError> {
        let contract = exchange.contract();
        let service = self
            .registry
            .get(&contract.service)
            .ok_or_else(|| HandlerError::Configuration(format!("no service registered as {}", contract.service)))?;
        let operation = service
            .interface
            .resolve(&contract.service, Some(contract.operation.name()))
            .map_err(|e| HandlerError::Configuration(e.to_string()))?
            .clone();

        let request = ServiceRequest {
            service: service.name.clone(),
            operation: operation.clone(),
            message: exchange.message().clone(),
            context: exchange.context().clone(),
            principal: exchange.security().principal().cloned(),
            transaction: exchange.transaction().current().cloned(),
        };

        debug!(service = %service.name, operation = operation.name(), "invoking service");
        let outcome = service.implementation.invoke(request).await;

        let result = match outcome {
            Ok(mut reply) if operation.pattern() == ExchangePattern::InOut => {
                if reply.content_type().is_none() {
                    reply.set_content_type(operation.output_type().cloned());
                }
                exchange.set_reply(reply)
            }
            Ok(_) => Ok(()),
            Err(err) if operation.pattern() == ExchangePattern::InOut && operation.declares(&err) => {
                let detail = Message::new().with_content(err.to_string());
                exchange.set_fault(Fault::new(FaultCause::Declared(err)).with_message(detail))
            }
            Err(err) => exchange.set_fault(Fault::from(HandlerError::wrap(err))),
        };
        result.map_err(|e| HandlerError::wrap(e.into()))
    }
}
