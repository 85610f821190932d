//! Service implementation that forwards to a remote bus.

use std::sync::Arc;

use async_trait::async_trait;
use esb_core::wire::{RemoteContract, RemoteMessage};
use esb_core::{ExchangePattern, Message, QName};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::traits::{RemoteInvoker, ServiceImplementation, ServiceRequest};

/// Remote outcomes that are not a normal reply.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("remote service {service} faulted: {detail}")]
    Faulted { service: QName, detail: Value },
    #[error("remote service {0} answered without a reply")]
    NoReply(QName),
}

/// Registers a remote service locally: every request is sent through the
/// invoker and the remote reply becomes the local one.
pub struct RemoteProxy {
    invoker: Arc<dyn RemoteInvoker>,
    domain: Option<String>,
}

impl RemoteProxy {
    #[must_use]
    pub fn new(invoker: Arc<dyn RemoteInvoker>) -> Self {
        Self { invoker, domain: None }
    }

    /// Names the remote domain the requests are addressed to.
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    fn to_wire(&self, request: &ServiceRequest) -> RemoteMessage {
        let mut remote = RemoteMessage::new(request.service.clone());
        remote.domain.clone_from(&self.domain);
        remote.operation = Some(request.operation.name().to_string());
        remote.content = request.message.content().cloned();
        remote.contract = Some(RemoteContract::from(&request.operation));
        remote.extend_context([&request.context, request.message.context()]);
        remote
    }
}

#[async_trait]
impl ServiceImplementation for RemoteProxy {
    async fn invoke(&self, request: ServiceRequest) -> anyhow::Result<Message> {
        let remote = self.to_wire(&request);
        debug!(service = %request.service, operation = request.operation.name(), "forwarding to remote bus");

        match self.invoker.invoke(&remote).await? {
            None if request.operation.pattern() == ExchangePattern::InOnly => Ok(Message::new()),
            None => Err(ProxyError::NoReply(request.service).into()),
            Some(reply) if reply.fault => Err(ProxyError::Faulted {
                service: request.service,
                detail: reply.content.unwrap_or_default(),
            }
            .into()),
            Some(reply) => Ok(reply.to_message()?),
        }
    }
}
