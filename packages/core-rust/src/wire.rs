//! JSON wire message exchanged between bus instances.
//!
//! # Format
//!
//! ```json
//! {
//!   "domain": "orders",
//!   "service": "{urn:orders}OrderService",
//!   "operation": "submit",
//!   "content": {"id": "o-1"},
//!   "context": [{"name": "trace", "value": "t-1", "scope": "EXCHANGE"}],
//!   "fault": false,
//!   "contract": {"pattern": "IN_OUT", "inputType": "Order"}
//! }
//! ```
//!
//! Transient properties are never written to the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::{Context, ContextError, Property, Scope};
use crate::contract::{ExchangePattern, ServiceOperation};
use crate::exchange::Exchange;
use crate::message::Message;
use crate::qname::QName;

/// Operation metadata carried with a remote message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteContract {
    pub pattern: ExchangePattern,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_type: Option<QName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_type: Option<QName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault_type: Option<String>,
}

impl From<&ServiceOperation> for RemoteContract {
    fn from(op: &ServiceOperation) -> Self {
        Self {
            pattern: op.pattern(),
            input_type: op.input_type().cloned(),
            output_type: op.output_type().cloned(),
            fault_type: op.fault_type().map(|f| f.name().to_string()),
        }
    }
}

/// Request or reply crossing the remote edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub service: QName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<Property>,
    #[serde(default)]
    pub fault: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<RemoteContract>,
}

fn wire_properties<'a>(contexts: impl IntoIterator<Item = &'a Context>) -> Vec<Property> {
    contexts
        .into_iter()
        .flat_map(Context::properties)
        .filter(|p| !p.is_transient())
        .cloned()
        .collect()
}

impl RemoteMessage {
    /// Empty request addressed to `service`.
    #[must_use]
    pub fn new(service: QName) -> Self {
        Self {
            domain: None,
            service,
            operation: None,
            content: None,
            context: Vec::new(),
            fault: false,
            contract: None,
        }
    }

    /// Request built from an exchange's contract, IN message, and
    /// non-transient exchange and message properties.
    #[must_use]
    pub fn request(domain: Option<&str>, exchange: &Exchange) -> Self {
        let contract = exchange.contract();
        Self {
            domain: domain.map(str::to_string),
            service: contract.service.clone(),
            operation: Some(contract.operation.name().to_string()),
            content: exchange.message().content().cloned(),
            context: wire_properties([exchange.context(), exchange.message().context()]),
            fault: false,
            contract: Some(RemoteContract::from(&contract.operation)),
        }
    }

    /// Reply built from a processed exchange: the fault detail when
    /// faulted, otherwise the reply message (empty for `IN_ONLY`).
    #[must_use]
    pub fn reply(exchange: &Exchange) -> Self {
        let mut msg = Self::new(exchange.contract().service.clone());
        msg.operation = Some(exchange.contract().operation.name().to_string());
        if let Some(fault) = exchange.fault() {
            msg.fault = true;
            msg.content = Some(
                fault
                    .message()
                    .content()
                    .cloned()
                    .unwrap_or_else(|| Value::String(fault.cause().to_string())),
            );
            msg.context = wire_properties([exchange.context(), fault.message().context()]);
        } else if let Some(reply) = exchange.reply() {
            msg.content = reply.content().cloned();
            msg.context = wire_properties([exchange.context(), reply.context()]);
        } else {
            msg.context = wire_properties([exchange.context()]);
        }
        msg
    }

    /// Appends the non-transient properties of `contexts`.
    pub fn extend_context<'a>(&mut self, contexts: impl IntoIterator<Item = &'a Context>) {
        self.context.extend(wire_properties(contexts));
    }

    /// Reply content as a [`Message`] carrying the message-scoped properties.
    ///
    /// # Errors
    ///
    /// Returns `ContextError` when a property has an empty name.
    pub fn to_message(&self) -> Result<Message, ContextError> {
        let mut message = Message::new();
        if let Some(content) = &self.content {
            message.set_content(content.clone());
        }
        for p in self.context.iter().filter(|p| p.scope() == Scope::Message) {
            message.context_mut().insert(p.clone())?;
        }
        Ok(message)
    }

    /// Applies wire properties by scope: `EXCHANGE` properties to
    /// `exchange_ctx`, `MESSAGE` properties to `message_ctx`. Transient
    /// properties are skipped.
    ///
    /// # Errors
    ///
    /// Returns `ContextError` when a property has an empty name.
    pub fn apply_context(&self, exchange_ctx: &mut Context, message_ctx: &mut Context) -> Result<(), ContextError> {
        for p in self.context.iter().filter(|p| !p.is_transient()) {
            match p.scope() {
                Scope::Exchange => exchange_ctx.insert(p.clone())?,
                Scope::Message => message_ctx.insert(p.clone())?,
            }
        }
        Ok(())
    }
}
