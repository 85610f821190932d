//! Validation handler: checks request and reply content against the
//! validator registered for its content type.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use esb_core::{Exchange, ExchangePhase, HandlerError, QName, Validator};
use serde_json::Value;
use tracing::debug;

use crate::bus::handler::ExchangeHandler;

#[derive(Default)]
pub struct ValidationHandler {
    validators: HashMap<QName, Arc<dyn Validator>>,
}

impl ValidationHandler {
    pub const NAME: &'static str = "validation";

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_validator(mut self, content_type: QName, validator: Arc<dyn Validator>) -> Self {
        self.validators.insert(content_type, validator);
        self
    }

    fn check(&self, content_type: Option<&QName>, content: Option<&Value>) -> Result<(), HandlerError> {
        let Some(validator) = content_type.and_then(|t| self.validators.get(t)) else {
            return Ok(());
        };
        let result = validator.validate(content);
        if result.is_valid() {
            debug!(validator = validator.name(), "content validated");
            return Ok(());
        }
        Err(HandlerError::Validation {
            validator: validator.name().to_string(),
            detail: result.detail(),
        })
    }
}

#[async_trait]
impl ExchangeHandler for ValidationHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn handle_message(&self, exchange: &mut Exchange) -> Result<(), HandlerError> {
        let operation = &exchange.contract().operation;
        match exchange.phase() {
            Some(ExchangePhase::In) => {
                let message = exchange.message();
                let content_type = operation.input_type().or(message.content_type());
                self.check(content_type, message.content())
            }
            Some(ExchangePhase::Out) => {
                let Some(reply) = exchange.reply() else {
                    return Ok(());
                };
                let content_type = reply.content_type().or(operation.output_type());
                self.check(content_type, reply.content())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use esb_core::validate::{FieldDef, FieldKind, MessageSchema, SchemaValidator};
    use esb_core::{ExchangeContract, Message, ServiceOperation};
    use serde_json::json;

    use super::*;

    fn handler() -> ValidationHandler {
        let schema = MessageSchema {
            version: 1,
            fields: vec![FieldDef::required("id", FieldKind::String)],
        };
        ValidationHandler::new().with_validator(
            QName::local("Order"),
            Arc::new(SchemaValidator::new("order-schema", schema)),
        )
    }

    fn sent(content: Value) -> Exchange {
        let op = ServiceOperation::in_out("submit")
            .with_input("Order")
            .with_output("Order");
        let mut ex = Exchange::new(ExchangeContract::new(QName::local("Orders"), op))
            .with_message(Message::new().with_content(content));
        ex.begin_send().unwrap();
        ex
    }

    #[tokio::test]
    async fn valid_request_passes() {
        let mut ex = sent(json!({"id": "o-1"}));
        handler().handle_message(&mut ex).await.unwrap();
    }

    #[tokio::test]
    async fn invalid_request_names_validator() {
        let mut ex = sent(json!({"qty": 1}));
        let err = handler().handle_message(&mut ex).await.unwrap_err();
        let HandlerError::Validation { validator, detail } = err else {
            panic!("expected validation failure");
        };
        assert_eq!(validator, "order-schema");
        assert_eq!(detail, "missing required field 'id'");
    }

    #[tokio::test]
    async fn reply_validated_against_output_type() {
        let mut ex = sent(json!({"id": "o-1"}));
        ex.set_reply(Message::new().with_content(json!({"status": "ok"})))
            .unwrap();
        assert!(handler().handle_message(&mut ex).await.is_err());
    }

    #[tokio::test]
    async fn unknown_content_type_passes() {
        let op = ServiceOperation::in_only("ping");
        let mut ex = Exchange::new(ExchangeContract::new(QName::local("Ping"), op))
            .with_message(Message::new().with_content(json!(42)));
        ex.begin_send().unwrap();
        handler().handle_message(&mut ex).await.unwrap();
    }
}
