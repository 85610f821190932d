//! Transformation handler: converts request content to the operation's
//! input type and reply content to the type the consumer expects.

use async_trait::async_trait;
use esb_core::{Exchange, ExchangePhase, HandlerError, Message, QName, TransformerRegistry};
use tracing::debug;

use crate::bus::handler::ExchangeHandler;

pub struct TransformHandler {
    registry: TransformerRegistry,
}

impl TransformHandler {
    pub const NAME: &'static str = "transformation";

    #[must_use]
    pub fn new(registry: TransformerRegistry) -> Self {
        Self { registry }
    }

    /// Converts `message` from `from` to `to`. Content without a declared
    /// type, or already of the target type, is left alone.
    fn apply(&self, message: &mut Message, from: Option<QName>, to: &QName) -> Result<(), HandlerError> {
        let Some(from) = from.filter(|f| f != to) else {
            return Ok(());
        };
        let transformer = self.registry.get(&from, to).ok_or_else(|| HandlerError::Transformation {
            transformer: format!("{from} -> {to}"),
            message: "transformations not applied".to_string(),
            cause: None,
        })?;

        let content = message.take_content().unwrap_or_default();
        let transformed = transformer
            .transform(content)
            .map_err(|cause| HandlerError::Transformation {
                transformer: transformer.name().to_string(),
                message: cause.to_string(),
                cause: Some(cause),
            })?;
        message.set_content(transformed).set_content_type(Some(to.clone()));
        debug!(transformer = transformer.name(), %from, %to, "content transformed");
        Ok(())
    }
}

#[async_trait]
impl ExchangeHandler for TransformHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn handle_message(&self, exchange: &mut Exchange) -> Result<(), HandlerError> {
        let contract = exchange.contract();
        match exchange.phase() {
            Some(ExchangePhase::In) => {
                let Some(to) = contract.operation.input_type().cloned() else {
                    return Ok(());
                };
                let from = exchange.message().content_type().cloned();
                self.apply(exchange.message_mut(), from, &to)
            }
            Some(ExchangePhase::Out) => {
                let Some(to) = contract.reply_type.clone() else {
                    return Ok(());
                };
                let output_type = contract.operation.output_type().cloned();
                let Some(reply) = exchange.reply_mut() else {
                    return Ok(());
                };
                let from = reply.content_type().cloned().or(output_type);
                self.apply(reply, from, &to)
            }
            _ => Ok(()),
        }
    }
}
