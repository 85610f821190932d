//! Service domain: the registry, the bus, and the dispatch pipeline of one
//! named collection of services.

use std::sync::Arc;

use esb_core::{
    Credential, Exchange, ExchangeContract, ExchangeError, ExchangePattern, Fault, FaultCause, Message, QName,
    TransactionContext, TransactionManager, Transformer, TransformerRegistry, Validator,
};
use parking_lot::Mutex;
use serde_json::Value;
use tower::ServiceExt;
use tracing::{info, warn};

use super::config::BusConfig;
use super::dispatch::{DispatchError, ExchangeBus};
use super::handler::{ChainError, ExchangeHandler, HandlerChain};
use super::middleware::{build_dispatch_pipeline, DispatchPipeline};
use super::registry::{RegisteredService, RegistrationError, ServiceRegistry};
use crate::handlers::{
    Authenticator, SecurityHandler, ServiceInvocationHandler, StaticAuthenticator, TransactionHandler,
    TransformHandler, ValidationHandler,
};

// ---------------------------------------------------------------------------
// ServiceDomain
// ---------------------------------------------------------------------------

pub struct ServiceDomain {
    config: BusConfig,
    registry: Arc<ServiceRegistry>,
    bus: Arc<ExchangeBus>,
    /// `BoxCloneService` is not `Sync`; each dispatch clones it out.
    pipeline: Mutex<DispatchPipeline>,
}

impl ServiceDomain {
    #[must_use]
    pub fn builder(config: BusConfig) -> ServiceDomainBuilder {
        ServiceDomainBuilder::new(config)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.domain
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// The bus, for chain inspection and reconfiguration.
    #[must_use]
    pub fn bus(&self) -> &Arc<ExchangeBus> {
        &self.bus
    }

    /// # Errors
    ///
    /// See [`ServiceRegistry::register`].
    pub fn register(&self, service: RegisteredService) -> Result<(), RegistrationError> {
        self.registry.register(service).map(|_| ())
    }

    /// New exchange addressed to `service`, with the operation resolved
    /// against the registered interface. `None` selects the only operation
    /// of a single-operation interface.
    ///
    /// # Errors
    ///
    /// - `UnknownService` when nothing is registered under `service`.
    /// - `NoOperations`, `OperationNameRequired` or `UnknownOperation` when
    ///   the operation cannot be resolved.
    pub fn create_exchange(&self, service: &QName, operation: Option<&str>) -> Result<Exchange, ExchangeError> {
        let registered = self
            .registry
            .get(service)
            .ok_or_else(|| ExchangeError::UnknownService(service.to_string()))?;
        let op = registered.interface.resolve(service, operation)?.clone();
        let contract = ExchangeContract::new(service.clone(), op).with_security(registered.security.clone());
        Ok(Exchange::new(contract))
    }

    /// Dispatches `exchange` through the pipeline and returns it processed.
    ///
    /// # Errors
    ///
    /// Returns `Overloaded` when load is shed, or `Contract` when the
    /// exchange was already sent.
    pub async fn send(&self, exchange: Exchange) -> Result<Exchange, DispatchError> {
        let pipeline = self.pipeline.lock().clone();
        pipeline.oneshot(exchange).await
    }

    /// Client-side helper for invoking `service`.
    #[must_use]
    pub fn invoker(&self, service: QName) -> Invoker<'_> {
        Invoker {
            domain: self,
            service,
            reply_type: None,
            properties: Vec::new(),
            credentials: Vec::new(),
            transaction: None,
        }
    }

    /// Starts all registered services in registration order.
    ///
    /// # Errors
    ///
    /// Returns the first service start failure.
    pub async fn start(&self) -> anyhow::Result<()> {
        self.registry.start_all().await?;
        info!(domain = self.name(), services = self.registry.len(), "service domain started");
        Ok(())
    }

    /// Stops all registered services in reverse registration order.
    ///
    /// # Errors
    ///
    /// Returns the first service stop failure.
    pub async fn stop(&self) -> anyhow::Result<()> {
        self.registry.stop_all().await?;
        info!(domain = self.name(), "service domain stopped");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ServiceDomainBuilder
// ---------------------------------------------------------------------------

/// Assembles the default handler chain: transaction, security,
/// transformation, validation, then any extra handlers.
pub struct ServiceDomainBuilder {
    config: BusConfig,
    transaction_manager: Option<Arc<dyn TransactionManager>>,
    authenticator: Arc<dyn Authenticator>,
    transformers: TransformerRegistry,
    validation: ValidationHandler,
    extra: Vec<Arc<dyn ExchangeHandler>>,
}

impl ServiceDomainBuilder {
    fn new(config: BusConfig) -> Self {
        Self {
            config,
            transaction_manager: None,
            authenticator: Arc::new(StaticAuthenticator::new()),
            transformers: TransformerRegistry::new(),
            validation: ValidationHandler::new(),
            extra: Vec::new(),
        }
    }

    /// Without a manager the transaction handler is a no-op.
    #[must_use]
    pub fn transaction_manager(mut self, manager: Arc<dyn TransactionManager>) -> Self {
        self.transaction_manager = Some(manager);
        self
    }

    #[must_use]
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    #[must_use]
    pub fn transformer(mut self, from: QName, to: QName, transformer: Arc<dyn Transformer>) -> Self {
        self.transformers.register(from, to, transformer);
        self
    }

    #[must_use]
    pub fn validator(mut self, content_type: QName, validator: Arc<dyn Validator>) -> Self {
        self.validation = self.validation.with_validator(content_type, validator);
        self
    }

    /// Appends a handler after the built-in ones.
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn ExchangeHandler>) -> Self {
        self.extra.push(handler);
        self
    }

    /// # Errors
    ///
    /// Returns `DuplicateName` when an extra handler reuses a name.
    pub fn build(self) -> Result<ServiceDomain, ChainError> {
        let transaction = match self.transaction_manager {
            Some(tm) => TransactionHandler::new(tm),
            None => TransactionHandler::disabled(),
        };

        let mut chain = HandlerChain::new();
        chain.add_last(Arc::new(transaction))?;
        chain.add_last(Arc::new(SecurityHandler::new(self.authenticator)))?;
        chain.add_last(Arc::new(TransformHandler::new(self.transformers)))?;
        chain.add_last(Arc::new(self.validation))?;
        for handler in self.extra {
            chain.add_last(handler)?;
        }

        let registry = Arc::new(ServiceRegistry::new());
        let provider = Arc::new(ServiceInvocationHandler::new(Arc::clone(&registry)));
        let bus = Arc::new(ExchangeBus::new(chain, provider));
        let pipeline = build_dispatch_pipeline(Arc::clone(&bus), &self.config);

        Ok(ServiceDomain {
            config: self.config,
            registry,
            bus,
            pipeline: Mutex::new(pipeline),
        })
    }
}

// ---------------------------------------------------------------------------
// Invoker
// ---------------------------------------------------------------------------

/// Failure of an [`Invoker`] call.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error("invocation faulted: {}", .0.cause())]
    Fault(Fault),
    #[error(transparent)]
    Contract(#[from] ExchangeError),
    #[error("bus overloaded, try again later")]
    Overloaded,
    #[error("operation {operation} is {actual}, expected {expected}")]
    PatternMismatch {
        operation: String,
        actual: ExchangePattern,
        expected: ExchangePattern,
    },
    #[error("exchange completed without a reply")]
    NoReply,
}

impl InvocationError {
    /// Cause of the fault, for `Fault` errors.
    #[must_use]
    pub fn cause(&self) -> Option<&FaultCause> {
        match self {
            Self::Fault(fault) => Some(fault.cause()),
            _ => None,
        }
    }
}

impl From<DispatchError> for InvocationError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::Contract(e) => Self::Contract(e),
            DispatchError::Overloaded => Self::Overloaded,
        }
    }
}

/// Builds and sends exchanges to one service.
pub struct Invoker<'a> {
    domain: &'a ServiceDomain,
    service: QName,
    reply_type: Option<QName>,
    properties: Vec<(String, Value)>,
    credentials: Vec<Credential>,
    transaction: Option<TransactionContext>,
}

impl Invoker<'_> {
    /// Exchange-scoped property set on every exchange this invoker sends.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credentials.push(credential);
        self
    }

    /// Runs every exchange under the caller's transaction context, so
    /// operations that propagate a transaction can join it. The caller
    /// still owns completing that transaction.
    #[must_use]
    pub fn with_transaction(mut self, transaction: TransactionContext) -> Self {
        self.transaction = Some(transaction);
        self
    }

    /// Reply content type the caller expects.
    #[must_use]
    pub fn with_reply_type(mut self, reply_type: QName) -> Self {
        self.reply_type = Some(reply_type);
        self
    }

    fn prepare(&self, operation: &str, content: Value, expected: ExchangePattern) -> Result<Exchange, InvocationError> {
        let mut exchange = self.domain.create_exchange(&self.service, Some(operation))?;
        if exchange.pattern() != expected {
            return Err(InvocationError::PatternMismatch {
                operation: operation.to_string(),
                actual: exchange.pattern(),
                expected,
            });
        }
        if let Some(reply_type) = &self.reply_type {
            let contract = exchange.contract().clone().with_reply_type(reply_type.clone());
            exchange.set_contract(contract)?;
        }
        for (name, value) in &self.properties {
            exchange.context_mut().set_property(name.clone(), value.clone());
        }
        for credential in &self.credentials {
            exchange.security_mut().add_credential(credential.clone());
        }
        if let Some(transaction) = &self.transaction {
            *exchange.transaction_mut() = transaction.clone();
        }
        let mut message = Message::new().with_content(content);
        message.set_content_type(exchange.contract().operation.input_type().cloned());
        Ok(exchange.with_message(message))
    }

    /// Sends a request and waits for the reply.
    ///
    /// # Errors
    ///
    /// Returns `Fault` when the exchange faulted; the fault's cause is the
    /// service's declared error or a handler error.
    pub async fn in_out(&self, operation: &str, content: impl Into<Value>) -> Result<Message, InvocationError> {
        let exchange = self.prepare(operation, content.into(), ExchangePattern::InOut)?;
        let mut exchange = self.domain.send(exchange).await?;
        if let Some(fault) = exchange.take_fault() {
            return Err(InvocationError::Fault(fault));
        }
        exchange.take_reply().ok_or(InvocationError::NoReply)
    }

    /// Sends a one-way message. Faults are logged, not returned.
    ///
    /// # Errors
    ///
    /// Returns an error only when the exchange could not be dispatched.
    pub async fn in_only(&self, operation: &str, content: impl Into<Value>) -> Result<(), InvocationError> {
        let exchange = self.prepare(operation, content.into(), ExchangePattern::InOnly)?;
        let exchange = self.domain.send(exchange).await?;
        if let Some(fault) = exchange.fault() {
            warn!(
                service = %self.service,
                operation,
                exchange_id = %exchange.id(),
                error = %fault.cause(),
                "one-way exchange faulted"
            );
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
