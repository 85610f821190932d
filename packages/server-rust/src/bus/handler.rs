//! Handler contract and the ordered handler chain.

use std::sync::Arc;

use async_trait::async_trait;
use esb_core::{Exchange, HandlerError};

// ---------------------------------------------------------------------------
// ExchangeHandler trait
// ---------------------------------------------------------------------------

/// A step in the exchange pipeline.
///
/// Handler instances are shared across concurrent exchanges and must keep
/// per-exchange state on the exchange itself (typically as transient
/// exchange-scoped properties).
///
/// `handle_message` is called twice per successful exchange: once on the way
/// in (phase `IN`) and once on the way back (phase `OUT` for `IN_OUT`, still
/// `IN` for the `IN_ONLY` completion pass). `handle_fault` is called instead
/// of the second `handle_message` when the exchange faults.
#[async_trait]
pub trait ExchangeHandler: Send + Sync {
    /// Unique name within a chain.
    fn name(&self) -> &str;

    /// # Errors
    ///
    /// Any error stops the current pass and faults the exchange.
    async fn handle_message(&self, exchange: &mut Exchange) -> Result<(), HandlerError>;

    /// Cleanup on fault. Errors are logged by the bus and never replace the
    /// exchange's fault.
    ///
    /// # Errors
    ///
    /// Returns an error when cleanup failed.
    async fn handle_fault(&self, _exchange: &mut Exchange) -> Result<(), HandlerError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HandlerChain
// ---------------------------------------------------------------------------

/// Errors from chain reconfiguration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("handler {0} is already in the chain")]
    DuplicateName(String),
    #[error("no handler named {0} in the chain")]
    UnknownHandler(String),
}

/// Ordered, uniquely named handlers.
#[derive(Clone, Default)]
pub struct HandlerChain {
    handlers: Vec<Arc<dyn ExchangeHandler>>,
}

impl HandlerChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.handlers.iter().position(|h| h.name() == name)
    }

    fn ensure_unique(&self, handler: &Arc<dyn ExchangeHandler>) -> Result<(), ChainError> {
        if self.position(handler.name()).is_some() {
            return Err(ChainError::DuplicateName(handler.name().to_string()));
        }
        Ok(())
    }

    /// Inserts a handler at the front of the chain.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateName` if a handler with the same name exists.
    pub fn add_first(&mut self, handler: Arc<dyn ExchangeHandler>) -> Result<(), ChainError> {
        self.ensure_unique(&handler)?;
        self.handlers.insert(0, handler);
        Ok(())
    }

    /// Appends a handler to the end of the chain.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateName` if a handler with the same name exists.
    pub fn add_last(&mut self, handler: Arc<dyn ExchangeHandler>) -> Result<(), ChainError> {
        self.ensure_unique(&handler)?;
        self.handlers.push(handler);
        Ok(())
    }

    /// Replaces the handler called `name` in place, returning the old one.
    /// The replacement may carry a different name.
    ///
    /// # Errors
    ///
    /// Returns `UnknownHandler` if no handler is called `name`, or
    /// `DuplicateName` if the replacement's name collides with another
    /// handler.
    pub fn replace(
        &mut self,
        name: &str,
        handler: Arc<dyn ExchangeHandler>,
    ) -> Result<Arc<dyn ExchangeHandler>, ChainError> {
        let idx = self
            .position(name)
            .ok_or_else(|| ChainError::UnknownHandler(name.to_string()))?;
        if let Some(other) = self.position(handler.name()) {
            if other != idx {
                return Err(ChainError::DuplicateName(handler.name().to_string()));
            }
        }
        Ok(std::mem::replace(&mut self.handlers[idx], handler))
    }

    /// Removes and returns the handler called `name`.
    pub fn remove(&mut self, name: &str) -> Option<Arc<dyn ExchangeHandler>> {
        self.position(name).map(|idx| self.handlers.remove(idx))
    }

    #[must_use]
    pub fn handler_names(&self) -> Vec<String> {
        self.handlers.iter().map(|h| h.name().to_string()).collect()
    }

    #[must_use]
    pub fn handlers(&self) -> &[Arc<dyn ExchangeHandler>] {
        &self.handlers
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.handler_names()).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl ExchangeHandler for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn handle_message(&self, _exchange: &mut Exchange) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    fn named(name: &'static str) -> Arc<dyn ExchangeHandler> {
        Arc::new(Named(name))
    }

    #[test]
    fn add_first_and_last_order() {
        let mut chain = HandlerChain::new();
        chain.add_last(named("b")).unwrap();
        chain.add_last(named("c")).unwrap();
        chain.add_first(named("a")).unwrap();
        assert_eq!(chain.handler_names(), ["a", "b", "c"]);
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut chain = HandlerChain::new();
        chain.add_last(named("a")).unwrap();
        assert_eq!(
            chain.add_first(named("a")).unwrap_err(),
            ChainError::DuplicateName("a".into())
        );
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn replace_keeps_position() {
        let mut chain = HandlerChain::new();
        chain.add_last(named("a")).unwrap();
        chain.add_last(named("b")).unwrap();
        chain.add_last(named("c")).unwrap();

        let old = chain.replace("b", named("b2")).unwrap();
        assert_eq!(old.name(), "b");
        assert_eq!(chain.handler_names(), ["a", "b2", "c"]);

        assert!(matches!(
            chain.replace("b2", named("c")),
            Err(ChainError::DuplicateName(n)) if n == "c"
        ));
        assert!(matches!(
            chain.replace("zz", named("z")),
            Err(ChainError::UnknownHandler(n)) if n == "zz"
        ));
    }

    #[test]
    fn remove_by_name() {
        let mut chain = HandlerChain::new();
        chain.add_last(named("a")).unwrap();
        chain.add_last(named("b")).unwrap();
        assert_eq!(chain.remove("a").unwrap().name(), "a");
        assert!(chain.remove("a").is_none());
        assert_eq!(chain.handler_names(), ["b"]);
    }
}
