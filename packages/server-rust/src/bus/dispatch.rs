//! The exchange bus: threads an exchange through the handler chain and the
//! provider, owning phase transitions and fault routing.
//!
//! # Passes
//!
//! 1. **IN pass**: `handle_message` on every handler in chain order. A
//!    handler error (or a handler faulting the exchange) stops the pass and
//!    runs `handle_fault` on every handler entered so far, newest first,
//!    including the one that failed.
//! 2. **Policy check**: every required policy must have been provided, else
//!    the exchange faults with `PolicyViolation`.
//! 3. **Provider**: the terminal handler runs exactly once.
//! 4. **Reply pass**: `handle_message` on every handler in reverse order
//!    (phase `OUT` for `IN_OUT`, still `IN` for `IN_ONLY`). A failure here
//!    faults the exchange, discarding the reply, and runs `handle_fault` on
//!    the handlers the reply pass has not reached yet.
//!
//! A provider fault runs `handle_fault` on every handler in reverse order.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use arc_swap::ArcSwap;
use esb_core::{Exchange, ExchangeError, ExchangePattern, ExchangePhase, Fault, HandlerError};
use parking_lot::Mutex;
use tower::Service;
use tracing::{debug, error, info_span, warn, Instrument};

use super::handler::{ChainError, ExchangeHandler, HandlerChain};

// ---------------------------------------------------------------------------
// DispatchError
// ---------------------------------------------------------------------------

/// Errors returned by the dispatch pipeline instead of an exchange.
///
/// Faults are not errors: a faulted exchange is a successful dispatch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Contract(#[from] ExchangeError),
    #[error("bus overloaded, try again later")]
    Overloaded,
}

// ---------------------------------------------------------------------------
// ExchangeBus
// ---------------------------------------------------------------------------

/// Handler chain plus terminal provider.
///
/// The chain sits behind an `ArcSwap`: in-flight exchanges keep the chain
/// snapshot they started with while `reconfigure` installs a new one.
pub struct ExchangeBus {
    chain: ArcSwap<HandlerChain>,
    provider: Arc<dyn ExchangeHandler>,
    /// Serializes writers; readers never take it.
    reconfigure_lock: Mutex<()>,
}

impl ExchangeBus {
    #[must_use]
    pub fn new(chain: HandlerChain, provider: Arc<dyn ExchangeHandler>) -> Self {
        Self {
            chain: ArcSwap::from_pointee(chain),
            provider,
            reconfigure_lock: Mutex::new(()),
        }
    }

    /// Current chain snapshot.
    #[must_use]
    pub fn chain(&self) -> Arc<HandlerChain> {
        self.chain.load_full()
    }

    /// Applies `change` to a copy of the chain and installs the result.
    /// Nothing is installed if `change` fails.
    ///
    /// # Errors
    ///
    /// Returns whatever `change` returns.
    pub fn reconfigure<F>(&self, change: F) -> Result<(), ChainError>
    where
        F: FnOnce(&mut HandlerChain) -> Result<(), ChainError>,
    {
        let _guard = self.reconfigure_lock.lock();
        let mut next = HandlerChain::clone(&self.chain.load());
        change(&mut next)?;
        self.chain.store(Arc::new(next));
        Ok(())
    }

    /// Processes `exchange` to completion. On return the exchange holds a
    /// reply, a fault, or (for `IN_ONLY`) neither.
    ///
    /// # Errors
    ///
    /// Returns `AlreadySent` if the exchange was sent before. Handler and
    /// provider failures are not errors; they fault the exchange.
    pub async fn send(&self, exchange: &mut Exchange) -> Result<(), ExchangeError> {
        exchange.begin_send()?;
        let chain = self.chain.load_full();
        let handlers = chain.handlers();

        for (idx, handler) in handlers.iter().enumerate() {
            if let Err(err) = handler.handle_message(exchange).await {
                debug!(handler = handler.name(), error = %err, "handler failed on IN pass");
                raise(exchange, err);
            }
            if exchange.is_faulted() {
                fault_pass(exchange, &handlers[..=idx]).await;
                return Ok(());
            }
        }

        let unmet = exchange.policies().unmet();
        if !unmet.is_empty() {
            raise(exchange, HandlerError::PolicyViolation { violated: unmet });
            fault_pass(exchange, handlers).await;
            return Ok(());
        }

        if let Err(err) = self.provider.handle_message(exchange).await {
            raise(exchange, err);
        }
        if exchange.pattern() == ExchangePattern::InOut && exchange.phase() == Some(ExchangePhase::In) {
            raise(
                exchange,
                HandlerError::handler("provider completed an IN_OUT exchange without a reply"),
            );
        }
        if exchange.is_faulted() {
            fault_pass(exchange, handlers).await;
            return Ok(());
        }

        for (idx, handler) in handlers.iter().enumerate().rev() {
            if let Err(err) = handler.handle_message(exchange).await {
                warn!(handler = handler.name(), error = %err, "handler failed on reply pass");
                raise(exchange, err);
            }
            if exchange.is_faulted() {
                fault_pass(exchange, &handlers[..idx]).await;
                return Ok(());
            }
        }
        Ok(())
    }
}

/// Faults the exchange with `err` unless it is already faulted, in which
/// case the first fault wins.
fn raise(exchange: &mut Exchange, err: HandlerError) {
    if exchange.is_faulted() {
        debug!(error = %err, "exchange already faulted, keeping the first fault");
        return;
    }
    if let Err(e) = exchange.set_fault(Fault::from(err)) {
        error!(exchange_id = %exchange.id(), error = %e, "failed to fault exchange");
    }
}

async fn fault_pass(exchange: &mut Exchange, entered: &[Arc<dyn ExchangeHandler>]) {
    for handler in entered.iter().rev() {
        if let Err(err) = handler.handle_fault(exchange).await {
            error!(handler = handler.name(), error = %err, "fault handler failed");
        }
    }
}

// ---------------------------------------------------------------------------
// BusService (tower adapter)
// ---------------------------------------------------------------------------

/// `tower::Service<Exchange>` over a shared bus, the innermost service of
/// the dispatch pipeline.
#[derive(Clone)]
pub struct BusService {
    bus: Arc<ExchangeBus>,
}

impl BusService {
    #[must_use]
    pub fn new(bus: Arc<ExchangeBus>) -> Self {
        Self { bus }
    }
}

impl Service<Exchange> for BusService {
    type Response = Exchange;
    type Error = DispatchError;
    type Future = Pin<Box<dyn Future<Output = Result<Exchange, DispatchError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, mut exchange: Exchange) -> Self::Future {
        let bus = Arc::clone(&self.bus);
        let span = info_span!(
            "exchange",
            id = %exchange.id(),
            service = %exchange.contract().service,
            operation = exchange.contract().operation.name(),
            pattern = %exchange.pattern(),
        );
        Box::pin(
            async move {
                bus.send(&mut exchange).await?;
                Ok(exchange)
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use esb_core::{
        ExchangeContract, FaultCause, Message, Policy, QName, SecurityPolicy, ServiceOperation,
    };
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;

    type Log = Arc<Mutex<Vec<String>>>;

    fn phase(exchange: &Exchange) -> &'static str {
        exchange.phase().map_or("NONE", ExchangePhase::as_str)
    }

    /// Records every call; optionally fails on a given phase.
    struct Recording {
        name: &'static str,
        log: Log,
        fail_on: Option<ExchangePhase>,
        fail_fault: bool,
    }

    impl Recording {
        fn new(name: &'static str, log: &Log) -> Arc<Self> {
            Arc::new(Self {
                name,
                log: Arc::clone(log),
                fail_on: None,
                fail_fault: false,
            })
        }

        fn failing(name: &'static str, log: &Log, on: ExchangePhase) -> Arc<Self> {
            Arc::new(Self {
                name,
                log: Arc::clone(log),
                fail_on: Some(on),
                fail_fault: false,
            })
        }
    }

    #[async_trait]
    impl ExchangeHandler for Recording {
        fn name(&self) -> &str {
            self.name
        }

        async fn handle_message(&self, exchange: &mut Exchange) -> Result<(), HandlerError> {
            self.log.lock().push(format!("{}:{}", self.name, phase(exchange)));
            if exchange.phase() == self.fail_on {
                return Err(HandlerError::handler(format!("{} refused", self.name)));
            }
            Ok(())
        }

        async fn handle_fault(&self, exchange: &mut Exchange) -> Result<(), HandlerError> {
            self.log.lock().push(format!("{}:fault:{}", self.name, phase(exchange)));
            if self.fail_fault {
                return Err(HandlerError::handler("cleanup failed"));
            }
            Ok(())
        }
    }

    /// Echoes the request content as the reply, or faults when asked.
    struct EchoProvider {
        log: Log,
        fail: bool,
    }

    #[async_trait]
    impl ExchangeHandler for EchoProvider {
        fn name(&self) -> &str {
            "provider"
        }

        async fn handle_message(&self, exchange: &mut Exchange) -> Result<(), HandlerError> {
            self.log.lock().push("provider".to_string());
            if self.fail {
                return Err(HandlerError::handler("provider down"));
            }
            if exchange.pattern() == ExchangePattern::InOut {
                let content = exchange.message().content().cloned().unwrap_or_default();
                exchange
                    .set_reply(Message::new().with_content(content))
                    .map_err(|e| HandlerError::wrap(e.into()))?;
            }
            Ok(())
        }
    }

    fn bus(handlers: Vec<Arc<dyn ExchangeHandler>>, log: &Log, provider_fails: bool) -> ExchangeBus {
        let mut chain = HandlerChain::new();
        for h in handlers {
            chain.add_last(h).unwrap();
        }
        ExchangeBus::new(
            chain,
            Arc::new(EchoProvider {
                log: Arc::clone(log),
                fail: provider_fails,
            }),
        )
    }

    fn exchange(op: ServiceOperation) -> Exchange {
        Exchange::new(ExchangeContract::new(QName::local("Echo"), op))
            .with_message(Message::new().with_content(json!("hi")))
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().clone()
    }

    #[tokio::test]
    async fn in_out_runs_forward_then_reverse() {
        let log = Log::default();
        let bus = bus(
            vec![Recording::new("a", &log), Recording::new("b", &log), Recording::new("c", &log)],
            &log,
            false,
        );
        let mut ex = exchange(ServiceOperation::in_out("echo"));
        bus.send(&mut ex).await.unwrap();

        assert_eq!(
            entries(&log),
            ["a:IN", "b:IN", "c:IN", "provider", "c:OUT", "b:OUT", "a:OUT"]
        );
        assert_eq!(ex.phase(), Some(ExchangePhase::Out));
        assert_eq!(ex.reply().unwrap().content(), Some(&json!("hi")));
        assert!(ex.fault().is_none());
    }

    #[tokio::test]
    async fn in_only_completion_pass_stays_in_phase() {
        let log = Log::default();
        let bus = bus(vec![Recording::new("a", &log), Recording::new("b", &log)], &log, false);
        let mut ex = exchange(ServiceOperation::in_only("notify"));
        bus.send(&mut ex).await.unwrap();

        assert_eq!(entries(&log), ["a:IN", "b:IN", "provider", "b:IN", "a:IN"]);
        assert!(ex.reply().is_none());
        assert!(ex.fault().is_none());
    }

    #[tokio::test]
    async fn in_pass_failure_faults_entered_handlers_in_reverse() {
        let log = Log::default();
        let bus = bus(
            vec![
                Recording::new("a", &log),
                Recording::failing("b", &log, ExchangePhase::In),
                Recording::new("c", &log),
            ],
            &log,
            false,
        );
        let mut ex = exchange(ServiceOperation::in_out("echo"));
        bus.send(&mut ex).await.unwrap();

        assert_eq!(entries(&log), ["a:IN", "b:IN", "b:fault:FAULT", "a:fault:FAULT"]);
        assert!(ex.is_faulted());
        assert_eq!(ex.fault().unwrap().cause().to_string(), "b refused");
    }

    #[tokio::test]
    async fn unmet_policy_faults_before_provider() {
        let log = Log::default();
        let bus = bus(vec![Recording::new("a", &log)], &log, false);
        let mut ex = exchange(ServiceOperation::in_out("echo").requires(SecurityPolicy::Authorization));
        bus.send(&mut ex).await.unwrap();

        assert_eq!(entries(&log), ["a:IN", "a:fault:FAULT"]);
        let Some(FaultCause::Handler(HandlerError::PolicyViolation { violated })) =
            ex.fault().map(Fault::cause)
        else {
            panic!("expected policy violation");
        };
        assert_eq!(violated.len(), 1);
        assert!(violated.contains(&Policy::from(SecurityPolicy::Authorization)));
    }

    #[tokio::test]
    async fn provider_failure_runs_full_fault_pass() {
        let log = Log::default();
        let bus = bus(vec![Recording::new("a", &log), Recording::new("b", &log)], &log, true);
        let mut ex = exchange(ServiceOperation::in_out("echo"));
        bus.send(&mut ex).await.unwrap();

        assert_eq!(
            entries(&log),
            ["a:IN", "b:IN", "provider", "b:fault:FAULT", "a:fault:FAULT"]
        );
        assert!(ex.reply().is_none());
    }

    #[tokio::test]
    async fn reply_pass_failure_replaces_reply_with_fault() {
        let log = Log::default();
        let bus = bus(
            vec![
                Recording::new("a", &log),
                Recording::new("b", &log),
                Recording::failing("c", &log, ExchangePhase::Out),
            ],
            &log,
            false,
        );
        let mut ex = exchange(ServiceOperation::in_out("echo"));
        bus.send(&mut ex).await.unwrap();

        assert_eq!(
            entries(&log),
            ["a:IN", "b:IN", "c:IN", "provider", "c:OUT", "b:fault:FAULT", "a:fault:FAULT"]
        );
        assert!(ex.reply().is_none());
        assert_eq!(ex.fault().unwrap().cause().to_string(), "c refused");
    }

    #[tokio::test]
    async fn fault_handler_errors_do_not_mask_fault() {
        let log = Log::default();
        let noisy = Arc::new(Recording {
            name: "noisy",
            log: Arc::clone(&log),
            fail_on: None,
            fail_fault: true,
        });
        let bus = bus(vec![noisy, Recording::failing("b", &log, ExchangePhase::In)], &log, false);
        let mut ex = exchange(ServiceOperation::in_out("echo"));
        bus.send(&mut ex).await.unwrap();

        assert_eq!(ex.fault().unwrap().cause().to_string(), "b refused");
    }

    #[tokio::test]
    async fn send_twice_is_contract_error() {
        let log = Log::default();
        let bus = bus(vec![], &log, false);
        let mut ex = exchange(ServiceOperation::in_out("echo"));
        bus.send(&mut ex).await.unwrap();
        assert_eq!(bus.send(&mut ex).await.unwrap_err(), ExchangeError::AlreadySent);
        assert_eq!(entries(&log), ["provider"]);
    }

    #[tokio::test]
    async fn reconfigured_chain_applies_to_next_exchange() {
        let log = Log::default();
        let bus = bus(vec![Recording::new("a", &log)], &log, false);
        bus.reconfigure(|chain| {
            chain.replace("a", Recording::new("z", &log))?;
            Ok(())
        })
        .unwrap();

        let mut ex = exchange(ServiceOperation::in_only("notify"));
        bus.send(&mut ex).await.unwrap();
        assert_eq!(entries(&log), ["z:IN", "provider", "z:IN"]);

        let failed = bus.reconfigure(|chain| chain.add_last(Recording::new("z", &log)));
        assert!(failed.is_err());
        assert_eq!(bus.chain().handler_names(), ["z"]);
    }

    #[tokio::test]
    async fn bus_service_returns_processed_exchange() {
        let log = Log::default();
        let svc = BusService::new(Arc::new(bus(vec![], &log, false)));
        let ex = svc.oneshot(exchange(ServiceOperation::in_out("echo"))).await.unwrap();
        assert_eq!(ex.reply().unwrap().content(), Some(&json!("hi")));
    }
}
