//! The exchange: state of one conversation between a consumer and a provider.
//!
//! # Phases
//!
//! ```text
//!   (none) --send--> IN --reply--> OUT
//!                     |             |
//!                     +----fault----+--> FAULT (terminal)
//! ```
//!
//! The pattern is fixed at creation. An `IN_ONLY` exchange never gets a
//! reply. Contract violations (sending twice, replying to `IN_ONLY`, faulting
//! a new exchange) are reported as [`ExchangeError`] and leave the exchange
//! unchanged.

use std::fmt;

use uuid::Uuid;

use crate::context::{Context, Scope};
use crate::contract::{ExchangeContract, ExchangePattern};
use crate::error::{ExchangeError, FaultCause, HandlerError};
use crate::message::Message;
use crate::policy::PolicySet;
use crate::security::SecurityContext;
use crate::transaction::TransactionContext;

/// Exchange property that, when truthy, makes the transaction handler mark
/// the current transaction rollback-only on fault.
pub const ROLLBACK_ON_FAULT: &str = "exchange.rollbackOnFault";

/// Phase of a sent exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangePhase {
    In,
    Out,
    Fault,
}

impl ExchangePhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::In => "IN",
            Self::Out => "OUT",
            Self::Fault => "FAULT",
        }
    }
}

impl fmt::Display for ExchangePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Fault
// ---------------------------------------------------------------------------

/// Fault set on an exchange: a detail message plus the typed cause.
#[derive(Debug)]
pub struct Fault {
    message: Message,
    cause: FaultCause,
}

impl Fault {
    /// Fault with an empty detail message.
    #[must_use]
    pub fn new(cause: impl Into<FaultCause>) -> Self {
        Self {
            message: Message::new(),
            cause: cause.into(),
        }
    }

    /// Fault whose detail message carries the cause's text as content.
    #[must_use]
    pub fn describing(cause: impl Into<FaultCause>) -> Self {
        let cause = cause.into();
        let message = Message::new().with_content(cause.to_string());
        Self { message, cause }
    }

    #[must_use]
    pub fn with_message(mut self, message: Message) -> Self {
        self.message = message;
        self
    }

    #[must_use]
    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }

    #[must_use]
    pub fn cause(&self) -> &FaultCause {
        &self.cause
    }

    #[must_use]
    pub fn into_cause(self) -> FaultCause {
        self.cause
    }
}

impl From<HandlerError> for Fault {
    fn from(e: HandlerError) -> Self {
        Self::describing(e)
    }
}

// ---------------------------------------------------------------------------
// Exchange
// ---------------------------------------------------------------------------

/// One request/response (or one-way) conversation.
#[derive(Debug)]
pub struct Exchange {
    id: Uuid,
    pattern: ExchangePattern,
    phase: Option<ExchangePhase>,
    contract: ExchangeContract,
    message: Message,
    reply: Option<Message>,
    fault: Option<Fault>,
    context: Context,
    policies: PolicySet,
    transaction: TransactionContext,
    security: SecurityContext,
}

impl Exchange {
    /// Creates an unsent exchange bound to `contract`.
    ///
    /// The pattern comes from the contract's operation, and the operation's
    /// required policies are copied onto the exchange.
    #[must_use]
    pub fn new(contract: ExchangeContract) -> Self {
        let policies = PolicySet::requiring(contract.operation.required_policies().iter().copied());
        Self {
            id: Uuid::new_v4(),
            pattern: contract.pattern(),
            phase: None,
            contract,
            message: Message::new(),
            reply: None,
            fault: None,
            context: Context::new(Scope::Exchange),
            policies,
            transaction: TransactionContext::default(),
            security: SecurityContext::default(),
        }
    }

    /// Builder-style request message setter.
    #[must_use]
    pub fn with_message(mut self, message: Message) -> Self {
        self.message = message;
        self
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn pattern(&self) -> ExchangePattern {
        self.pattern
    }

    /// `None` until the exchange is sent.
    #[must_use]
    pub fn phase(&self) -> Option<ExchangePhase> {
        self.phase
    }

    #[must_use]
    pub fn is_sent(&self) -> bool {
        self.phase.is_some()
    }

    #[must_use]
    pub fn is_faulted(&self) -> bool {
        self.phase == Some(ExchangePhase::Fault)
    }

    #[must_use]
    pub fn contract(&self) -> &ExchangeContract {
        &self.contract
    }

    /// Replaces the contract of an unsent exchange. The pattern and required
    /// policies follow the new operation.
    ///
    /// # Errors
    ///
    /// Returns `ContractFrozen` once the exchange was sent.
    pub fn set_contract(&mut self, contract: ExchangeContract) -> Result<(), ExchangeError> {
        if self.is_sent() {
            return Err(ExchangeError::ContractFrozen);
        }
        self.pattern = contract.pattern();
        self.policies = PolicySet::requiring(contract.operation.required_policies().iter().copied());
        self.contract = contract;
        Ok(())
    }

    /// Request (IN) message.
    #[must_use]
    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }

    #[must_use]
    pub fn reply(&self) -> Option<&Message> {
        self.reply.as_ref()
    }

    pub fn reply_mut(&mut self) -> Option<&mut Message> {
        self.reply.as_mut()
    }

    pub fn take_reply(&mut self) -> Option<Message> {
        self.reply.take()
    }

    #[must_use]
    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    pub fn take_fault(&mut self) -> Option<Fault> {
        self.fault.take()
    }

    /// Exchange-scoped properties, shared by the IN and OUT messages.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    #[must_use]
    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    pub fn policies_mut(&mut self) -> &mut PolicySet {
        &mut self.policies
    }

    #[must_use]
    pub fn transaction(&self) -> &TransactionContext {
        &self.transaction
    }

    pub fn transaction_mut(&mut self) -> &mut TransactionContext {
        &mut self.transaction
    }

    #[must_use]
    pub fn security(&self) -> &SecurityContext {
        &self.security
    }

    pub fn security_mut(&mut self) -> &mut SecurityContext {
        &mut self.security
    }

    /// Moves a new exchange into `IN`.
    ///
    /// # Errors
    ///
    /// Returns `AlreadySent` when the exchange already has a phase.
    pub fn begin_send(&mut self) -> Result<(), ExchangeError> {
        if self.is_sent() {
            return Err(ExchangeError::AlreadySent);
        }
        self.phase = Some(ExchangePhase::In);
        Ok(())
    }

    /// Sets the reply and moves `IN → OUT`.
    ///
    /// # Errors
    ///
    /// - `ReplyNotAllowed` on an `IN_ONLY` exchange.
    /// - `AlreadyFaulted` when the exchange is in `FAULT`.
    /// - `ReplyPhase` when the exchange is not in `IN`.
    pub fn set_reply(&mut self, reply: Message) -> Result<(), ExchangeError> {
        if self.pattern == ExchangePattern::InOnly {
            return Err(ExchangeError::ReplyNotAllowed);
        }
        match self.phase {
            Some(ExchangePhase::In) => {
                self.reply = Some(reply);
                self.phase = Some(ExchangePhase::Out);
                Ok(())
            }
            Some(ExchangePhase::Fault) => Err(ExchangeError::AlreadyFaulted),
            Some(ExchangePhase::Out) => Err(ExchangeError::ReplyPhase(ExchangePhase::Out.to_string())),
            None => Err(ExchangeError::ReplyPhase("NONE".to_string())),
        }
    }

    /// Sets the fault and moves to `FAULT`. A reply produced before the
    /// fault is discarded.
    ///
    /// # Errors
    ///
    /// - `SendFaultNotAllowed` on an exchange that was never sent.
    /// - `AlreadyFaulted` when the exchange is in `FAULT`.
    pub fn set_fault(&mut self, fault: Fault) -> Result<(), ExchangeError> {
        match self.phase {
            None => Err(ExchangeError::SendFaultNotAllowed),
            Some(ExchangePhase::Fault) => Err(ExchangeError::AlreadyFaulted),
            Some(ExchangePhase::In | ExchangePhase::Out) => {
                self.reply = None;
                self.fault = Some(fault);
                self.phase = Some(ExchangePhase::Fault);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::contract::ServiceOperation;
    use crate::policy::TransactionPolicy;
    use crate::qname::QName;

    fn exchange(op: ServiceOperation) -> Exchange {
        Exchange::new(ExchangeContract::new(QName::local("OrderService"), op))
    }

    #[test]
    fn new_exchange_has_no_phase_and_copies_requirements() {
        let ex = exchange(ServiceOperation::in_out("submit").requires(TransactionPolicy::PropagatesTransaction));
        assert!(ex.phase().is_none());
        assert_eq!(ex.pattern(), ExchangePattern::InOut);
        assert!(ex.policies().is_required(TransactionPolicy::PropagatesTransaction));
        assert!(ex.policies().provided().is_empty());
    }

    #[test]
    fn send_twice_rejected() {
        let mut ex = exchange(ServiceOperation::in_out("submit"));
        ex.begin_send().unwrap();
        assert_eq!(ex.begin_send().unwrap_err(), ExchangeError::AlreadySent);
        assert_eq!(ex.phase(), Some(ExchangePhase::In));
    }

    #[test]
    fn in_only_rejects_reply() {
        let mut ex = exchange(ServiceOperation::in_only("notify"));
        ex.begin_send().unwrap();
        assert_eq!(
            ex.set_reply(Message::new()).unwrap_err(),
            ExchangeError::ReplyNotAllowed
        );
        assert!(ex.reply().is_none());
        assert_eq!(ex.phase(), Some(ExchangePhase::In));
    }

    #[test]
    fn fault_on_new_exchange_rejected() {
        let mut ex = exchange(ServiceOperation::in_out("submit"));
        let err = ex.set_fault(Fault::new(HandlerError::handler("x"))).unwrap_err();
        assert_eq!(err, ExchangeError::SendFaultNotAllowed);
        assert_eq!(err.to_string(), "send fault not allowed on new exchanges");
    }

    #[test]
    fn fault_is_terminal() {
        let mut ex = exchange(ServiceOperation::in_out("submit"));
        ex.begin_send().unwrap();
        ex.set_fault(Fault::new(HandlerError::handler("first"))).unwrap();
        assert_eq!(ex.set_reply(Message::new()).unwrap_err(), ExchangeError::AlreadyFaulted);
        assert_eq!(
            ex.set_fault(Fault::new(HandlerError::handler("second"))).unwrap_err(),
            ExchangeError::AlreadyFaulted
        );
        assert_eq!(ex.fault().unwrap().cause().to_string(), "first");
    }

    #[test]
    fn fault_after_reply_clears_reply() {
        let mut ex = exchange(ServiceOperation::in_out("submit"));
        ex.begin_send().unwrap();
        ex.set_reply(Message::new().with_content(json!("ok"))).unwrap();
        ex.set_fault(Fault::new(HandlerError::handler("out pass failed"))).unwrap();
        assert!(ex.reply().is_none());
        assert!(ex.fault().is_some());
    }

    #[test]
    fn contract_frozen_after_send() {
        let mut ex = exchange(ServiceOperation::in_out("submit"));
        ex.set_contract(ExchangeContract::new(
            QName::local("OrderService"),
            ServiceOperation::in_only("notify"),
        ))
        .unwrap();
        assert_eq!(ex.pattern(), ExchangePattern::InOnly);

        ex.begin_send().unwrap();
        let again = ExchangeContract::new(QName::local("OrderService"), ServiceOperation::in_out("submit"));
        assert_eq!(ex.set_contract(again).unwrap_err(), ExchangeError::ContractFrozen);
    }

    #[derive(Debug, Clone)]
    enum Step {
        Reply,
        Fault,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![Just(Step::Reply), Just(Step::Fault)]
    }

    proptest! {
        #[test]
        fn phases_are_monotonic(in_out in any::<bool>(), steps in proptest::collection::vec(step(), 0..8)) {
            let op = if in_out { ServiceOperation::in_out("op") } else { ServiceOperation::in_only("op") };
            let mut ex = exchange(op);
            ex.begin_send().unwrap();

            let mut seen_fault = false;
            for s in steps {
                let before = ex.phase();
                let result = match s {
                    Step::Reply => ex.set_reply(Message::new()),
                    Step::Fault => ex.set_fault(Fault::new(HandlerError::handler("f"))),
                };
                if seen_fault {
                    prop_assert!(result.is_err());
                    prop_assert_eq!(ex.phase(), before);
                }
                seen_fault |= ex.is_faulted();
            }

            if !in_out {
                prop_assert!(ex.reply().is_none());
            }
            prop_assert!(!(ex.reply().is_some() && ex.fault().is_some()));
        }
    }
}
