//! Exchange bus core: exchanges, messages, scoped contexts, service contracts,
//! policies, and the transaction-manager contract.

pub mod context;
pub mod contract;
pub mod error;
pub mod exchange;
pub mod message;
pub mod policy;
pub mod qname;
pub mod security;
pub mod transaction;
pub mod transform;
pub mod validate;
pub mod wire;

pub use context::{labels, Context, Property, Scope};
pub use contract::{
    ExchangeContract, ExchangePattern, FaultType, ServiceInterface, ServiceOperation, ServiceSecurity,
};
pub use error::{ExchangeError, FaultCause, HandlerError, TransactionFailure};
pub use exchange::{Exchange, ExchangePhase, Fault, ROLLBACK_ON_FAULT};
pub use message::{Attachment, Message};
pub use policy::{Policy, PolicySet, SecurityPolicy, TransactionPolicy};
pub use qname::QName;
pub use security::{Credential, Principal, SecurityContext};
pub use transaction::{
    TransactionContext, TransactionId, TransactionManager, TransactionManagerError, TransactionStatus,
};
pub use transform::{Transformer, TransformerRegistry};
pub use validate::{ValidationResult, Validator};
