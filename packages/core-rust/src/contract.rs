//! Service contracts: interfaces, operations, declared faults, and the
//! contract an exchange is bound to.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ExchangeError;
use crate::policy::Policy;
use crate::qname::QName;

/// Message exchange pattern of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExchangePattern {
    /// One-way: the consumer never receives a reply.
    InOnly,
    /// Request/response: the consumer receives a reply or a fault.
    InOut,
}

impl ExchangePattern {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InOnly => "IN_ONLY",
            Self::InOut => "IN_OUT",
        }
    }
}

impl fmt::Display for ExchangePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// FaultType
// ---------------------------------------------------------------------------

fn is_type<E>(err: &anyhow::Error) -> bool
where
    E: std::error::Error + Send + Sync + 'static,
{
    err.is::<E>()
}

/// Error type an operation declares it may raise.
///
/// Declared errors reach the consumer unwrapped; anything else is wrapped in
/// a generic handler error.
#[derive(Clone, Copy)]
pub struct FaultType {
    name: &'static str,
    matches: fn(&anyhow::Error) -> bool,
}

impl FaultType {
    #[must_use]
    pub fn of<E>() -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            name: std::any::type_name::<E>(),
            matches: is_type::<E>,
        }
    }

    /// Rust type name of the declared error.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// True when `err` is an instance of the declared type.
    #[must_use]
    pub fn matches(&self, err: &anyhow::Error) -> bool {
        (self.matches)(err)
    }
}

impl fmt::Debug for FaultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FaultType").field(&self.name).finish()
    }
}

impl PartialEq for FaultType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

// ---------------------------------------------------------------------------
// ServiceOperation / ServiceInterface
// ---------------------------------------------------------------------------

/// One operation of a service interface.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceOperation {
    name: String,
    pattern: ExchangePattern,
    input_type: Option<QName>,
    output_type: Option<QName>,
    fault_type: Option<FaultType>,
    requires: BTreeSet<Policy>,
}

impl ServiceOperation {
    #[must_use]
    pub fn new(name: impl Into<String>, pattern: ExchangePattern) -> Self {
        Self {
            name: name.into(),
            pattern,
            input_type: None,
            output_type: None,
            fault_type: None,
            requires: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn in_out(name: impl Into<String>) -> Self {
        Self::new(name, ExchangePattern::InOut)
    }

    #[must_use]
    pub fn in_only(name: impl Into<String>) -> Self {
        Self::new(name, ExchangePattern::InOnly)
    }

    #[must_use]
    pub fn with_input(mut self, input_type: impl Into<QName>) -> Self {
        self.input_type = Some(input_type.into());
        self
    }

    #[must_use]
    pub fn with_output(mut self, output_type: impl Into<QName>) -> Self {
        self.output_type = Some(output_type.into());
        self
    }

    /// Declares `E` as the operation's fault type.
    #[must_use]
    pub fn with_fault<E>(mut self) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.fault_type = Some(FaultType::of::<E>());
        self
    }

    /// Adds a required policy.
    #[must_use]
    pub fn requires(mut self, policy: impl Into<Policy>) -> Self {
        self.requires.insert(policy.into());
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn pattern(&self) -> ExchangePattern {
        self.pattern
    }

    #[must_use]
    pub fn input_type(&self) -> Option<&QName> {
        self.input_type.as_ref()
    }

    #[must_use]
    pub fn output_type(&self) -> Option<&QName> {
        self.output_type.as_ref()
    }

    #[must_use]
    pub fn fault_type(&self) -> Option<&FaultType> {
        self.fault_type.as_ref()
    }

    #[must_use]
    pub fn required_policies(&self) -> &BTreeSet<Policy> {
        &self.requires
    }

    /// True when `err` is the declared fault type of this operation.
    #[must_use]
    pub fn declares(&self, err: &anyhow::Error) -> bool {
        self.fault_type.is_some_and(|f| f.matches(err))
    }
}

/// The set of operations a service exposes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceInterface {
    operations: Vec<ServiceOperation>,
}

impl ServiceInterface {
    #[must_use]
    pub fn new(operations: impl IntoIterator<Item = ServiceOperation>) -> Self {
        Self {
            operations: operations.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn operations(&self) -> &[ServiceOperation] {
        &self.operations
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ServiceOperation> {
        self.operations.iter().find(|op| op.name == name)
    }

    /// Resolves an operation by name. An omitted name selects the only
    /// operation of a single-operation interface.
    ///
    /// # Errors
    ///
    /// - `NoOperations` for an empty interface.
    /// - `OperationNameRequired` when the name is omitted and the interface
    ///   has several operations.
    /// - `UnknownOperation` when no operation has the given name.
    pub fn resolve(&self, service: &QName, name: Option<&str>) -> Result<&ServiceOperation, ExchangeError> {
        match (name, self.operations.as_slice()) {
            (_, []) => Err(ExchangeError::NoOperations(service.to_string())),
            (None, [only]) => Ok(only),
            (None, _) => Err(ExchangeError::OperationNameRequired(service.to_string())),
            (Some(name), _) => self.get(name).ok_or_else(|| ExchangeError::UnknownOperation {
                service: service.to_string(),
                operation: name.to_string(),
            }),
        }
    }
}

/// Security constraints a service declares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceSecurity {
    roles_allowed: BTreeSet<String>,
}

impl ServiceSecurity {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_roles<I, R>(roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Self {
            roles_allowed: roles.into_iter().map(Into::into).collect(),
        }
    }

    /// Roles allowed to invoke the service. Empty means anyone.
    #[must_use]
    pub fn roles_allowed(&self) -> &BTreeSet<String> {
        &self.roles_allowed
    }
}

// ---------------------------------------------------------------------------
// ExchangeContract
// ---------------------------------------------------------------------------

/// What an exchange is addressed to: the provider's service and operation,
/// and the reply type the consumer expects.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeContract {
    pub service: QName,
    pub operation: ServiceOperation,
    /// Reply content type the consumer wants; `None` accepts the
    /// operation's output type.
    pub reply_type: Option<QName>,
    pub security: ServiceSecurity,
}

impl ExchangeContract {
    #[must_use]
    pub fn new(service: QName, operation: ServiceOperation) -> Self {
        Self {
            service,
            operation,
            reply_type: None,
            security: ServiceSecurity::default(),
        }
    }

    #[must_use]
    pub fn with_reply_type(mut self, reply_type: QName) -> Self {
        self.reply_type = Some(reply_type);
        self
    }

    #[must_use]
    pub fn with_security(mut self, security: ServiceSecurity) -> Self {
        self.security = security;
        self
    }

    #[must_use]
    pub fn pattern(&self) -> ExchangePattern {
        self.operation.pattern()
    }
}
