//! Declarative policies: what a service requires and what handlers provide.
//!
//! Every operation declares a set of required policies. When an exchange is
//! created the requirements are copied onto its [`PolicySet`]; handlers mark
//! policies as provided while they run. The bus only invokes the service when
//! every required policy has been provided.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TransactionFailure;

// ---------------------------------------------------------------------------
// Policy names
// ---------------------------------------------------------------------------

/// Transactional behavior a service can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransactionPolicy {
    /// Caller's transaction must flow into the service.
    PropagatesTransaction,
    /// Caller's transaction must not flow into the service.
    SuspendsTransaction,
    /// Service runs inside a global transaction (joined or newly started).
    ManagedTransactionGlobal,
    /// Service runs inside a new transaction local to this invocation.
    ManagedTransactionLocal,
    /// Service runs without any managed transaction.
    NoManagedTransaction,
}

impl TransactionPolicy {
    pub const ALL: [Self; 5] = [
        Self::PropagatesTransaction,
        Self::SuspendsTransaction,
        Self::ManagedTransactionGlobal,
        Self::ManagedTransactionLocal,
        Self::NoManagedTransaction,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::PropagatesTransaction => "propagatesTransaction",
            Self::SuspendsTransaction => "suspendsTransaction",
            Self::ManagedTransactionGlobal => "managedTransaction.Global",
            Self::ManagedTransactionLocal => "managedTransaction.Local",
            Self::NoManagedTransaction => "noManagedTransaction",
        }
    }
}

/// Security behavior a service can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SecurityPolicy {
    /// Caller must be authenticated.
    ClientAuthentication,
    /// Message must have travelled over a confidential channel.
    Confidentiality,
    /// Caller must hold one of the service's allowed roles.
    Authorization,
}

impl SecurityPolicy {
    pub const ALL: [Self; 3] = [
        Self::ClientAuthentication,
        Self::Confidentiality,
        Self::Authorization,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::ClientAuthentication => "clientAuthentication",
            Self::Confidentiality => "confidentiality",
            Self::Authorization => "authorization",
        }
    }
}

/// Any named policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Policy {
    Transaction(TransactionPolicy),
    Security(SecurityPolicy),
}

impl Policy {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Transaction(p) => p.name(),
            Self::Security(p) => p.name(),
        }
    }
}

impl From<TransactionPolicy> for Policy {
    fn from(p: TransactionPolicy) -> Self {
        Self::Transaction(p)
    }
}

impl From<SecurityPolicy> for Policy {
    fn from(p: SecurityPolicy) -> Self {
        Self::Security(p)
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for TransactionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unknown policy name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid policy name: {0} doesn't exist")]
pub struct InvalidPolicyName(pub String);

impl FromStr for Policy {
    type Err = InvalidPolicyName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionPolicy::ALL
            .iter()
            .map(|p| Policy::from(*p))
            .chain(SecurityPolicy::ALL.iter().map(|p| Policy::from(*p)))
            .find(|p| p.name() == s)
            .ok_or_else(|| InvalidPolicyName(s.to_string()))
    }
}

impl Serialize for Policy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Policy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// PolicySet
// ---------------------------------------------------------------------------

/// Required and provided policies of one exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicySet {
    required: BTreeSet<Policy>,
    provided: BTreeSet<Policy>,
}

impl PolicySet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set with the given requirements and nothing provided.
    #[must_use]
    pub fn requiring(required: impl IntoIterator<Item = Policy>) -> Self {
        Self {
            required: required.into_iter().collect(),
            provided: BTreeSet::new(),
        }
    }

    pub fn require(&mut self, policy: impl Into<Policy>) {
        self.required.insert(policy.into());
    }

    pub fn provide(&mut self, policy: impl Into<Policy>) {
        self.provided.insert(policy.into());
    }

    #[must_use]
    pub fn is_required(&self, policy: impl Into<Policy>) -> bool {
        self.required.contains(&policy.into())
    }

    #[must_use]
    pub fn is_provided(&self, policy: impl Into<Policy>) -> bool {
        self.provided.contains(&policy.into())
    }

    #[must_use]
    pub fn required(&self) -> &BTreeSet<Policy> {
        &self.required
    }

    #[must_use]
    pub fn provided(&self) -> &BTreeSet<Policy> {
        &self.provided
    }

    /// Required policies that no handler has provided.
    #[must_use]
    pub fn unmet(&self) -> BTreeSet<Policy> {
        self.required.difference(&self.provided).copied().collect()
    }

    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        self.required.is_subset(&self.provided)
    }

    /// True when any transaction policy is required.
    #[must_use]
    pub fn requires_transaction_policy(&self) -> bool {
        self.required
            .iter()
            .any(|p| matches!(p, Policy::Transaction(_)))
    }
}

/// Rejects contradictory transaction requirements.
///
/// The rules, checked in this order:
/// 1. `suspendsTransaction` and `propagatesTransaction` together.
/// 2. Any two of `managedTransaction.Global`, `managedTransaction.Local`,
///    `noManagedTransaction`.
/// 3. `propagatesTransaction` with `managedTransaction.Local` or
///    `noManagedTransaction`.
///
/// # Errors
///
/// Returns `TransactionFailure::InvalidPolicy` or
/// `TransactionFailure::InvalidPolicyCombination` naming the offending
/// policies.
pub fn check_transaction_policies(required: &BTreeSet<Policy>) -> Result<(), TransactionFailure> {
    use TransactionPolicy::{
        ManagedTransactionGlobal, ManagedTransactionLocal, NoManagedTransaction,
        PropagatesTransaction, SuspendsTransaction,
    };

    let has = |p: TransactionPolicy| required.contains(&Policy::Transaction(p));

    if has(SuspendsTransaction) && has(PropagatesTransaction) {
        return Err(TransactionFailure::InvalidPolicy {
            first: SuspendsTransaction,
            second: PropagatesTransaction,
        });
    }

    let managed = [ManagedTransactionGlobal, ManagedTransactionLocal, NoManagedTransaction];
    let present: Vec<_> = managed.into_iter().filter(|p| has(*p)).collect();
    if let [first, second, ..] = present.as_slice() {
        return Err(TransactionFailure::InvalidPolicy {
            first: *first,
            second: *second,
        });
    }

    if has(PropagatesTransaction) && (has(ManagedTransactionLocal) || has(NoManagedTransaction)) {
        return Err(TransactionFailure::InvalidPolicyCombination {
            policy: PropagatesTransaction,
            first: ManagedTransactionLocal,
            second: NoManagedTransaction,
        });
    }

    Ok(())
}
