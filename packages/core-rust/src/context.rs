//! Scoped property store attached to exchanges and messages.
//!
//! A [`Context`] holds properties of exactly one [`Scope`]. The exchange owns
//! an `EXCHANGE`-scoped context that lives across the IN and OUT messages;
//! every [`Message`](crate::Message) owns its own `MESSAGE`-scoped context.
//!
//! Labels attached to a property decide whether it crosses transformation and
//! transport boundaries. Properties carrying [`labels::TRANSIENT`] are never
//! copied by [`Context::copy_to`] and never written to the remote wire.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known property labels.
pub mod labels {
    /// Property is local to this process and this exchange.
    pub const TRANSIENT: &str = "behavior.transient";
    /// Property originated from (or is destined for) an HTTP header.
    pub const HTTP_HEADER: &str = "endpoint.http";
    /// Property originated from (or is destined for) a SOAP header.
    pub const SOAP_HEADER: &str = "endpoint.soap";
    /// Property is sent as an HTTP request header by the HTTP invoker.
    pub const INVOKER_HEADER: &str = "invoker.header";
}

/// Visibility of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scope {
    /// Local to one message instance.
    Message,
    /// Shared by every message of one exchange.
    Exchange,
}

impl Scope {
    /// Wire/display name of the scope.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "MESSAGE",
            Self::Exchange => "EXCHANGE",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Property
// ---------------------------------------------------------------------------

/// A named, scoped, labeled value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    name: String,
    value: Value,
    scope: Scope,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    labels: BTreeSet<String>,
}

impl Property {
    /// Creates an unlabeled property.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<Value>, scope: Scope) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            scope,
            labels: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    #[must_use]
    pub fn scope(&self) -> Scope {
        self.scope
    }

    #[must_use]
    pub fn labels(&self) -> &BTreeSet<String> {
        &self.labels
    }

    #[must_use]
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    /// True when the property carries [`labels::TRANSIENT`].
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.has_label(labels::TRANSIENT)
    }

    /// Adds a single label. Returns `self` for chaining.
    pub fn add_label(&mut self, label: impl Into<String>) -> &mut Self {
        self.labels.insert(label.into());
        self
    }

    /// Adds several labels. Returns `self` for chaining.
    pub fn add_labels<I, L>(&mut self, labels: I) -> &mut Self
    where
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        self.labels.extend(labels.into_iter().map(Into::into));
        self
    }

    /// Removes a label; returns whether it was present.
    pub fn remove_label(&mut self, label: &str) -> bool {
        self.labels.remove(label)
    }

    /// Value interpreted as a flag: `true` or the string `"true"`
    /// (case-insensitive).
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match &self.value {
            Value::Bool(b) => *b,
            Value::String(s) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Errors from inserting foreign properties into a context.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("scope {actual} is different than expected {expected}")]
    ScopeMismatch { actual: Scope, expected: Scope },
    #[error("property name must not be empty")]
    EmptyName,
}

/// Property store for a single scope. Names are unique within the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    scope: Scope,
    properties: BTreeMap<String, Property>,
}

impl Context {
    /// Creates an empty context for the given scope.
    #[must_use]
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            properties: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Sets a property, replacing any existing property of the same name
    /// (labels of the replaced property are dropped). Returns the new
    /// property so labels can be chained:
    ///
    /// ```
    /// # use esb_core::context::{labels, Context, Scope};
    /// let mut ctx = Context::new(Scope::Exchange);
    /// ctx.set_property("token", "abc").add_label(labels::TRANSIENT);
    /// assert!(ctx.property("token").unwrap().is_transient());
    /// ```
    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Property {
        let name = name.into();
        let property = Property::new(name.clone(), value, self.scope);
        match self.properties.entry(name) {
            Entry::Occupied(mut slot) => {
                slot.insert(property);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(property),
        }
    }

    /// Inserts a fully-formed property (e.g. one read from the wire).
    ///
    /// # Errors
    ///
    /// Returns `ContextError::ScopeMismatch` if the property's scope differs
    /// from this context's scope, or `ContextError::EmptyName` for a blank name.
    pub fn insert(&mut self, property: Property) -> Result<(), ContextError> {
        if property.name.is_empty() {
            return Err(ContextError::EmptyName);
        }
        if property.scope != self.scope {
            return Err(ContextError::ScopeMismatch {
                actual: property.scope,
                expected: self.scope,
            });
        }
        self.properties.insert(property.name.clone(), property);
        Ok(())
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    pub fn property_mut(&mut self, name: &str) -> Option<&mut Property> {
        self.properties.get_mut(name)
    }

    #[must_use]
    pub fn property_value(&self, name: &str) -> Option<&Value> {
        self.properties.get(name).map(Property::value)
    }

    /// Removes a property. Removing an absent name is a no-op.
    pub fn remove_property(&mut self, name: &str) -> Option<Property> {
        self.properties.remove(name)
    }

    /// Keeps only the properties for which `keep` returns `true`.
    pub fn retain(&mut self, mut keep: impl FnMut(&Property) -> bool) {
        self.properties.retain(|_, p| keep(p));
    }

    /// All properties in name order.
    pub fn properties(&self) -> impl Iterator<Item = &Property> {
        self.properties.values()
    }

    /// Properties carrying the given label.
    pub fn properties_with_label<'a>(&'a self, label: &'a str) -> impl Iterator<Item = &'a Property> + 'a {
        self.properties.values().filter(move |p| p.has_label(label))
    }

    /// Copies every non-transient property into `target`, re-scoped to the
    /// target's scope. Existing target properties with the same name are
    /// replaced.
    pub fn copy_to(&self, target: &mut Context) {
        for property in self.properties.values().filter(|p| !p.is_transient()) {
            let mut copy = property.clone();
            copy.scope = target.scope;
            target.properties.insert(copy.name.clone(), copy);
        }
    }

    pub fn clear(&mut self) {
        self.properties.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}
