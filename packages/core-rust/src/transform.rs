//! Content transformation between declared content types.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::qname::QName;

/// Converts content from one declared type to another.
pub trait Transformer: Send + Sync {
    /// Name reported in transformation failures.
    fn name(&self) -> &str;

    /// # Errors
    ///
    /// Returns an error when the content cannot be converted.
    fn transform(&self, content: Value) -> anyhow::Result<Value>;
}

/// Transformer built from a closure.
pub struct FnTransformer<F> {
    name: String,
    f: F,
}

impl<F> FnTransformer<F>
where
    F: Fn(Value) -> anyhow::Result<Value> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> Transformer for FnTransformer<F>
where
    F: Fn(Value) -> anyhow::Result<Value> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&self, content: Value) -> anyhow::Result<Value> {
        (self.f)(content)
    }
}

/// Transformers keyed by `(from, to)` content types.
#[derive(Default, Clone)]
pub struct TransformerRegistry {
    transformers: HashMap<(QName, QName), Arc<dyn Transformer>>,
}

impl TransformerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a transformer, replacing any previous one for the pair.
    pub fn register(&mut self, from: QName, to: QName, transformer: Arc<dyn Transformer>) {
        self.transformers.insert((from, to), transformer);
    }

    #[must_use]
    pub fn get(&self, from: &QName, to: &QName) -> Option<Arc<dyn Transformer>> {
        self.transformers.get(&(from.clone(), to.clone())).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }
}

impl std::fmt::Debug for TransformerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.transformers.iter().map(|((from, to), t)| (from, to, t.name())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn lookup_is_directional() {
        let mut registry = TransformerRegistry::new();
        registry.register(
            QName::local("A"),
            QName::local("B"),
            Arc::new(FnTransformer::new("a-to-b", |v| Ok(json!({"wrapped": v})))),
        );

        let t = registry.get(&QName::local("A"), &QName::local("B")).unwrap();
        assert_eq!(t.name(), "a-to-b");
        assert_eq!(t.transform(json!(1)).unwrap(), json!({"wrapped": 1}));
        assert!(registry.get(&QName::local("B"), &QName::local("A")).is_none());
    }
}
