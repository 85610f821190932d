//! Message validation contract and a field-level schema validator.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of validating content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// The content conforms.
    Valid,
    /// The content violates one or more constraints.
    Invalid {
        /// Human-readable descriptions of each validation failure.
        errors: Vec<String>,
    },
}

impl ValidationResult {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Collapses a list of errors: empty means valid.
    #[must_use]
    pub fn from_errors(errors: Vec<String>) -> Self {
        if errors.is_empty() {
            Self::Valid
        } else {
            Self::Invalid { errors }
        }
    }

    /// Errors joined with `"; "`, empty when valid.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Valid => String::new(),
            Self::Invalid { errors } => errors.join("; "),
        }
    }
}

/// Validates message content of one content type.
pub trait Validator: Send + Sync {
    /// Name reported in validation failures.
    fn name(&self) -> &str;

    fn validate(&self, content: Option<&Value>) -> ValidationResult;
}

// ---------------------------------------------------------------------------
// Schema validator
// ---------------------------------------------------------------------------

/// JSON kind a field must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Bool,
    Object,
    Array,
}

impl FieldKind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }
}

/// Single field definition within a schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    /// Name of the field.
    pub name: String,
    /// Whether the field must be present in every message.
    pub required: bool,
    /// Expected kind; `None` accepts any kind.
    #[serde(default)]
    pub kind: Option<FieldKind>,
}

impl FieldDef {
    #[must_use]
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            required: true,
            kind: Some(kind),
        }
    }

    #[must_use]
    pub fn optional(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            required: false,
            kind: Some(kind),
        }
    }
}

/// Schema for JSON object content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSchema {
    /// Schema version for compatibility checks.
    pub version: u32,
    /// Field definitions that comprise this schema.
    pub fields: Vec<FieldDef>,
}

/// Validator checking object content against a [`MessageSchema`].
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    name: String,
    schema: MessageSchema,
}

impl SchemaValidator {
    #[must_use]
    pub fn new(name: impl Into<String>, schema: MessageSchema) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }
}

impl Validator for SchemaValidator {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, content: Option<&Value>) -> ValidationResult {
        let Some(Value::Object(fields)) = content else {
            return ValidationResult::Invalid {
                errors: vec!["content must be a JSON object".to_string()],
            };
        };

        let mut errors = Vec::new();
        for def in &self.schema.fields {
            match (fields.get(&def.name), def.kind) {
                (None | Some(Value::Null), _) if def.required => {
                    errors.push(format!("missing required field '{}'", def.name));
                }
                (Some(value), Some(kind)) if !value.is_null() && !kind.accepts(value) => {
                    errors.push(format!("field '{}' must be of kind {kind:?}", def.name));
                }
                _ => {}
            }
        }
        ValidationResult::from_errors(errors)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn order_validator() -> SchemaValidator {
        SchemaValidator::new(
            "order-schema",
            MessageSchema {
                version: 1,
                fields: vec![
                    FieldDef::required("id", FieldKind::String),
                    FieldDef::optional("qty", FieldKind::Number),
                ],
            },
        )
    }

    #[test]
    fn valid_object_passes() {
        let v = order_validator();
        assert!(v.validate(Some(&json!({"id": "o-1", "qty": 3}))).is_valid());
        assert!(v.validate(Some(&json!({"id": "o-1"}))).is_valid());
    }

    #[test]
    fn missing_required_field_reported() {
        let result = order_validator().validate(Some(&json!({"qty": 3})));
        assert_eq!(result.detail(), "missing required field 'id'");
    }

    #[test]
    fn wrong_kind_reported() {
        let result = order_validator().validate(Some(&json!({"id": 7, "qty": "three"})));
        let ValidationResult::Invalid { errors } = result else {
            panic!("expected invalid");
        };
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn non_object_content_rejected() {
        assert!(!order_validator().validate(Some(&json!("text"))).is_valid());
        assert!(!order_validator().validate(None).is_valid());
    }
}
