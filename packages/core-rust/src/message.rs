//! Messages carried by an exchange.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::{Context, Scope};
use crate::qname::QName;

/// Named binary attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Human-readable name (e.g. a file name).
    pub name: String,
    /// MIME type of the data.
    pub mime_type: String,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

impl Attachment {
    #[must_use]
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data,
        }
    }
}

/// One message of an exchange: IN request, OUT reply, or fault detail.
///
/// Content is opaque to the bus. Its type is declared by whoever sets it and
/// is never inferred from the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    content: Option<Value>,
    content_type: Option<QName>,
    context: Context,
    attachments: BTreeMap<String, Attachment>,
}

impl Message {
    /// Creates an empty message.
    #[must_use]
    pub fn new() -> Self {
        Self {
            content: None,
            content_type: None,
            context: Context::new(Scope::Message),
            attachments: BTreeMap::new(),
        }
    }

    /// Builder-style content setter.
    #[must_use]
    pub fn with_content(mut self, content: impl Into<Value>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Builder-style content type setter.
    #[must_use]
    pub fn with_content_type(mut self, content_type: QName) -> Self {
        self.content_type = Some(content_type);
        self
    }

    #[must_use]
    pub fn content(&self) -> Option<&Value> {
        self.content.as_ref()
    }

    pub fn set_content(&mut self, content: impl Into<Value>) -> &mut Self {
        self.content = Some(content.into());
        self
    }

    /// Removes and returns the content.
    pub fn take_content(&mut self) -> Option<Value> {
        self.content.take()
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&QName> {
        self.content_type.as_ref()
    }

    pub fn set_content_type(&mut self, content_type: Option<QName>) -> &mut Self {
        self.content_type = content_type;
        self
    }

    /// Message-scoped properties.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    /// Adds an attachment, replacing any attachment with the same id.
    pub fn add_attachment(&mut self, id: impl Into<String>, attachment: Attachment) -> &mut Self {
        self.attachments.insert(id.into(), attachment);
        self
    }

    #[must_use]
    pub fn attachment(&self, id: &str) -> Option<&Attachment> {
        self.attachments.get(id)
    }

    /// Removes an attachment. Removing an unknown id is a no-op.
    pub fn remove_attachment(&mut self, id: &str) -> Option<Attachment> {
        self.attachments.remove(id)
    }

    /// Attachments keyed by id.
    #[must_use]
    pub fn attachments(&self) -> &BTreeMap<String, Attachment> {
        &self.attachments
    }

    /// Copies content, content type, attachments, and non-transient
    /// properties into a fresh message.
    #[must_use]
    pub fn copy(&self) -> Self {
        let mut copy = Self {
            content: self.content.clone(),
            content_type: self.content_type.clone(),
            context: Context::new(Scope::Message),
            attachments: self.attachments.clone(),
        };
        self.context.copy_to(&mut copy.context);
        copy
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::context::labels;

    #[test]
    fn remove_nonexistent_attachment_is_noop() {
        let mut msg = Message::new();
        assert!(msg.attachment("doc").is_none());
        assert!(msg.remove_attachment("doc").is_none());
        assert!(msg.attachment("doc").is_none());
    }

    #[test]
    fn add_get_remove_attachment() {
        let mut msg = Message::new();
        msg.add_attachment("doc", Attachment::new("a.txt", "text/plain", b"hi".to_vec()));
        assert_eq!(msg.attachment("doc").unwrap().name, "a.txt");

        msg.remove_attachment("doc");
        assert!(msg.attachment("doc").is_none());
    }

    #[test]
    fn attachment_ids_are_unique() {
        let mut msg = Message::new();
        msg.add_attachment("doc", Attachment::new("a", "text/plain", vec![1]));
        msg.add_attachment("doc", Attachment::new("b", "text/plain", vec![2]));
        assert_eq!(msg.attachments().len(), 1);
        assert_eq!(msg.attachment("doc").unwrap().name, "b");
    }

    #[test]
    fn content_type_is_declared_not_inferred() {
        let msg = Message::new().with_content(json!({"id": 1}));
        assert!(msg.content_type().is_none());
    }

    #[test]
    fn copy_drops_transient_properties() {
        let mut msg = Message::new()
            .with_content(json!("body"))
            .with_content_type(QName::local("Order"));
        msg.context_mut().set_property("trace", "t-1");
        msg.context_mut()
            .set_property("session", "s")
            .add_label(labels::TRANSIENT);

        let copy = msg.copy();
        assert_eq!(copy.content(), Some(&json!("body")));
        assert_eq!(copy.content_type(), Some(&QName::local("Order")));
        assert!(copy.context().property("trace").is_some());
        assert!(copy.context().property("session").is_none());
    }
}
