//! Core request types.

use serde_json::{Map, Value};

use crate::shape::TargetShape;

/// A structured completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// User message content.
    pub text_input: String,
    /// System message content.
    pub system_prompt: String,
    /// Shape the result must conform to.
    pub shape: TargetShape,
    /// Backend-specific body fields (`temperature`, `seed`, ...), merged into
    /// the request body last.
    pub extra: Map<String, Value>,
}

impl CompletionRequest {
    /// A plain-text request.
    #[must_use]
    pub fn new(text_input: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            text_input: text_input.into(),
            system_prompt: system_prompt.into(),
            shape: TargetShape::PlainText,
            extra: Map::new(),
        }
    }

    /// Set the target shape.
    #[must_use]
    pub fn with_shape(mut self, shape: impl Into<TargetShape>) -> Self {
        self.shape = shape.into();
        self
    }

    /// Add a backend-specific body field.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Copy `extra` into a JSON object body, overwriting existing keys.
pub(crate) fn merge_extra(body: &mut Value, extra: &Map<String, Value>) {
    if let Some(obj) = body.as_object_mut() {
        for (key, value) in extra {
            obj.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Schema;
    use serde_json::json;

    #[test]
    fn builder_sets_fields() {
        let request = CompletionRequest::new("What is 2+2?", "Be brief.")
            .with_shape(Schema::object("Answer"))
            .with_option("temperature", 0.0);
        assert!(!request.shape.is_plain_text());
        assert_eq!(request.extra.get("temperature"), Some(&json!(0.0)));
    }

    #[test]
    fn extra_overrides_body_fields() {
        let mut body = json!({ "model": "a", "max_tokens": 10 });
        let mut extra = Map::new();
        extra.insert("max_tokens".into(), json!(99));
        extra.insert("seed".into(), json!(7));
        merge_extra(&mut body, &extra);
        assert_eq!(body, json!({ "model": "a", "max_tokens": 99, "seed": 7 }));
    }
}
