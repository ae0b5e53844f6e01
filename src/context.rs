use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

/// Attributes attached to a subject, keyed by attribute name.
pub type Attributes = HashMap<String, AttributeValue>;

/// Scalar attribute value.
#[derive(Debug, Serialize, Deserialize, PartialEq, PartialOrd, From, Clone)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A string attribute.
    String(String),
    /// A numeric attribute. Integers are represented as `f64`.
    Number(f64),
    /// A boolean attribute.
    Boolean(bool),
    /// An explicitly absent value.
    Null,
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

/// Everything the engine knows about the subject a flag is evaluated for.
///
/// `subject_id` is the identity used for consistent hashing (e.g., a user id). Attributes are
/// used by targeting rules only.
///
/// ```
/// # use feature_flags::EvaluationContext;
/// let context = EvaluationContext::new("user-42")
///     .with_attribute("country", "US")
///     .with_attribute("age", 31.0);
/// assert_eq!(context.subject_id(), "user-42");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
    subject_id: String,
    #[serde(default)]
    attributes: Attributes,
}

impl EvaluationContext {
    /// Create a context without attributes.
    pub fn new(subject_id: impl Into<String>) -> EvaluationContext {
        EvaluationContext {
            subject_id: subject_id.into(),
            attributes: Attributes::new(),
        }
    }

    /// Create a context with the given attributes.
    pub fn with_attributes(subject_id: impl Into<String>, attributes: Attributes) -> Self {
        EvaluationContext {
            subject_id: subject_id.into(),
            attributes,
        }
    }

    /// Add (or replace) a single attribute.
    pub fn with_attribute(
        mut self,
        name: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::{AttributeValue, EvaluationContext};

    #[test]
    fn builds_attributes() {
        let context = EvaluationContext::new("alice")
            .with_attribute("country", "US")
            .with_attribute("age", 42_i64)
            .with_attribute("beta", true);

        assert_eq!(context.subject_id(), "alice");
        assert_eq!(context.get("country"), Some(&AttributeValue::from("US")));
        assert_eq!(context.get("age"), Some(&AttributeValue::Number(42.0)));
        assert_eq!(context.get("beta"), Some(&AttributeValue::Boolean(true)));
        assert_eq!(context.get("missing"), None);
    }

    #[test]
    fn deserializes_untagged_attributes() {
        let context: EvaluationContext = serde_json::from_str(
            r#"{"subjectId": "bob", "attributes": {"plan": "pro", "seats": 3, "trial": false, "org": null}}"#,
        )
        .unwrap();

        assert_eq!(context.subject_id(), "bob");
        assert_eq!(context.get("plan"), Some(&"pro".into()));
        assert_eq!(context.get("seats"), Some(&AttributeValue::Number(3.0)));
        assert_eq!(context.get("trial"), Some(&AttributeValue::Boolean(false)));
        assert_eq!(context.get("org"), Some(&AttributeValue::Null));
    }
}
