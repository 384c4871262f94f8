//! A [`Validator`] that approves every request.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{capability::validator::Validator, error::Violation};

/// A validator that never produces a violation. The default choice for
/// handlers that haven't opted into [`crate::handler::Handler::validate_with`]
/// but still want a concrete `Validator` to hand around (e.g. to satisfy a
/// signature in a test).
#[derive(Debug, Default, Clone)]
pub struct NullValidator;

impl NullValidator {
    /// A new `NullValidator`.
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl Validator for NullValidator {
    async fn validate(&self, _type_name: &str, _value: &serde_json::Value) -> Vec<Violation> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_returns_no_violations() {
        let validator = NullValidator::new();
        let violations = validator.validate("anything", &serde_json::json!({"x": 1})).await;
        assert!(violations.is_empty());
    }
}
