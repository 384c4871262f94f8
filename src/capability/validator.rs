//! Validator capability contract.

use async_trait::async_trait;

use crate::error::Violation;

/// The validator capability contract.
///
/// A handler opts in by calling
/// [`crate::handler::Handler::validate_with`] with a validator; once it
/// has, [`crate::handler::Handler::dispatch`] runs validation itself,
/// immediately after decoding the request body and before invoking the
/// handler or its middleware. A handler that never calls `validate_with`
/// is dispatched without any validation step. Handler code that still
/// wants ad hoc validation of something other than the request body can
/// reach this same contract through
/// [`crate::context::Context::validator`].
#[async_trait]
pub trait Validator: Send + Sync {
    /// Validate `value` (already JSON-decoded) against whatever schema the
    /// implementation associates with `type_name`, returning every
    /// violation found (empty if valid).
    async fn validate(&self, type_name: &str, value: &serde_json::Value) -> Vec<Violation>;
}
