//! Authenticated-principal record carried on a [`crate::context::Context`].

use std::{
    collections::HashMap,
    time::{Duration, SystemTime},
};

/// The kind of principal an [`Identity`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    /// A human end-user.
    User,
    /// A machine-to-machine caller (another service, a cron-like job).
    Service,
}

/// An authenticated principal, produced by an external authenticator and
/// attached to a [`crate::context::Context`] before the handler runs.
///
/// The core never constructs one itself; authentication is an external
/// collaborator's concern, same as every other capability.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Stable principal id.
    pub id: String,
    /// User vs. service principal.
    pub kind: IdentityKind,
    /// Human-readable display name.
    pub display_name: Option<String>,
    /// Contact email, if any.
    pub email: Option<String>,
    /// Role names.
    pub roles: Vec<String>,
    /// OAuth-style scopes.
    pub scopes: Vec<String>,
    /// Free-form metadata carried alongside the principal.
    pub metadata: HashMap<String, String>,
    /// When the credential was issued.
    pub issued_at: Option<SystemTime>,
    /// When the credential expires.
    pub expires_at: Option<SystemTime>,
}

impl Identity {
    /// Construct a minimal identity with just an id and kind.
    pub fn new(id: impl Into<String>, kind: IdentityKind) -> Self {
        Self {
            id: id.into(),
            kind,
            display_name: None,
            email: None,
            roles: Vec::new(),
            scopes: Vec::new(),
            metadata: HashMap::new(),
            issued_at: None,
            expires_at: None,
        }
    }

    /// Whether the identity carries a given role.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Whether the identity carries a given scope.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    /// Whether the credential is expired as of now.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(exp) => exp <= SystemTime::now(),
            None => false,
        }
    }

    /// Remaining validity, `None` if there is no expiry or it already
    /// passed.
    pub fn time_to_expiry(&self) -> Option<Duration> {
        self.expires_at
            .and_then(|exp| exp.duration_since(SystemTime::now()).ok())
    }
}
