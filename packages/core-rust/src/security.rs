//! Caller identity and credentials attached to an exchange.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Unique identifier for the authenticated entity.
    pub id: String,
    /// Roles assigned to this principal for authorization checks.
    pub roles: Vec<String>,
}

impl Principal {
    #[must_use]
    pub fn new<I, R>(id: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Self {
            id: id.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Credential presented by a caller, not yet verified.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    UsernamePassword { username: String, password: String },
    Token(String),
}

// Secrets stay out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UsernamePassword { username, .. } => f
                .debug_struct("UsernamePassword")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::Token(_) => f.debug_tuple("Token").field(&"<redacted>").finish(),
        }
    }
}

/// Security state of one exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityContext {
    principal: Option<Principal>,
    credentials: Vec<Credential>,
    confidential: bool,
}

impl SecurityContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn set_principal(&mut self, principal: Principal) {
        self.principal = Some(principal);
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.principal.is_some()
    }

    #[must_use]
    pub fn credentials(&self) -> &[Credential] {
        &self.credentials
    }

    pub fn add_credential(&mut self, credential: Credential) {
        self.credentials.push(credential);
    }

    /// True when the message arrived over a confidential channel.
    #[must_use]
    pub fn is_confidential(&self) -> bool {
        self.confidential
    }

    pub fn set_confidential(&mut self, confidential: bool) {
        self.confidential = confidential;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_debug_hides_secrets() {
        let cred = Credential::UsernamePassword {
            username: "kermit".into(),
            password: "the-frog-1".into(),
        };
        let debug = format!("{cred:?}");
        assert!(debug.contains("kermit"));
        assert!(!debug.contains("the-frog-1"));
        assert!(!format!("{:?}", Credential::Token("t0k3n".into())).contains("t0k3n"));
    }

    #[test]
    fn principal_roles() {
        let p = Principal::new("kermit", ["friend"]);
        assert!(p.has_role("friend"));
        assert!(!p.has_role("admin"));
    }
}
