//! Security policy handler: authenticates credentials and provides the
//! security policies the exchange satisfies.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use esb_core::{Credential, Exchange, ExchangePhase, HandlerError, Principal, SecurityPolicy};
use tracing::debug;

use crate::bus::handler::ExchangeHandler;

// ---------------------------------------------------------------------------
// Authenticator
// ---------------------------------------------------------------------------

/// Verifies a credential and returns the principal it identifies.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, credential: &Credential) -> Option<Principal>;
}

/// Constant-time string comparison.
///
/// Both inputs are padded to the longer length with different bytes so a
/// length mismatch never compares equal and never short-circuits.
#[must_use]
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    use subtle::ConstantTimeEq;

    let max_len = a.len().max(b.len());
    let mut a_padded = vec![0u8; max_len];
    let mut b_padded = vec![0xFFu8; max_len];
    a_padded[..a.len()].copy_from_slice(a.as_bytes());
    b_padded[..b.len()].copy_from_slice(b.as_bytes());

    let lengths_equal = a.len().ct_eq(&b.len());
    let contents_equal = a_padded.as_slice().ct_eq(b_padded.as_slice());
    (lengths_equal & contents_equal).into()
}

/// In-memory users and tokens.
#[derive(Default)]
pub struct StaticAuthenticator {
    users: HashMap<String, (String, Vec<String>)>,
    tokens: Vec<(String, Principal)>,
}

impl StaticAuthenticator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_user<I, R>(mut self, username: impl Into<String>, password: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        self.users.insert(
            username.into(),
            (password.into(), roles.into_iter().map(Into::into).collect()),
        );
        self
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, principal: Principal) -> Self {
        self.tokens.push((token.into(), principal));
        self
    }
}

impl Authenticator for StaticAuthenticator {
    fn authenticate(&self, credential: &Credential) -> Option<Principal> {
        match credential {
            Credential::UsernamePassword { username, password } => {
                let (expected, roles) = self.users.get(username)?;
                constant_time_compare(password, expected)
                    .then(|| Principal::new(username.clone(), roles.iter().cloned()))
            }
            // Every token is compared so timing does not reveal a match position.
            Credential::Token(token) => self
                .tokens
                .iter()
                .filter(|(expected, _)| constant_time_compare(token, expected))
                .map(|(_, principal)| principal.clone())
                .last(),
        }
    }
}

// ---------------------------------------------------------------------------
// SecurityHandler
// ---------------------------------------------------------------------------

pub struct SecurityHandler {
    authenticator: Arc<dyn Authenticator>,
}

impl SecurityHandler {
    pub const NAME: &'static str = "security";

    #[must_use]
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self { authenticator }
    }

    fn authenticate(&self, exchange: &mut Exchange) -> Result<(), HandlerError> {
        let security = exchange.security();
        if security.is_authenticated() || security.credentials().is_empty() {
            return Ok(());
        }
        let principal = security
            .credentials()
            .iter()
            .find_map(|c| self.authenticator.authenticate(c))
            .ok_or_else(|| HandlerError::Security("authentication failed".to_string()))?;
        debug!(exchange_id = %exchange.id(), principal = %principal.id, "caller authenticated");
        exchange.security_mut().set_principal(principal);
        Ok(())
    }
}

#[async_trait]
impl ExchangeHandler for SecurityHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn handle_message(&self, exchange: &mut Exchange) -> Result<(), HandlerError> {
        if exchange.phase() != Some(ExchangePhase::In) {
            return Ok(());
        }
        self.authenticate(exchange)?;

        if exchange.security().is_authenticated() {
            exchange.policies_mut().provide(SecurityPolicy::ClientAuthentication);
        }
        if exchange.security().is_confidential() {
            exchange.policies_mut().provide(SecurityPolicy::Confidentiality);
        }

        let roles = exchange.contract().security.roles_allowed();
        let authorized = roles.is_empty()
            || exchange
                .security()
                .principal()
                .is_some_and(|p| roles.iter().any(|r| p.has_role(r)));
        if !authorized {
            let caller = exchange
                .security()
                .principal()
                .map_or_else(|| "anonymous caller".to_string(), |p| format!("principal {}", p.id));
            return Err(HandlerError::Security(format!(
                "{caller} is not authorized to invoke {}",
                exchange.contract().service
            )));
        }
        exchange.policies_mut().provide(SecurityPolicy::Authorization);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
