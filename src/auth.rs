//! Authentication performed on HELLO
//!
//! The session only asks an [`Authenticator`] for a verdict; deciding who may
//! log in is not its business.

use std::collections::HashMap;

use crate::error::{BoltError, Result};

/// Auth token as sent in HELLO (`scheme`, `principal`, `credentials`).
pub type AuthToken = HashMap<String, String>;

pub const SCHEME: &str = "scheme";
pub const PRINCIPAL: &str = "principal";
pub const CREDENTIALS: &str = "credentials";

pub trait Authenticator: Send + Sync {
    /// Verify the token and return the authenticated user name.
    ///
    /// Rejections are `Unauthorized` errors and kill the connection.
    fn authenticate(&self, token: &AuthToken) -> Result<String>;
}

/// Accepts everyone; the principal is taken from the token when present.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAuth;

impl Authenticator for NoAuth {
    fn authenticate(&self, token: &AuthToken) -> Result<String> {
        Ok(token.get(PRINCIPAL).cloned().unwrap_or_default())
    }
}

/// Single user/password pair with the `basic` scheme.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    user: String,
    password: String,
}

impl StaticCredentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self { user: user.into(), password: password.into() }
    }
}

impl Authenticator for StaticCredentials {
    fn authenticate(&self, token: &AuthToken) -> Result<String> {
        let scheme = token.get(SCHEME).map(String::as_str).unwrap_or("none");
        if scheme != "basic" {
            return Err(BoltError::unauthorized(format!(
                "Unsupported authentication scheme '{}'",
                scheme
            )));
        }

        let principal = token.get(PRINCIPAL).map(String::as_str).unwrap_or_default();
        let credentials = token.get(CREDENTIALS).map(String::as_str).unwrap_or_default();
        if principal != self.user || credentials != self.password {
            return Err(BoltError::unauthorized(
                "The client is unauthorized due to authentication failure.",
            ));
        }
        Ok(principal.to_string())
    }
}

/// Build a `basic` auth token.
pub fn basic_token(user: &str, password: &str) -> AuthToken {
    AuthToken::from([
        (SCHEME.to_string(), "basic".to_string()),
        (PRINCIPAL.to_string(), user.to_string()),
        (CREDENTIALS.to_string(), password.to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Status;

    #[test]
    fn test_no_auth_accepts_anything() {
        assert_eq!(NoAuth.authenticate(&AuthToken::new()).unwrap(), "");
        assert_eq!(NoAuth.authenticate(&basic_token("alice", "x")).unwrap(), "alice");
    }

    #[test]
    fn test_static_credentials() {
        let auth = StaticCredentials::new("neo4j", "secret");

        assert_eq!(auth.authenticate(&basic_token("neo4j", "secret")).unwrap(), "neo4j");

        let err = auth.authenticate(&basic_token("neo4j", "wrong")).unwrap_err();
        assert_eq!(err.status(), Status::Unauthorized);
        assert!(err.is_fatal());

        let err = auth.authenticate(&AuthToken::new()).unwrap_err();
        assert!(err.message().contains("'none'"));
    }
}
