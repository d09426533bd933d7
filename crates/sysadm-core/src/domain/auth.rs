//! Credential-validation contract.
//!
//! The connection core never checks credentials itself.  It hands an
//! [`Authorizer`] to every session it creates, and the session's protocol
//! handler calls [`Authorizer::authorize`] when the peer presents
//! [`Credentials`].  Where identities and policies are stored is up to the
//! implementation behind the trait.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Credentials presented by a peer.
///
/// Deserialises from either `{"token": "..."}` or
/// `{"username": "...", "password": "..."}`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Credentials {
    /// A pre-issued bearer token.
    Token { token: String },
    /// A user name and password pair.
    Password { username: String, password: String },
}

// Secrets must never reach log output.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token { .. } => f.debug_struct("Token").field("token", &"<redacted>").finish(),
            Self::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// The identity a successful authorization resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Name the rest of the system knows this peer by.
    pub name: String,
}

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Why an authorization attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The credentials were well-formed but not accepted.
    #[error("credentials rejected")]
    Rejected,
    /// The authorizer does not handle this kind of credential.
    #[error("unsupported credential type: {0}")]
    Unsupported(&'static str),
}

/// Validates credentials on behalf of sessions.
///
/// Implementations must be cheap to share: the server wraps one instance in
/// an `Arc` and passes a clone to every session.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait Authorizer: Send + Sync {
    /// Checks `credentials` and returns the identity they belong to.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when the credentials are not accepted.
    fn authorize(&self, credentials: &Credentials) -> Result<Identity, AuthError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_credentials_deserialize_from_json() {
        let creds: Credentials = serde_json::from_str(r#"{"token":"abc"}"#).unwrap();
        assert_eq!(
            creds,
            Credentials::Token {
                token: "abc".to_string()
            }
        );
    }

    #[test]
    fn test_password_credentials_deserialize_from_json() {
        let creds: Credentials =
            serde_json::from_str(r#"{"username":"root","password":"pw"}"#).unwrap();
        assert!(matches!(creds, Credentials::Password { ref username, .. } if username == "root"));
    }

    #[test]
    fn test_debug_output_redacts_secrets() {
        let token = Credentials::Token {
            token: "super-secret".to_string(),
        };
        let password = Credentials::Password {
            username: "root".to_string(),
            password: "hunter2".to_string(),
        };

        let token_dbg = format!("{token:?}");
        let password_dbg = format!("{password:?}");

        assert!(!token_dbg.contains("super-secret"));
        assert!(!password_dbg.contains("hunter2"));
        assert!(password_dbg.contains("root"));
    }

    #[test]
    fn test_mock_authorizer_returns_configured_identity() {
        // Arrange
        let mut mock = MockAuthorizer::new();
        mock.expect_authorize()
            .times(1)
            .returning(|_| Ok(Identity::new("operator")));

        // Act
        let result = mock.authorize(&Credentials::Token {
            token: "t".to_string(),
        });

        // Assert
        assert_eq!(result, Ok(Identity::new("operator")));
    }
}
