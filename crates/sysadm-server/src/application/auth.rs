//! StaticTokenAuthorizer: a fixed set of bearer tokens from the config file.

use std::collections::HashSet;

use sysadm_core::{AuthError, Authorizer, Credentials, Identity};
use tracing::debug;

/// Accepts any token in a fixed set; rejects everything else.
///
/// An empty set rejects every peer.  Password credentials are not handled
/// here and yield [`AuthError::Unsupported`].
#[derive(Debug, Clone, Default)]
pub struct StaticTokenAuthorizer {
    tokens: HashSet<String>,
}

impl StaticTokenAuthorizer {
    pub fn new<I, T>(tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Authorizer for StaticTokenAuthorizer {
    fn authorize(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        match credentials {
            Credentials::Token { token } if self.tokens.contains(token) => {
                Ok(Identity::new("token"))
            }
            Credentials::Token { .. } => {
                debug!("unknown token presented");
                Err(AuthError::Rejected)
            }
            Credentials::Password { .. } => Err(AuthError::Unsupported("password")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(t: &str) -> Credentials {
        Credentials::Token {
            token: t.to_string(),
        }
    }

    #[test]
    fn test_known_token_is_accepted() {
        let auth = StaticTokenAuthorizer::new(["alpha", "beta"]);
        assert_eq!(auth.authorize(&token("beta")), Ok(Identity::new("token")));
    }

    #[test]
    fn test_unknown_token_is_rejected() {
        let auth = StaticTokenAuthorizer::new(["alpha"]);
        assert_eq!(auth.authorize(&token("gamma")), Err(AuthError::Rejected));
    }

    #[test]
    fn test_empty_set_rejects_everything() {
        let auth = StaticTokenAuthorizer::default();
        assert!(auth.is_empty());
        assert_eq!(auth.authorize(&token("")), Err(AuthError::Rejected));
    }

    #[test]
    fn test_password_credentials_are_unsupported() {
        let auth = StaticTokenAuthorizer::new(["alpha"]);
        let creds = Credentials::Password {
            username: "root".to_string(),
            password: "alpha".to_string(),
        };
        assert_eq!(
            auth.authorize(&creds),
            Err(AuthError::Unsupported("password"))
        );
    }
}
