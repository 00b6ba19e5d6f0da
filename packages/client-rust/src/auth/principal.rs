//! The identity established by an authentication scope.

use std::fmt;
use std::sync::Arc;

use relay_core::{RemoteError, SessionToken};
use tokio::sync::OnceCell;

use super::AuthenticationService;

/// A user bound to a session. Authority tokens are fetched from the
/// authentication service on first use and kept for the principal's lifetime.
pub struct SessionPrincipal {
    user_name: String,
    session_token: SessionToken,
    authority: Option<Arc<dyn AuthenticationService>>,
    authority_tokens: OnceCell<Vec<String>>,
}

impl SessionPrincipal {
    #[must_use]
    pub fn new(
        user_name: impl Into<String>,
        session_token: SessionToken,
        authority: Arc<dyn AuthenticationService>,
    ) -> Self {
        Self {
            user_name: user_name.into(),
            session_token,
            authority: Some(authority),
            authority_tokens: OnceCell::new(),
        }
    }

    /// A principal whose authority tokens are already known.
    #[must_use]
    pub fn with_authority_tokens(
        user_name: impl Into<String>,
        session_token: SessionToken,
        tokens: Vec<String>,
    ) -> Self {
        Self {
            user_name: user_name.into(),
            session_token,
            authority: None,
            authority_tokens: OnceCell::new_with(Some(tokens)),
        }
    }

    #[must_use]
    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    #[must_use]
    pub fn session_token(&self) -> &SessionToken {
        &self.session_token
    }

    /// Authority tokens granted to the user.
    ///
    /// # Errors
    ///
    /// Returns the lookup error; a later call retries.
    pub async fn authority_tokens(&self) -> Result<&[String], RemoteError> {
        let tokens = self
            .authority_tokens
            .get_or_try_init(|| async {
                match &self.authority {
                    Some(service) => service.list_authority_tokens(&self.user_name).await,
                    None => Ok(Vec::new()),
                }
            })
            .await?;
        Ok(tokens.as_slice())
    }

    /// # Errors
    ///
    /// Returns the authority lookup error.
    pub async fn has_authority(&self, token: &str) -> Result<bool, RemoteError> {
        Ok(self.authority_tokens().await?.iter().any(|t| t == token))
    }
}

impl fmt::Debug for SessionPrincipal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionPrincipal")
            .field("user_name", &self.user_name)
            .field("session_token", &self.session_token.id())
            .field("authority_loaded", &self.authority_tokens.initialized())
            .finish_non_exhaustive()
    }
}
