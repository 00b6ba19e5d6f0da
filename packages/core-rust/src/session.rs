//! Session tokens and outbound credentials.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Token identifying an authenticated session. Value-equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionToken {
    id: String,
    expiry_time: DateTime<Utc>,
}

impl SessionToken {
    #[must_use]
    pub fn new(id: impl Into<String>, expiry_time: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            expiry_time,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn expiry_time(&self) -> DateTime<Utc> {
        self.expiry_time
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry_time
    }
}

/// Supplies the identity attached to outbound channels.
///
/// The session token id doubles as the channel password.
pub trait UserCredentialsProvider: Send + Sync {
    fn user_name(&self) -> String;

    fn session_token_id(&self) -> String;
}

/// Fixed credentials, for hosts that manage identity outside of scopes.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    pub user_name: String,
    pub session_token_id: String,
}

impl UserCredentialsProvider for StaticCredentials {
    fn user_name(&self) -> String {
        self.user_name.clone()
    }

    fn session_token_id(&self) -> String {
        self.session_token_id.clone()
    }
}

/// Credentials carried by a channel.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCredentials {
    pub user_name: String,
    pub password: String,
}

impl ChannelCredentials {
    #[must_use]
    pub fn from_provider(provider: &dyn UserCredentialsProvider) -> Self {
        Self {
            user_name: provider.user_name(),
            password: provider.session_token_id(),
        }
    }
}

impl fmt::Debug for ChannelCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelCredentials")
            .field("user_name", &self.user_name)
            .field("password", &"<redacted>")
            .finish()
    }
}
