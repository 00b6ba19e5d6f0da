//! Server-issued response caching directives.
//!
//! A [`CachingDirective`] is produced per operation by the serving side and
//! travels back to the caller as out-of-band reply metadata (see
//! [`crate::envelope::headers::CACHING_DIRECTIVE`]). The directive's
//! [`CachingSite`] says which side is expected to hold the cached response.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RemoteError;

/// Where a cacheable response should be cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CachingSite {
    #[default]
    None,
    Server,
    Client,
}

/// Instruction describing whether and for how long a response may be cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachingDirective {
    enable_caching: bool,
    #[serde(rename = "ttl_ms", with = "duration_ms")]
    time_to_live: Duration,
    site: CachingSite,
}

impl CachingDirective {
    #[must_use]
    pub fn new(enable_caching: bool, time_to_live: Duration, site: CachingSite) -> Self {
        Self {
            enable_caching,
            time_to_live,
            site,
        }
    }

    /// A directive that forbids caching.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(false, Duration::ZERO, CachingSite::None)
    }

    #[must_use]
    pub fn enable_caching(&self) -> bool {
        self.enable_caching
    }

    #[must_use]
    pub fn time_to_live(&self) -> Duration {
        self.time_to_live
    }

    #[must_use]
    pub fn site(&self) -> CachingSite {
        self.site
    }

    /// True when caching is enabled with a positive time-to-live.
    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        self.enable_caching && !self.time_to_live.is_zero()
    }

    /// Encodes the directive for transport in a reply header.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Serialization` if encoding fails.
    pub fn to_header_value(&self) -> Result<String, RemoteError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a directive previously produced by [`Self::to_header_value`].
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Serialization` if the header is malformed.
    pub fn from_header_value(value: &str) -> Result<Self, RemoteError> {
        Ok(serde_json::from_str(value)?)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
