//! Settings bundle for the remote service layer.
//!
//! [`RemoteServiceSettings`] is supplied once, at construction time, and never
//! mutated afterwards. [`RemoteServiceSettings::validate`] parses the endpoint
//! URLs and rejects values the channel layer cannot use.

use std::time::Duration;

use url::Url;

/// How server certificates are validated by the transport binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CertificateValidationMode {
    /// No validation. Only suitable for development.
    None,
    PeerTrust,
    #[default]
    ChainTrust,
    PeerOrChainTrust,
}

/// Certificate revocation checking performed by the transport binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RevocationMode {
    NoCheck,
    #[default]
    Online,
    Offline,
}

/// Immutable configuration of the remote service layer.
#[derive(Debug, Clone)]
pub struct RemoteServiceSettings {
    /// Base URL shared by all services in the service layer.
    pub base_url: String,
    /// Optional failover base URL. Failover is only enabled when set.
    pub failover_base_url: Option<String>,
    /// Maximum size in bytes of a reply accepted by the client.
    pub max_received_message_size: u64,
    pub certificate_validation_mode: CertificateValidationMode,
    pub revocation_mode: RevocationMode,
    /// Time in which a send must complete. `None` or zero means the binding default.
    pub send_timeout: Option<Duration>,
    /// Minimum time before a failed endpoint is contacted again.
    pub failed_endpoint_blackout_time: Duration,
}

impl Default for RemoteServiceSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/".to_string(),
            failover_base_url: None,
            max_received_message_size: 2 * 1024 * 1024, // 2 MiB
            certificate_validation_mode: CertificateValidationMode::default(),
            revocation_mode: RevocationMode::default(),
            send_timeout: None,
            failed_endpoint_blackout_time: Duration::from_secs(30),
        }
    }
}

/// Errors raised while validating [`RemoteServiceSettings`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {field} {value:?}: {source}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("{field} must use http or https, got {scheme:?}")]
    UnsupportedScheme { field: &'static str, scheme: String },
    #[error("max_received_message_size must be greater than zero")]
    ZeroMessageSize,
    #[error("failover_base_url must differ from base_url")]
    FailoverSameAsPrimary,
}

impl RemoteServiceSettings {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_failover(mut self, failover_base_url: impl Into<String>) -> Self {
        self.failover_base_url = Some(failover_base_url.into());
        self
    }

    /// Whether failover is configured.
    #[must_use]
    pub fn supports_failover(&self) -> bool {
        self.failover_base_url
            .as_deref()
            .is_some_and(|url| !url.trim().is_empty())
    }

    /// Parses the configured endpoints in registration order: primary first,
    /// then the failover endpoint if one is configured.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for malformed or unsupported URLs, a zero
    /// message size, or a failover URL equal to the primary.
    pub fn validate(&self) -> Result<Vec<Url>, ConfigError> {
        if self.max_received_message_size == 0 {
            return Err(ConfigError::ZeroMessageSize);
        }

        let mut endpoints = vec![parse_base_url("base_url", &self.base_url)?];
        if self.supports_failover() {
            let raw = self.failover_base_url.as_deref().unwrap_or_default();
            let failover = parse_base_url("failover_base_url", raw)?;
            if failover == endpoints[0] {
                return Err(ConfigError::FailoverSameAsPrimary);
            }
            endpoints.push(failover);
        }
        Ok(endpoints)
    }

    /// The binding-relevant subset handed to channel connectors.
    #[must_use]
    pub fn binding(&self) -> BindingSettings {
        BindingSettings {
            max_received_message_size: self.max_received_message_size,
            certificate_validation_mode: self.certificate_validation_mode,
            revocation_mode: self.revocation_mode,
            send_timeout: self.send_timeout.filter(|timeout| !timeout.is_zero()),
        }
    }
}

/// Transport binding parameters applied to every channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingSettings {
    pub max_received_message_size: u64,
    pub certificate_validation_mode: CertificateValidationMode,
    pub revocation_mode: RevocationMode,
    pub send_timeout: Option<Duration>,
}

impl Default for BindingSettings {
    fn default() -> Self {
        RemoteServiceSettings::default().binding()
    }
}

/// Parses a base URL, forcing a trailing slash so that service paths join
/// beneath it rather than replacing its last segment.
fn parse_base_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(value.trim()).map_err(|source| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
        source,
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::UnsupportedScheme {
            field,
            scheme: url.scheme().to_string(),
        });
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
