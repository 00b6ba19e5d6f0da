//! Request and reply envelopes exchanged with the transport binding.
//!
//! Bodies are carried as `serde_json::Value` so the runtime can cache and
//! re-deliver replies without knowing the concrete operation types. Out-of-band
//! metadata (caching directive, culture) travels in string headers.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::directive::CachingDirective;
use crate::error::RemoteError;
use crate::session::ChannelCredentials;

/// Well-known header names.
pub mod headers {
    /// Reply header carrying an encoded [`CachingDirective`](crate::CachingDirective).
    pub const CACHING_DIRECTIVE: &str = "relay-caching-directive";
    /// Request header carrying the caller's culture (e.g. `"en-CA"`).
    pub const CULTURE: &str = "relay-culture";
}

pub type Headers = BTreeMap<String, String>;

/// A request object sent to a remote operation.
///
/// Requests that may be served from the response cache declare a cache key.
pub trait ServiceRequest: Serialize {
    fn cache_key(&self) -> Option<String> {
        None
    }
}

impl ServiceRequest for () {}

impl ServiceRequest for Value {}

impl ServiceRequest for str {}

impl ServiceRequest for String {}

/// Outbound request for one operation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub request_id: Uuid,
    pub contract: String,
    pub operation: String,
    pub body: Value,
    pub cache_key: Option<String>,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub credentials: Option<ChannelCredentials>,
}

impl RequestEnvelope {
    /// Serializes `request` into a new envelope with a fresh request id.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Serialization` if the request cannot be encoded.
    pub fn new<R: ServiceRequest + ?Sized>(
        contract: impl Into<String>,
        operation: impl Into<String>,
        request: &R,
    ) -> Result<Self, RemoteError> {
        Ok(Self {
            request_id: Uuid::new_v4(),
            contract: contract.into(),
            operation: operation.into(),
            body: serde_json::to_value(request)?,
            cache_key: request.cache_key(),
            headers: Headers::new(),
            credentials: None,
        })
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }
}

/// Reply to one operation call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub body: Value,
    #[serde(default)]
    pub headers: Headers,
    /// Set when the reply was served from a response cache instead of the
    /// target operation. Never sent over the wire.
    #[serde(skip)]
    cached: bool,
}

impl ReplyEnvelope {
    #[must_use]
    pub fn new(body: Value) -> Self {
        Self {
            body,
            headers: Headers::new(),
            cached: false,
        }
    }

    /// Wraps a serializable response.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Serialization` if the response cannot be encoded.
    pub fn from_response<T: Serialize + ?Sized>(response: &T) -> Result<Self, RemoteError> {
        Ok(Self::new(serde_json::to_value(response)?))
    }

    /// A reply re-delivered from a response cache.
    #[must_use]
    pub fn cached(body: Value) -> Self {
        Self {
            body,
            headers: Headers::new(),
            cached: true,
        }
    }

    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.cached
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Reads the caching directive attached by the serving side, if any.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Serialization` if the header is present but malformed.
    pub fn caching_directive(&self) -> Result<Option<CachingDirective>, RemoteError> {
        self.header(headers::CACHING_DIRECTIVE)
            .map(CachingDirective::from_header_value)
            .transpose()
    }

    /// Attaches `directive` as reply metadata.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Serialization` if the directive cannot be encoded.
    pub fn set_caching_directive(&mut self, directive: &CachingDirective) -> Result<(), RemoteError> {
        self.headers.insert(
            headers::CACHING_DIRECTIVE.to_string(),
            directive.to_header_value()?,
        );
        Ok(())
    }

    /// Decodes the body into the operation's response type.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Serialization` if the body does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, RemoteError> {
        Ok(T::deserialize(&self.body)?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde::Serialize;

    use super::*;
    use crate::directive::CachingSite;

    #[derive(Serialize)]
    struct GetOrder {
        order_id: u64,
    }

    impl ServiceRequest for GetOrder {
        fn cache_key(&self) -> Option<String> {
            Some(format!("order:{}", self.order_id))
        }
    }

    #[test]
    fn envelope_captures_cache_key_and_body() {
        let env = RequestEnvelope::new("Acme.IOrders", "GetOrder", &GetOrder { order_id: 7 })
            .unwrap();
        assert_eq!(env.cache_key.as_deref(), Some("order:7"));
        assert_eq!(env.body["order_id"], 7);
        assert!(env.credentials.is_none());
    }

    #[test]
    fn requests_without_key_declare_none() {
        let env = RequestEnvelope::new("Acme.IOrders", "Ping", &()).unwrap();
        assert!(env.cache_key.is_none());
        assert!(env.body.is_null());
    }

    #[test]
    fn each_envelope_gets_a_distinct_request_id() {
        let a = RequestEnvelope::new("c", "op", &()).unwrap();
        let b = RequestEnvelope::new("c", "op", &()).unwrap();
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn reply_carries_directive_in_headers() {
        let mut reply = ReplyEnvelope::new(serde_json::json!({"total": 3}));
        assert!(reply.caching_directive().unwrap().is_none());

        let directive = CachingDirective::new(true, Duration::from_secs(60), CachingSite::Client);
        reply.set_caching_directive(&directive).unwrap();
        assert_eq!(reply.caching_directive().unwrap(), Some(directive));
        assert!(!reply.is_cached());
    }

    #[test]
    fn cached_flag_is_not_serialized() {
        let reply = ReplyEnvelope::cached(serde_json::json!(1));
        assert!(reply.is_cached());
        let wire = serde_json::to_string(&reply).unwrap();
        let back: ReplyEnvelope = serde_json::from_str(&wire).unwrap();
        assert!(!back.is_cached());
    }

    #[test]
    fn decode_reports_shape_mismatch() {
        let reply = ReplyEnvelope::new(serde_json::json!("text"));
        let err = reply.decode::<u64>().unwrap_err();
        assert!(matches!(err, RemoteError::Serialization(_)));
    }
}
