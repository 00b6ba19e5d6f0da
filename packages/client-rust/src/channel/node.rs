//! Candidate endpoints and their blackout state.

use std::time::Duration;

use chrono::{DateTime, Utc};
use relay_core::clock::{duration_ms, millis_to_utc};
use url::Url;

/// A configured endpoint plus the time until which it is blacked out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelNode {
    endpoint: Url,
    blackout_until_ms: u64,
}

impl ChannelNode {
    #[must_use]
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            blackout_until_ms: 0,
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    #[must_use]
    pub fn is_blacked_out(&self, now_ms: u64) -> bool {
        now_ms < self.blackout_until_ms
    }

    /// Suspends the node for `duration` starting at `now_ms`.
    pub fn blackout(&mut self, now_ms: u64, duration: Duration) {
        self.blackout_until_ms = now_ms.saturating_add(duration_ms(duration));
    }

    /// End of the current (or most recent) blackout, if there ever was one.
    #[must_use]
    pub fn blackout_expiry(&self) -> Option<DateTime<Utc>> {
        (self.blackout_until_ms > 0).then(|| millis_to_utc(self.blackout_until_ms))
    }
}
