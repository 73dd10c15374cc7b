//! Per-tab session discriminator.
//!
//! Several tabs of the same user share a server session cookie. The
//! subsystem id tells their server-side state apart; it is derived from a
//! prefix and the millisecond the client was created.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Query parameter carrying the [`SubsystemId`].
pub const SUBSYSTEM_PARAM: &str = "subsystem";

/// Unique id of one client instance, formatted `prefix_millis`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubsystemId(String);

impl SubsystemId {
    /// Derive an id from `prefix` and the current time.
    pub fn generate(prefix: &str) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        Self::from_parts(prefix, millis)
    }

    pub fn from_parts(prefix: &str, millis: u128) -> Self {
        Self(format!("{prefix}_{millis}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `url` with `subsystem=<id>` appended to its query string.
    pub fn append_to(&self, url: &str) -> String {
        url_append(url, &format!("{SUBSYSTEM_PARAM}={}", self.0))
    }
}

impl fmt::Display for SubsystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Append a `key=value` query fragment to `url`, choosing `?` or `&`.
pub fn url_append(url: &str, query: &str) -> String {
    if query.is_empty() {
        return url.to_string();
    }
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}{query}")
}
