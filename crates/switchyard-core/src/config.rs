//! Shared timeout configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeouts applied by a conduit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout.
    pub connect: Duration,

    /// Upper bound on receiving the whole response, head and body, once the
    /// request is sent.
    pub receive: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            receive: Duration::from_secs(60),
        }
    }
}

impl TimeoutConfig {
    /// Short timeouts for local or low latency services.
    #[must_use]
    pub const fn fast() -> Self {
        Self {
            connect: Duration::from_secs(2),
            receive: Duration::from_secs(5),
        }
    }

    /// Generous timeouts for slow operations.
    #[must_use]
    pub const fn patient() -> Self {
        Self {
            connect: Duration::from_secs(60),
            receive: Duration::from_secs(600),
        }
    }

    /// Overrides the connect timeout.
    #[must_use]
    pub const fn with_connect(mut self, connect: Duration) -> Self {
        self.connect = connect;
        self
    }

    /// Overrides the receive timeout.
    #[must_use]
    pub const fn with_receive(mut self, receive: Duration) -> Self {
        self.receive = receive;
        self
    }
}
