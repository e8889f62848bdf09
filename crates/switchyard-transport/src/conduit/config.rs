//! Conduit configuration.

use std::fmt;

use serde::{Deserialize, Serialize};
use switchyard_core::{TimeoutConfig, TransportError, TransportResult};

use crate::buffer::BufferConfig;

/// When a request runs on the reactor instead of the caller thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UseAsyncPolicy {
    /// Every request goes through the reactor.
    Always,
    /// Every request runs on the caller thread.
    Never,
    /// Only asynchronous exchanges go through the reactor.
    #[default]
    AsyncOnly,
}

impl UseAsyncPolicy {
    /// Resolves the policy for an exchange.
    pub fn use_async(self, synchronous: bool) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::AsyncOnly => !synchronous,
        }
    }
}

/// Basic credentials sent to the endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationPolicy {
    /// User name
    pub user_name: String,
    /// Password
    pub password: String,
    /// Send credentials with the first request instead of waiting for a challenge
    #[serde(default = "default_preemptive")]
    pub preemptive: bool,
}

fn default_preemptive() -> bool {
    true
}

impl AuthorizationPolicy {
    /// Basic credentials sent up front.
    pub fn basic(user_name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            password: password.into(),
            preemptive: true,
        }
    }

    /// `Authorization` header value.
    pub fn header_value(&self) -> String {
        use base64::Engine;
        let raw = format!("{}:{}", self.user_name, self.password);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(raw)
        )
    }
}

impl fmt::Debug for AuthorizationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationPolicy")
            .field("user_name", &self.user_name)
            .field("password", &"<redacted>")
            .field("preemptive", &self.preemptive)
            .finish()
    }
}

/// TLS settings for `https` targets.
///
/// Equal parameters share one client context (and its session cache).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsClientParameters {
    /// Trust the bundled Mozilla root set.
    pub use_webpki_roots: bool,

    /// Extra trust anchors, DER encoded.
    pub ca_certificates: Vec<Vec<u8>>,

    /// Cipher suite names to allow, e.g. `TLS13_AES_256_GCM_SHA384`. Empty keeps
    /// the provider defaults.
    pub cipher_suites: Vec<String>,

    /// ALPN protocols to offer.
    pub alpn_protocols: Vec<String>,

    /// Must stay `true`; turning validation off is rejected.
    pub validate_certificates: bool,

    /// Name to verify instead of the URL host.
    pub server_name: Option<String>,
}

impl Default for TlsClientParameters {
    fn default() -> Self {
        Self {
            use_webpki_roots: true,
            ca_certificates: Vec::new(),
            cipher_suites: Vec::new(),
            alpn_protocols: vec!["http/1.1".to_string()],
            validate_certificates: true,
            server_name: None,
        }
    }
}

impl TlsClientParameters {
    /// Trust only the given DER encoded anchors.
    pub fn with_trust_anchors(anchors: Vec<Vec<u8>>) -> Self {
        Self {
            use_webpki_roots: false,
            ca_certificates: anchors,
            ..Self::default()
        }
    }
}

/// Configuration of an [`AsyncConduitFactory`](crate::AsyncConduitFactory)
/// and the conduits it creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConduitConfig {
    /// Reactor or caller-thread execution.
    pub use_async: UseAsyncPolicy,

    /// Shared buffer sizing.
    pub buffer: BufferConfig,

    /// Request bodies longer than this are streamed chunked.
    pub chunking_threshold: usize,

    /// Whether chunked request bodies are allowed at all.
    pub allow_chunking: bool,

    /// Connect and receive timeouts.
    pub timeouts: TimeoutConfig,

    /// Reactor worker threads.
    pub reactor_threads: usize,

    /// Follow 3xx redirects by retransmitting the request.
    pub auto_redirect: bool,

    /// Upper bound on redirects and authorization retries per request.
    pub max_retransmits: usize,

    /// Keep a copy of every request body so it can be retransmitted.
    pub cache_for_retransmission: bool,

    /// Basic credentials.
    pub authorization: Option<AuthorizationPolicy>,

    /// `User-Agent` header value.
    pub user_agent: String,

    /// TLS settings for `https` targets.
    pub tls: TlsClientParameters,
}

impl Default for ConduitConfig {
    fn default() -> Self {
        Self {
            use_async: UseAsyncPolicy::default(),
            buffer: BufferConfig::default(),
            chunking_threshold: 4096,
            allow_chunking: true,
            timeouts: TimeoutConfig::default(),
            reactor_threads: 2,
            auto_redirect: false,
            max_retransmits: 5,
            cache_for_retransmission: false,
            authorization: None,
            user_agent: format!("switchyard/{}", env!("CARGO_PKG_VERSION")),
            tls: TlsClientParameters::default(),
        }
    }
}

impl ConduitConfig {
    /// Every request through the reactor, short timeouts.
    #[must_use]
    pub fn reactor() -> Self {
        Self {
            use_async: UseAsyncPolicy::Always,
            timeouts: TimeoutConfig::fast(),
            ..Self::default()
        }
    }

    /// Sets the async policy.
    #[must_use]
    pub fn with_policy(mut self, policy: UseAsyncPolicy) -> Self {
        self.use_async = policy;
        self
    }

    /// Sets the timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Sets Basic credentials.
    #[must_use]
    pub fn with_authorization(mut self, authorization: AuthorizationPolicy) -> Self {
        self.authorization = Some(authorization);
        self
    }

    /// Whether request bodies must be cached for replay.
    pub fn caches_requests(&self) -> bool {
        self.cache_for_retransmission || self.auto_redirect || self.authorization.is_some()
    }

    /// Checks the settings for consistency.
    pub fn validate(&self) -> TransportResult<()> {
        self.buffer.validate()?;
        if self.reactor_threads == 0 {
            return Err(TransportError::ConfigurationError(
                "reactor_threads must be at least 1".to_string(),
            ));
        }
        if self.timeouts.receive.is_zero() || self.timeouts.connect.is_zero() {
            return Err(TransportError::ConfigurationError(
                "connect and receive timeouts must be non-zero".to_string(),
            ));
        }
        if !self.tls.validate_certificates {
            return Err(TransportError::ConfigurationError(
                "TLS certificate validation cannot be disabled".to_string(),
            ));
        }
        Ok(())
    }
}
