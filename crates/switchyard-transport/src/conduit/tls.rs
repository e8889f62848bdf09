//! rustls client contexts, cached by parameter hash.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use switchyard_core::{TransportError, TransportResult};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::debug;

use super::TlsSessionInfo;
use super::config::TlsClientParameters;

/// Single-slot cache of the last built client context.
///
/// Conduits sharing a factory usually share parameters, so one slot is enough;
/// a parameter change rebuilds and replaces it.
#[derive(Debug, Default)]
pub(crate) struct TlsContextCache {
    last: Mutex<Option<(u64, Arc<ClientConfig>)>>,
}

impl TlsContextCache {
    pub(crate) fn get_or_build(
        &self,
        params: &TlsClientParameters,
    ) -> TransportResult<Arc<ClientConfig>> {
        let hash = parameter_hash(params);
        let mut last = self.last.lock();
        if let Some((cached_hash, config)) = last.as_ref()
            && *cached_hash == hash
        {
            return Ok(Arc::clone(config));
        }
        let config = Arc::new(build_client_config(params)?);
        debug!(hash, "Built TLS client context");
        *last = Some((hash, Arc::clone(&config)));
        Ok(config)
    }
}

fn parameter_hash(params: &TlsClientParameters) -> u64 {
    let mut hasher = DefaultHasher::new();
    params.hash(&mut hasher);
    hasher.finish()
}

fn build_client_config(params: &TlsClientParameters) -> TransportResult<ClientConfig> {
    if !params.validate_certificates {
        return Err(TransportError::ConfigurationError(
            "TLS certificate validation cannot be disabled".to_string(),
        ));
    }

    let mut roots = RootCertStore::empty();
    if params.use_webpki_roots {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    for der in &params.ca_certificates {
        roots
            .add(CertificateDer::from(der.clone()))
            .map_err(|e| TransportError::ConfigurationError(format!("invalid CA certificate: {e}")))?;
    }
    if roots.is_empty() {
        return Err(TransportError::ConfigurationError(
            "no TLS trust anchors configured".to_string(),
        ));
    }

    let mut provider = rustls::crypto::aws_lc_rs::default_provider();
    if !params.cipher_suites.is_empty() {
        provider.cipher_suites.retain(|suite| {
            let name = format!("{:?}", suite.suite());
            params
                .cipher_suites
                .iter()
                .any(|wanted| wanted.eq_ignore_ascii_case(&name))
        });
        if provider.cipher_suites.is_empty() {
            return Err(TransportError::ConfigurationError(format!(
                "none of the configured cipher suites are supported: {:?}",
                params.cipher_suites
            )));
        }
    }

    let mut config = ClientConfig::builder_with_provider(Arc::new(provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::ConfigurationError(format!("TLS protocol versions: {e}")))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = params
        .alpn_protocols
        .iter()
        .map(|p| p.as_bytes().to_vec())
        .collect();
    Ok(config)
}

/// Runs the TLS handshake over an established TCP stream.
pub(crate) async fn handshake(
    config: Arc<ClientConfig>,
    host: &str,
    params: &TlsClientParameters,
    tcp: TcpStream,
) -> TransportResult<(TlsStream<TcpStream>, TlsSessionInfo)> {
    let name = params.server_name.as_deref().unwrap_or(host).to_string();
    let server_name = ServerName::try_from(name.clone()).map_err(|e| {
        TransportError::ConfigurationError(format!("invalid TLS server name {name}: {e}"))
    })?;

    let stream = TlsConnector::from(config)
        .connect(server_name, tcp)
        .await
        .map_err(|e| TransportError::ConnectionFailed(format!("TLS handshake with {name} failed: {e}")))?;

    let (_, connection) = stream.get_ref();
    let session = TlsSessionInfo {
        protocol: connection.protocol_version().map(|v| format!("{v:?}")),
        cipher_suite: connection
            .negotiated_cipher_suite()
            .map(|s| format!("{:?}", s.suite())),
        alpn: connection
            .alpn_protocol()
            .map(|p| String::from_utf8_lossy(p).into_owned()),
        peer_certificates: connection.peer_certificates().map_or(0, <[_]>::len),
    };
    Ok((stream, session))
}
