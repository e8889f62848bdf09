//! Conduit factory owning the reactor runtime.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use switchyard_core::{
    AtomicMetrics, Conduit, ConduitInitiator, Endpoint, TransportMetrics, TransportResult,
};
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info};

use super::AsyncConduit;
use super::config::ConduitConfig;

/// State shared by a factory and every conduit it created.
#[derive(Debug)]
pub(crate) struct ConduitContext {
    runtime: Option<Runtime>,
    pub(crate) handle: Handle,
    pub(crate) config: ConduitConfig,
    #[cfg(feature = "tls")]
    pub(crate) tls: super::tls::TlsContextCache,
    pub(crate) metrics: Arc<AtomicMetrics>,
    shutdown: AtomicBool,
}

impl ConduitContext {
    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl Drop for ConduitContext {
    fn drop(&mut self) {
        // May be dropped from within an async context
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Creates [`AsyncConduit`]s that share one reactor.
///
/// The factory either owns a small multi-thread tokio runtime (see
/// [`AsyncConduitFactory::new`]) or borrows an existing one through its
/// [`Handle`]. After [`AsyncConduitFactory::shutdown`] new requests run on the
/// caller thread instead.
#[derive(Debug, Clone)]
pub struct AsyncConduitFactory {
    ctx: Arc<ConduitContext>,
}

impl AsyncConduitFactory {
    /// Creates a factory with its own reactor of `config.reactor_threads` workers.
    pub fn new(config: ConduitConfig) -> TransportResult<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.reactor_threads)
            .thread_name("switchyard-reactor")
            .enable_all()
            .build()?;
        info!(
            threads = config.reactor_threads,
            policy = ?config.use_async,
            "Started conduit reactor"
        );
        let handle = runtime.handle().clone();
        Ok(Self::from_parts(config, Some(runtime), handle))
    }

    /// Creates a factory that spawns reactor tasks on an existing runtime.
    pub fn with_handle(config: ConduitConfig, handle: Handle) -> TransportResult<Self> {
        config.validate()?;
        Ok(Self::from_parts(config, None, handle))
    }

    fn from_parts(config: ConduitConfig, runtime: Option<Runtime>, handle: Handle) -> Self {
        Self {
            ctx: Arc::new(ConduitContext {
                runtime,
                handle,
                config,
                #[cfg(feature = "tls")]
                tls: super::tls::TlsContextCache::default(),
                metrics: Arc::new(AtomicMetrics::new()),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Creates a conduit for `endpoint`.
    pub fn create_conduit(&self, endpoint: &Endpoint) -> Arc<AsyncConduit> {
        debug!(endpoint = %endpoint, "Creating conduit");
        Arc::new(AsyncConduit::new(endpoint.clone(), Arc::clone(&self.ctx)))
    }

    /// The configuration conduits are created with.
    pub fn config(&self) -> &ConduitConfig {
        &self.ctx.config
    }

    /// Snapshot of transport counters across all conduits of this factory.
    pub fn metrics(&self) -> TransportMetrics {
        self.ctx.metrics.snapshot()
    }

    /// Stops routing new requests through the reactor. Idempotent.
    pub fn shutdown(&self) {
        if !self.ctx.shutdown.swap(true, Ordering::AcqRel) {
            info!("Conduit factory shut down; new requests run on the caller thread");
        }
    }

    /// Whether [`AsyncConduitFactory::shutdown`] has been called.
    pub fn is_shutdown(&self) -> bool {
        self.ctx.is_shutdown()
    }
}

impl ConduitInitiator for AsyncConduitFactory {
    fn get_conduit(&self, endpoint: &Endpoint) -> TransportResult<Arc<dyn Conduit>> {
        Ok(self.create_conduit(endpoint))
    }
}
