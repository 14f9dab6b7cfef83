//! Server runtime orchestration.

use crate::callbacks::DebugCallbacks;
use crate::config::ServerConfig;
use crate::snapshot_file::SnapshotFile;
use crate::transport::Transport;
use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use xds_sotw_core::{DiscoveryServer, IdHash, SessionRegistry, SnapshotCache};

/// The management server.
pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    cache: Arc<SnapshotCache>,
    callbacks: Arc<DebugCallbacks>,
    snapshot_source: Option<SnapshotFile>,
}

impl Server {
    /// Bind the listener and load the initial snapshot document, if any.
    ///
    /// # Errors
    ///
    /// Returns error if the listener cannot be bound or the initial snapshot
    /// document is unreadable or inconsistent.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let cache = Arc::new(SnapshotCache::new(Arc::new(SessionRegistry::new())));

        let snapshot_source = match &config.snapshot.path {
            Some(path) => {
                let mut source =
                    SnapshotFile::new(path, &config.node_id, config.snapshot.reload_interval);
                source
                    .reload(&cache)
                    .await
                    .context("Failed to load initial snapshot")?;
                Some(source)
            }
            None => {
                tracing::warn!("No snapshot document configured, requests wait for one");
                None
            }
        };

        let addr = SocketAddr::new(config.listen.bind, config.listen.port);
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;

        Ok(Self {
            config,
            listener,
            cache,
            callbacks: Arc::new(DebugCallbacks::new()),
            snapshot_source,
        })
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read listener address")
    }

    /// The snapshot cache served by this server.
    #[must_use]
    pub fn cache(&self) -> Arc<SnapshotCache> {
        Arc::clone(&self.cache)
    }

    /// The hooks counting protocol events.
    #[must_use]
    pub fn callbacks(&self) -> Arc<DebugCallbacks> {
        Arc::clone(&self.callbacks)
    }

    /// Serve until Ctrl+C.
    ///
    /// # Errors
    ///
    /// Returns error if the listener fails.
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Serve until `shutdown` completes.
    ///
    /// # Errors
    ///
    /// Returns error if the listener fails.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let Self {
            config,
            listener,
            cache,
            callbacks,
            snapshot_source,
        } = self;

        let addr = listener.local_addr().context("Failed to read listener address")?;

        let server = DiscoveryServer::new(Arc::clone(&cache), callbacks.clone())
            .with_nack_policy(config.nack_policy);
        let transport = Arc::new(Transport::new(
            Arc::new(server),
            Arc::new(IdHash::with_fallback(config.node_id.clone())),
            config.listen.max_frame_bytes,
        ));

        let poller = snapshot_source.map(|source| {
            tracing::info!(path = %source.path().display(), "Watching snapshot document");
            source.start(Arc::clone(&cache))
        });

        let mut report = tokio::time::interval(config.report_interval);
        report.tick().await;

        tracing::info!(%addr, node_id = %config.node_id, "Management server listening");

        tokio::pin!(shutdown);
        let serve = transport.serve(listener);
        tokio::pin!(serve);

        let result = loop {
            tokio::select! {
                result = &mut serve => {
                    break result.context("Listener failed");
                }
                _ = report.tick() => {
                    callbacks.report();
                }
                () = &mut shutdown => {
                    tracing::info!("Shutting down");
                    break Ok(());
                }
            }
        };

        if let Some(poller) = poller {
            poller.abort();
        }
        callbacks.report();

        result
    }
}
