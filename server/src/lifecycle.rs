//! Application lifecycle and graceful shutdown.
//!
//! 1. **Startup**: connect and migrate the database, warm the cache, bind
//!    the HTTP listener, configure the stream consumer
//! 2. **Runtime**: serve HTTP and run the ingestion worker side by side
//! 3. **Shutdown**: on Ctrl+C or SIGTERM the HTTP server stops accepting
//!    connections and drains, the ingestion worker is cancelled, and the
//!    process waits for it up to the configured timeout
//!
//! The cache is warmed before the listener is bound, so the first request
//! already sees a populated cache.

use crate::config::Config;
use anyhow::Context;
use axum::Router;
use orderflow_core::OrderStore;
use orderflow_postgres::{PoolConfig, PostgresDeadLetterQueue, PostgresOrderStore};
use orderflow_redpanda::RedpandaOrderSource;
use orderflow_runtime::retry::{RetryPolicy, retry_with_backoff};
use orderflow_runtime::{IngestConfig, IngestSummary, IngestionWorker, OrderCache, OrderService};
use orderflow_web::{AppState, router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A fully wired application, ready to run.
pub struct Application {
    listener: TcpListener,
    router: Router,
    worker: IngestionWorker,
    shutdown: CancellationToken,
    shutdown_timeout: Duration,
}

impl Application {
    /// Assemble the production application from `config`.
    ///
    /// Database connection is retried with backoff; a failed cache warm-up
    /// only logs a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the database stays unreachable, migrations fail,
    /// the stream consumer cannot be configured, or the HTTP address cannot
    /// be bound.
    pub async fn build(config: &Config) -> anyhow::Result<Self> {
        let pool = PoolConfig {
            max_connections: config.database.max_connections,
            min_connections: config.database.min_connections,
            acquire_timeout: config.database.connect_timeout,
        };
        let policy = RetryPolicy::builder()
            .max_retries(10)
            .initial_delay(Duration::from_millis(500))
            .max_delay(Duration::from_secs(10))
            .build();

        let store = retry_with_backoff(&policy, "connect to PostgreSQL", || {
            PostgresOrderStore::connect_with(&config.database.url, &pool)
        })
        .await
        .context("Failed to connect to PostgreSQL")?;
        store.migrate().await.context("Failed to run migrations")?;
        info!("Database ready");

        let dead_letters = PostgresDeadLetterQueue::new(store.pool().clone());
        let store: Arc<dyn OrderStore> = Arc::new(store);
        let cache = Arc::new(OrderCache::new(config.cache.capacity));
        let service = OrderService::new(Arc::clone(&store), Arc::clone(&cache));

        match service.restore_cache(cache.capacity()).await {
            Ok(report) => info!(loaded = report.loaded, skipped = report.skipped, "Cache warmed"),
            Err(e) => warn!(error = %e, "Cache warm-up failed, starting with an empty cache"),
        }

        let source = RedpandaOrderSource::builder()
            .brokers(&config.kafka.brokers)
            .consumer_group(&config.kafka.group_id)
            .auto_offset_reset(&config.kafka.auto_offset_reset)
            .session_timeout(config.kafka.session_timeout)
            .build()
            .context("Failed to configure stream consumer")?;

        let worker = IngestionWorker::new(
            Arc::new(source),
            store,
            cache,
            Arc::new(dead_letters),
            IngestConfig::new(&config.kafka.topic)
                .with_max_delivery_attempts(config.ingest.max_delivery_attempts)
                .with_resubscribe_delay(config.ingest.resubscribe_delay)
                .with_retry_backoff(config.ingest.retry_delay, config.ingest.max_retry_delay),
        );

        let addr = config.server.http_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind HTTP listener on {addr}"))?;

        Ok(Self::new(
            listener,
            router(AppState::new(service)),
            worker,
            config.server.shutdown_timeout,
        ))
    }

    /// Assemble an application from prepared parts.
    #[must_use]
    pub fn new(
        listener: TcpListener,
        router: Router,
        worker: IngestionWorker,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            listener,
            router,
            worker,
            shutdown: CancellationToken::new(),
            shutdown_timeout,
        }
    }

    /// Address the HTTP listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the socket address cannot be read.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Token that stops the application when cancelled, in addition to
    /// process signals.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serve until shutdown, then stop the ingestion worker.
    ///
    /// Returns the worker's summary, or `None` if it failed or did not stop
    /// within the shutdown timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP server fails.
    pub async fn run(self) -> anyhow::Result<Option<IngestSummary>> {
        let Self {
            listener,
            router,
            worker,
            shutdown,
            shutdown_timeout,
        } = self;

        let ingest = tokio::spawn(worker.run(shutdown.child_token()));

        let signal_token = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = shutdown_signal() => signal_token.cancel(),
                () = signal_token.cancelled() => {}
            }
        });

        info!(addr = ?listener.local_addr().ok(), "HTTP server listening");
        let http_token = shutdown.clone();
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(async move { http_token.cancelled().await })
            .await;

        info!("HTTP server stopped, stopping ingestion");
        shutdown.cancel();

        let summary = match tokio::time::timeout(shutdown_timeout, ingest).await {
            Ok(Ok(summary)) => {
                info!(messages = summary.messages, "Ingestion worker stopped");
                Some(summary)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Ingestion worker task failed");
                None
            }
            Err(_) => {
                warn!(
                    timeout_secs = shutdown_timeout.as_secs(),
                    "Ingestion worker did not stop in time"
                );
                None
            }
        };

        served.context("HTTP server failed")?;
        info!("Graceful shutdown complete");
        Ok(summary)
    }
}

/// Resolves on SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal"),
        () = terminate => info!("Received SIGTERM signal"),
    }
}
