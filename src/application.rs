//! Wires the services together and runs them until shutdown.

use crate::api;
use crate::capture::CaptureController;
use crate::core::{Config, PktwatchError, Result};
use crate::forwarder::{ForwardQueue, HttpTransport, RetryingForwarder};
use crate::storage::{self, ConnectionPool, QueryService, StoreWriter};
use axum::Router;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// How long shutdown waits for a capture session to flush.
const CAPTURE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long shutdown waits for queued parser records.
const PARSER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// One pipeline stage exposed over HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Capture,
    Parser,
    Persistor,
    Analyzer,
}

impl Service {
    pub const ALL: [Service; 4] = [Service::Capture, Service::Parser, Service::Persistor, Service::Analyzer];

    pub fn name(&self) -> &'static str {
        match self {
            Service::Capture => "capture",
            Service::Parser => "parser",
            Service::Persistor => "persistor",
            Service::Analyzer => "analyzer",
        }
    }

    fn needs_storage(&self) -> bool {
        matches!(self, Service::Persistor | Service::Analyzer)
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Main application struct that coordinates the selected services.
pub struct Application {
    config: Config,
    services: Vec<Service>,
    capture: Option<CaptureController>,
    parser_queue: Option<ForwardQueue>,
}

impl Application {
    /// Create an application running `services` with `config`.
    pub fn new(config: Config, services: Vec<Service>) -> Result<Self> {
        config.validate()?;
        if services.is_empty() {
            return Err(PktwatchError::config("no service selected"));
        }
        Ok(Self {
            config,
            services,
            capture: None,
            parser_queue: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Listen address of `service`.
    pub fn address(&self, service: Service) -> SocketAddr {
        let server = &self.config.server;
        let port = match service {
            Service::Capture => server.capture_port,
            Service::Parser => server.parser_port,
            Service::Persistor => server.persistor_port,
            Service::Analyzer => server.analyzer_port,
        };
        SocketAddr::new(server.bind_address, port)
    }

    /// Build the router of every selected service.
    ///
    /// Storage is opened once, with its retry policy, and shared by the
    /// persistor and analyzer.
    pub async fn routers(&mut self) -> Result<Vec<(Service, Router)>> {
        let pool = if self.services.iter().any(Service::needs_storage) {
            let (pool, _) = storage::open(&self.config.storage).await?;
            Some(pool)
        } else {
            None
        };

        let mut routers = Vec::with_capacity(self.services.len());
        for service in self.services.clone() {
            let router = self.router(service, pool.as_ref())?;
            routers.push((service, api::with_layers(router, self.config.server.enable_cors)));
        }
        Ok(routers)
    }

    fn router(&mut self, service: Service, pool: Option<&ConnectionPool>) -> Result<Router> {
        let shared = || pool.cloned().ok_or_else(|| PktwatchError::config("storage not opened"));

        Ok(match service {
            Service::Capture => {
                let transport = HttpTransport::new(
                    self.config.capture.parser_url.clone(),
                    self.config.capture.post_timeout,
                )?;
                let controller = CaptureController::new(self.config.capture.clone(), Arc::new(transport));
                self.capture = Some(controller.clone());
                api::capture::router(controller)
            },
            Service::Parser => {
                let transport = HttpTransport::new(
                    self.config.parser.persistor_url.clone(),
                    self.config.parser.post_timeout,
                )?;
                let forwarder = RetryingForwarder::new(Arc::new(transport), self.config.parser.retry.clone());
                let queue = ForwardQueue::spawn(forwarder);
                self.parser_queue = Some(queue.clone());
                api::parser::router(queue)
            },
            Service::Persistor => api::persistor::router(StoreWriter::new(shared()?)),
            Service::Analyzer => api::analyzer::router(
                QueryService::new(shared()?, self.config.analyzer.timeline_window),
                self.config.analyzer.clone(),
            ),
        })
    }

    /// Serve every selected service until Ctrl-C or a server fails.
    pub async fn run(mut self) -> Result<()> {
        let routers = self.routers().await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut servers = tokio::task::JoinSet::new();
        for (service, router) in routers {
            let addr = self.address(service);
            let mut shutdown = shutdown_rx.clone();
            servers.spawn(async move {
                let signal = async move {
                    let _ = shutdown.changed().await;
                };
                api::serve(service.name(), router, addr, signal).await
            });
        }

        tracing::info!(
            "pktwatch running: {}",
            self.services
                .iter()
                .map(|s| format!("{} on {}", s, self.address(*s)))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut failure = None;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal, stopping...");
            },
            Some(result) = servers.join_next() => {
                match result {
                    Ok(Err(e)) => failure = Some(e),
                    Err(e) => failure = Some(e.into()),
                    Ok(Ok(())) => {},
                }
            },
        }

        if let Some(capture) = &self.capture {
            capture.stop();
            if tokio::time::timeout(CAPTURE_DRAIN_TIMEOUT, capture.wait_idle()).await.is_err() {
                tracing::warn!("Capture session did not finish within {:?}", CAPTURE_DRAIN_TIMEOUT);
            }
        }

        let _ = shutdown_tx.send(true);
        while let Some(result) = servers.join_next().await {
            match result {
                Ok(Err(e)) => tracing::error!("Server error during shutdown: {}", e),
                Err(e) => tracing::error!("Server task failed: {}", e),
                Ok(Ok(())) => {},
            }
        }

        if let Some(queue) = &self.parser_queue {
            match tokio::time::timeout(PARSER_DRAIN_TIMEOUT, queue.flushed()).await {
                Ok(Ok(())) => tracing::info!("Parser queue drained: {:?}", queue.stats()),
                Ok(Err(e)) => tracing::warn!("Parser queue unavailable: {}", e),
                Err(_) => tracing::warn!("Parser queue not drained within {:?}", PARSER_DRAIN_TIMEOUT),
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
