//! Service runner for lifecycle management.

use std::future::Future;
use std::time::Duration;

use tokio::signal;
use tokio::task::JoinHandle;

use plclink_common::{LoggingConfig, init_tracing};

use crate::ServiceArgs;
use crate::config::ServiceConfig;
use crate::error::{Result, ServiceError};
use crate::shutdown::{Shutdown, ShutdownTrigger};

/// Time granted to workers to release their connections after shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Runner that owns a service's worker tasks.
///
/// Handles logging initialization, task spawning, Ctrl+C and a cooperative
/// shutdown: workers observe a [`Shutdown`] handle and get a grace period to
/// close their connections before being aborted.
///
/// # Example
///
/// ```ignore
/// let args = ServiceArgs::parse_with_default("s7.json5");
/// let config = S7BridgeConfig::load(&args.config)?;
/// let mut runner = ServiceRunner::new("s7", config, Some(&args))?;
///
/// let shutdown = runner.shutdown();
/// runner.spawn("acquisition", async move { acquisition.run(shutdown).await; });
///
/// runner.run().await
/// ```
pub struct ServiceRunner<C: ServiceConfig> {
    name: String,
    version: String,
    config: C,
    trigger: ShutdownTrigger,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl<C: ServiceConfig> ServiceRunner<C> {
    /// Create a runner and initialize logging from the configuration, with
    /// the CLI `--log-level` taking precedence.
    pub fn new(name: impl Into<String>, config: C, args: Option<&ServiceArgs>) -> Result<Self> {
        let log_config = match args.and_then(|a| a.log_level.as_ref()) {
            Some(level) => LoggingConfig {
                level: level.clone(),
                format: config.logging().format,
            },
            None => config.logging().clone(),
        };

        init_tracing(&log_config).map_err(|e| ServiceError::Logging(e.to_string()))?;

        let runner = Self::without_logging(name, config);
        tracing::info!(service = %runner.name, version = %runner.version, "Starting service");
        Ok(runner)
    }

    /// Create a runner without touching the global tracing subscriber.
    pub fn without_logging(name: impl Into<String>, config: C) -> Self {
        let (trigger, _) = Shutdown::channel();
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            config,
            trigger,
            tasks: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn config(&self) -> &C {
        &self.config
    }

    /// A shutdown handle for a worker.
    pub fn shutdown(&self) -> Shutdown {
        self.trigger.subscribe()
    }

    /// Spawn a worker task.
    pub fn spawn<F>(&mut self, name: impl Into<String>, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push((name.into(), tokio::spawn(future)));
    }

    /// Spawn a worker task whose error is logged when it finishes.
    pub fn spawn_with_error<F, E>(&mut self, name: impl Into<String>, future: F)
    where
        F: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let name = name.into();
        let worker = name.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = future.await {
                tracing::error!(worker = %worker, error = %e, "Worker failed");
            }
        });
        self.tasks.push((name, handle));
    }

    /// Run until Ctrl+C is received.
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run until `stop` completes, then shut workers down.
    pub async fn run_until<S>(self, stop: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        tracing::info!(
            service = %self.name,
            tasks = self.tasks.len(),
            "Service running. Press Ctrl+C to stop."
        );

        stop.await;

        tracing::info!(service = %self.name, "Shutting down");
        self.trigger.trigger();

        let mut failed = Vec::new();
        for (name, mut handle) in self.tasks {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
                Ok(Ok(())) => tracing::debug!(worker = %name, "Worker stopped"),
                Ok(Err(e)) if e.is_panic() => {
                    tracing::error!(worker = %name, "Worker panicked");
                    failed.push(name);
                }
                Ok(Err(_)) => {}
                Err(_) => {
                    tracing::warn!(worker = %name, "Worker did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        tracing::info!(service = %self.name, "Goodbye!");

        if failed.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::Worker(format!(
                "worker(s) panicked: {}",
                failed.join(", ")
            )))
        }
    }
}
