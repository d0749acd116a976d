//! Bridge runner for lifecycle management.

use std::future::Future;
use std::time::Duration;

use hemma_common::{LogStream, init_tracing};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::BridgeArgs;
use crate::config::BridgeConfig;
use crate::error::Result;

/// How long tasks get to wind down after shutdown before they are aborted.
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(100);

/// Bridge runner that manages the lifecycle of the bridge process.
///
/// Handles:
/// - Logging initialization
/// - Task spawning and management
/// - Graceful shutdown on Ctrl+C or when a critical task fails
///
/// Every task receives shutdown through the runner's
/// [`CancellationToken`]; tasks still running after the grace period are
/// aborted.
///
/// # Example
///
/// ```ignore
/// use hemma_bridge_framework::{BridgeConfig, BridgeRunner, Router};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = MyBridgeConfig::load_or_default(args.bridge.config.as_deref())?;
///     let mut runner = BridgeRunner::new_with_args("mybridge", config, Some(&args.bridge), None)?;
///
///     let router = Router::new(sources, runner.config().router());
///     let shutdown = runner.shutdown_token();
///     runner.spawn(router.run(shutdown));
///
///     runner.run().await?;
///     Ok(())
/// }
/// ```
pub struct BridgeRunner<C: BridgeConfig> {
    /// Bridge name for logging.
    name: String,
    /// Bridge version.
    version: String,
    /// The loaded configuration.
    config: C,
    /// Cancelled once shutdown starts.
    shutdown: CancellationToken,
    /// Spawned tasks.
    tasks: Vec<JoinHandle<()>>,
    grace_period: Duration,
}

impl<C: BridgeConfig> BridgeRunner<C> {
    /// Create a new bridge runner, initializing logging from the config.
    pub fn new(name: impl Into<String>, config: C) -> Result<Self> {
        Self::new_with_args(name, config, None, None)
    }

    /// Create a new bridge runner with CLI overrides for logging.
    ///
    /// When `log_stream` is given, log lines are also published on it.
    pub fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&BridgeArgs>,
        log_stream: Option<LogStream>,
    ) -> Result<Self> {
        let log_config = match args {
            Some(args) => args.effective_logging(config.logging()),
            None => config.logging().clone(),
        };

        init_tracing(&log_config, log_stream)?;

        let runner = Self::without_logging(name, config);
        tracing::info!(bridge = %runner.name, version = %runner.version, "Starting bridge");
        Ok(runner)
    }

    /// Create a runner that leaves the global subscriber alone.
    pub fn without_logging(name: impl Into<String>, config: C) -> Self {
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            config,
            shutdown: CancellationToken::new(),
            tasks: Vec::new(),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    /// Set how long tasks may run after shutdown before being aborted.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Get the bridge name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the bridge version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Token cancelled when the bridge shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Number of tracked tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Spawn a worker task.
    ///
    /// The task will be tracked and aborted if still running after shutdown.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.tasks.push(handle);
    }

    /// Spawn a worker whose failure takes the whole bridge down.
    ///
    /// The failure is logged once, as "Error on `name`, shutting down", and
    /// the shutdown token is cancelled.
    pub fn spawn_critical<F, E>(&mut self, name: impl Into<String>, future: F)
    where
        F: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let name = name.into();
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = future.await {
                tracing::error!(worker = %name, error = %e, "Error on {}, shutting down", name);
                shutdown.cancel();
            }
        });
        self.tasks.push(handle);
    }

    /// Run the bridge until Ctrl+C is received or a critical task fails.
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run the bridge until `signal` completes or the shutdown token is
    /// cancelled.
    ///
    /// This will:
    /// 1. Cancel the shutdown token
    /// 2. Give tasks the grace period to finish
    /// 3. Abort whatever is still running
    pub async fn run_until<S>(mut self, signal: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        tracing::info!(
            bridge = %self.name,
            tasks = self.tasks.len(),
            "Bridge running. Press Ctrl+C to stop."
        );

        tokio::select! {
            _ = signal => {
                tracing::info!(bridge = %self.name, "Received shutdown signal");
            }
            _ = self.shutdown.cancelled() => {
                tracing::warn!(bridge = %self.name, "Shutdown requested by a worker");
            }
        }

        self.shutdown.cancel();

        let deadline = tokio::time::Instant::now() + self.grace_period;
        for task in self.tasks.iter_mut() {
            if task.is_finished() {
                continue;
            }
            if tokio::time::timeout_at(deadline, &mut *task).await.is_err() {
                break;
            }
        }

        let mut aborted = 0;
        for task in &self.tasks {
            if !task.is_finished() {
                task.abort();
                aborted += 1;
            }
        }
        if aborted > 0 {
            tracing::debug!(bridge = %self.name, aborted, "Aborted tasks after grace period");
        }

        tracing::info!(bridge = %self.name, "Goodbye!");

        Ok(())
    }
}
