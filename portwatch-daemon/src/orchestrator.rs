//! Daemon orchestration -- engine assembly and lifecycle management.
//!
//! The [`Orchestrator`] loads configuration, merges the optional rules file,
//! builds the [`FrameEngine`] and owns the single [`CaptureConsumer`].
//!
//! # Startup Order
//!
//! 1. PID file
//! 2. Frame engine (load, attach, readers)
//! 3. Capture consumer task
//!
//! # Shutdown Order (producers first)
//!
//! 1. Frame engine (detach, stop readers)
//! 2. Capture consumer (drain already committed events)
//! 3. PID file removal

use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use portwatch_core::config::PortwatchConfig;
use portwatch_core::pipeline::{HealthStatus, Pipeline};
use portwatch_engine::{CaptureConsumer, EngineConfig, FrameEngine, TracingDiagnostics};

use crate::consumer::spawn_capture_consumer;
use crate::health::{ComponentHealth, DaemonHealth, aggregate_status};
use crate::metrics_server;

/// The main daemon orchestrator.
pub struct Orchestrator {
    /// Loaded and validated configuration.
    config: PortwatchConfig,
    /// Frame engine, present when `engine.enabled`.
    engine: Option<FrameEngine>,
    /// Consumer half of the capture queue until `start()` takes it.
    consumer: Option<CaptureConsumer>,
    /// Running consumer task, between `start()` and `shutdown()`.
    consumer_task: Option<JoinHandle<u64>>,
    /// Shutdown broadcast sender (signals background tasks).
    shutdown_tx: broadcast::Sender<()>,
    /// Build time, for uptime reporting.
    start_time: Instant,
}

impl Orchestrator {
    /// Load configuration from `config_path` and build the orchestrator.
    ///
    /// Environment overrides are applied by `PortwatchConfig::load`.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = PortwatchConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config).await
    }

    /// Build from an already-loaded configuration.
    ///
    /// # Errors
    ///
    /// - Configuration validation fails
    /// - The rules file cannot be read or is invalid
    /// - The frame engine cannot be built (bad mode, empty or oversized port set)
    /// - The metrics recorder cannot be installed
    pub async fn build_from_config(config: PortwatchConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            record_daemon_metrics();
        }

        let (shutdown_tx, _) = broadcast::channel(16);

        let (engine, consumer) = if config.engine.enabled {
            let (engine, consumer) = build_engine(&config).await?;
            (Some(engine), Some(consumer))
        } else {
            tracing::warn!("frame engine disabled in configuration, daemon will idle");
            (None, None)
        };

        tracing::info!(engine = engine.is_some(), "orchestrator initialized");

        Ok(Self {
            config,
            engine,
            consumer,
            consumer_task: None,
            shutdown_tx,
            start_time: Instant::now(),
        })
    }

    /// Start the engine and consumer, then wait for SIGTERM or SIGINT.
    pub async fn run(&mut self) -> Result<()> {
        let pid_file = self.pid_file().map(Path::to_path_buf);
        if let Some(path) = &pid_file {
            write_pid_file(path)?;
        }

        let result = self.run_until_signal().await;

        if let Some(path) = &pid_file {
            remove_pid_file(path);
        }
        result
    }

    async fn run_until_signal(&mut self) -> Result<()> {
        self.start().await?;

        tracing::info!("portwatch-daemon running");
        let signal = wait_for_shutdown_signal().await;

        match signal {
            Ok(signal) => tracing::info!(signal, "shutdown signal received"),
            Err(ref e) => tracing::error!(error = %e, "signal handling failed, shutting down"),
        }

        self.shutdown().await?;
        signal.map(|_| ())
    }

    /// Start the engine and spawn the consumer task.
    ///
    /// On engine start failure nothing is left running.
    pub async fn start(&mut self) -> Result<()> {
        let Some(engine) = self.engine.as_mut() else {
            return Ok(());
        };

        engine
            .start()
            .await
            .map_err(|e| anyhow::anyhow!("failed to start frame engine: {}", e))?;

        if let Some(consumer) = self.consumer.take() {
            self.consumer_task = Some(spawn_capture_consumer(
                consumer,
                self.shutdown_tx.subscribe(),
            ));
        }
        Ok(())
    }

    /// Stop the engine, then let the consumer drain.
    pub async fn shutdown(&mut self) -> Result<()> {
        let mut stop_result = Ok(());
        if let Some(engine) = self.engine.as_mut().filter(|e| e.is_running()) {
            stop_result = engine
                .stop()
                .await
                .map_err(|e| anyhow::anyhow!("failed to stop frame engine: {}", e));
        }

        let _ = self.shutdown_tx.send(());

        if let Some(task) = self.consumer_task.take() {
            match task.await {
                Ok(consumed) => tracing::info!(consumed, "capture consumer finished"),
                Err(e) => tracing::error!(error = %e, "capture consumer task failed"),
            }
        }

        stop_result
    }

    /// Current aggregated health.
    pub async fn health(&self) -> DaemonHealth {
        let (engine_status, hook_stats, kernel_stats) = match &self.engine {
            Some(engine) => (
                engine.health_check().await,
                engine.stats(),
                engine.kernel_stats(),
            ),
            None => (HealthStatus::Healthy, Default::default(), None),
        };

        let components = vec![
            ComponentHealth {
                name: "frame-engine".to_owned(),
                enabled: self.engine.is_some(),
                status: engine_status,
            },
            ComponentHealth {
                name: "capture-consumer".to_owned(),
                enabled: self.engine.is_some(),
                status: self.consumer_status(),
            },
        ];

        DaemonHealth {
            status: aggregate_status(&components),
            uptime_secs: self.start_time.elapsed().as_secs(),
            components,
            hook_stats,
            kernel_stats,
        }
    }

    /// Loaded configuration.
    pub fn config(&self) -> &PortwatchConfig {
        &self.config
    }

    /// Frame engine, if enabled.
    pub fn engine(&self) -> Option<&FrameEngine> {
        self.engine.as_ref()
    }

    fn consumer_status(&self) -> HealthStatus {
        match (&self.consumer_task, &self.consumer) {
            (Some(task), _) if task.is_finished() => {
                HealthStatus::Unhealthy("consumer task exited".to_owned())
            }
            (Some(_), _) => HealthStatus::Healthy,
            (None, Some(_)) => HealthStatus::Unhealthy("not started".to_owned()),
            (None, None) => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }

    fn pid_file(&self) -> Option<&Path> {
        let path = self.config.general.pid_file.as_str();
        (!path.is_empty()).then(|| Path::new(path))
    }
}

/// Build the engine from `[engine]`, `[filter]`, `[capture]` and the rules file.
async fn build_engine(config: &PortwatchConfig) -> Result<(FrameEngine, CaptureConsumer)> {
    let mut engine_config = EngineConfig::from_core(config);

    if !config.filter.rules_path.is_empty() {
        let rules = EngineConfig::load_rules(&config.filter.rules_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load rules: {}", e))?;
        tracing::info!(count = rules.len(), path = %config.filter.rules_path, "port rules loaded");
        for rule in rules {
            engine_config.add_rule(rule);
        }
    }

    let (engine, consumer) = FrameEngine::builder()
        .config(engine_config)
        .diagnostics(std::sync::Arc::new(TracingDiagnostics))
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build frame engine: {}", e))?;

    tracing::info!(
        mode = %engine.mode(),
        interface = %config.engine.interface,
        watched_ports = engine.filter_rule().len(),
        "frame engine built"
    );

    Ok((engine, consumer))
}

/// Wait for SIGTERM or SIGINT and return its name.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Write the current PID to `path`.
///
/// The file is created with `create_new` so a second instance fails
/// instead of overwriting; the parent directory is created 0o700 and the
/// file is set to 0o600.
pub fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};

    if let Some(parent) = path.parent() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            fs::DirBuilder::new()
                .mode(0o700)
                .recursive(true)
                .create(parent)?;
        }
        #[cfg(not(unix))]
        {
            fs::create_dir_all(parent)?;
        }
    }

    let pid = std::process::id();

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_owned());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    if !file.metadata()?.is_file() {
        let _ = fs::remove_file(path);
        return Err(anyhow::anyhow!(
            "PID file {} is not a regular file",
            path.display()
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    writeln!(file, "{}", pid)?;

    tracing::info!(pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file. Failure is logged, not returned.
pub fn remove_pid_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::info!(path = %path.display(), "PID file removed"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove PID file"),
    }
}

fn record_daemon_metrics() {
    use portwatch_core::metrics as m;

    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "daemon metrics recorded");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disabled_config() -> PortwatchConfig {
        let mut config = PortwatchConfig::default();
        config.general.pid_file = String::new();
        config
    }

    #[tokio::test]
    async fn disabled_engine_builds_idle_orchestrator() {
        let orchestrator = Orchestrator::build_from_config(disabled_config())
            .await
            .unwrap();
        assert!(orchestrator.engine().is_none());
        assert!(orchestrator.health().await.status.is_healthy());
    }

    #[tokio::test]
    async fn enabled_engine_is_built_but_not_running() {
        let mut config = disabled_config();
        config.engine.enabled = true;
        config.filter.ports = vec![22, 8000];

        let orchestrator = Orchestrator::build_from_config(config).await.unwrap();
        let engine = orchestrator.engine().unwrap();
        assert!(!engine.is_running());
        assert_eq!(engine.filter_rule().len(), 2);

        let health = orchestrator.health().await;
        assert!(health.status.is_unhealthy());
        assert!(health.kernel_stats.is_none());
    }

    #[tokio::test]
    async fn start_failure_leaves_engine_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = disabled_config();
        config.engine.enabled = true;
        config.engine.program_path = dir.path().join("none.o").to_string_lossy().into_owned();

        let mut orchestrator = Orchestrator::build_from_config(config).await.unwrap();
        assert!(orchestrator.start().await.is_err());
        assert!(!orchestrator.engine().unwrap().is_running());

        let health = orchestrator.health().await;
        assert_eq!(
            health.components[1].status,
            HealthStatus::Unhealthy("not started".to_owned())
        );
        orchestrator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let mut config = disabled_config();
        config.filter.ports.clear();
        assert!(Orchestrator::build_from_config(config).await.is_err());
    }

    #[test]
    fn pid_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run").join("portwatch.pid");

        write_pid_file(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());

        let err = write_pid_file(&path).unwrap_err();
        assert!(err.to_string().contains("already exists"));

        remove_pid_file(&path);
        assert!(!path.exists());
    }
}
