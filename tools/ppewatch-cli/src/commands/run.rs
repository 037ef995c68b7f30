//! Run the pipeline until interrupted.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use ppewatch_common::clock::secs;
use ppewatch_common::config::PipelineConfig;
use ppewatch_common::logging::init_logging;
use ppewatch_runtime::replay::{ReplayDetectorFactory, SyntheticCameraFactory};
use ppewatch_runtime::sinks::{JsonlAlertSink, LogNotifier};
use ppewatch_runtime::{Collaborators, Supervisor};

pub struct RunOptions {
    pub config: PathBuf,
    pub prompts: Option<PathBuf>,
    pub roi: Option<PathBuf>,
    pub roi_polys: Vec<String>,
    pub log_file: Option<PathBuf>,
    pub heartbeat_timeout: Option<f64>,
    pub max_restarts: Option<u32>,
    pub restart_window: Option<f64>,
    pub enable_alerts: bool,
    pub verbose: bool,
}

pub fn run(options: RunOptions) -> anyhow::Result<()> {
    let mut config = super::load_config(&options.config)?;
    apply_overrides(&mut config, &options)?;
    config.validate()?;

    let _log_guard = init_logging(&config.logging)?;
    let equipment = super::load_equipment(&config, options.prompts.clone())?;

    let replay = config.detector.replay.clone().context(
        "detector.replay must point to a detection recording; no other detector is built in",
    )?;
    let sink = JsonlAlertSink::open(&config.alert_log).with_context(|| {
        format!("Failed to open alert log {}", config.alert_log.display())
    })?;

    let collaborators = Collaborators {
        detector: Arc::new(ReplayDetectorFactory::new(replay)),
        cameras: Arc::new(SyntheticCameraFactory::new(config.required_ppe.clone())),
        sink: Arc::new(sink),
        notifier: Arc::new(LogNotifier),
        equipment: equipment.map(Arc::new),
    };

    tracing::info!(
        config = %options.config.display(),
        cameras = config.enabled_cameras().count(),
        alerts = config.alerts.enable_alerts,
        alert_log = %config.alert_log.display(),
        "Starting ppewatch"
    );

    let grace = config.supervisor.shutdown_grace;
    block_on_with_grace(supervise(config, collaborators), grace)?
}

async fn supervise(config: PipelineConfig, collaborators: Collaborators) -> anyhow::Result<()> {
    let mut supervisor = Supervisor::new(config, collaborators);
    supervisor.run_until(shutdown_signal()).await?;

    for worker in supervisor.snapshot() {
        tracing::info!(
            worker = %worker.id,
            state = %worker.state,
            restarts = worker.restarts,
            "Final worker state"
        );
    }
    Ok(())
}

/// Drive `future` to completion on a fresh runtime.
///
/// Blocking threads still busy afterwards, such as a detector call that
/// never returns, get `grace` to finish and are then left behind so the
/// process can exit.
fn block_on_with_grace<F: Future>(future: F, grace: Duration) -> anyhow::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    let output = runtime.block_on(future);
    runtime.shutdown_timeout(grace);
    Ok(output)
}

/// CLI flags take precedence over the configuration file.
fn apply_overrides(config: &mut PipelineConfig, options: &RunOptions) -> anyhow::Result<()> {
    if let Some(v) = options.heartbeat_timeout {
        config.supervisor.heartbeat_timeout = secs(v).context("--heartbeat-timeout")?;
    }
    if let Some(v) = options.max_restarts {
        config.supervisor.max_restarts = v;
    }
    if let Some(v) = options.restart_window {
        config.supervisor.restart_window = secs(v).context("--restart-window")?;
    }
    if let Some(path) = &options.log_file {
        config.logging.file = Some(path.clone());
    }
    if options.verbose {
        config.logging.level = "debug".to_string();
    }
    if options.enable_alerts {
        config.alerts.enable_alerts = true;
    }
    for camera in &mut config.cameras {
        if let Some(roi) = &options.roi {
            camera.roi_path = Some(roi.clone());
        }
        if !options.roi_polys.is_empty() {
            camera.roi_polys = options.roi_polys.clone();
        }
    }
    Ok(())
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ppewatch_common::config::CameraConfig;

    fn options() -> RunOptions {
        RunOptions {
            config: PathBuf::from("ppewatch.yaml"),
            prompts: None,
            roi: None,
            roi_polys: Vec::new(),
            log_file: None,
            heartbeat_timeout: None,
            max_restarts: None,
            restart_window: None,
            enable_alerts: false,
            verbose: false,
        }
    }

    #[test]
    fn test_flags_override_config() {
        let mut config = PipelineConfig::default();
        config.cameras = vec![
            CameraConfig::new("a", "rtsp://a"),
            CameraConfig::new("b", "rtsp://b"),
        ];
        let options = RunOptions {
            roi: Some(PathBuf::from("roi.json")),
            roi_polys: vec!["dock".to_string()],
            heartbeat_timeout: Some(12.5),
            max_restarts: Some(1),
            enable_alerts: true,
            ..options()
        };

        apply_overrides(&mut config, &options).unwrap();
        assert_eq!(config.supervisor.heartbeat_timeout, Duration::from_millis(12_500));
        assert_eq!(config.supervisor.max_restarts, 1);
        assert_eq!(config.supervisor.restart_window, Duration::from_secs(3600));
        assert!(config.alerts.enable_alerts);
        assert!(config
            .cameras
            .iter()
            .all(|c| c.roi_path.as_deref() == Some(std::path::Path::new("roi.json"))
                && c.roi_polys == vec!["dock".to_string()]));
    }

    #[test]
    fn test_no_flags_keep_config() {
        let mut config = PipelineConfig::default();
        config.alerts.enable_alerts = true;
        apply_overrides(&mut config, &options()).unwrap();
        assert!(config.alerts.enable_alerts);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_unrepresentable_duration_flags_are_rejected() {
        let mut config = PipelineConfig::default();
        let huge = RunOptions {
            heartbeat_timeout: Some(1.0e30),
            ..options()
        };
        let err = apply_overrides(&mut config, &huge).unwrap_err();
        assert!(format!("{err:#}").contains("--heartbeat-timeout"));

        let negative = RunOptions {
            restart_window: Some(-5.0),
            ..options()
        };
        assert!(apply_overrides(&mut config, &negative).is_err());
        assert_eq!(config.supervisor.restart_window, Duration::from_secs(3600));
    }

    #[test]
    fn test_runtime_exit_does_not_wait_for_stuck_blocking_call() {
        let started = std::time::Instant::now();
        let value = block_on_with_grace(
            async {
                tokio::task::spawn_blocking(|| std::thread::sleep(Duration::from_secs(5)));
                7
            },
            Duration::from_millis(100),
        )
        .unwrap();
        assert_eq!(value, 7);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
