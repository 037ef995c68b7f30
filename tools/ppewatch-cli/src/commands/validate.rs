//! Check a configuration without starting any worker.

use std::path::PathBuf;

pub fn run(config_path: PathBuf, prompts: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Validating configuration at: {}", config_path.display());

    let config = super::load_config(&config_path)?;
    let equipment = super::load_equipment(&config, prompts)?;

    let sup = &config.supervisor;
    println!(
        "  Supervisor: heartbeat timeout {:?}, {} restarts per {:?}",
        sup.heartbeat_timeout, sup.max_restarts, sup.restart_window
    );
    println!(
        "  Dispatch: queue {} ({:?}), inference timeout {:?}",
        config.dispatch.queue_capacity,
        config.dispatch.backpressure,
        config.dispatch.inference_timeout
    );
    let alerts = &config.alerts;
    println!(
        "  Alerts: {} frames and {:?}, {}x{} grid, reset {:?}, hash TTL {:?}, delivery {}",
        alerts.min_consecutive_frames,
        alerts.debounce,
        alerts.grid_size,
        alerts.grid_size,
        alerts.suppression_reset,
        alerts.hash_ttl,
        if alerts.enable_alerts { "on" } else { "off" }
    );

    println!("  Cameras:");
    for camera in &config.cameras {
        println!(
            "    {} {} @ {} fps{} requires [{}]",
            camera.id,
            camera.uri,
            camera.target_fps,
            if camera.enabled { "" } else { " (disabled)" },
            config.required_ppe_for(camera).join(", ")
        );
    }

    match &equipment {
        Some(spec) => println!("  Equipment classes: {}", spec.classes().join(", ")),
        None => println!("  Equipment classes: none (no prompts file)"),
    }

    let mut warnings = Vec::new();
    for camera in config.enabled_cameras() {
        if let Some(roi) = &camera.roi_path {
            if !roi.exists() {
                warnings.push(format!(
                    "camera {}: ROI file {} not found; its worker will fail to start",
                    camera.id,
                    roi.display()
                ));
            }
        }
    }
    if config.detector.replay.is_none() {
        warnings.push("detector.replay is not set; `ppewatch run` needs a recording".to_string());
    }

    if warnings.is_empty() {
        println!("\nConfiguration is valid.");
    } else {
        println!("\nWarnings:");
        for warning in &warnings {
            println!("  - {warning}");
        }
        println!("\n{} warning(s) found.", warnings.len());
    }

    Ok(())
}
