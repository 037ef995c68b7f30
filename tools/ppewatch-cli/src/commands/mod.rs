pub mod run;
pub mod validate;

use std::path::{Path, PathBuf};

use anyhow::Context;
use ppewatch_common::config::PipelineConfig;
use ppewatch_model::EquipmentSpec;

/// Load and validate the pipeline configuration.
pub fn load_config(path: &Path) -> anyhow::Result<PipelineConfig> {
    PipelineConfig::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

/// Load the equipment prompts, if any, and check that they define every
/// class some camera requires.
pub fn load_equipment(
    config: &PipelineConfig,
    prompts: Option<PathBuf>,
) -> anyhow::Result<Option<EquipmentSpec>> {
    let Some(path) = prompts.or_else(|| config.prompts.clone()) else {
        return Ok(None);
    };
    let spec = EquipmentSpec::load(&path)?;

    let undefined: Vec<&str> = config
        .enabled_cameras()
        .flat_map(|camera| config.required_ppe_for(camera))
        .filter(|class| !spec.defines(class))
        .map(String::as_str)
        .collect();
    if let Some(class) = undefined.first() {
        anyhow::bail!(
            "required equipment `{class}` is not defined in {}",
            path.display()
        );
    }
    Ok(Some(spec))
}
