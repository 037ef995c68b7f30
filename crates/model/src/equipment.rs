//! Equipment specification (the prompts file).
//!
//! Lists every equipment class the detector is asked to find, with the
//! positive and negative text prompts open-vocabulary detectors use and
//! an optional display label for notifications:
//!
//! ```yaml
//! positive:
//!   helmet: ["hard hat", "safety helmet"]
//!   vest: ["reflective vest"]
//! negative:
//!   helmet: ["cap", "hood"]
//! labels:
//!   helmet: Hard hat
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Equipment classes with their prompts and display labels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EquipmentSpec {
    /// Prompts describing each class.
    pub positive: BTreeMap<String, Vec<String>>,
    /// Prompts describing look-alikes to reject.
    pub negative: BTreeMap<String, Vec<String>>,
    /// Human-readable names.
    pub labels: BTreeMap<String, String>,
}

/// Errors that can occur when loading an equipment spec.
#[derive(Debug, thiserror::Error)]
pub enum EquipmentSpecError {
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Invalid equipment spec: {message}")]
    ValidationError { message: String },
}

impl EquipmentSpec {
    /// Load an equipment spec from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EquipmentSpecError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| EquipmentSpecError::IoError {
            path: path.to_path_buf(),
            source: e,
        })?;
        let spec: EquipmentSpec =
            serde_yaml::from_str(&content).map_err(|e| EquipmentSpecError::ParseError {
                path: path.to_path_buf(),
                source: e,
            })?;
        spec.validate()?;
        Ok(spec)
    }

    /// Every class must have at least one positive prompt.
    pub fn validate(&self) -> Result<(), EquipmentSpecError> {
        if self.positive.is_empty() {
            return Err(EquipmentSpecError::ValidationError {
                message: "no equipment classes defined under `positive`".to_string(),
            });
        }
        if let Some((class, _)) = self.positive.iter().find(|(_, p)| p.is_empty()) {
            return Err(EquipmentSpecError::ValidationError {
                message: format!("equipment class `{class}` has no positive prompts"),
            });
        }
        Ok(())
    }

    /// Equipment classes, sorted.
    pub fn classes(&self) -> Vec<String> {
        self.positive.keys().cloned().collect()
    }

    /// Display label for a class, falling back to the class name.
    pub fn label<'a>(&'a self, class: &'a str) -> &'a str {
        self.labels.get(class).map(String::as_str).unwrap_or(class)
    }

    /// Whether the spec defines the class.
    pub fn defines(&self, class: &str) -> bool {
        self.positive.contains_key(class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: &str = r#"
positive:
  helmet: ["hard hat", "safety helmet"]
  vest: ["reflective vest"]
negative:
  helmet: ["cap"]
labels:
  helmet: Hard hat
"#;

    #[test]
    fn test_load_spec() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompts.yaml");
        std::fs::write(&path, SPEC).unwrap();

        let spec = EquipmentSpec::load(&path).unwrap();
        assert_eq!(spec.classes(), vec!["helmet", "vest"]);
        assert_eq!(spec.label("helmet"), "Hard hat");
        assert_eq!(spec.label("vest"), "vest");
        assert!(spec.defines("vest"));
        assert!(!spec.defines("gloves"));
    }

    #[test]
    fn test_rejects_class_without_prompts() {
        let spec: EquipmentSpec = serde_yaml::from_str("positive:\n  helmet: []\n").unwrap();
        assert!(matches!(
            spec.validate(),
            Err(EquipmentSpecError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = EquipmentSpec::load("/nonexistent/prompts.yaml").unwrap_err();
        assert!(matches!(err, EquipmentSpecError::IoError { .. }));
    }
}
