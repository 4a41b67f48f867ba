//! Definition-file decoding shared by every loader (dimensions, rulebase, world model,
//! library, mission profile). Format is chosen by extension: `.yaml`/`.yml` is YAML,
//! anything else is JSON.

use crate::error::{MeaningError, MeaningResult};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

pub(crate) fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
        .unwrap_or(false)
}

/// Read and decode a definition file. Errors name the offending path.
pub(crate) fn read_definition<T: DeserializeOwned>(path: &Path) -> MeaningResult<T> {
    let content = fs::read_to_string(path)
        .map_err(|e| MeaningError::Config(format!("{}: {}", path.display(), e)))?;
    decode(path, &content)
}

pub(crate) fn decode<T: DeserializeOwned>(path: &Path, content: &str) -> MeaningResult<T> {
    if is_yaml(path) {
        serde_yaml::from_str(content)
            .map_err(|e| MeaningError::Config(format!("{}: {}", path.display(), e)))
    } else {
        serde_json::from_str(content)
            .map_err(|e| MeaningError::Config(format!("{}: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_detection_by_extension() {
        assert!(is_yaml(Path::new("dims/color.yaml")));
        assert!(is_yaml(Path::new("dims/color.YML")));
        assert!(!is_yaml(Path::new("dims/color.json")));
        assert!(!is_yaml(Path::new("dims/color")));
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = read_definition::<serde_json::Value>(Path::new("/nonexistent/dims.json"))
            .unwrap_err();
        assert!(matches!(err, MeaningError::Config(msg) if msg.contains("/nonexistent/dims.json")));
    }
}
