use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{RecipeError, RecipeResult};

/// Parses a `--config` file (JSON or YAML) into a flat config map. Returns an
/// empty map if `path` is `None`.
pub fn load_config_file(path: Option<&str>) -> RecipeResult<BTreeMap<String, Value>> {
    let Some(path) = path else {
        return Ok(BTreeMap::new());
    };

    let content = std::fs::read_to_string(path)
        .map_err(|e| RecipeError::Config(format!("failed to read config file {path}: {e}")))?;

    let value = serde_json::from_str::<Value>(&content)
        .or_else(|_| serde_yaml::from_str::<Value>(&content))
        .map_err(|e| RecipeError::Config(format!("failed to parse config file {path}: {e}")))?;

    match value {
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(RecipeError::Config(format!(
            "config file {path} must contain a JSON/YAML object, got {other}"
        ))),
    }
}

/// Copies each name listed in `env_mask` from the process environment into
/// the config map, when set. Unknown names are silently ignored, per the
/// recipe model's `env_mask` contract. Environment values always win over
/// whatever a `--config` file already placed under the same key.
pub fn apply_env_mask(config: &mut BTreeMap<String, Value>, env_mask: Option<&[String]>) {
    let Some(names) = env_mask else {
        return;
    };
    for name in names {
        if let Ok(value) = std::env::var(name) {
            config.insert(name.clone(), Value::String(value));
        }
    }
}
