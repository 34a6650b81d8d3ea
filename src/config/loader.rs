//! Loads `AppConfig` from a YAML document with `RWWWRSE_`-prefixed
//! environment overrides, then validates it. Config is read once at
//! startup; hot-reload is explicitly out of scope (reload is a restart).
use std::path::Path;

use serde_json::Value;

use super::models::AppConfig;
use super::validation;
use crate::errors::ProxyError;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, applies environment overrides, validates, and returns
    /// the final `AppConfig`. A missing file or unparsable YAML yields
    /// `ConfigMissing`/`ConfigInvalid`; a semantically invalid document
    /// yields `ConfigValidation` with every violation aggregated.
    pub fn load(path: &Path) -> Result<AppConfig, ProxyError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            ProxyError::config_missing(format!("failed to read config file {:?}", path))
                .with_cause(err)
        })?;

        let mut config: AppConfig = serde_yaml::from_str(&raw).map_err(|err| {
            ProxyError::config_invalid(format!("failed to parse config file {:?}", path))
                .with_cause(err)
        })?;

        apply_env_overrides(&mut config)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Loads from an in-memory YAML string; used by tests and by callers
    /// that assemble configuration without a file on disk.
    pub fn load_str(yaml: &str) -> Result<AppConfig, ProxyError> {
        let mut config: AppConfig = serde_yaml::from_str(yaml)
            .map_err(|err| ProxyError::config_invalid("failed to parse config").with_cause(err))?;
        apply_env_overrides(&mut config)?;
        validation::validate(&config)?;
        Ok(config)
    }
}

/// Applies `RWWWRSE_SECTION__FIELD`-style overrides on top of the parsed
/// document, by round-tripping through `serde_json::Value` so individual
/// scalar fields can be patched without re-deriving per-field setters.
fn apply_env_overrides(config: &mut AppConfig) -> Result<(), ProxyError> {
    let mut value = serde_json::to_value(&*config).map_err(|err| {
        ProxyError::config_invalid("failed to stage config for environment overrides")
            .with_cause(err)
    })?;

    for (key, raw_value) in std::env::vars() {
        let Some(rest) = key.strip_prefix("RWWWRSE_") else {
            continue;
        };
        let path: Vec<String> = rest
            .to_ascii_lowercase()
            .split("__")
            .map(str::to_string)
            .collect();
        set_override(&mut value, &path, &raw_value);
    }

    *config = serde_json::from_value(value).map_err(|err| {
        ProxyError::config_invalid("failed to apply environment overrides").with_cause(err)
    })?;
    Ok(())
}

fn set_override(value: &mut Value, path: &[String], raw: &str) {
    let Some((head, rest)) = path.split_first() else {
        return;
    };
    let Value::Object(map) = value else {
        return;
    };
    if rest.is_empty() {
        if let Some(existing) = map.get(head) {
            map.insert(head.clone(), coerce(raw, existing));
        }
        return;
    }
    if let Some(child) = map.get_mut(head) {
        set_override(child, rest, raw);
    }
}

fn coerce(raw: &str, existing: &Value) -> Value {
    match existing {
        Value::Bool(_) => Value::Bool(raw.eq_ignore_ascii_case("true") || raw == "1"),
        Value::Number(_) => raw
            .parse::<i64>()
            .map(Value::from)
            .or_else(|_| raw.parse::<f64>().map(Value::from))
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        _ => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
backends:
  routes:
    api.example.com:
      url: http://127.0.0.1:18080
"#;

    #[test]
    fn loads_minimal_document_with_defaults() {
        let config = ConfigLoader::load_str(MINIMAL).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.backends.routes.len(), 1);
    }

    #[test]
    fn env_override_replaces_scalar_field() {
        std::env::set_var("RWWWRSE_SERVER__PORT", "9090");
        let config = ConfigLoader::load_str(MINIMAL).unwrap();
        std::env::remove_var("RWWWRSE_SERVER__PORT");
        assert_eq!(config.server.port, 9090);
    }

    #[test]
    fn unparsable_yaml_is_config_invalid() {
        let err = ConfigLoader::load_str("not: [valid yaml").unwrap_err();
        assert_eq!(err.kind, crate::errors::ProxyErrorKind::ConfigInvalid);
    }

    #[test]
    fn missing_file_is_config_missing() {
        let err = ConfigLoader::load(Path::new("/nonexistent/rwwwrse.yaml")).unwrap_err();
        assert_eq!(err.kind, crate::errors::ProxyErrorKind::ConfigMissing);
    }
}
