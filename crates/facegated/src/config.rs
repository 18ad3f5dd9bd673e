use std::path::{Path, PathBuf};
use std::str::FromStr;

use facegate_core::Thresholds;
use serde::Deserialize;
use thiserror::Error;

/// System-wide config file consulted when `FACEGATE_CONFIG` is unset.
const DEFAULT_CONFIG_PATH: &str = "/etc/facegate/facegate.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Which D-Bus bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bus {
    System,
    Session,
}

impl FromStr for Bus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "system" => Ok(Bus::System),
            "session" => Ok(Bus::Session),
            other => Err(format!("unknown bus '{other}' (expected system or session)")),
        }
    }
}

/// Daemon configuration: defaults, then TOML file, then `FACEGATE_*` env vars.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    pub bus: Bus,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
    pub thresholds: Thresholds,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: facegate_core::default_model_dir(),
            bus: Bus::System,
            intra_threads: 2,
            thresholds: Thresholds::default(),
        }
    }
}

impl Config {
    /// Load from `FACEGATE_CONFIG` (or the system default path when it
    /// exists), then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var("FACEGATE_CONFIG").ok().map(PathBuf::from);
        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Apply `FACEGATE_*` overrides from `lookup`. Unparseable values are
    /// logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("FACEGATE_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        override_from(&lookup, "FACEGATE_BUS", &mut self.bus);
        override_from(&lookup, "FACEGATE_INTRA_THREADS", &mut self.intra_threads);

        let t = &mut self.thresholds;
        override_from(&lookup, "FACEGATE_MATCH_THRESHOLD", &mut t.match_threshold);
        override_from(&lookup, "FACEGATE_VERIFY_THRESHOLD", &mut t.verify_threshold);
        override_from(&lookup, "FACEGATE_MIN_DETECTION_SCORE", &mut t.min_detection_score);
        override_from(&lookup, "FACEGATE_UNIQUENESS_THRESHOLD", &mut t.uniqueness_threshold);
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join(facegate_core::SCRFD_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join(facegate_core::ARCFACE_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }
}

fn override_from<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T)
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.parse() {
        Ok(value) => *slot = value,
        Err(e) => tracing::warn!(
            key,
            value = %raw,
            error = %e,
            "ignoring invalid environment override"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.bus, Bus::System);
        assert_eq!(c.thresholds.match_threshold, 0.5);
        assert_eq!(c.thresholds.verify_threshold, 0.5);
        assert_eq!(c.thresholds.min_detection_score, 0.8);
        assert!(c.scrfd_model_path().ends_with("det_10g.onnx"));
        assert!(c.arcface_model_path().ends_with("w600k_r50.onnx"));
    }

    #[test]
    fn test_toml_partial_override() {
        let c = Config::from_toml(
            r#"
            model_dir = "/opt/models"
            bus = "session"

            [thresholds]
            verify_threshold = 0.65

            [thresholds.liveness]
            min_sharpness_variance = 150.0
            "#,
        )
        .unwrap();

        assert_eq!(c.model_dir, PathBuf::from("/opt/models"));
        assert_eq!(c.bus, Bus::Session);
        assert_eq!(c.thresholds.verify_threshold, 0.65);
        assert_eq!(c.thresholds.match_threshold, 0.5);
        assert_eq!(c.thresholds.liveness.min_sharpness_variance, 150.0);
        assert_eq!(c.thresholds.liveness.min_intensity_std_dev, 20.0);
        assert_eq!(c.intra_threads, 2);
    }

    #[test]
    fn test_toml_rejects_bad_bus() {
        assert!(Config::from_toml(r#"bus = "carrier-pigeon""#).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut c = Config::default();
        c.apply_overrides(lookup(&[
            ("FACEGATE_MODEL_DIR", "/srv/models"),
            ("FACEGATE_BUS", "Session"),
            ("FACEGATE_VERIFY_THRESHOLD", "0.7"),
            ("FACEGATE_MIN_DETECTION_SCORE", "0.9"),
            ("FACEGATE_INTRA_THREADS", "4"),
        ]));
        assert_eq!(c.model_dir, PathBuf::from("/srv/models"));
        assert_eq!(c.bus, Bus::Session);
        assert_eq!(c.thresholds.verify_threshold, 0.7);
        assert_eq!(c.thresholds.min_detection_score, 0.9);
        assert_eq!(c.thresholds.match_threshold, 0.5);
        assert_eq!(c.intra_threads, 4);
    }

    #[test]
    fn test_invalid_env_override_is_ignored() {
        let mut c = Config::default();
        c.apply_overrides(lookup(&[("FACEGATE_MATCH_THRESHOLD", "high"), ("FACEGATE_BUS", "tcp")]));
        assert_eq!(c.thresholds.match_threshold, 0.5);
        assert_eq!(c.bus, Bus::System);
    }

    #[test]
    fn test_missing_config_file() {
        let err = Config::from_file(Path::new("/nonexistent/facegate.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
