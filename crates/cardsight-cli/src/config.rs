use cardsight_core::preprocess::DEFAULT_INPUT_SIZE;
use cardsight_core::{FileInfo, HandlerOptions, ModelAssets, ResizeMode};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Runtime configuration, loaded from `CARDSIGHT_*` environment variables
/// and optionally overlaid with a TOML file.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory containing the model and labels files.
    pub model_dir: PathBuf,
    /// Model file, resolved inside `model_dir` (default: inference_graph.onnx).
    pub model_file: FileInfo,
    /// Labels file, resolved inside `model_dir` (default: labelmap_mobilenet_card.txt).
    pub labels_file: FileInfo,
    /// Minimum confidence for a detection to be reported.
    pub threshold: f32,
    /// Intra-op threads for the model session.
    pub threads: usize,
    /// How frames are fitted to the square model input.
    pub resize_mode: ResizeMode,
    /// Model input size used when the model has dynamic dims.
    pub input_size: usize,
}

/// Shape of the optional TOML file. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    model_dir: Option<PathBuf>,
    model_file: Option<String>,
    labels_file: Option<String>,
    threshold: Option<f32>,
    threads: Option<usize>,
    resize_mode: Option<String>,
    input_size: Option<usize>,
}

impl Config {
    /// Load configuration from `CARDSIGHT_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Environment defaults, then the TOML file at `path` if given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::from_env();
        if let Some(path) = path {
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
            config.apply_toml(&text).map_err(|e| match e {
                ConfigError::Parse { source, .. } => ConfigError::Parse {
                    path: path.display().to_string(),
                    source,
                },
                other => other,
            })?;
            tracing::debug!(path = %path.display(), "applied config file");
        }
        config.validate()?;
        Ok(config)
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = ModelAssets::default();

        Self {
            model_dir: var("CARDSIGHT_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(cardsight_core::default_model_dir),
            model_file: var("CARDSIGHT_MODEL_FILE")
                .map(|v| FileInfo::parse(&v))
                .unwrap_or(defaults.model),
            labels_file: var("CARDSIGHT_LABELS_FILE")
                .map(|v| FileInfo::parse(&v))
                .unwrap_or(defaults.labels),
            threshold: env_parse(&var, "CARDSIGHT_THRESHOLD").unwrap_or(0.5),
            threads: env_parse(&var, "CARDSIGHT_THREADS").unwrap_or(1),
            resize_mode: env_parse(&var, "CARDSIGHT_RESIZE_MODE").unwrap_or_default(),
            input_size: env_parse(&var, "CARDSIGHT_INPUT_SIZE").unwrap_or(DEFAULT_INPUT_SIZE),
        }
    }

    fn apply_toml(&mut self, text: &str) -> Result<(), ConfigError> {
        let file: FileConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: String::new(),
            source,
        })?;

        if let Some(dir) = file.model_dir {
            self.model_dir = dir;
        }
        if let Some(name) = file.model_file {
            self.model_file = FileInfo::parse(&name);
        }
        if let Some(name) = file.labels_file {
            self.labels_file = FileInfo::parse(&name);
        }
        if let Some(threshold) = file.threshold {
            self.threshold = threshold;
        }
        if let Some(threads) = file.threads {
            self.threads = threads;
        }
        if let Some(mode) = file.resize_mode {
            self.resize_mode = mode.parse().map_err(|reason| ConfigError::Invalid {
                key: "resize_mode",
                reason,
            })?;
        }
        if let Some(size) = file.input_size {
            self.input_size = size;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ConfigError::Invalid {
                key: "threshold",
                reason: format!("{} is outside [0, 1]", self.threshold),
            });
        }
        if self.input_size == 0 {
            return Err(ConfigError::Invalid {
                key: "input_size",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }

    /// Path to the detection model.
    pub fn model_path(&self) -> PathBuf {
        self.model_file.resolve(&self.model_dir)
    }

    /// Path to the labels file.
    pub fn labels_path(&self) -> PathBuf {
        self.labels_file.resolve(&self.model_dir)
    }

    pub fn handler_options(&self) -> HandlerOptions {
        HandlerOptions {
            model_dir: self.model_dir.clone(),
            assets: ModelAssets {
                model: self.model_file.clone(),
                labels: self.labels_file.clone(),
            },
            thread_count: self.threads,
            threshold: self.threshold,
            resize_mode: self.resize_mode,
            fallback_input_size: self.input_size,
        }
    }
}

fn env_parse<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    var(key).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_map(vars: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = from_map(&[("CARDSIGHT_MODEL_DIR", "/models")]);
        assert_eq!(config.model_path(), PathBuf::from("/models/inference_graph.onnx"));
        assert_eq!(
            config.labels_path(),
            PathBuf::from("/models/labelmap_mobilenet_card.txt")
        );
        assert_eq!(config.threshold, 0.5);
        assert_eq!(config.threads, 1);
        assert_eq!(config.resize_mode, ResizeMode::CenterCrop);
        assert_eq!(config.input_size, 320);
    }

    #[test]
    fn test_env_overrides() {
        let config = from_map(&[
            ("CARDSIGHT_MODEL_DIR", "/opt/m"),
            ("CARDSIGHT_MODEL_FILE", "detect.onnx"),
            ("CARDSIGHT_LABELS_FILE", "labelmap.txt"),
            ("CARDSIGHT_THRESHOLD", "0.65"),
            ("CARDSIGHT_THREADS", "4"),
            ("CARDSIGHT_RESIZE_MODE", "stretch"),
            ("CARDSIGHT_INPUT_SIZE", "300"),
        ]);
        assert_eq!(config.model_path(), PathBuf::from("/opt/m/detect.onnx"));
        assert_eq!(config.labels_path(), PathBuf::from("/opt/m/labelmap.txt"));
        assert!((config.threshold - 0.65).abs() < 1e-6);
        assert_eq!(config.threads, 4);
        assert_eq!(config.resize_mode, ResizeMode::Stretch);
        assert_eq!(config.input_size, 300);
    }

    #[test]
    fn test_unparseable_env_falls_back() {
        let config = from_map(&[("CARDSIGHT_THRESHOLD", "high"), ("CARDSIGHT_THREADS", "-2")]);
        assert_eq!(config.threshold, 0.5);
        assert_eq!(config.threads, 1);
    }

    #[test]
    fn test_toml_overlay() {
        let mut config = from_map(&[("CARDSIGHT_THREADS", "4")]);
        config
            .apply_toml("model_dir = \"/srv/models\"\nthreshold = 0.7\nresize_mode = \"stretch\"\n")
            .unwrap();
        assert_eq!(config.model_dir, PathBuf::from("/srv/models"));
        assert!((config.threshold - 0.7).abs() < 1e-6);
        assert_eq!(config.resize_mode, ResizeMode::Stretch);
        assert_eq!(config.threads, 4);
    }

    #[test]
    fn test_toml_rejects_unknown_keys() {
        let mut config = from_map(&[]);
        assert!(matches!(
            config.apply_toml("colour = \"red\"\n"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_toml_bad_resize_mode() {
        let mut config = from_map(&[]);
        assert!(matches!(
            config.apply_toml("resize_mode = \"fit\"\n"),
            Err(ConfigError::Invalid { key: "resize_mode", .. })
        ));
    }

    #[test]
    fn test_validate_threshold_range() {
        let mut config = from_map(&[]);
        config.threshold = 1.5;
        assert!(config.validate().is_err());
        config.threshold = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cardsight.toml");
        std::fs::write(&path, "labels_file = \"labels.txt\"\nthreads = 2\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.labels_file, FileInfo::new("labels", "txt"));
        assert_eq!(config.threads, 2);
    }

    #[test]
    fn test_handler_options_mapping() {
        let config = from_map(&[("CARDSIGHT_MODEL_DIR", "/m"), ("CARDSIGHT_THRESHOLD", "0.6")]);
        let options = config.handler_options();
        assert_eq!(options.model_path(), config.model_path());
        assert_eq!(options.labels_path(), config.labels_path());
        assert!((options.threshold - 0.6).abs() < 1e-6);
        assert_eq!(options.fallback_input_size, 320);
    }
}
