use serde::Deserialize;
use snapattend_core::{DetectorOptions, PipelineOptions, DEFAULT_SIMILARITY_THRESHOLD};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// CLI configuration: defaults, then an optional TOML file, then `SNAPATTEND_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// SCRFD ONNX model file.
    pub model_path: PathBuf,
    /// SQLite database holding the roster and attendance log.
    pub db_path: PathBuf,
    /// Cosine similarity a face must strictly exceed to count as a match.
    pub similarity_threshold: f32,
    /// Minimum detector score for a face to be considered.
    pub score_threshold: f32,
    /// Overlap above which duplicate face boxes are suppressed.
    pub iou_threshold: f32,
    /// Maximum faces taken from one photo.
    pub max_faces: usize,
    /// ONNX Runtime intra-op threads.
    pub intra_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        let detector = DetectorOptions::default();
        Self {
            model_path: data_dir.join("models").join("det_10g.onnx"),
            db_path: data_dir.join("snapattend.db"),
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            score_threshold: detector.score_threshold,
            iou_threshold: detector.iou_threshold,
            max_faces: detector.max_faces,
            intra_threads: detector.intra_threads,
        }
    }
}

impl Config {
    /// Load the TOML file at `path` (if any) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `SNAPATTEND_*` overrides. Values that fail to parse are ignored
    /// with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("SNAPATTEND_MODEL_PATH") {
            self.model_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("SNAPATTEND_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        override_parsed(&lookup, "SNAPATTEND_SIMILARITY_THRESHOLD", &mut self.similarity_threshold);
        override_parsed(&lookup, "SNAPATTEND_SCORE_THRESHOLD", &mut self.score_threshold);
        override_parsed(&lookup, "SNAPATTEND_IOU_THRESHOLD", &mut self.iou_threshold);
        override_parsed(&lookup, "SNAPATTEND_MAX_FACES", &mut self.max_faces);
        override_parsed(&lookup, "SNAPATTEND_INTRA_THREADS", &mut self.intra_threads);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::Invalid(format!(
                "similarity_threshold must lie in [-1, 1], got {}",
                self.similarity_threshold
            )));
        }
        for (name, value) in [
            ("score_threshold", self.score_threshold),
            ("iou_threshold", self.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!("{name} must lie in [0, 1], got {value}")));
            }
        }
        if self.intra_threads == 0 {
            return Err(ConfigError::Invalid("intra_threads must be at least 1".into()));
        }
        Ok(())
    }

    pub fn detector_options(&self) -> DetectorOptions {
        DetectorOptions {
            score_threshold: self.score_threshold,
            iou_threshold: self.iou_threshold,
            max_faces: self.max_faces,
            intra_threads: self.intra_threads,
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            similarity_threshold: self.similarity_threshold,
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("snapattend")
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable override"),
    }
}
