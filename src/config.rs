use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dataset::Row;
use crate::diagnostics::DEFAULT_VIF_THRESHOLD;
use crate::multinom::{FitOptions, ModelSpec};

pub const CONFIG_FILE_PATH: &str = "analysis.json";
pub const CSV_FILE_PATH: &str = "data/census_clean.csv";
pub const OUTPUT_DIR: &str = "output";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("`{0}` appears in a predictor list but is the response")]
    ResponseInPredictors(String),
}

/// The synthetic record scored with the full model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Probe {
    pub age: f64,
    pub workclass: String,
    pub education: String,
    pub race: String,
    pub sex: String,
}

impl Default for Probe {
    fn default() -> Self {
        Probe {
            age: 30.0,
            workclass: "Private".into(),
            education: "Bachelors".into(),
            race: "White".into(),
            sex: "Female".into(),
        }
    }
}

impl Row for Probe {
    fn numeric(&self, column: &str) -> Option<f64> {
        match column {
            "age" => Some(self.age),
            _ => None,
        }
    }

    fn label(&self, column: &str) -> Option<&str> {
        match column {
            "workclass" => Some(&self.workclass),
            "education" => Some(&self.education),
            "race" => Some(&self.race),
            "sex" => Some(&self.sex),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub data_path: PathBuf,
    pub output_dir: PathBuf,
    pub response: String,
    pub reference_level: String,
    pub reduced_predictors: Vec<String>,
    pub full_predictors: Vec<String>,
    pub max_iterations: u64,
    pub gradient_tolerance: f64,
    pub score_tolerance: f64,
    pub vif_threshold: f64,
    /// Number of residual bins; `None` picks `floor(sqrt(n))`.
    pub residual_bins: Option<usize>,
    pub probe: Probe,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let fit = FitOptions::default();
        AnalysisConfig {
            data_path: PathBuf::from(CSV_FILE_PATH),
            output_dir: PathBuf::from(OUTPUT_DIR),
            response: "maritalstatus".into(),
            reference_level: "Never-married".into(),
            reduced_predictors: vec!["age".into(), "sex".into()],
            full_predictors: ["age", "workclass", "education", "race", "sex"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_iterations: fit.max_iterations,
            gradient_tolerance: fit.gradient_tolerance,
            score_tolerance: fit.score_tolerance,
            vif_threshold: DEFAULT_VIF_THRESHOLD,
            residual_bins: None,
            probe: Probe::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: AnalysisConfig = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `path` when it exists, otherwise falls back to the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            tracing::info!(path = %path.display(), "loading analysis config");
            Self::load(path)
        } else {
            tracing::info!(path = %path.display(), "no config file; using defaults");
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let all = self.reduced_predictors.iter().chain(&self.full_predictors);
        for predictor in all {
            if predictor == &self.response {
                return Err(ConfigError::ResponseInPredictors(predictor.clone()));
            }
        }
        Ok(())
    }

    pub fn fit_options(&self) -> FitOptions {
        FitOptions {
            max_iterations: self.max_iterations,
            gradient_tolerance: self.gradient_tolerance,
            score_tolerance: self.score_tolerance,
        }
    }

    pub fn reduced_spec(&self) -> ModelSpec {
        self.spec(&self.reduced_predictors)
    }

    pub fn full_spec(&self) -> ModelSpec {
        self.spec(&self.full_predictors)
    }

    fn spec(&self, predictors: &[String]) -> ModelSpec {
        ModelSpec {
            response: self.response.clone(),
            reference: self.reference_level.clone(),
            predictors: predictors.to_vec(),
        }
    }
}
