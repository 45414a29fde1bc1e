//! The end-to-end workflow: load, coerce, explore, fit reduced and full
//! models, evaluate on the training rows, score the probe record, diagnose.

use chrono::{DateTime, Local};
use serde::Serialize;
use thiserror::Error;

use crate::config::{AnalysisConfig, ConfigError};
use crate::csv_reader::{self, DataError};
use crate::dataset::{Dataset, DatasetError, CATEGORICAL};
use crate::design::EncodeError;
use crate::diagnostics::{self, BinnedResiduals, DiagnosticsError, Gvif, ResidualSeries};
use crate::eda::{self, FactorBoxplots};
use crate::evaluate::{self, Evaluation};
use crate::multinom::{self, ModelError, MultinomialFit};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Diagnostics(#[from] DiagnosticsError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbePrediction {
    pub levels: Vec<String>,
    pub probabilities: Vec<f64>,
    pub predicted: String,
}

/// Likelihood-ratio comparison of the nested reduced and full models.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModelComparison {
    pub lr_statistic: f64,
    pub df: usize,
    pub aic_reduced: f64,
    pub aic_full: f64,
}

impl ModelComparison {
    pub fn between(reduced: &MultinomialFit, full: &MultinomialFit) -> Self {
        ModelComparison {
            lr_statistic: reduced.deviance() - full.deviance(),
            df: full.n_parameters().saturating_sub(reduced.n_parameters()),
            aic_reduced: reduced.aic(),
            aic_full: full.aic(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Analysis {
    pub config: AnalysisConfig,
    pub dataset: Dataset,
    pub generated_at: DateTime<Local>,
    pub boxplots: Vec<FactorBoxplots>,
    pub reduced: MultinomialFit,
    pub full: MultinomialFit,
    pub comparison: ModelComparison,
    pub reduced_evaluation: Evaluation,
    pub full_evaluation: Evaluation,
    pub probe: ProbePrediction,
    pub residuals: Vec<ResidualSeries>,
    pub binned_residuals: Vec<BinnedResiduals>,
    pub vif: Vec<Gvif>,
}

pub fn run(config: &AnalysisConfig) -> Result<Analysis, AnalysisError> {
    config.validate()?;
    let records = csv_reader::read_data(&config.data_path)?;
    let dataset = Dataset::from_records(&records)?;
    run_on(dataset, config)
}

pub fn run_on(dataset: Dataset, config: &AnalysisConfig) -> Result<Analysis, AnalysisError> {
    let options = config.fit_options();

    let predictors = CATEGORICAL
        .iter()
        .filter(|&&c| c != config.response)
        .map(|c| c.to_string())
        .collect::<Vec<_>>();
    let boxplots = eda::age_boxplots(&dataset, &predictors)?;

    let reduced = multinom::fit_multinomial(&dataset, &config.reduced_spec(), &options)?;
    let full = multinom::fit_multinomial(&dataset, &config.full_spec(), &options)?;
    let comparison = ModelComparison::between(&reduced, &full);

    let reduced_evaluation = evaluate::evaluate(&reduced, &dataset)?;
    let full_evaluation = evaluate::evaluate(&full, &dataset)?;

    let probabilities = full.predict_proba(&config.probe)?;
    let predicted = full.levels()[full.predict_class(&config.probe)?].clone();
    tracing::info!(?probabilities, %predicted, "scored probe record");
    let probe = ProbePrediction {
        levels: full.levels().to_vec(),
        probabilities,
        predicted,
    };

    let residuals = diagnostics::residual_series(&full, &dataset)?;
    let binned_residuals = diagnostics::binned_residuals(&full, &dataset, config.residual_bins)?;
    let vif = diagnostics::vif_check(&dataset, &config.full_spec(), &options, config.vif_threshold)?;

    Ok(Analysis {
        config: config.clone(),
        dataset,
        generated_at: Local::now(),
        boxplots,
        reduced,
        full,
        comparison,
        reduced_evaluation,
        full_evaluation,
        probe,
        residuals,
        binned_residuals,
        vif,
    })
}
