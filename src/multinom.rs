//! Multinomial logistic regression against an explicit reference level.
//!
//! Maximum-likelihood estimation is delegated to `linfa-logistic`. Its
//! unconstrained softmax solution (one coefficient set per level) is shifted
//! so the reference level's set is zero, which leaves every fitted
//! probability unchanged. Standard errors come from the observed information
//! of the reference parameterisation.

use linfa::traits::Fit;
use linfa::DatasetBase;
use linfa_logistic::MultiLogisticRegression;
use ndarray::{s, Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dataset::{Dataset, DatasetError, Row};
use crate::design::{DesignSpec, EncodeError, Standardizer};
use crate::evaluate::EvaluationError;
use crate::numeric::{normal_two_sided_p, spd_inverse};

#[derive(Debug, Error)]
pub enum ModelError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("response `{0}` cannot also be a predictor")]
    ResponseAsPredictor(String),
    #[error("optimizer failed: {0}")]
    Optimizer(String),
    #[error("optimizer returned {found} classes for {expected} response levels")]
    ClassMismatch { expected: usize, found: usize },
    #[error("`{0}` is not a level of the fitted response")]
    UnknownResponseLevel(String),
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
}

/// What to fit: response, its reference level, and the predictor terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub response: String,
    pub reference: String,
    pub predictors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitOptions {
    pub max_iterations: u64,
    /// Passed to the optimizer as its stopping criterion.
    pub gradient_tolerance: f64,
    /// Largest per-observation score entry still accepted as converged.
    pub score_tolerance: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        FitOptions {
            max_iterations: 1000,
            gradient_tolerance: 1e-6,
            score_tolerance: 1e-3,
        }
    }
}

/// One row of a coefficient table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Coefficient {
    pub level: String,
    pub term: String,
    pub estimate: f64,
    pub std_error: f64,
    pub z_value: f64,
    pub p_value: f64,
    pub odds_ratio: f64,
}

#[derive(Debug, Clone)]
pub struct MultinomialFit {
    response: String,
    levels: Vec<String>,
    reference: usize,
    design: DesignSpec,
    /// `(K-1) x p`, rows are the non-reference levels in level order.
    coefficients: Array2<f64>,
    /// Covariance of the coefficients stacked level by level; `None` when the
    /// information matrix is singular.
    covariance: Option<Array2<f64>>,
    log_likelihood: f64,
    n_obs: usize,
    converged: bool,
    max_score: f64,
}

pub fn fit_multinomial(
    dataset: &Dataset,
    spec: &ModelSpec,
    options: &FitOptions,
) -> Result<MultinomialFit, ModelError> {
    if spec.predictors.iter().any(|p| p == &spec.response) {
        return Err(ModelError::ResponseAsPredictor(spec.response.clone()));
    }
    let dataset = dataset.with_reference(&spec.response, &spec.reference)?;
    let factor = dataset.factor(&spec.response)?.clone();
    factor.require_levels(2)?;

    let design = DesignSpec::new(&dataset, &spec.predictors)?;
    let x = design.matrix(&dataset)?;
    let y = dataset.codes(&spec.response)?;
    let standardizer = Standardizer::from_design(&x);
    let xs = standardizer.apply(&x);

    tracing::info!(
        response = %spec.response,
        reference = %spec.reference,
        columns = design.n_columns(),
        rows = dataset.len(),
        "fitting multinomial model"
    );

    let train = DatasetBase::new(xs.slice(s![.., 1..]).to_owned(), Array1::from(y.clone()));
    let model = MultiLogisticRegression::<f64>::default()
        .alpha(0.0)
        .max_iterations(options.max_iterations)
        .gradient_tolerance(options.gradient_tolerance)
        .fit(&train)
        .map_err(|err| ModelError::Optimizer(err.to_string()))?;

    let k = factor.len();
    let p = design.n_columns();
    if model.classes().len() != k {
        return Err(ModelError::ClassMismatch {
            expected: k,
            found: model.classes().len(),
        });
    }

    // softmax coefficient sets, one per level, on the original columns
    let mut full = Array2::<f64>::zeros((k, p));
    for (c, &level) in model.classes().iter().enumerate() {
        let mut gamma = Array1::<f64>::zeros(p);
        gamma[0] = model.intercept()[c];
        gamma
            .slice_mut(s![1..])
            .assign(&model.params().column(c));
        full.row_mut(level).assign(&standardizer.unscale(gamma.view()));
    }
    let reference = factor.reference();
    let reference_row = full.row(reference).to_owned();
    let non_reference = factor.non_reference().map(|(i, _)| i).collect::<Vec<_>>();
    let mut coefficients = Array2::<f64>::zeros((k - 1, p));
    for (a, &level) in non_reference.iter().enumerate() {
        coefficients
            .row_mut(a)
            .assign(&(&full.row(level) - &reference_row));
    }

    let mut fit = MultinomialFit {
        response: spec.response.clone(),
        levels: factor.levels().to_vec(),
        reference,
        design,
        coefficients,
        covariance: None,
        log_likelihood: 0.0,
        n_obs: dataset.len(),
        converged: true,
        max_score: 0.0,
    };

    let probs = fit.probabilities_for(&x);
    fit.log_likelihood = y
        .iter()
        .enumerate()
        .map(|(i, &level)| probs[[i, level]].max(f64::MIN_POSITIVE).ln())
        .sum();

    let (score, _) = score_and_information(&xs, &probs, &y, &non_reference, false);
    fit.max_score = score.iter().fold(0.0_f64, |m, s| m.max(s.abs())) / dataset.len() as f64;
    fit.converged = fit.max_score <= options.score_tolerance;
    if !fit.converged {
        tracing::warn!(
            max_score = fit.max_score,
            tolerance = options.score_tolerance,
            "multinomial fit did not converge; returning best coefficients found"
        );
    }

    let (_, information) = score_and_information(&x, &probs, &y, &non_reference, true);
    fit.covariance = spd_inverse(&information);
    if fit.covariance.is_none() {
        tracing::warn!(
            response = %fit.response,
            "information matrix is singular (collinear predictors or separation); standard errors unavailable"
        );
    }

    tracing::info!(
        deviance = fit.deviance(),
        aic = fit.aic(),
        converged = fit.converged,
        "multinomial model fitted"
    );
    Ok(fit)
}

/// Score vector and (optionally) observed information of the reference
/// parameterisation, blocks ordered by `non_reference`.
fn score_and_information(
    x: &Array2<f64>,
    probs: &Array2<f64>,
    y: &[usize],
    non_reference: &[usize],
    with_information: bool,
) -> (Array1<f64>, Array2<f64>) {
    let p = x.ncols();
    let m = non_reference.len();
    let mut score = Array1::<f64>::zeros(m * p);
    let dim = if with_information { m * p } else { 0 };
    let mut info = Array2::<f64>::zeros((dim, dim));

    for (i, xi) in x.axis_iter(Axis(0)).enumerate() {
        for (a, &la) in non_reference.iter().enumerate() {
            let pa = probs[[i, la]];
            let observed = if y[i] == la { 1.0 } else { 0.0 };
            let residual = observed - pa;
            for j in 0..p {
                score[a * p + j] += residual * xi[j];
            }
            if !with_information {
                continue;
            }
            for (b, &lb) in non_reference.iter().enumerate().skip(a) {
                let w = if a == b {
                    pa * (1.0 - pa)
                } else {
                    -pa * probs[[i, lb]]
                };
                for j in 0..p {
                    let wx = w * xi[j];
                    if wx == 0.0 {
                        continue;
                    }
                    for k in 0..p {
                        info[[a * p + j, b * p + k]] += wx * xi[k];
                    }
                }
            }
        }
    }

    if with_information {
        for a in 0..m {
            for b in a + 1..m {
                for j in 0..p {
                    for k in 0..p {
                        info[[b * p + k, a * p + j]] = info[[a * p + j, b * p + k]];
                    }
                }
            }
        }
    }
    (score, info)
}

fn softmax_rows(eta: &mut Array2<f64>) {
    for mut row in eta.axis_iter_mut(Axis(0)) {
        let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        row.mapv_inplace(|v| (v - max).exp());
        let total = row.sum();
        row.mapv_inplace(|v| v / total);
    }
}

impl MultinomialFit {
    pub fn response(&self) -> &str {
        &self.response
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn reference(&self) -> usize {
        self.reference
    }

    pub fn reference_label(&self) -> &str {
        &self.levels[self.reference]
    }

    pub fn level_index(&self, label: &str) -> Option<usize> {
        self.levels.iter().position(|l| l == label)
    }

    pub fn non_reference_levels(&self) -> Vec<usize> {
        (0..self.levels.len()).filter(|&l| l != self.reference).collect()
    }

    pub fn design(&self) -> &DesignSpec {
        &self.design
    }

    pub fn columns(&self) -> &[String] {
        self.design.columns()
    }

    pub fn coefficients(&self) -> &Array2<f64> {
        &self.coefficients
    }

    pub fn coefficient(&self, level: &str, column: &str) -> Option<f64> {
        let level = self.level_index(level)?;
        let row = self.non_reference_levels().iter().position(|&l| l == level)?;
        let col = self.columns().iter().position(|c| c == column)?;
        Some(self.coefficients[[row, col]])
    }

    /// Standard errors shaped like [`MultinomialFit::coefficients`]; NaN when
    /// the information matrix was singular.
    pub fn std_errors(&self) -> Array2<f64> {
        let (m, p) = self.coefficients.dim();
        match &self.covariance {
            Some(cov) => Array2::from_shape_fn((m, p), |(a, j)| cov[[a * p + j, a * p + j]].sqrt()),
            None => Array2::from_elem((m, p), f64::NAN),
        }
    }

    pub fn is_singular(&self) -> bool {
        self.covariance.is_none()
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    pub fn max_score(&self) -> f64 {
        self.max_score
    }

    pub fn n_obs(&self) -> usize {
        self.n_obs
    }

    pub fn n_parameters(&self) -> usize {
        self.coefficients.len()
    }

    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    pub fn deviance(&self) -> f64 {
        -2.0 * self.log_likelihood
    }

    pub fn aic(&self) -> f64 {
        self.deviance() + 2.0 * self.n_parameters() as f64
    }

    pub fn coefficient_table(&self) -> Vec<Coefficient> {
        let se = self.std_errors();
        let mut table = Vec::with_capacity(self.coefficients.len());
        for (a, level) in self.non_reference_levels().into_iter().enumerate() {
            for (j, term) in self.columns().iter().enumerate() {
                let estimate = self.coefficients[[a, j]];
                let std_error = se[[a, j]];
                let z_value = estimate / std_error;
                table.push(Coefficient {
                    level: self.levels[level].clone(),
                    term: term.clone(),
                    estimate,
                    std_error,
                    z_value,
                    p_value: normal_two_sided_p(z_value),
                    odds_ratio: estimate.exp(),
                });
            }
        }
        table
    }

    /// `K x p` coefficient matrix with a zero row for the reference level.
    fn full_coefficients(&self) -> Array2<f64> {
        let p = self.coefficients.ncols();
        let mut full = Array2::<f64>::zeros((self.levels.len(), p));
        for (a, level) in self.non_reference_levels().into_iter().enumerate() {
            full.row_mut(level).assign(&self.coefficients.row(a));
        }
        full
    }

    fn probabilities_for(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut eta = x.dot(&self.full_coefficients().t());
        softmax_rows(&mut eta);
        eta
    }

    /// Probability of every response level for one record, in level order.
    pub fn predict_proba<R: Row + ?Sized>(&self, row: &R) -> Result<Vec<f64>, EncodeError> {
        let encoded = Array2::from_shape_vec((1, self.design.n_columns()), self.design.encode(row)?)
            .map_err(|_| EncodeError::MissingValue("design row".to_string()))?;
        Ok(self.probabilities_for(&encoded).row(0).to_vec())
    }

    pub fn predict_class<R: Row + ?Sized>(&self, row: &R) -> Result<usize, EncodeError> {
        Ok(argmax(&self.predict_proba(row)?))
    }

    /// `n x K` fitted probabilities for every row of `dataset`.
    pub fn fitted_probabilities(&self, dataset: &Dataset) -> Result<Array2<f64>, EncodeError> {
        let x = self.design.matrix(dataset)?;
        Ok(self.probabilities_for(&x))
    }

    pub fn fitted_classes(&self, dataset: &Dataset) -> Result<Vec<usize>, EncodeError> {
        let probs = self.fitted_probabilities(dataset)?;
        Ok(probs
            .axis_iter(Axis(0))
            .map(|row| argmax(&row.to_vec()))
            .collect())
    }

    /// Observed response levels of `dataset`, as indices into [`MultinomialFit::levels`].
    pub fn observed_classes(&self, dataset: &Dataset) -> Result<Vec<usize>, ModelError> {
        (0..dataset.len())
            .map(|i| {
                let row = dataset.row(i);
                let label = row
                    .label(&self.response)
                    .ok_or_else(|| EncodeError::MissingValue(self.response.clone()))?;
                self.level_index(label)
                    .ok_or_else(|| ModelError::UnknownResponseLevel(label.to_string()))
            })
            .collect()
    }

    /// Re-expresses the coefficients against another reference level. The
    /// fitted probabilities do not change.
    pub fn rebase(&self, reference: &str) -> Result<MultinomialFit, ModelError> {
        let new_reference = self
            .level_index(reference)
            .ok_or_else(|| ModelError::UnknownResponseLevel(reference.to_string()))?;
        if new_reference == self.reference {
            return Ok(self.clone());
        }

        let p = self.coefficients.ncols();
        let old_levels = self.non_reference_levels();
        let new_levels = (0..self.levels.len())
            .filter(|&l| l != new_reference)
            .collect::<Vec<_>>();
        let full = self.full_coefficients();
        let base = full.row(new_reference).to_owned();

        let m = old_levels.len();
        let mut coefficients = Array2::<f64>::zeros((m, p));
        // linear map from stacked old coefficients to stacked new ones
        let mut transform = Array2::<f64>::zeros((m * p, m * p));
        let old_position = |level: usize| old_levels.iter().position(|&l| l == level);
        for (a, &level) in new_levels.iter().enumerate() {
            coefficients.row_mut(a).assign(&(&full.row(level) - &base));
            if let Some(b) = old_position(level) {
                for j in 0..p {
                    transform[[a * p + j, b * p + j]] += 1.0;
                }
            }
            if let Some(b) = old_position(new_reference) {
                for j in 0..p {
                    transform[[a * p + j, b * p + j]] -= 1.0;
                }
            }
        }
        let covariance = self
            .covariance
            .as_ref()
            .map(|cov| transform.dot(cov).dot(&transform.t()));

        Ok(MultinomialFit {
            reference: new_reference,
            coefficients,
            covariance,
            ..self.clone()
        })
    }
}

fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(best, best_value), (i, &v)| {
            if v > best_value {
                (i, v)
            } else {
                (best, best_value)
            }
        })
        .0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csv_reader::Record;
    use crate::simulate;

    fn spec(reference: &str, predictors: &[&str]) -> ModelSpec {
        ModelSpec {
            response: "maritalstatus".into(),
            reference: reference.into(),
            predictors: predictors.iter().map(|p| p.to_string()).collect(),
        }
    }

    fn dataset() -> Dataset {
        Dataset::from_records(&simulate::generate(1500, 11)).unwrap()
    }

    const FULL: &[&str] = &["age", "workclass", "education", "race", "sex"];

    #[test]
    fn coefficient_matrix_has_one_row_per_non_reference_level() {
        let ds = dataset();
        let fit = fit_multinomial(&ds, &spec("Never-married", &["age", "sex"]), &FitOptions::default())
            .unwrap();
        assert_eq!(fit.coefficients().dim(), (3, 3));
        assert_eq!(fit.columns(), ["(Intercept)", "age", "sexMale"]);
        assert_eq!(fit.reference_label(), "Never-married");
        assert_eq!(fit.n_parameters(), 9);
        assert!((fit.aic() - (fit.deviance() + 18.0)).abs() < 1e-9);
        assert!(fit.std_errors().iter().all(|se| se.is_finite() && *se > 0.0));
    }

    #[test]
    fn age_effect_has_the_simulated_sign() {
        let ds = dataset();
        let fit = fit_multinomial(&ds, &spec("Never-married", &["age", "sex"]), &FitOptions::default())
            .unwrap();
        assert!(fit.coefficient("Married", "age").unwrap() > 0.0);
        assert!(fit.coefficient("Widowed", "age").unwrap() > 0.0);
        assert!(fit.coefficient("Never-married", "age").is_none());
    }

    #[test]
    fn probe_probabilities_sum_to_one() {
        let ds = dataset();
        let fit = fit_multinomial(&ds, &spec("Never-married", FULL), &FitOptions::default()).unwrap();
        let probe = Record {
            age: 30.0,
            workclass: "Private".into(),
            education: "Bachelors".into(),
            race: "White".into(),
            sex: "Female".into(),
            maritalstatus: String::new(),
        };
        let probs = fit.predict_proba(&probe).unwrap();
        assert_eq!(probs.len(), 4);
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-6);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));

        let class = fit.predict_class(&probe).unwrap();
        assert!(probs.iter().all(|&p| p <= probs[class]));
        assert_eq!(fit.levels().len(), probs.len());
    }

    #[test]
    fn iteration_cap_returns_unconverged_coefficients() {
        let ds = dataset();
        let options = FitOptions {
            max_iterations: 1,
            score_tolerance: 1e-6,
            ..FitOptions::default()
        };
        let fit = fit_multinomial(&ds, &spec("Never-married", FULL), &options).unwrap();
        assert!(!fit.converged());
        assert!(fit.max_score() > options.score_tolerance);
        assert_eq!(fit.coefficients().dim(), (3, 14));
        assert!(fit.coefficients().iter().all(|c| c.is_finite()));
        assert!(fit.deviance().is_finite());
    }

    #[test]
    fn aliased_predictors_give_singular_fit_with_nan_errors() {
        let education_for = |workclass: &str| match workclass {
            "Federal-gov" => "Bachelors",
            "Local-gov" => "Doctorate",
            "Private" => "HS-grad",
            "Self-emp" => "Masters",
            _ => "Some-college",
        };
        let records = simulate::generate(800, 4)
            .into_iter()
            .map(|mut r| {
                r.education = education_for(&r.workclass).to_string();
                r
            })
            .collect::<Vec<_>>();
        let ds = Dataset::from_records(&records).unwrap();

        let fit = fit_multinomial(
            &ds,
            &spec("Never-married", &["age", "workclass", "education"]),
            &FitOptions::default(),
        )
        .unwrap();
        assert!(fit.is_singular());
        assert!(fit.std_errors().iter().all(|se| se.is_nan()));
        assert!(fit.coefficient_table().iter().all(|c| c.p_value.is_nan()));
        let probs = fit.fitted_probabilities(&ds).unwrap();
        for row in probs.axis_iter(Axis(0)) {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn unseen_probe_level_is_an_encoding_error() {
        let ds = dataset();
        let fit = fit_multinomial(&ds, &spec("Never-married", FULL), &FitOptions::default()).unwrap();
        let probe = Record {
            age: 30.0,
            workclass: "Without-pay".into(),
            education: "Bachelors".into(),
            race: "White".into(),
            sex: "Female".into(),
            maritalstatus: String::new(),
        };
        assert!(matches!(
            fit.predict_proba(&probe),
            Err(EncodeError::UnseenLevel { .. })
        ));
    }

    #[test]
    fn reference_choice_does_not_change_fitted_probabilities() {
        let ds = dataset();
        let options = FitOptions::default();
        let a = fit_multinomial(&ds, &spec("Never-married", &["age", "sex", "race"]), &options).unwrap();
        let b = fit_multinomial(&ds, &spec("Married", &["age", "sex", "race"]), &options).unwrap();
        assert!((a.deviance() - b.deviance()).abs() < 1e-3 * a.deviance().abs().max(1.0));

        let b_as_a = b.rebase("Never-married").unwrap();
        let pa = a.fitted_probabilities(&ds).unwrap();
        let pb = b_as_a.fitted_probabilities(&ds).unwrap();
        for (x, y) in pa.iter().zip(pb.iter()) {
            assert!((x - y).abs() < 5e-3, "{x} vs {y}");
        }
        let married_age = a.coefficient("Married", "age").unwrap();
        assert!((married_age - b_as_a.coefficient("Married", "age").unwrap()).abs() < 5e-3);
    }

    #[test]
    fn rebase_flips_sign_and_keeps_standard_errors() {
        let ds = dataset();
        let fit = fit_multinomial(&ds, &spec("Never-married", &["age", "sex"]), &FitOptions::default())
            .unwrap();
        let rebased = fit.rebase("Married").unwrap();
        let forward = fit.coefficient("Married", "age").unwrap();
        let backward = rebased.coefficient("Never-married", "age").unwrap();
        assert!((forward + backward).abs() < 1e-12);

        let se = |f: &MultinomialFit, level: &str| {
            f.coefficient_table()
                .into_iter()
                .find(|c| c.level == level && c.term == "age")
                .unwrap()
                .std_error
        };
        assert!((se(&fit, "Married") - se(&rebased, "Never-married")).abs() < 1e-9);

        let original = fit.fitted_probabilities(&ds).unwrap();
        let moved = rebased.fitted_probabilities(&ds).unwrap();
        for (x, y) in original.iter().zip(moved.iter()) {
            assert!((x - y).abs() < 1e-12);
        }
    }

    #[test]
    fn response_cannot_be_a_predictor() {
        let ds = dataset();
        let err = fit_multinomial(&ds, &spec("Never-married", &["age", "maritalstatus"]), &FitOptions::default())
            .unwrap_err();
        assert!(matches!(err, ModelError::ResponseAsPredictor(_)));
    }

    #[test]
    fn unknown_reference_level_is_rejected() {
        let ds = dataset();
        let err = fit_multinomial(&ds, &spec("Separated", &["age"]), &FitOptions::default()).unwrap_err();
        assert!(matches!(err, ModelError::Dataset(DatasetError::UnknownLevel { .. })));
    }

    #[test]
    fn argmax_picks_first_maximum() {
        assert_eq!(argmax(&[0.1, 0.6, 0.3]), 1);
        assert_eq!(argmax(&[0.5, 0.5]), 0);
    }
}
