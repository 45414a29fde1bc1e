use std::ops::Range;

use ndarray::{Array1, Array2, ArrayView1, Axis};
use thiserror::Error;

use crate::dataset::{Dataset, DatasetError, Factor, Row, CATEGORICAL, NUMERIC};

pub const INTERCEPT: &str = "(Intercept)";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EncodeError {
    #[error("`{level}` was not seen for `{factor}` when the model was fitted")]
    UnseenLevel { factor: String, level: String },
    #[error("record has no value for `{0}`")]
    MissingValue(String),
    #[error("`{0}` cannot be used as a predictor")]
    UnknownPredictor(String),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Numeric(String),
    Categorical(Factor),
}

impl Term {
    pub fn name(&self) -> &str {
        match self {
            Term::Numeric(name) => name.as_str(),
            Term::Categorical(factor) => factor.name(),
        }
    }
}

/// Which design-matrix columns belong to one predictor.
#[derive(Debug, Clone, PartialEq)]
pub struct TermColumns {
    pub term: String,
    pub columns: Range<usize>,
}

/// Maps records to design rows: intercept, then each term in order, factors
/// expanded to one indicator per non-reference level.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignSpec {
    terms: Vec<Term>,
    columns: Vec<String>,
}

/// Indicator column names for a factor, relative to its reference level.
pub fn dummy_columns(factor: &Factor) -> Vec<String> {
    factor
        .non_reference()
        .map(|(_, level)| format!("{}{}", factor.name(), level))
        .collect()
}

impl DesignSpec {
    pub fn new(dataset: &Dataset, predictors: &[String]) -> Result<Self, EncodeError> {
        let mut terms = Vec::with_capacity(predictors.len());
        let mut columns = vec![INTERCEPT.to_string()];
        for name in predictors {
            if NUMERIC.contains(&name.as_str()) {
                columns.push(name.clone());
                terms.push(Term::Numeric(name.clone()));
            } else if CATEGORICAL.contains(&name.as_str()) {
                let factor = dataset.factor(name)?.clone();
                columns.extend(dummy_columns(&factor));
                terms.push(Term::Categorical(factor));
            } else {
                return Err(EncodeError::UnknownPredictor(name.clone()));
            }
        }
        Ok(DesignSpec { terms, columns })
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// Column names, intercept first.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn term_columns(&self) -> Vec<TermColumns> {
        let mut start = 1;
        self.terms
            .iter()
            .map(|term| {
                let width = match term {
                    Term::Numeric(_) => 1,
                    Term::Categorical(factor) => factor.len().saturating_sub(1),
                };
                let columns = start..start + width;
                start += width;
                TermColumns {
                    term: term.name().to_string(),
                    columns,
                }
            })
            .collect()
    }

    pub fn encode<R: Row + ?Sized>(&self, row: &R) -> Result<Vec<f64>, EncodeError> {
        let mut out = Vec::with_capacity(self.columns.len());
        out.push(1.0);
        for term in &self.terms {
            match term {
                Term::Numeric(name) => {
                    let value = row
                        .numeric(name)
                        .ok_or_else(|| EncodeError::MissingValue(name.clone()))?;
                    out.push(value);
                }
                Term::Categorical(factor) => {
                    let label = row
                        .label(factor.name())
                        .ok_or_else(|| EncodeError::MissingValue(factor.name().to_string()))?;
                    let index = factor.index_of(label).ok_or_else(|| EncodeError::UnseenLevel {
                        factor: factor.name().to_string(),
                        level: label.to_string(),
                    })?;
                    out.extend(
                        factor
                            .non_reference()
                            .map(|(level, _)| if level == index { 1.0 } else { 0.0 }),
                    );
                }
            }
        }
        Ok(out)
    }

    pub fn matrix(&self, dataset: &Dataset) -> Result<Array2<f64>, EncodeError> {
        let p = self.n_columns();
        let mut x = Array2::<f64>::zeros((dataset.len(), p));
        for i in 0..dataset.len() {
            let encoded = self.encode(&dataset.row(i))?;
            for (j, value) in encoded.into_iter().enumerate() {
                x[[i, j]] = value;
            }
        }
        Ok(x)
    }
}

/// Centres and scales every non-intercept column so the optimizer works on a
/// well-conditioned problem; coefficients are mapped back with [`Standardizer::unscale`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Standardizer {
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl Standardizer {
    /// Column 0 must be the intercept; it is left untouched.
    pub(crate) fn from_design(x: &Array2<f64>) -> Self {
        let n = x.nrows().max(1) as f64;
        let mut means = vec![0.0; x.ncols()];
        let mut scales = vec![1.0; x.ncols()];
        for (j, column) in x.axis_iter(Axis(1)).enumerate().skip(1) {
            let mean = column.sum() / n;
            let var = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            // constant columns stay as they are
            if var > 0.0 {
                means[j] = mean;
                scales[j] = var.sqrt();
            }
        }
        Standardizer { means, scales }
    }

    pub(crate) fn apply(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut out = x.clone();
        for (j, mut column) in out.axis_iter_mut(Axis(1)).enumerate() {
            let (mean, scale) = (self.means[j], self.scales[j]);
            column.mapv_inplace(|v| (v - mean) / scale);
        }
        out
    }

    /// Coefficients on the standardized columns, intercept first, expressed on
    /// the original columns.
    pub(crate) fn unscale(&self, gamma: ArrayView1<f64>) -> Array1<f64> {
        let mut beta = Array1::<f64>::zeros(gamma.len());
        let mut intercept = gamma[0];
        for j in 1..gamma.len() {
            beta[j] = gamma[j] / self.scales[j];
            intercept -= beta[j] * self.means[j];
        }
        beta[0] = intercept;
        beta
    }
}
