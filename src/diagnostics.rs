//! Model diagnostics: response residuals, binned residuals and generalized
//! variance-inflation factors.

use linfa::traits::Fit;
use linfa::DatasetBase;
use linfa_logistic::LogisticRegression;
use ndarray::{s, Array1, Array2, Axis};
use serde::Serialize;
use thiserror::Error;

use crate::dataset::Dataset;
use crate::design::{DesignSpec, EncodeError, Standardizer, TermColumns};
use crate::multinom::{FitOptions, ModelError, ModelSpec, MultinomialFit};
use crate::numeric::{spd_determinant, spd_inverse, submatrix};

pub const DEFAULT_VIF_THRESHOLD: f64 = 5.0;

#[derive(Debug, Error)]
pub enum DiagnosticsError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("variance inflation needs at least two predictor terms, got {0}")]
    TooFewTerms(usize),
    #[error("predictor covariance is singular; at least one term is a linear combination of the others")]
    Singular,
}

/// Fitted probability and response residual for one level, one point per row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResidualSeries {
    pub level: String,
    pub points: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResidualBin {
    pub count: usize,
    pub mean_fitted: f64,
    pub mean_residual: f64,
    /// Two standard errors of the mean residual under the model.
    pub bound: f64,
}

impl ResidualBin {
    pub fn outside(&self) -> bool {
        self.mean_residual.abs() > self.bound
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BinnedResiduals {
    pub level: String,
    pub bins: Vec<ResidualBin>,
}

impl BinnedResiduals {
    pub fn share_outside(&self) -> f64 {
        if self.bins.is_empty() {
            return 0.0;
        }
        self.bins.iter().filter(|b| b.outside()).count() as f64 / self.bins.len() as f64
    }
}

/// `y_ik - p_ik` for every row and response level.
pub fn response_residuals(fit: &MultinomialFit, dataset: &Dataset) -> Result<Array2<f64>, ModelError> {
    let mut residuals = fit.fitted_probabilities(dataset)?;
    residuals.mapv_inplace(|p| -p);
    for (i, level) in fit.observed_classes(dataset)?.into_iter().enumerate() {
        residuals[[i, level]] += 1.0;
    }
    Ok(residuals)
}

/// Residual-versus-fitted series for every non-reference level.
pub fn residual_series(fit: &MultinomialFit, dataset: &Dataset) -> Result<Vec<ResidualSeries>, ModelError> {
    let fitted = fit.fitted_probabilities(dataset)?;
    let residuals = response_residuals(fit, dataset)?;
    Ok(fit
        .non_reference_levels()
        .into_iter()
        .map(|level| ResidualSeries {
            level: fit.levels()[level].clone(),
            points: fitted
                .column(level)
                .iter()
                .zip(residuals.column(level).iter())
                .map(|(&p, &r)| (p, r))
                .collect(),
        })
        .collect())
}

/// Sorts by fitted value and averages residuals over equal-count bins.
/// `bins` defaults to `floor(sqrt(n))`.
pub fn bin_residuals(fitted: &[f64], residuals: &[f64], bins: Option<usize>) -> Vec<ResidualBin> {
    let n = fitted.len().min(residuals.len());
    if n == 0 {
        return Vec::new();
    }
    let n_bins = bins
        .unwrap_or_else(|| (n as f64).sqrt().floor() as usize)
        .clamp(1, n);

    let mut order = (0..n).collect::<Vec<_>>();
    order.sort_by(|&a, &b| fitted[a].total_cmp(&fitted[b]));

    (0..n_bins)
        .map(|b| {
            let members = &order[b * n / n_bins..(b + 1) * n / n_bins];
            let count = members.len() as f64;
            let mean_fitted = members.iter().map(|&i| fitted[i]).sum::<f64>() / count;
            let mean_residual = members.iter().map(|&i| residuals[i]).sum::<f64>() / count;
            let variance = (mean_fitted * (1.0 - mean_fitted)).max(0.0);
            ResidualBin {
                count: members.len(),
                mean_fitted,
                mean_residual,
                bound: 2.0 * (variance / count).sqrt(),
            }
        })
        .collect()
}

pub fn binned_residuals(
    fit: &MultinomialFit,
    dataset: &Dataset,
    bins: Option<usize>,
) -> Result<Vec<BinnedResiduals>, ModelError> {
    let series = residual_series(fit, dataset)?;
    Ok(series
        .into_iter()
        .map(|s| {
            let (fitted, residuals): (Vec<f64>, Vec<f64>) = s.points.into_iter().unzip();
            let binned = BinnedResiduals {
                level: s.level,
                bins: bin_residuals(&fitted, &residuals, bins),
            };
            if binned.share_outside() > 0.05 {
                tracing::warn!(
                    level = %binned.level,
                    share = binned.share_outside(),
                    "more than 5% of residual bins fall outside the 2-SE band"
                );
            }
            binned
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Gvif {
    pub term: String,
    pub gvif: f64,
    pub df: usize,
    /// `GVIF^(1/(2 df))`, comparable across terms of different width.
    pub adjusted: f64,
    pub flagged: bool,
}

/// Generalized VIF per term from the covariance of the slope coefficients
/// (intercept removed). `terms` index columns of that matrix.
pub fn generalized_vif(
    covariance: &Array2<f64>,
    terms: &[TermColumns],
    threshold: f64,
) -> Result<Vec<Gvif>, DiagnosticsError> {
    if terms.len() < 2 {
        return Err(DiagnosticsError::TooFewTerms(terms.len()));
    }
    let n = covariance.nrows();
    let sd = covariance.diag().mapv(f64::sqrt);
    if sd.iter().any(|s| !s.is_finite() || *s <= 0.0) {
        return Err(DiagnosticsError::Singular);
    }
    let correlation = Array2::from_shape_fn((n, n), |(i, j)| covariance[[i, j]] / (sd[i] * sd[j]));
    let det_all = spd_determinant(&correlation);
    if det_all <= 0.0 || !det_all.is_finite() {
        return Err(DiagnosticsError::Singular);
    }

    Ok(terms
        .iter()
        .map(|term| {
            let inside = term.columns.clone().collect::<Vec<_>>();
            let outside = (0..n)
                .filter(|c| !term.columns.contains(c))
                .collect::<Vec<_>>();
            let gvif = spd_determinant(&submatrix(&correlation, &inside))
                * spd_determinant(&submatrix(&correlation, &outside))
                / det_all;
            let df = inside.len();
            let per_df = gvif.powf(1.0 / df.max(1) as f64);
            Gvif {
                term: term.term.clone(),
                gvif,
                df,
                adjusted: per_df.sqrt(),
                flagged: per_df >= threshold,
            }
        })
        .collect())
}

/// Fits the two-class companion model (reference level vs. the rest) over the
/// same predictors and computes a GVIF for each predictor term.
pub fn vif_check(
    dataset: &Dataset,
    spec: &ModelSpec,
    options: &FitOptions,
    threshold: f64,
) -> Result<Vec<Gvif>, DiagnosticsError> {
    if spec.predictors.len() < 2 {
        return Err(DiagnosticsError::TooFewTerms(spec.predictors.len()));
    }
    let dataset = dataset
        .with_reference(&spec.response, &spec.reference)
        .map_err(ModelError::from)?;
    let reference = dataset
        .factor(&spec.response)
        .map_err(ModelError::from)?
        .reference();
    let design = DesignSpec::new(&dataset, &spec.predictors)?;
    let x = design.matrix(&dataset)?;
    let xs = Standardizer::from_design(&x).apply(&x);
    let targets = dataset
        .codes(&spec.response)
        .map_err(ModelError::from)?
        .into_iter()
        .map(|code| usize::from(code != reference))
        .collect::<Array1<usize>>();

    let records = xs.slice(s![.., 1..]).to_owned();
    let train = DatasetBase::new(records.clone(), targets);
    let model = LogisticRegression::<f64>::default()
        .alpha(0.0)
        .max_iterations(options.max_iterations)
        .gradient_tolerance(options.gradient_tolerance)
        .fit(&train)
        .map_err(|err| ModelError::Optimizer(err.to_string()))?;
    let probs = model.predict_probabilities(&records);

    // X'WX on the standardized design; slope correlations do not depend on
    // column scaling or centring
    let p = xs.ncols();
    let mut information = Array2::<f64>::zeros((p, p));
    for (xi, &pi) in xs.axis_iter(Axis(0)).zip(probs.iter()) {
        let w = pi * (1.0 - pi);
        for j in 0..p {
            for k in 0..p {
                information[[j, k]] += w * xi[j] * xi[k];
            }
        }
    }
    let covariance = spd_inverse(&information).ok_or(DiagnosticsError::Singular)?;
    let slopes = covariance.slice(s![1.., 1..]).to_owned();

    let terms = design
        .term_columns()
        .into_iter()
        .map(|t| TermColumns {
            term: t.term,
            columns: t.columns.start - 1..t.columns.end - 1,
        })
        .collect::<Vec<_>>();
    let table = generalized_vif(&slopes, &terms, threshold)?;
    for row in table.iter().filter(|r| r.flagged) {
        tracing::warn!(term = %row.term, gvif = row.gvif, "high variance inflation");
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multinom::fit_multinomial;
    use crate::simulate;
    use ndarray::array;

    fn spec(predictors: &[&str]) -> ModelSpec {
        ModelSpec {
            response: "maritalstatus".into(),
            reference: "Never-married".into(),
            predictors: predictors.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn independent_predictors_have_finite_small_gvif() {
        let ds = Dataset::from_records(&simulate::generate(1500, 21)).unwrap();
        let table = vif_check(
            &ds,
            &spec(&["age", "workclass", "education", "race", "sex"]),
            &FitOptions::default(),
            DEFAULT_VIF_THRESHOLD,
        )
        .unwrap();
        assert_eq!(table.len(), 5);
        for row in &table {
            assert!(row.gvif.is_finite() && row.gvif >= 0.99, "{row:?}");
            assert!(!row.flagged, "{row:?}");
        }
        assert_eq!(table[1].df, 4);
    }

    #[test]
    fn aliased_predictor_is_singular() {
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
        let result = vif_check(
            &ds,
            &spec(&["age", "workclass", "education"]),
            &FitOptions::default(),
            DEFAULT_VIF_THRESHOLD,
        );
        match result {
            Err(DiagnosticsError::Singular) => {}
            Ok(table) => assert!(table.iter().any(|r| r.gvif > 1e6), "{table:?}"),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn gvif_of_correlated_pair_matches_closed_form() {
        // two single-column terms with correlation r: VIF = 1 / (1 - r^2)
        let r: f64 = 0.9;
        let cov = array![[4.0, r * 2.0 * 3.0], [r * 2.0 * 3.0, 9.0]];
        let terms = vec![
            TermColumns { term: "a".into(), columns: 0..1 },
            TermColumns { term: "b".into(), columns: 1..2 },
        ];
        let table = generalized_vif(&cov, &terms, DEFAULT_VIF_THRESHOLD).unwrap();
        let expected = 1.0 / (1.0 - r * r);
        for row in &table {
            assert!((row.gvif - expected).abs() < 1e-9);
            assert!((row.adjusted - expected.sqrt()).abs() < 1e-9);
            assert!(row.flagged);
        }
    }

    #[test]
    fn single_term_is_rejected() {
        let cov = array![[1.0]];
        let terms = vec![TermColumns { term: "a".into(), columns: 0..1 }];
        assert!(matches!(
            generalized_vif(&cov, &terms, DEFAULT_VIF_THRESHOLD),
            Err(DiagnosticsError::TooFewTerms(1))
        ));
    }

    #[test]
    fn binned_residuals_cover_every_row() {
        let fitted = (0..100).map(|i| i as f64 / 100.0).collect::<Vec<_>>();
        let residuals = vec![0.0; 100];
        let bins = bin_residuals(&fitted, &residuals, None);
        assert_eq!(bins.len(), 10);
        assert_eq!(bins.iter().map(|b| b.count).sum::<usize>(), 100);
        assert!(bins.windows(2).all(|w| w[0].mean_fitted < w[1].mean_fitted));
        assert!(bins.iter().all(|b| !b.outside()));
    }

    #[test]
    fn residuals_sum_to_zero_per_row() {
        let ds = Dataset::from_records(&simulate::generate(600, 9)).unwrap();
        let fit = fit_multinomial(&ds, &spec(&["age", "sex"]), &FitOptions::default()).unwrap();
        let residuals = response_residuals(&fit, &ds).unwrap();
        for row in residuals.axis_iter(Axis(0)) {
            assert!(row.sum().abs() < 1e-9);
        }
        let series = residual_series(&fit, &ds).unwrap();
        assert_eq!(series.len(), fit.levels().len() - 1);
        assert!(series.iter().all(|s| s.points.len() == ds.len()));

        let binned = binned_residuals(&fit, &ds, Some(12)).unwrap();
        assert!(binned.iter().all(|b| b.bins.len() == 12));
    }
}
