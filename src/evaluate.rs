use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::dataset::Dataset;
use crate::multinom::{ModelError, MultinomialFit};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("{actual} observed labels but {predicted} predictions")]
    LengthMismatch { actual: usize, predicted: usize },
    #[error("class index {index} is outside the {levels} known levels")]
    OutOfRange { index: usize, levels: usize },
}

/// Counts indexed by (true level, predicted level).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfusionMatrix {
    levels: Vec<String>,
    counts: Vec<Vec<u64>>,
}

impl ConfusionMatrix {
    pub fn from_predictions(
        levels: &[String],
        actual: &[usize],
        predicted: &[usize],
    ) -> Result<Self, EvaluationError> {
        if actual.len() != predicted.len() {
            return Err(EvaluationError::LengthMismatch {
                actual: actual.len(),
                predicted: predicted.len(),
            });
        }
        let k = levels.len();
        let mut counts = vec![vec![0u64; k]; k];
        for (&t, &p) in actual.iter().zip(predicted) {
            let index = t.max(p);
            if index >= k {
                return Err(EvaluationError::OutOfRange { index, levels: k });
            }
            counts[t][p] += 1;
        }
        Ok(ConfusionMatrix {
            levels: levels.to_vec(),
            counts,
        })
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn count(&self, actual: usize, predicted: usize) -> u64 {
        self.counts[actual][predicted]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().flatten().sum()
    }

    pub fn correct(&self) -> u64 {
        (0..self.levels.len()).map(|i| self.counts[i][i]).sum()
    }

    pub fn accuracy(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.correct() as f64 / total as f64,
        }
    }

    /// Occurrences of each true level.
    pub fn row_sums(&self) -> Vec<u64> {
        self.counts.iter().map(|row| row.iter().sum()).collect()
    }

    /// Occurrences of each predicted level.
    pub fn column_sums(&self) -> Vec<u64> {
        (0..self.levels.len())
            .map(|j| self.counts.iter().map(|row| row[j]).sum())
            .collect()
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let width = self
            .levels
            .iter()
            .map(|l| l.len())
            .chain(std::iter::once(12))
            .max()
            .unwrap_or(12);
        write!(f, "{:<width$}", "true \\ pred")?;
        for level in &self.levels {
            write!(f, " {:>width$}", level)?;
        }
        writeln!(f)?;
        for (level, row) in self.levels.iter().zip(&self.counts) {
            write!(f, "{:<width$}", level)?;
            for count in row {
                write!(f, " {:>width$}", count)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Training-set evaluation of a fitted model. There is no held-out data: the
/// model is scored on the rows it was fitted to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub confusion: ConfusionMatrix,
    pub accuracy: f64,
}

pub fn evaluate(fit: &MultinomialFit, dataset: &Dataset) -> Result<Evaluation, ModelError> {
    let actual = fit.observed_classes(dataset)?;
    let predicted = fit.fitted_classes(dataset)?;
    let confusion = ConfusionMatrix::from_predictions(fit.levels(), &actual, &predicted)?;
    let accuracy = confusion.accuracy();
    tracing::info!(accuracy, rows = actual.len(), "evaluated model on training data");
    Ok(Evaluation {
        confusion,
        accuracy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multinom::{fit_multinomial, FitOptions, ModelSpec};
    use crate::simulate;

    fn levels() -> Vec<String> {
        ["Divorced", "Married", "Never-married"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn sums_and_accuracy_agree() {
        let actual = [0, 1, 1, 2, 2, 2, 1];
        let predicted = [0, 1, 2, 2, 1, 2, 1];
        let cm = ConfusionMatrix::from_predictions(&levels(), &actual, &predicted).unwrap();
        assert_eq!(cm.row_sums(), vec![1, 3, 3]);
        assert_eq!(cm.column_sums(), vec![1, 3, 3]);
        assert_eq!(cm.count(2, 1), 1);
        assert_eq!(cm.correct(), 5);
        assert!((cm.accuracy() - 5.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let err = ConfusionMatrix::from_predictions(&levels(), &[0, 1], &[0]).unwrap_err();
        assert_eq!(
            err,
            EvaluationError::LengthMismatch {
                actual: 2,
                predicted: 1
            }
        );
        let err = ConfusionMatrix::from_predictions(&levels(), &[3], &[0]).unwrap_err();
        assert_eq!(err, EvaluationError::OutOfRange { index: 3, levels: 3 });
    }

    #[test]
    fn display_has_a_row_per_level() {
        let cm = ConfusionMatrix::from_predictions(&levels(), &[0, 1], &[0, 1]).unwrap();
        let text = cm.to_string();
        assert_eq!(text.lines().count(), 4);
        assert!(text.contains("Never-married"));
    }

    #[test]
    fn fitted_model_matrix_matches_observed_counts() {
        let records = simulate::generate(1200, 5);
        let ds = Dataset::from_records(&records).unwrap();
        let spec = ModelSpec {
            response: "maritalstatus".into(),
            reference: "Never-married".into(),
            predictors: vec!["age".into(), "sex".into()],
        };
        let fit = fit_multinomial(&ds, &spec, &FitOptions::default()).unwrap();
        let evaluation = evaluate(&fit, &ds).unwrap();
        let cm = &evaluation.confusion;

        let mut observed = vec![0u64; fit.levels().len()];
        for r in &records {
            observed[fit.level_index(&r.maritalstatus).unwrap()] += 1;
        }
        assert_eq!(cm.row_sums(), observed);
        assert_eq!(cm.total(), records.len() as u64);

        let predicted = fit.fitted_classes(&ds).unwrap();
        let mut predicted_counts = vec![0u64; fit.levels().len()];
        for p in predicted {
            predicted_counts[p] += 1;
        }
        assert_eq!(cm.column_sums(), predicted_counts);
        assert!((evaluation.accuracy - cm.correct() as f64 / cm.total() as f64).abs() < 1e-12);
    }
}
