use serde::Serialize;

use crate::dataset::{Dataset, DatasetError};

/// Five-number summary of `age` within one level, with Tukey outliers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoxplotStats {
    pub level: String,
    pub count: usize,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
    pub outliers: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactorBoxplots {
    pub factor: String,
    pub groups: Vec<BoxplotStats>,
}

/// Linear interpolation between order statistics of a sorted sample.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let h = (n - 1) as f64 * q.clamp(0.0, 1.0);
            let lo = h.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
        }
    }
}

pub fn summarize(level: &str, values: &[f64]) -> BoxplotStats {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let q1 = quantile(&sorted, 0.25);
    let q3 = quantile(&sorted, 0.75);
    let fence = 1.5 * (q3 - q1);
    BoxplotStats {
        level: level.to_string(),
        count: sorted.len(),
        min: sorted.first().copied().unwrap_or(f64::NAN),
        q1,
        median: quantile(&sorted, 0.5),
        q3,
        max: sorted.last().copied().unwrap_or(f64::NAN),
        outliers: sorted
            .iter()
            .copied()
            .filter(|v| *v < q1 - fence || *v > q3 + fence)
            .collect(),
    }
}

/// Age distribution per level of one categorical column.
pub fn age_by_factor(dataset: &Dataset, column: &str) -> Result<FactorBoxplots, DatasetError> {
    let factor = dataset.factor(column)?;
    let codes = dataset.codes(column)?;
    let ages = dataset.ages();
    let groups = factor
        .levels()
        .iter()
        .enumerate()
        .map(|(level, label)| {
            let values = codes
                .iter()
                .zip(&ages)
                .filter(|(code, _)| **code == level)
                .map(|(_, age)| *age)
                .collect::<Vec<_>>();
            summarize(label, &values)
        })
        .filter(|stats| stats.count > 0)
        .collect();
    Ok(FactorBoxplots {
        factor: column.to_string(),
        groups,
    })
}

pub fn age_boxplots(dataset: &Dataset, columns: &[String]) -> Result<Vec<FactorBoxplots>, DatasetError> {
    columns.iter().map(|c| age_by_factor(dataset, c)).collect()
}
