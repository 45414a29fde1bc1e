use std::collections::BTreeSet;

use serde::Serialize;
use thiserror::Error;

use crate::csv_reader::Record;

pub const COLUMNS: &[&str] = &["age", "workclass", "education", "race", "sex", "maritalstatus"];

/// Columns coerced to factors when a [`Dataset`] is built.
pub const CATEGORICAL: &[&str] = &["workclass", "education", "race", "sex", "maritalstatus"];

pub const NUMERIC: &[&str] = &["age"];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DatasetError {
    #[error("dataset has no records")]
    Empty,
    #[error("`{0}` is not a column of the census dataset")]
    UnknownColumn(String),
    #[error("`{level}` is not a level of `{factor}`")]
    UnknownLevel { factor: String, level: String },
    #[error("`{factor}` has {count} level(s); at least two are required")]
    TooFewLevels { factor: String, count: usize },
}

/// A categorical column: its label set in level order and the reference level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Factor {
    name: String,
    levels: Vec<String>,
    reference: usize,
}

impl Factor {
    /// Builds a factor from observed labels. Levels are sorted and the first
    /// one is the reference until [`Factor::with_reference`] says otherwise.
    pub fn from_labels<'a, I>(name: &str, labels: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let levels = labels
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect();
        Factor {
            name: name.to_string(),
            levels,
            reference: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn reference(&self) -> usize {
        self.reference
    }

    pub fn reference_label(&self) -> &str {
        &self.levels[self.reference]
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.levels.iter().position(|l| l == label)
    }

    pub fn with_reference(&self, label: &str) -> Result<Factor, DatasetError> {
        let reference = self
            .index_of(label)
            .ok_or_else(|| DatasetError::UnknownLevel {
                factor: self.name.clone(),
                level: label.to_string(),
            })?;
        Ok(Factor {
            reference,
            ..self.clone()
        })
    }

    /// Levels other than the reference, in level order.
    pub fn non_reference(&self) -> impl Iterator<Item = (usize, &str)> + '_ {
        self.levels
            .iter()
            .enumerate()
            .filter(move |(i, _)| *i != self.reference)
            .map(|(i, l)| (i, l.as_str()))
    }

    pub fn require_levels(&self, min: usize) -> Result<(), DatasetError> {
        if self.len() < min {
            return Err(DatasetError::TooFewLevels {
                factor: self.name.clone(),
                count: self.len(),
            });
        }
        Ok(())
    }
}

/// Anything a design matrix can be built from: a loaded row or a hand-made record.
pub trait Row {
    fn numeric(&self, column: &str) -> Option<f64>;
    fn label(&self, column: &str) -> Option<&str>;
}

impl Row for Record {
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
            "maritalstatus" => Some(&self.maritalstatus),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Observation {
    age: f64,
    codes: [usize; CATEGORICAL.len()],
}

/// The loaded census data after type coercion. Never mutated; stages that need
/// a different reference level get a new value from [`Dataset::with_reference`].
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    factors: Vec<Factor>,
    rows: Vec<Observation>,
}

impl Dataset {
    pub fn from_records(records: &[Record]) -> Result<Self, DatasetError> {
        if records.is_empty() {
            return Err(DatasetError::Empty);
        }
        let factors = CATEGORICAL
            .iter()
            .map(|&column| {
                Factor::from_labels(
                    column,
                    records.iter().filter_map(|r| r.label(column)),
                )
            })
            .collect::<Vec<_>>();

        let rows = records
            .iter()
            .map(|record| {
                let mut codes = [0usize; CATEGORICAL.len()];
                for (slot, factor) in codes.iter_mut().zip(&factors) {
                    let label = record.label(factor.name()).unwrap_or_default();
                    *slot = factor.index_of(label).unwrap_or_default();
                }
                Observation {
                    age: record.age,
                    codes,
                }
            })
            .collect();

        tracing::debug!(
            levels = ?factors.iter().map(|f| (f.name(), f.len())).collect::<Vec<_>>(),
            "coerced categorical columns"
        );
        Ok(Dataset { factors, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn factors(&self) -> &[Factor] {
        &self.factors
    }

    fn position(&self, column: &str) -> Result<usize, DatasetError> {
        CATEGORICAL
            .iter()
            .position(|&c| c == column)
            .ok_or_else(|| DatasetError::UnknownColumn(column.to_string()))
    }

    pub fn factor(&self, column: &str) -> Result<&Factor, DatasetError> {
        Ok(&self.factors[self.position(column)?])
    }

    /// Level indices of a categorical column, one per row.
    pub fn codes(&self, column: &str) -> Result<Vec<usize>, DatasetError> {
        let pos = self.position(column)?;
        Ok(self.rows.iter().map(|r| r.codes[pos]).collect())
    }

    pub fn ages(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.age).collect()
    }

    pub fn row(&self, index: usize) -> DatasetRow<'_> {
        DatasetRow {
            dataset: self,
            index,
        }
    }

    pub fn with_reference(&self, column: &str, label: &str) -> Result<Dataset, DatasetError> {
        let pos = self.position(column)?;
        let mut factors = self.factors.clone();
        factors[pos] = factors[pos].with_reference(label)?;
        Ok(Dataset {
            factors,
            rows: self.rows.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DatasetRow<'a> {
    dataset: &'a Dataset,
    index: usize,
}

impl Row for DatasetRow<'_> {
    fn numeric(&self, column: &str) -> Option<f64> {
        match column {
            "age" => Some(self.dataset.rows[self.index].age),
            _ => None,
        }
    }

    fn label(&self, column: &str) -> Option<&str> {
        let pos = self.dataset.position(column).ok()?;
        let code = self.dataset.rows[self.index].codes[pos];
        Some(self.dataset.factors[pos].levels[code].as_str())
    }
}
