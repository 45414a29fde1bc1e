//! Multinomial logistic regression of census marital status.
//!
//! The workflow loads a cleaned census CSV into an immutable [`dataset::Dataset`],
//! fits a reduced and a full multinomial model against an explicit reference
//! level, evaluates both on the training rows, scores one probe record, and
//! runs residual and variance-inflation diagnostics. [`analysis::run`] drives
//! the whole sequence; [`report`] and [`viewer`] present the result.

pub mod analysis;
pub mod config;
pub mod csv_reader;
pub mod dataset;
pub mod design;
pub mod diagnostics;
pub mod eda;
pub mod evaluate;
pub mod logging;
pub mod multinom;
pub mod numeric;
pub mod report;
pub mod simulate;
pub mod viewer;
