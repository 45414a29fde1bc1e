use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::analysis::{Analysis, ModelComparison, ProbePrediction};
use crate::diagnostics::{BinnedResiduals, Gvif, ResidualSeries};
use crate::eda::FactorBoxplots;
use crate::evaluate::Evaluation;
use crate::multinom::{Coefficient, MultinomialFit};

pub const REPORT_FILE: &str = "report.txt";
pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to serialize summary: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
pub struct ModelSummary {
    pub predictors: Vec<String>,
    pub reference: String,
    pub deviance: f64,
    pub aic: f64,
    pub converged: bool,
    pub singular: bool,
    pub coefficients: Vec<Coefficient>,
}

impl ModelSummary {
    fn from_fit(fit: &MultinomialFit) -> Self {
        ModelSummary {
            predictors: fit
                .design()
                .terms()
                .iter()
                .map(|t| t.name().to_string())
                .collect(),
            reference: fit.reference_label().to_string(),
            deviance: fit.deviance(),
            aic: fit.aic(),
            converged: fit.converged(),
            singular: fit.is_singular(),
            coefficients: fit.coefficient_table(),
        }
    }
}

/// Everything in the text report that can be serialized, for tooling.
#[derive(Debug, Serialize)]
pub struct Summary<'a> {
    pub generated_at: String,
    pub rows: usize,
    pub response: &'a str,
    pub reduced: ModelSummary,
    pub full: ModelSummary,
    pub comparison: &'a ModelComparison,
    pub reduced_evaluation: &'a Evaluation,
    pub full_evaluation: &'a Evaluation,
    pub probe: &'a ProbePrediction,
    /// `(fitted, y - p)` for every row, one series per non-reference level.
    pub residuals: &'a [ResidualSeries],
    pub binned_residuals: &'a [BinnedResiduals],
    pub vif: &'a [Gvif],
    pub boxplots: &'a [FactorBoxplots],
}

pub fn summary(analysis: &Analysis) -> Summary<'_> {
    Summary {
        generated_at: analysis.generated_at.to_rfc3339(),
        rows: analysis.dataset.len(),
        response: &analysis.config.response,
        reduced: ModelSummary::from_fit(&analysis.reduced),
        full: ModelSummary::from_fit(&analysis.full),
        comparison: &analysis.comparison,
        reduced_evaluation: &analysis.reduced_evaluation,
        full_evaluation: &analysis.full_evaluation,
        probe: &analysis.probe,
        residuals: &analysis.residuals,
        binned_residuals: &analysis.binned_residuals,
        vif: &analysis.vif,
        boxplots: &analysis.boxplots,
    }
}

fn fmt_p(p: f64) -> String {
    if p.is_nan() {
        "NA".to_string()
    } else if p < 1e-4 {
        "<1e-4".to_string()
    } else {
        format!("{p:.4}")
    }
}

pub fn coefficient_table(fit: &MultinomialFit) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<16} {:<22} {:>10} {:>10} {:>8} {:>8} {:>10}",
        "level", "term", "estimate", "std.err", "z", "p", "odds"
    );
    for c in fit.coefficient_table() {
        let _ = writeln!(
            out,
            "{:<16} {:<22} {:>10.4} {:>10.4} {:>8.2} {:>8} {:>10.4}",
            c.level,
            c.term,
            c.estimate,
            c.std_error,
            c.z_value,
            fmt_p(c.p_value),
            c.odds_ratio
        );
    }
    out
}

fn model_section(out: &mut String, title: &str, fit: &MultinomialFit, evaluation: &Evaluation) {
    let _ = writeln!(out, "== {title} ==");
    let _ = writeln!(
        out,
        "log-odds of each level vs. `{}`",
        fit.reference_label()
    );
    out.push_str(&coefficient_table(fit));
    let _ = writeln!(
        out,
        "residual deviance {:.2}  AIC {:.2}  parameters {}",
        fit.deviance(),
        fit.aic(),
        fit.n_parameters()
    );
    if !fit.converged() {
        let _ = writeln!(
            out,
            "WARNING: optimizer did not converge (max score {:.2e})",
            fit.max_score()
        );
    }
    if fit.is_singular() {
        let _ = writeln!(out, "WARNING: information matrix singular; standard errors unavailable");
    }
    let _ = writeln!(out, "\nconfusion matrix (training data):");
    let _ = write!(out, "{}", evaluation.confusion);
    let _ = writeln!(out, "accuracy {:.4}\n", evaluation.accuracy);
}

pub fn render_text(analysis: &Analysis) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Multinomial analysis of `{}`, {} rows, generated {}",
        analysis.config.response,
        analysis.dataset.len(),
        analysis.generated_at.format("%Y-%m-%d %H:%M:%S")
    );
    let _ = writeln!(out, "Evaluated on the training data; no held-out split.\n");

    let _ = writeln!(out, "== age by category ==");
    for plot in &analysis.boxplots {
        let _ = writeln!(out, "{}:", plot.factor);
        for g in &plot.groups {
            let _ = writeln!(
                out,
                "  {:<20} n={:<6} min {:>5.1} q1 {:>5.1} med {:>5.1} q3 {:>5.1} max {:>5.1} outliers {}",
                g.level,
                g.count,
                g.min,
                g.q1,
                g.median,
                g.q3,
                g.max,
                g.outliers.len()
            );
        }
    }
    out.push('\n');

    model_section(&mut out, "reduced model", &analysis.reduced, &analysis.reduced_evaluation);
    model_section(&mut out, "full model", &analysis.full, &analysis.full_evaluation);

    let c = &analysis.comparison;
    let _ = writeln!(
        out,
        "likelihood ratio (reduced vs. full): {:.2} on {} df; AIC {:.2} -> {:.2}\n",
        c.lr_statistic, c.df, c.aic_reduced, c.aic_full
    );

    let probe = &analysis.config.probe;
    let _ = writeln!(
        out,
        "== probe: age={} workclass={} education={} race={} sex={} ==",
        probe.age, probe.workclass, probe.education, probe.race, probe.sex
    );
    for (level, p) in analysis.probe.levels.iter().zip(&analysis.probe.probabilities) {
        let _ = writeln!(out, "  {:<16} {:.4}", level, p);
    }
    let _ = writeln!(out, "  predicted: {}\n", analysis.probe.predicted);

    let _ = writeln!(out, "== binned residuals (full model) ==");
    for binned in &analysis.binned_residuals {
        let _ = writeln!(
            out,
            "  {:<16} {} bins, {:.1}% outside the 2-SE band",
            binned.level,
            binned.bins.len(),
            100.0 * binned.share_outside()
        );
    }
    out.push('\n');

    let _ = writeln!(
        out,
        "== generalized VIF (threshold {}) ==",
        analysis.config.vif_threshold
    );
    let _ = writeln!(out, "  {:<12} {:>10} {:>4} {:>14}", "term", "GVIF", "df", "GVIF^(1/2df)");
    for row in &analysis.vif {
        let _ = writeln!(
            out,
            "  {:<12} {:>10.4} {:>4} {:>14.4}{}",
            row.term,
            row.gvif,
            row.df,
            row.adjusted,
            if row.flagged { "  <- collinear" } else { "" }
        );
    }
    out
}

pub struct OutputPaths {
    pub report: PathBuf,
    pub summary: PathBuf,
}

pub fn write_outputs(analysis: &Analysis, dir: &Path) -> Result<OutputPaths, ReportError> {
    let write_error = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ReportError::Write { path, source }
    };
    fs::create_dir_all(dir).map_err(write_error(dir))?;

    let report = dir.join(REPORT_FILE);
    fs::write(&report, render_text(analysis)).map_err(write_error(&report))?;

    let summary_path = dir.join(SUMMARY_FILE);
    let json = serde_json::to_vec_pretty(&summary(analysis))?;
    fs::write(&summary_path, json).map_err(write_error(&summary_path))?;

    tracing::info!(report = %report.display(), summary = %summary_path.display(), "wrote report");
    Ok(OutputPaths {
        report,
        summary: summary_path,
    })
}
