//! Formatted terminal output.
//!
//! Formatting lives in one place so the fitting code stays free of
//! presentation concerns and output changes stay localized.

use crate::eval::{GofOutcome, ModelEvaluation};
use crate::fit::averaging::ModelAverage;
use crate::fit::orchestrator::CandidateSet;
use crate::io::ingest::IngestedData;
use crate::report::RankingRow;
use crate::sensitivity::SensitivityRun;

/// Dataset and fitting-phase summary.
pub fn format_run_summary(ingest: &IngestedData, candidates: &CandidateSet) -> String {
    let data = &ingest.data;
    let mut out = String::new();

    out.push_str("=== occu - occupancy model search & averaging ===\n");
    out.push_str(&format!(
        "Rows: read={} used={} skipped={}\n",
        ingest.rows_read,
        ingest.rows_used,
        ingest.row_errors.len()
    ));
    out.push_str(&format!(
        "Sites: n={} surveyed={} | occasions={} | naive occupancy={:.3}\n",
        data.len(),
        data.effective_sites(),
        data.occasions().len(),
        data.naive_occupancy()
    ));
    out.push_str(&format!("Covariates: {}\n", data.universe().join(", ")));
    out.push_str(&format!(
        "Candidates: attempted={} converged={} failed={}\n",
        candidates.attempted(),
        candidates.len(),
        candidates.failures().len()
    ));
    for err in ingest.row_errors.iter().take(5) {
        out.push_str(&format!(
            "  (row {}{}) {}\n",
            err.line,
            err.id.as_deref().map(|id| format!(" '{id}'")).unwrap_or_default(),
            err.message
        ));
    }
    out.push('\n');
    out
}

/// Ranking table; rows carrying a weight are marked as confidence-set members.
pub fn format_ranking(rows: &[RankingRow], top_n: usize) -> String {
    let mut out = String::new();
    out.push_str(&format!("Model ranking (top {} of {}):\n", top_n.min(rows.len()), rows.len()));
    push_line(
        &mut out,
        format!(
            "  {:>4} {:<44} {:>3} {:>11} {:>10} {:>7} {:>7}",
            "rank", "model", "K", "logLik", "AICc", "dAICc", "weight"
        ),
    );
    push_line(
        &mut out,
        format!("  {:-<4} {:-<44} {:-<3} {:-<11} {:-<10} {:-<7} {:-<7}", "", "", "", "", "", "", ""),
    );

    for row in rows.iter().take(top_n) {
        let marker = if row.weight.is_some() { '*' } else { ' ' };
        push_line(
            &mut out,
            format!(
                "{marker} {:>4} {:<44} {:>3} {:>11.3} {:>10.3} {:>7.3} {:>7}",
                row.rank,
                truncate(row.model.as_str(), 44),
                row.n_params,
                row.log_likelihood,
                row.aicc,
                row.delta,
                row.weight.map(|w| format!("{w:.3}")).unwrap_or_default()
            ),
        );
    }
    let members = rows.iter().filter(|r| r.weight.is_some()).count();
    out.push_str(&format!("  * confidence set (dAICc < 2): {members} model(s)\n\n"));
    out
}

/// Full and conditional model-averaged estimates.
pub fn format_average(average: &ModelAverage) -> String {
    let mut out = String::new();
    out.push_str("Model-averaged estimates (logit scale):\n");
    push_line(
        &mut out,
        format!(
            "  {:<18} {:>10} {:>9} {:>10} {:>9} {:>6} {:>6}",
            "parameter", "full", "SE", "cond.", "SE", "models", "import"
        ),
    );
    for e in &average.estimates {
        push_line(
            &mut out,
            format!(
                "  {:<18} {:>10.4} {:>9.4} {:>10.4} {:>9.4} {:>6} {:>6.3}",
                truncate(&e.parameter, 18),
                e.full_estimate,
                e.full_std_error,
                e.conditional_estimate,
                e.conditional_std_error,
                e.models,
                e.importance
            ),
        );
    }
    out.push('\n');
    out
}

/// Cross-validation, goodness-of-fit and ĉ per evaluated model.
pub fn format_evaluations(evaluations: &[ModelEvaluation]) -> String {
    let mut out = String::new();
    for eval in evaluations {
        out.push_str(&format!("Evaluation: {}\n", eval.model));

        let cv = &eval.cross_validation;
        match cv.mean_mse {
            Some(mse) => out.push_str(&format!(
                "  {}-fold CV: mean MSE={mse:.4} ({} fold(s) scored)\n",
                cv.folds.len() + cv.failures.len(),
                cv.folds.len()
            )),
            None => out.push_str("  CV: no fold could be scored\n"),
        }
        for failure in &cv.failures {
            out.push_str(&format!("    {failure}\n"));
        }

        match &eval.goodness_of_fit {
            GofOutcome::Available(test) => out.push_str(&format!(
                "  GoF (Freeman-Tukey): stat={:.3} p={:.3} sims={} failed={} bootstrap c-hat={:.3}\n",
                test.statistic, test.p_value, test.simulations, test.failed, test.c_hat
            )),
            GofOutcome::Unavailable { reason, recommendation } => {
                out.push_str(&format!("  GoF unavailable: {reason}; {recommendation}\n"));
            }
        }

        match eval.c_hat {
            Some(c) => out.push_str(&format!("  c-hat (Pearson): {c:.3}\n")),
            None => out.push_str("  c-hat: undefined (no residual degrees of freedom)\n"),
        }
        out.push('\n');
    }
    out
}

/// P* tables: bootstrap curve, then one compact row per jitter level.
pub fn format_sensitivity(run: &SensitivityRun) -> String {
    let mut out = String::new();

    if !run.bootstrap.is_empty() {
        out.push_str("P* bootstrap (averaged detection):\n");
        push_line(&mut out, format!("  {:>7} {:>8} {:>8} {:>8}", "surveys", "mean", "2.5%", "97.5%"));
        for s in &run.bootstrap {
            push_line(
                &mut out,
                format!("  {:>7} {:>8.4} {:>8.4} {:>8.4}", s.surveys, s.mean, s.lower, s.upper),
            );
        }
        out.push_str(&format!(
            "  surveys for P* >= {}: {}\n\n",
            run.target,
            fmt_required(run.surveys_required(None))
        ));
    }

    let levels = run.levels();
    if !levels.is_empty() {
        out.push_str("P* by detection level (jittered):\n");
        for level in levels {
            let curve = run.curve(Some(level));
            let means: Vec<String> = curve.iter().map(|s| format!("{:.3}", s.mean)).collect();
            push_line(
                &mut out,
                format!(
                    "  p={level:.2} [{}] -> {}",
                    means.join(" "),
                    fmt_required(run.surveys_required(Some(level)))
                ),
            );
        }
        out.push('\n');
    }
    out
}

/// First `limit` failed fits.
pub fn format_failures(candidates: &CandidateSet, limit: usize) -> String {
    let failures = candidates.failures();
    if failures.is_empty() {
        return String::new();
    }
    let mut out = format!("Failed fits ({}):\n", failures.len());
    for f in failures.iter().take(limit) {
        out.push_str(&format!("  {}: {}\n", f.spec.key(), f.failure));
    }
    if failures.len() > limit {
        out.push_str(&format!("  ... and {} more\n", failures.len() - limit));
    }
    out.push('\n');
    out
}

fn fmt_required(n: Option<u32>) -> String {
    n.map(|n| n.to_string()).unwrap_or_else(|| "not reached".to_string())
}

fn push_line(out: &mut String, line: String) {
    out.push_str(line.trim_end());
    out.push('\n');
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ModelSpec;
    use crate::sensitivity::PstarSample;

    #[test]
    fn truncate_keeps_short_strings() {
        assert_eq!(truncate("p(a) psi(b)", 44), "p(a) psi(b)");
        assert_eq!(truncate("abcdef", 4), "abc.");
    }

    #[test]
    fn ranking_marks_confidence_set() {
        let row = |rank: usize, weight: Option<f64>| RankingRow {
            rank,
            model: ModelSpec::parse("~a ~b").unwrap().key(),
            n_params: 4,
            log_likelihood: -50.0,
            aicc: 100.0 + rank as f64,
            delta: rank as f64 - 1.0,
            weight,
        };
        let text = format_ranking(&[row(1, Some(0.6)), row(2, Some(0.4)), row(3, None)], 10);
        assert!(text.contains("confidence set (dAICc < 2): 2 model(s)"));
        assert_eq!(text.lines().filter(|l| l.starts_with('*')).count(), 2);
    }

    #[test]
    fn sensitivity_reports_required_surveys() {
        let run = SensitivityRun {
            bootstrap: vec![
                PstarSample {
                    level: None,
                    surveys: 1,
                    mean: 0.5,
                    lower: 0.4,
                    upper: 0.6,
                },
                PstarSample {
                    level: None,
                    surveys: 2,
                    mean: 0.96,
                    lower: 0.9,
                    upper: 0.99,
                },
            ],
            jitter: Vec::new(),
            target: 0.95,
        };
        let text = format_sensitivity(&run);
        assert!(text.contains("surveys for P* >= 0.95: 2"));
        assert!(!text.contains("jittered"));
    }
}
