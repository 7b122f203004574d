use crate::runner::{TableStatus, TableSummary};
use crate::stats::MetricStatistics;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Output format options
#[derive(Debug, Clone, Copy, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    Plain,
    Json,
}

/// Print the run summary in the specified format
pub fn print_summaries(summaries: &[TableSummary], format: OutputFormat) {
    match format {
        OutputFormat::Plain => print!("{}", render_plain(summaries)),
        OutputFormat::Json => print_json(summaries),
    }
}

/// Render the summary as plain text
fn render_plain(summaries: &[TableSummary]) -> String {
    let mut out = String::new();

    for (i, summary) in summaries.iter().enumerate() {
        let _ = writeln!(out, "=== {:?}: {} ===", summary.stage, summary.input.display());
        match &summary.status {
            TableStatus::Written { rows } => {
                let _ = writeln!(out, "Output: {} ({} rows)", summary.output.display(), rows);
            }
            TableStatus::Skipped { reason } => {
                let _ = writeln!(out, "Skipped: {}", reason);
            }
        }
        if let Some(mode) = summary.mode {
            let _ = writeln!(out, "Mode: {}", mode);
        }

        if let Some(report) = &summary.report {
            let _ = writeln!(
                out,
                "Judged: {}  Missing data: {}  Judge failed: {}  Processing failed: {}",
                report.judged, report.missing_data, report.judge_failed, report.processing_failed
            );
            out.push('\n');
            render_statistics(&mut out, &report.statistics);
        }

        if i < summaries.len() - 1 {
            out.push('\n');
        }
    }

    out
}

/// Render the per-field statistics table
fn render_statistics(out: &mut String, stats: &[MetricStatistics]) {
    if stats.iter().all(|s| s.count == 0) {
        let _ = writeln!(out, "No statistics available.");
        return;
    }

    let _ = writeln!(
        out,
        "{:<28} {:<6} {:<8} {:<8} {:<8}",
        "Field", "Count", "Mean", "Median", "Mode"
    );
    let _ = writeln!(out, "{}", "-".repeat(62));

    for stat in stats {
        let _ = writeln!(
            out,
            "{:<28} {:<6} {:<8} {:<8} {:<8}",
            stat.field,
            stat.count,
            format_score(stat.mean),
            format_score(stat.median),
            format_score(stat.mode)
        );
    }
}

fn format_score(score: Option<f64>) -> String {
    score.map_or_else(|| "-".to_string(), |s| format!("{:.3}", s))
}

/// Print the summary in JSON format
fn print_json(summaries: &[TableSummary]) {
    match serde_json::to_string_pretty(summaries) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing results to JSON: {}", e),
    }
}
