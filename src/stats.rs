use crate::models::{EvaluationResult, JudgeMode};
use serde::Serialize;
use std::collections::HashMap;

/// Aggregate of one numeric field over a table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricStatistics {
    pub field: &'static str,
    /// Rows that produced a numeric value
    pub count: usize,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    /// Most frequent value, rounded to an integer score
    pub mode: Option<f64>,
}

/// Collects numeric scores as rows complete
#[derive(Debug)]
pub struct ScoreCollector {
    mode: JudgeMode,
    scores: HashMap<&'static str, Vec<f64>>,
}

impl ScoreCollector {
    pub fn new(mode: JudgeMode) -> Self {
        Self {
            mode,
            scores: HashMap::new(),
        }
    }

    pub fn push(&mut self, result: &EvaluationResult) {
        for (field, metric) in result.iter() {
            if let Some(score) = metric.as_f64().filter(|_| field.is_numeric()) {
                self.scores.entry(field.key()).or_default().push(score);
            }
        }
    }

    /// Statistics for every numeric field of the mode, in column order
    pub fn finish(&self) -> Vec<MetricStatistics> {
        self.mode
            .fields()
            .iter()
            .filter(|f| f.is_numeric())
            .map(|f| {
                let scores = self.scores.get(f.key()).map(Vec::as_slice).unwrap_or(&[]);
                MetricStatistics {
                    field: f.key(),
                    count: scores.len(),
                    mean: calculate_mean(scores),
                    median: calculate_median(scores),
                    mode: calculate_mode(scores),
                }
            })
            .collect()
    }
}

fn calculate_mean(scores: &[f64]) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }
    let sum: f64 = scores.iter().sum();
    Some(sum / scores.len() as f64)
}

fn calculate_median(scores: &[f64]) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }
    let mut sorted_scores = scores.to_vec();
    sorted_scores.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mid = sorted_scores.len() / 2;
    if sorted_scores.len() % 2 == 0 {
        Some((sorted_scores[mid - 1] + sorted_scores[mid]) / 2.0)
    } else {
        Some(sorted_scores[mid])
    }
}

fn calculate_mode(scores: &[f64]) -> Option<f64> {
    let mut frequency: HashMap<i64, usize> = HashMap::new();
    for &score in scores {
        *frequency.entry(score.round() as i64).or_insert(0) += 1;
    }

    // ties go to the lower score so the result does not depend on map order
    frequency
        .into_iter()
        .max_by(|(a_score, a_count), (b_score, b_count)| {
            a_count.cmp(b_count).then(b_score.cmp(a_score))
        })
        .map(|(score, _)| score as f64)
}
