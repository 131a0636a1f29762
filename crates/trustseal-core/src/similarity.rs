//! Bag-of-words similarity between run rationales.
//!
//! Used two ways: the mean pairwise cosine across a panel's rationales is an
//! independent corroboration signal (verdicts can agree while the reasoning
//! diverges wildly), and together with vote dispersion it drives the
//! `divergent` flag on a claim.

use std::collections::HashMap;

use crate::consensus::summarize_claim_runs;
use crate::types::{AgreementSummary, VerifierRun};

/// Thresholds for flagging a claim's panel as divergent.
///
/// The defaults are inherited operating points, not derived quantities; tune
/// them here rather than inferring new semantics for them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgreementConfig {
    /// Panels whose mean rationale cosine falls below this are divergent.
    pub min_rationale_cosine: f64,

    /// Panels whose vote dispersion exceeds this are divergent.
    pub max_dispersion: f64,
}

impl Default for AgreementConfig {
    fn default() -> Self {
        Self {
            min_rationale_cosine: 0.85,
            max_dispersion: 0.34,
        }
    }
}

fn tokenize(input: &str) -> Vec<String> {
    input
        .to_lowercase()
        .chars()
        .map(|ch| {
            if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch.is_whitespace() {
                ch
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .filter(|token| token.len() >= 3)
        .map(str::to_string)
        .collect()
}

fn term_frequencies(tokens: &[String]) -> HashMap<String, f64> {
    let mut freq = HashMap::new();
    for token in tokens {
        *freq.entry(token.clone()).or_insert(0.0) += 1.0;
    }
    freq
}

fn cosine_similarity(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
    let norm_a: f64 = a.values().map(|v| v * v).sum::<f64>().sqrt();
    let norm_b: f64 = b.values().map(|v| v * v).sum::<f64>().sqrt();

    let denom = norm_a * norm_b;
    if denom == 0.0 {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .filter_map(|(token, av)| b.get(token).map(|bv| av * bv))
        .sum();

    dot / denom
}

/// Mean cosine similarity over all unordered pairs of texts.
///
/// Fewer than two texts is trivial full agreement (1.0).
pub fn mean_pairwise_similarity<S: AsRef<str>>(texts: &[S]) -> f64 {
    if texts.len() < 2 {
        return 1.0;
    }

    let vectors: Vec<HashMap<String, f64>> = texts
        .iter()
        .map(|text| term_frequencies(&tokenize(text.as_ref())))
        .collect();

    let mut sum = 0.0;
    let mut count = 0usize;

    for i in 0..vectors.len() {
        for j in i + 1..vectors.len() {
            sum += cosine_similarity(&vectors[i], &vectors[j]);
            count += 1;
        }
    }

    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Combine vote consensus and rationale similarity into the full agreement
/// summary for one claim's panel.
pub fn summarize_agreement(runs: &[VerifierRun], config: &AgreementConfig) -> AgreementSummary {
    let consensus = summarize_claim_runs(runs);

    let rationales: Vec<&str> = runs
        .iter()
        .filter_map(|run| run.vote())
        .map(|vote| vote.rationale.as_str())
        .collect();
    let mean_rationale_cosine = mean_pairwise_similarity(&rationales);

    let scores: Vec<f64> = runs
        .iter()
        .filter_map(|run| run.vote())
        .map(|vote| vote.effective_score())
        .collect();
    let average_score = if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    };

    let divergent = mean_rationale_cosine < config.min_rationale_cosine
        || consensus.dispersion > config.max_dispersion;

    AgreementSummary {
        consensus,
        mean_rationale_cosine,
        poi_disagreement: 1.0 - mean_rationale_cosine,
        average_score,
        divergent,
    }
}
