//! Deterministic consensus over redundant verifier runs.
//!
//! The backend is non-deterministic; this aggregation is not. Given the same
//! set of runs it always produces the same verdict, confidence, and
//! dispersion, which is what makes the pipeline auditable.

use crate::types::{ClaimVerdict, ClaimVerificationSummary, VerdictCounts, VerifierRun};

/// Summarize a claim's runs into a consensus verdict.
///
/// Only ok runs vote. The winning verdict is the one with the most votes;
/// ties resolve to `unclear` if it is among the tied verdicts, otherwise to
/// the tied verdict with the higher mean confidence, and to `unclear` when
/// even that is equal. Dispersion is `1 - winning_share`, defined as 1 when
/// there are no ok runs (no signal reads as total disagreement).
pub fn summarize_claim_runs(runs: &[VerifierRun]) -> ClaimVerificationSummary {
    let votes: Vec<_> = runs.iter().filter_map(|run| run.vote()).collect();

    let mut verdict_counts = VerdictCounts::default();
    for vote in &votes {
        verdict_counts.bump(vote.verdict);
    }

    let ok_runs = votes.len();
    let max_count = verdict_counts.max();

    let consensus_verdict = if ok_runs == 0 {
        ClaimVerdict::Unclear
    } else {
        let candidates: Vec<ClaimVerdict> = [
            ClaimVerdict::Supported,
            ClaimVerdict::Unsupported,
            ClaimVerdict::Unclear,
        ]
        .into_iter()
        .filter(|verdict| verdict_counts.get(*verdict) == max_count)
        .collect();

        if candidates.len() == 1 {
            candidates[0]
        } else if candidates.contains(&ClaimVerdict::Unclear) {
            ClaimVerdict::Unclear
        } else {
            let mean_confidence = |verdict: ClaimVerdict| -> f64 {
                let matching: Vec<f64> = votes
                    .iter()
                    .filter(|vote| vote.verdict == verdict)
                    .map(|vote| vote.confidence)
                    .collect();
                if matching.is_empty() {
                    0.0
                } else {
                    matching.iter().sum::<f64>() / matching.len() as f64
                }
            };

            let supported = mean_confidence(ClaimVerdict::Supported);
            let unsupported = mean_confidence(ClaimVerdict::Unsupported);

            if supported == unsupported {
                ClaimVerdict::Unclear
            } else if supported > unsupported {
                ClaimVerdict::Supported
            } else {
                ClaimVerdict::Unsupported
            }
        }
    };

    let matching: Vec<f64> = votes
        .iter()
        .filter(|vote| vote.verdict == consensus_verdict)
        .map(|vote| vote.confidence)
        .collect();
    let consensus_confidence = if matching.is_empty() {
        0.0
    } else {
        matching.iter().sum::<f64>() / matching.len() as f64
    };

    let dispersion = if ok_runs == 0 {
        1.0
    } else {
        1.0 - max_count as f64 / ok_runs as f64
    };

    ClaimVerificationSummary {
        ok_runs,
        verdict_counts,
        consensus_verdict,
        consensus_confidence,
        dispersion,
    }
}
