//! Shared data model for verifier runs, summaries, and seal artifacts.
//!
//! Everything here is plain data plus the boundary validation that turns a
//! recovered JSON value into a [`VerificationParsed`]. Model output has no
//! fixed schema, so validation happens exactly once, at this boundary; all
//! aggregation code downstream only ever sees values that passed it.
//!
//! Serialized field names follow the camelCase wire shape of the evidence
//! artifacts so that exported seals and reports stay stable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::rubric::{RubricRun, RubricSummary};

/// Verdict of a single verifier run over one claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimVerdict {
    Supported,
    Unsupported,
    Unclear,
}

impl std::fmt::Display for ClaimVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ClaimVerdict::Supported => "supported",
            ClaimVerdict::Unsupported => "unsupported",
            ClaimVerdict::Unclear => "unclear",
        };
        f.write_str(label)
    }
}

/// Errors produced when model output fails boundary validation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("unable to parse JSON from model output")]
    UnparseableJson,

    #[error("model output is not a JSON object")]
    NotObject,

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl ValidationError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ValidationError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// Coerce a JSON value into a finite f64, accepting numeric strings.
pub(crate) fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn required_str(
    value: &Value,
    field: &'static str,
    max_chars: usize,
) -> Result<String, ValidationError> {
    let raw = value
        .get(field)
        .ok_or(ValidationError::MissingField(field))?
        .as_str()
        .ok_or_else(|| ValidationError::invalid(field, "expected a string"))?;

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::invalid(field, "must not be empty"));
    }
    if trimmed.chars().count() > max_chars {
        return Err(ValidationError::invalid(
            field,
            format!("must be at most {max_chars} characters"),
        ));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn string_list(
    value: &Value,
    field: &'static str,
    max_items: usize,
    max_item_chars: usize,
) -> Result<Vec<String>, ValidationError> {
    let Some(raw) = value.get(field) else {
        return Ok(Vec::new());
    };
    if raw.is_null() {
        return Ok(Vec::new());
    }

    let items = raw
        .as_array()
        .ok_or_else(|| ValidationError::invalid(field, "expected an array of strings"))?;
    if items.len() > max_items {
        return Err(ValidationError::invalid(
            field,
            format!("must contain at most {max_items} entries"),
        ));
    }

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let s = item
            .as_str()
            .ok_or_else(|| ValidationError::invalid(field, "entries must be strings"))?
            .trim();
        if s.is_empty() || s.chars().count() > max_item_chars {
            return Err(ValidationError::invalid(
                field,
                format!("entries must be 1..={max_item_chars} characters"),
            ));
        }
        out.push(s.to_string());
    }
    Ok(out)
}

/// Structured verdict extracted from one verifier run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationParsed {
    pub verdict: ClaimVerdict,

    /// Normalized into `[0, 1]`.
    pub confidence: f64,

    /// Optional support score, clamped into `[0, 10]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,

    pub rationale: String,

    /// Short verbatim quotes, at most five.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<String>,
}

impl VerificationParsed {
    /// Validate a recovered JSON value into a verdict.
    ///
    /// Confidence given as a percentage (`> 1` and `<= 100`) is divided by
    /// 100; everything else clamps into `[0, 1]`. The score clamps into
    /// `[0, 10]`. Both fields also accept numeric strings.
    pub fn from_value(value: &Value) -> Result<Self, ValidationError> {
        if !value.is_object() {
            return Err(ValidationError::NotObject);
        }

        let verdict = match value
            .get("verdict")
            .ok_or(ValidationError::MissingField("verdict"))?
            .as_str()
        {
            Some("supported") => ClaimVerdict::Supported,
            Some("unsupported") => ClaimVerdict::Unsupported,
            Some("unclear") => ClaimVerdict::Unclear,
            _ => {
                return Err(ValidationError::invalid(
                    "verdict",
                    "must be one of supported|unsupported|unclear",
                ))
            }
        };

        let confidence_raw = value
            .get("confidence")
            .ok_or(ValidationError::MissingField("confidence"))?;
        let mut confidence = coerce_f64(confidence_raw)
            .ok_or_else(|| ValidationError::invalid("confidence", "expected a number"))?;
        if confidence > 1.0 && confidence <= 100.0 {
            confidence /= 100.0;
        }
        let confidence = confidence.clamp(0.0, 1.0);

        let score = match value.get("score") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(
                coerce_f64(raw)
                    .ok_or_else(|| ValidationError::invalid("score", "expected a number"))?
                    .clamp(0.0, 10.0),
            ),
        };

        let rationale = required_str(value, "rationale", 2_000)?;
        let evidence = string_list(value, "evidence", 5, 400)?;

        Ok(Self {
            verdict,
            confidence,
            score,
            rationale,
            evidence,
        })
    }

    /// The support score, falling back to confidence scaled onto `[0, 10]`.
    pub fn effective_score(&self) -> f64 {
        self.score.unwrap_or(self.confidence * 10.0)
    }
}

/// One verifier invocation, immutable once produced.
///
/// A run either carries a validated verdict (`ok == true`) or the error that
/// prevented one, along with truncated raw model text for auditing. Failed
/// runs never vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifierRun {
    pub run_index: usize,
    pub ok: bool,
    pub duration_ms: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed: Option<VerificationParsed>,
}

impl VerifierRun {
    pub fn verified(
        run_index: usize,
        duration_ms: u64,
        raw_text: Option<String>,
        parsed: VerificationParsed,
    ) -> Self {
        Self {
            run_index,
            ok: true,
            duration_ms,
            raw_text,
            error: None,
            parsed: Some(parsed),
        }
    }

    pub fn malformed(
        run_index: usize,
        duration_ms: u64,
        raw_text: Option<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            run_index,
            ok: false,
            duration_ms,
            raw_text,
            error: Some(error.into()),
            parsed: None,
        }
    }

    /// The run's vote, present only for ok runs.
    pub fn vote(&self) -> Option<&VerificationParsed> {
        if self.ok {
            self.parsed.as_ref()
        } else {
            None
        }
    }
}

/// Vote tally per verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictCounts {
    pub supported: usize,
    pub unsupported: usize,
    pub unclear: usize,
}

impl VerdictCounts {
    pub fn get(&self, verdict: ClaimVerdict) -> usize {
        match verdict {
            ClaimVerdict::Supported => self.supported,
            ClaimVerdict::Unsupported => self.unsupported,
            ClaimVerdict::Unclear => self.unclear,
        }
    }

    pub fn bump(&mut self, verdict: ClaimVerdict) {
        match verdict {
            ClaimVerdict::Supported => self.supported += 1,
            ClaimVerdict::Unsupported => self.unsupported += 1,
            ClaimVerdict::Unclear => self.unclear += 1,
        }
    }

    pub fn max(&self) -> usize {
        self.supported.max(self.unsupported).max(self.unclear)
    }
}

/// Derived consensus over a claim's redundant runs.
///
/// Invariants: `consensus_confidence == 0` and `dispersion == 1` whenever
/// `ok_runs == 0`; `dispersion` is always within `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimVerificationSummary {
    pub ok_runs: usize,
    pub verdict_counts: VerdictCounts,
    pub consensus_verdict: ClaimVerdict,
    pub consensus_confidence: f64,
    pub dispersion: f64,
}

/// Consensus summary extended with the pairwise-similarity agreement signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgreementSummary {
    #[serde(flatten)]
    pub consensus: ClaimVerificationSummary,

    /// Mean pairwise cosine similarity of run rationales.
    pub mean_rationale_cosine: f64,

    /// `1 - mean_rationale_cosine`.
    pub poi_disagreement: f64,

    /// Mean effective score across ok runs.
    pub average_score: f64,

    pub divergent: bool,
}

/// Evidence bundle attached to a seal: the raw runs plus their agreement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealEvidence {
    /// Mean pairwise rationale similarity across ok runs.
    pub consensus_score: f64,
    pub runs: Vec<VerifierRun>,
}

/// A seal before it has been assigned identity and persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealDraft {
    pub excerpt: String,
    pub verdict: ClaimVerdict,
    pub confidence: f64,
    pub summary: String,
    pub evidence: SealEvidence,
}

/// Persisted trust-evidence artifact.
///
/// Seals created from monitoring are keyed on `(monitor_id, feed_item_id)`
/// and created exactly once per key; seals created from direct validation
/// carry the submitted claim instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seal {
    pub public_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed_item_id: Option<String>,

    pub source_url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_published_at: Option<DateTime<Utc>>,

    pub source_excerpt: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim: Option<String>,

    pub verdict: ClaimVerdict,
    pub confidence: f64,
    pub summary: String,
    pub evidence: SealEvidence,
    pub created_at: DateTime<Utc>,
}

/// Metadata about a fetched source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMeta {
    pub url: String,
    pub title: String,
    pub fetched_at: DateTime<Utc>,
    pub text_sha256: String,
}

/// A claim extracted from a source document with its supporting quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceClaim {
    pub claim: String,
    pub quote: String,
}

/// One claim with its redundant runs and agreement summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimVerification {
    pub claim: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,

    pub runs: Vec<VerifierRun>,
    pub summary: AgreementSummary,
}

pub const VALIDATE_REPORT_KIND: &str = "trustseal:validate:v1";
pub const AUDIT_REPORT_KIND: &str = "trustseal:audit:v1";

/// Result of validating a single submitted claim against a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub kind: String,
    pub created_at: DateTime<Utc>,
    pub source: SourceMeta,
    pub claim: String,
    pub excerpt: String,
    pub runs: Vec<VerifierRun>,
    pub summary: AgreementSummary,
}

/// Raw extraction phase output kept for auditing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionMeta {
    pub duration_ms: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,

    pub claims: Vec<SourceClaim>,
}

/// Rubric phase of an audit: the redundant scoring runs and their summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RubricReport {
    pub duration_ms: u64,
    pub runs: Vec<RubricRun>,
    pub summary: RubricSummary,
}

/// Top-level rollup across all claims of an audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRollup {
    pub claim_count: usize,
    pub ok_run_count: usize,
    pub avg_dispersion: f64,
    pub avg_mean_rationale_cosine: f64,
    pub average_score: f64,
    pub divergent_claim_count: usize,
}

impl AuditRollup {
    /// Aggregate per-claim summaries. Averages over zero claims are defined
    /// as 0 dispersion / 1 cosine / 0 score, matching "no signal, no alarm".
    pub fn from_claims(claims: &[ClaimVerification]) -> Self {
        let claim_count = claims.len();
        let ok_run_count = claims.iter().map(|c| c.summary.consensus.ok_runs).sum();
        let divergent_claim_count = claims.iter().filter(|c| c.summary.divergent).count();

        if claim_count == 0 {
            return Self {
                claim_count,
                ok_run_count,
                avg_dispersion: 0.0,
                avg_mean_rationale_cosine: 1.0,
                average_score: 0.0,
                divergent_claim_count,
            };
        }

        let n = claim_count as f64;
        Self {
            claim_count,
            ok_run_count,
            avg_dispersion: claims
                .iter()
                .map(|c| c.summary.consensus.dispersion)
                .sum::<f64>()
                / n,
            avg_mean_rationale_cosine: claims
                .iter()
                .map(|c| c.summary.mean_rationale_cosine)
                .sum::<f64>()
                / n,
            average_score: claims.iter().map(|c| c.summary.average_score).sum::<f64>() / n,
            divergent_claim_count,
        }
    }
}

/// Full audit of a source document: extracted claims, verifier panels, and
/// the rubric scoring pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceAuditReport {
    pub kind: String,
    pub source: SourceMeta,
    pub extraction: ExtractionMeta,
    pub claims: Vec<ClaimVerification>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rubric: Option<RubricReport>,

    pub summary: AuditRollup,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_a_complete_verdict() {
        let value = json!({
            "verdict": "supported",
            "confidence": 0.9,
            "score": 8,
            "rationale": "The excerpt states this directly.",
            "evidence": ["states this directly"]
        });

        let parsed = VerificationParsed::from_value(&value).unwrap();
        assert_eq!(parsed.verdict, ClaimVerdict::Supported);
        assert!((parsed.confidence - 0.9).abs() < 1e-9);
        assert_eq!(parsed.score, Some(8.0));
        assert_eq!(parsed.evidence.len(), 1);
    }

    #[test]
    fn normalizes_percentage_confidence() {
        let value = json!({
            "verdict": "unclear",
            "confidence": 85,
            "rationale": "Not enough context."
        });

        let parsed = VerificationParsed::from_value(&value).unwrap();
        assert!((parsed.confidence - 0.85).abs() < 1e-9);
    }

    #[test]
    fn clamps_out_of_range_values() {
        let value = json!({
            "verdict": "supported",
            "confidence": 150,
            "score": 42,
            "rationale": "Overconfident output."
        });

        let parsed = VerificationParsed::from_value(&value).unwrap();
        assert_eq!(parsed.confidence, 1.0);
        assert_eq!(parsed.score, Some(10.0));
    }

    #[test]
    fn accepts_numeric_strings() {
        let value = json!({
            "verdict": "unsupported",
            "confidence": "0.4",
            "rationale": "Contradicted by the excerpt."
        });

        let parsed = VerificationParsed::from_value(&value).unwrap();
        assert!((parsed.confidence - 0.4).abs() < 1e-9);
    }

    #[test]
    fn rejects_unknown_verdicts() {
        let value = json!({
            "verdict": "maybe",
            "confidence": 0.5,
            "rationale": "..."
        });

        assert!(matches!(
            VerificationParsed::from_value(&value),
            Err(ValidationError::InvalidField { field: "verdict", .. })
        ));
    }

    #[test]
    fn rejects_too_much_evidence() {
        let value = json!({
            "verdict": "supported",
            "confidence": 0.5,
            "rationale": "fine",
            "evidence": ["a", "b", "c", "d", "e", "f"]
        });

        assert!(VerificationParsed::from_value(&value).is_err());
    }

    #[test]
    fn failed_runs_do_not_vote() {
        let run = VerifierRun::malformed(0, 12, Some("garbage".into()), "unparseable");
        assert!(run.vote().is_none());
        assert!(!run.ok);
    }

    #[test]
    fn effective_score_falls_back_to_confidence() {
        let value = json!({
            "verdict": "supported",
            "confidence": 0.7,
            "rationale": "fine"
        });
        let parsed = VerificationParsed::from_value(&value).unwrap();
        assert!((parsed.effective_score() - 7.0).abs() < 1e-9);
    }
}
