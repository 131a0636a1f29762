//! # trustseal-core
//!
//! Deterministic heart of the TrustSeal pipeline.
//!
//! A claim is judged by several independent runs of a non-deterministic
//! completion backend; this crate turns those unreliable runs into a
//! reproducible verdict. It owns:
//!
//! - recovery of structured JSON from free-form model text ([`recover`]),
//! - boundary validation of verifier output ([`types`]),
//! - vote consensus with dispersion ([`consensus`]),
//! - bag-of-words agreement and divergence flagging ([`similarity`]),
//! - rubric score normalization and aggregation ([`rubric`]),
//! - relevant-excerpt selection ([`excerpt`]),
//! - HTML-to-text reduction ([`text`]),
//! - IP range classification for the SSRF guard ([`ipguard`]).
//!
//! ## Key guarantees
//!
//! 1. **Deterministic**: the same set of runs always aggregates to the same
//!    summary.
//! 2. **No I/O**: nothing here touches the network, the clock is only read
//!    by callers.
//! 3. **Total at the boundary**: recovery never panics, validation failures
//!    are values, and a failed run can never vote.

pub mod consensus;
pub mod excerpt;
pub mod ipguard;
pub mod recover;
pub mod rubric;
pub mod similarity;
pub mod text;
pub mod types;

pub use consensus::summarize_claim_runs;
pub use excerpt::{select_relevant_excerpt, ExcerptOptions};
pub use ipguard::{is_blocked_ip, is_blocked_ip_str, parse_ip_literal};
pub use recover::parse_json_text;
pub use rubric::{
    normalize_rubric_value, summarize_rubric_runs, RubricCategories, RubricConfig,
    RubricMeanScores, RubricParsed, RubricRun, RubricSummary,
};
pub use similarity::{mean_pairwise_similarity, summarize_agreement, AgreementConfig};
pub use text::{extract_title, strip_html_to_text, truncate_chars};
pub use types::{
    AgreementSummary, AuditRollup, ClaimVerdict, ClaimVerification, ClaimVerificationSummary,
    ExtractionMeta, RubricReport, Seal, SealDraft, SealEvidence, SourceAuditReport, SourceClaim,
    SourceMeta, ValidationError, ValidationReport, VerdictCounts, VerificationParsed, VerifierRun,
    AUDIT_REPORT_KIND, VALIDATE_REPORT_KIND,
};
