//! The redundant-inference verification pipeline.
//!
//! Every question put to the backend is asked several times; each answer is
//! recovered, validated, and recorded as a run. Failed runs are data, not
//! exceptions: a run that cannot be parsed becomes `ok: false` with the raw
//! text attached, and the panel carries on. Deterministic aggregation then
//! turns the panel into a verdict.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;

use trustseal_core::{
    normalize_rubric_value, parse_json_text, select_relevant_excerpt, summarize_agreement,
    summarize_rubric_runs, truncate_chars, AgreementConfig, AuditRollup,
    ClaimVerification, ExcerptOptions, ExtractionMeta, RubricConfig, RubricParsed, RubricReport,
    RubricRun, SealDraft, SealEvidence, SourceAuditReport, SourceClaim, SourceMeta,
    ValidationError, ValidationReport, VerificationParsed, VerifierRun, AUDIT_REPORT_KIND,
    VALIDATE_REPORT_KIND,
};

use crate::cache::VerificationCache;
use crate::client::{ClientError, CompletionClient};
use crate::config::RuntimeConfig;
use crate::executor::{map_concurrent, ExecutorError};
use crate::fetch::ReadableText;
use crate::hash::sha256_hex;
use crate::prompts;

/// Raw model text kept per run for auditing, truncated beyond this.
pub const MAX_RAW_TEXT_CHARS: usize = 8_000;

/// Source text handed to the model is cut at this length.
pub const MAX_MODEL_SOURCE_CHARS: usize = 18_000;

const EXCERPT_OPTIONS: ExcerptOptions = ExcerptOptions {
    max_chars: 3_500,
    max_paragraphs: 4,
};

const MIN_SOURCE_CLAIM_CHARS: usize = 10;
const MAX_SOURCE_CLAIM_CHARS: usize = 500;
const MIN_SOURCE_QUOTE_CHARS: usize = 5;
const MAX_SOURCE_QUOTE_CHARS: usize = 800;

/// Errors from pipeline orchestration. Per-run upstream failures are folded
/// into `ok: false` runs instead.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// The extraction call failed outright, before any panel ran.
    #[error("claim extraction failed: {0}")]
    Extraction(#[from] ClientError),
}

/// Tunables for one pipeline instance, derived from [`RuntimeConfig`].
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub max_claims: usize,
    pub verifier_runs: usize,
    pub verifier_concurrency: usize,
    pub rubric_runs: usize,
    pub rubric_concurrency: usize,
    pub agreement: AgreementConfig,
    pub rubric: RubricConfig,
}

impl From<&RuntimeConfig> for PipelineOptions {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            max_claims: config.max_claims,
            verifier_runs: config.verifier_runs,
            verifier_concurrency: config.verifier_concurrency,
            rubric_runs: config.rubric_runs,
            rubric_concurrency: config.rubric_concurrency,
            agreement: config.agreement,
            rubric: config.rubric,
        }
    }
}

/// Fans verification work out to the completion backend and aggregates the
/// results deterministically.
pub struct VerificationPipeline {
    client: Arc<CompletionClient>,
    options: PipelineOptions,
    cache: Option<VerificationCache>,
}

impl VerificationPipeline {
    pub fn new(client: Arc<CompletionClient>, options: PipelineOptions) -> Self {
        Self {
            client,
            options,
            cache: None,
        }
    }

    /// Attach a result cache for repeated identical validations.
    pub fn with_cache(mut self, cache: VerificationCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Validate one submitted claim against a fetched source document.
    pub async fn validate_claim(
        &self,
        source: &ReadableText,
        claim: &str,
    ) -> Result<ValidationReport, PipelineError> {
        let excerpt = select_relevant_excerpt(&source.text, claim, EXCERPT_OPTIONS);

        let cache_key = self.cache.as_ref().map(|_| {
            sha256_hex(&format!(
                "{claim}\u{1f}{excerpt}\u{1f}{}",
                self.options.verifier_runs
            ))
        });

        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(hit) = cache.get(key).await {
                tracing::debug!(claim_chars = claim.len(), "validation cache hit");
                return Ok((*hit).clone());
            }
        }

        let prompt = prompts::claim_verification(source.final_url.as_str(), claim, &excerpt);
        let runs = self
            .run_verifier_panel(&prompt, self.options.verifier_runs)
            .await?;
        let summary = summarize_agreement(&runs, &self.options.agreement);

        let report = ValidationReport {
            kind: VALIDATE_REPORT_KIND.to_string(),
            created_at: Utc::now(),
            source: source_meta(source),
            claim: claim.to_string(),
            excerpt,
            runs,
            summary,
        };

        if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
            cache.insert(key, Arc::new(report.clone())).await;
        }

        Ok(report)
    }

    /// Extract claims from a source document and verify each with its own
    /// panel, then score the whole document with the rubric panel.
    pub async fn audit_source(&self, source: &ReadableText) -> Result<SourceAuditReport, PipelineError> {
        let model_text = head_chars(&source.text, MAX_MODEL_SOURCE_CHARS);

        let extraction_started = Instant::now();
        let extraction_text = self
            .client
            .complete_with_retry(&prompts::claim_extraction(
                source.final_url.as_str(),
                &source.title,
                &model_text,
                self.options.max_claims,
            ))
            .await?;
        let extraction_duration = elapsed_ms(extraction_started);

        let claims = parse_extracted_claims(
            parse_json_text(&extraction_text).as_ref(),
            self.options.max_claims,
        );
        tracing::info!(claims = claims.len(), "claim extraction finished");

        let excerpts: Vec<String> = claims
            .iter()
            .map(|claim| {
                select_relevant_excerpt(
                    &source.text,
                    &format!("{}\n{}", claim.claim, claim.quote),
                    EXCERPT_OPTIONS,
                )
            })
            .collect();

        // one bounded pass over every (claim, run) pair; panels are
        // regrouped afterwards
        let tasks: Vec<(usize, usize)> = (0..claims.len())
            .flat_map(|claim_index| {
                (0..self.options.verifier_runs).map(move |run_index| (claim_index, run_index))
            })
            .collect();

        let runs = map_concurrent(
            tasks,
            self.options.verifier_concurrency,
            |(claim_index, run_index), _| {
                let prompt = prompts::claim_verification(
                    source.final_url.as_str(),
                    &claims[claim_index].claim,
                    &excerpts[claim_index],
                );
                async move { (claim_index, self.verifier_run(run_index, &prompt).await) }
            },
        )
        .await?;

        let mut grouped: Vec<Vec<VerifierRun>> = vec![Vec::new(); claims.len()];
        for (claim_index, run) in runs {
            grouped[claim_index].push(run);
        }

        let verified: Vec<ClaimVerification> = claims
            .iter()
            .zip(excerpts.iter())
            .zip(grouped.into_iter())
            .map(|((claim, excerpt), mut panel)| {
                panel.sort_by_key(|run| run.run_index);
                let summary = summarize_agreement(&panel, &self.options.agreement);
                ClaimVerification {
                    claim: claim.claim.clone(),
                    quote: Some(claim.quote.clone()),
                    excerpt: Some(excerpt.clone()),
                    runs: panel,
                    summary,
                }
            })
            .collect();

        let rubric = self.run_rubric_panel(&model_text, &verified).await?;
        let summary = AuditRollup::from_claims(&verified);

        Ok(SourceAuditReport {
            kind: AUDIT_REPORT_KIND.to_string(),
            source: source_meta(source),
            extraction: ExtractionMeta {
                duration_ms: extraction_duration,
                raw_text: Some(truncate_chars(&extraction_text, MAX_RAW_TEXT_CHARS)),
                claims,
            },
            claims: verified,
            rubric: Some(rubric),
            summary,
        })
    }

    /// The seal-generation flow used by ingestion monitors: one panel over
    /// the item excerpt, consensus plus rationale agreement as evidence.
    pub async fn generate_seal(
        &self,
        source_url: &str,
        title: Option<&str>,
        excerpt: &str,
    ) -> Result<SealDraft, PipelineError> {
        let prompt = prompts::seal_generation(source_url, title, excerpt);
        let runs = self
            .run_verifier_panel(&prompt, self.options.verifier_runs)
            .await?;

        let summary = summarize_agreement(&runs, &self.options.agreement);
        let consensus = &summary.consensus;

        // representative rationale: the most confident run that voted with
        // the consensus, lowest index on ties
        let representative = runs
            .iter()
            .filter_map(|run| run.vote().map(|vote| (run.run_index, vote)))
            .filter(|(_, vote)| vote.verdict == consensus.consensus_verdict)
            .min_by(|(ia, a), (ib, b)| {
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(ia.cmp(ib))
            })
            .map(|(_, vote)| vote.rationale.clone());

        let verdict = consensus.consensus_verdict;
        let confidence = consensus.consensus_confidence;

        Ok(SealDraft {
            excerpt: excerpt.to_string(),
            verdict,
            confidence,
            summary: representative.unwrap_or_else(|| {
                "Unable to generate a seal from the provided excerpt (all verifier runs failed)."
                    .to_string()
            }),
            evidence: SealEvidence {
                consensus_score: summary.mean_rationale_cosine,
                runs,
            },
        })
    }

    /// Run one panel of redundant verifier calls over a single prompt.
    async fn run_verifier_panel(
        &self,
        prompt: &str,
        run_count: usize,
    ) -> Result<Vec<VerifierRun>, PipelineError> {
        let indices: Vec<usize> = (0..run_count).collect();
        map_concurrent(indices, self.options.verifier_concurrency, |run_index, _| {
            self.verifier_run(run_index, prompt)
        })
        .await
        .map_err(PipelineError::from)
    }

    /// One verifier invocation. Upstream and validation failures become an
    /// `ok: false` run; nothing escapes to siblings.
    async fn verifier_run(&self, run_index: usize, prompt: &str) -> VerifierRun {
        let started = Instant::now();

        match self.client.complete_with_retry(prompt).await {
            Ok(text) => {
                let duration_ms = elapsed_ms(started);
                let raw_text = Some(truncate_chars(&text, MAX_RAW_TEXT_CHARS));

                match parse_verifier_output(&text) {
                    Ok(parsed) => VerifierRun::verified(run_index, duration_ms, raw_text, parsed),
                    Err(err) => {
                        tracing::warn!(run_index, error = %err, "verifier output rejected");
                        VerifierRun::malformed(run_index, duration_ms, raw_text, err.to_string())
                    }
                }
            }
            Err(err) => {
                tracing::warn!(run_index, error = %err, "verifier call failed");
                VerifierRun::malformed(run_index, elapsed_ms(started), None, err.to_string())
            }
        }
    }

    /// Redundant rubric scoring over the whole document.
    async fn run_rubric_panel(
        &self,
        content: &str,
        claims: &[ClaimVerification],
    ) -> Result<RubricReport, PipelineError> {
        let prompt = prompts::rubric_scoring(content, claims);
        let started = Instant::now();

        let indices: Vec<usize> = (0..self.options.rubric_runs).collect();
        let runs = map_concurrent(indices, self.options.rubric_concurrency, |run_index, _| {
            let prompt = &prompt;
            async move {
                let run_started = Instant::now();
                match self.client.complete_with_retry(prompt).await {
                    Ok(text) => {
                        let duration_ms = elapsed_ms(run_started);
                        let raw_text = Some(truncate_chars(&text, MAX_RAW_TEXT_CHARS));
                        match parse_rubric_output(&text) {
                            Ok(parsed) => {
                                RubricRun::verified(run_index, duration_ms, raw_text, parsed)
                            }
                            Err(err) => {
                                tracing::warn!(run_index, error = %err, "rubric output rejected");
                                RubricRun::malformed(run_index, duration_ms, raw_text, err.to_string())
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!(run_index, error = %err, "rubric call failed");
                        RubricRun::malformed(run_index, elapsed_ms(run_started), None, err.to_string())
                    }
                }
            }
        })
        .await?;

        let summary = summarize_rubric_runs(&runs, &self.options.rubric);

        Ok(RubricReport {
            duration_ms: elapsed_ms(started),
            runs,
            summary,
        })
    }
}

/// Boundary between raw model text and the typed world: recover JSON, then
/// validate. The result is the tagged outcome aggregation operates on.
pub fn parse_verifier_output(text: &str) -> Result<VerificationParsed, ValidationError> {
    let value = parse_json_text(text).ok_or(ValidationError::UnparseableJson)?;
    VerificationParsed::from_value(&value)
}

/// Same boundary for rubric output, with shape normalization first.
pub fn parse_rubric_output(text: &str) -> Result<RubricParsed, ValidationError> {
    let value = parse_json_text(text).ok_or(ValidationError::UnparseableJson)?;
    RubricParsed::from_value(&normalize_rubric_value(&value))
}

/// Leniently read extracted claims out of a recovered JSON value.
///
/// Accepts a bare array or a `{claims: [...]}` wrapper; items may use
/// `claim`/`text` and `quote`/`evidence` field names. Claims are deduped
/// case-insensitively and capped.
pub fn parse_extracted_claims(value: Option<&Value>, max_claims: usize) -> Vec<SourceClaim> {
    let Some(value) = value else {
        return Vec::new();
    };

    let items = match value {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("claims") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    let mut seen: HashSet<String> = HashSet::new();
    let mut claims = Vec::new();

    for item in items {
        let Value::Object(map) = item else { continue };

        let claim = map
            .get("claim")
            .or_else(|| map.get("text"))
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        let quote = map
            .get("quote")
            .or_else(|| map.get("evidence"))
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();

        let claim_len = claim.chars().count();
        let quote_len = quote.chars().count();
        if claim_len < MIN_SOURCE_CLAIM_CHARS
            || claim_len > MAX_SOURCE_CLAIM_CHARS
            || quote_len < MIN_SOURCE_QUOTE_CHARS
            || quote_len > MAX_SOURCE_QUOTE_CHARS
        {
            continue;
        }

        if !seen.insert(claim.to_lowercase()) {
            continue;
        }

        claims.push(SourceClaim {
            claim: claim.to_string(),
            quote: quote.to_string(),
        });
        if claims.len() >= max_claims {
            break;
        }
    }

    claims
}

fn source_meta(source: &ReadableText) -> SourceMeta {
    SourceMeta {
        url: source.final_url.to_string(),
        title: source.title.clone(),
        fetched_at: source.fetched_at,
        text_sha256: sha256_hex(&source.text),
    }
}

fn head_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
