//! Prompt builders for the completion backend.
//!
//! Every prompt demands strict JSON and restates the schema inline; the
//! recovery parser exists for the times the model ignores that anyway.

use trustseal_core::ClaimVerification;

/// Ask for atomic, quote-backed factual claims from a source document.
pub fn claim_extraction(source_url: &str, title: &str, text: &str, max_claims: usize) -> String {
    let max_claims_line = format!("MAX_CLAIMS: {max_claims}");
    let source_line = format!("SOURCE_URL: {source_url}");
    let title_line = format!("SOURCE_TITLE: {title}");

    [
        "You are a deterministic claim-extraction engine for a validator utility.",
        "Extract AT MOST the requested number of atomic, checkable factual claims that are explicitly stated in the SOURCE TEXT.",
        "Each claim MUST be directly supported by a verbatim quote from the SOURCE TEXT.",
        "",
        "Return STRICT JSON ONLY (no markdown, no commentary).",
        r#"Schema: {"claims":[{"claim":"string","quote":"string"}]}"#,
        "",
        max_claims_line.as_str(),
        source_line.as_str(),
        title_line.as_str(),
        "",
        "SOURCE_TEXT (verbatim; may be truncated):",
        text,
    ]
    .join("\n")
}

/// Ask whether a claim is supported by an excerpt.
pub fn claim_verification(source_url: &str, claim: &str, excerpt: &str) -> String {
    let source_line = format!("SOURCE_URL: {source_url}");

    [
        "You are a validator scoring whether a CLAIM is supported by the provided SOURCE_EXCERPT.",
        "Return STRICT JSON ONLY (no markdown).",
        r#"Schema: {"verdict":"supported"|"unsupported"|"unclear","confidence":0-1,"score":0-10,"rationale":"string","evidence":["string"]}"#,
        "",
        "Rubric:",
        r#"- verdict "supported": excerpt clearly supports the claim."#,
        r#"- verdict "unsupported": excerpt clearly contradicts the claim."#,
        r#"- verdict "unclear": excerpt does not contain enough evidence to decide."#,
        "",
        "Rules:",
        "- Only use information inside SOURCE_EXCERPT.",
        "- Evidence MUST be short verbatim quotes from SOURCE_EXCERPT.",
        "- Do not invent citations or pretend to have checked external sources.",
        "",
        source_line.as_str(),
        "",
        "CLAIM:",
        claim,
        "",
        "SOURCE_EXCERPT:",
        excerpt,
    ]
    .join("\n")
}

/// Ask for a conservative trust signal over a monitored feed item.
pub fn seal_generation(source_url: &str, title: Option<&str>, excerpt: &str) -> String {
    let title = match title {
        Some(t) if !t.trim().is_empty() => t.trim(),
        _ => "(none)",
    };
    let source_line = format!("SOURCE_URL: {source_url}");
    let title_line = format!("TITLE: {title}");

    [
        "You are a monitoring verifier. Return STRICT JSON only (no markdown).",
        "",
        "Task:",
        "Given the source excerpt, judge whether its central factual content is trustworthy for audiences.",
        "",
        "Schema:",
        r#"{"verdict":"supported"|"unsupported"|"unclear","confidence":0-1,"rationale":"string","evidence":["string"]}"#,
        "",
        "Verdict rubric:",
        r#"- "supported": the excerpt's factual content is plausible and internally consistent."#,
        r#"- "unsupported": the excerpt contains clearly false or misleading factual content."#,
        r#"- "unclear": insufficient context to decide; be conservative when unsure."#,
        "",
        "Rules:",
        "- Only use the excerpt below; do not claim to have verified external sources.",
        "- Evidence MUST be short verbatim quotes from the excerpt.",
        "",
        source_line.as_str(),
        title_line.as_str(),
        "",
        "EXCERPT:",
        excerpt,
    ]
    .join("\n")
}

/// Ask for the 0-100 multi-category quality rubric over a document, given
/// the consensus already reached on its claims.
pub fn rubric_scoring(content: &str, claims: &[ClaimVerification]) -> String {
    let claim_preview = claims
        .iter()
        .take(18)
        .map(|claim| {
            format!(
                "- {} (verdict: {}, confidence: {:.2})",
                claim.claim,
                claim.summary.consensus.consensus_verdict,
                claim.summary.consensus.consensus_confidence
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let claims_block = if claim_preview.is_empty() {
        "(none)"
    } else {
        claim_preview.as_str()
    };

    [
        "You are a scoring judge for content risk and quality.",
        "Return ONLY valid JSON (no markdown, no code fences, no commentary).",
        r#"Schema: {"overall":0-100,"categories":{"factuality":0-100,"compliance":0-100,"brandSafety":0-100,"clarity":0-100},"summary":"string","issues":["string"],"recommendations":["string"]}"#,
        "Scoring guidance:",
        "- Higher is better. Start at 100 and subtract for issues and uncertainty.",
        "- Factuality: penalize unverifiable, too-specific, or likely-false claims.",
        "- Compliance: penalize missing disclosure, medical/financial advice, or risky promises.",
        "- BrandSafety: penalize hate/harassment, adult content, violence, scams, illegal activity, or unsafe instructions.",
        "- Clarity: penalize confusing or misleading wording; reward clear disclaimers and specificity.",
        "Rules:",
        "- Do not invent citations or pretend to have checked external sources.",
        "- issues/recommendations must be concrete and actionable (max 12 each).",
        "",
        "CONTENT:",
        content,
        "",
        "CLAIMS (with redundant verifier consensus):",
        claims_block,
    ]
    .join("\n")
}
