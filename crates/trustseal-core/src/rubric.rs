//! Rubric scoring: normalization, validation, and aggregation.
//!
//! A rubric run asks the model for a 0-100 quality score across four
//! categories. Models are sloppy about the shape (flat keys instead of a
//! `categories` object, `brand_safety` vs `brandSafety`, scores on a 0-1
//! scale), so the raw JSON is normalized before validation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{coerce_f64, string_list, ValidationError};

/// Aggregation knobs for rubric summaries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RubricConfig {
    /// Standard deviation that maps to full dispersion:
    /// `dispersion = min(1, stdev / scale)`.
    pub dispersion_stdev_scale: f64,
}

impl Default for RubricConfig {
    fn default() -> Self {
        Self {
            dispersion_stdev_scale: 25.0,
        }
    }
}

/// Category scores, each in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RubricCategories {
    pub factuality: f64,
    pub compliance: f64,
    pub brand_safety: f64,
    pub clarity: f64,
}

/// Validated output of one rubric run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RubricParsed {
    pub overall: f64,
    pub categories: RubricCategories,
    pub summary: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
}

/// One rubric invocation, parallel in structure to a verifier run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RubricRun {
    pub run_index: usize,
    pub ok: bool,
    pub duration_ms: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed: Option<RubricParsed>,
}

impl RubricRun {
    pub fn verified(
        run_index: usize,
        duration_ms: u64,
        raw_text: Option<String>,
        parsed: RubricParsed,
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

    fn score(&self) -> Option<&RubricParsed> {
        if self.ok {
            self.parsed.as_ref()
        } else {
            None
        }
    }
}

/// Mean scores across ok runs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RubricMeanScores {
    pub overall: f64,
    pub factuality: f64,
    pub compliance: f64,
    pub brand_safety: f64,
    pub clarity: f64,
}

/// Aggregate over a set of rubric runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RubricSummary {
    pub ok_runs: usize,
    pub mean_scores: RubricMeanScores,
    pub stdev_overall: f64,
    pub dispersion: f64,
    pub selected_run_index: Option<usize>,

    /// The representative run: the ok run whose overall score sits closest
    /// to the mean, ties going to the lowest run index.
    pub selected: Option<RubricParsed>,
}

/// Hoist flat category keys into a `categories` object and resolve the
/// `brand_safety`/`brandsafety` aliases. Values are untouched.
pub fn normalize_rubric_value(value: &Value) -> Value {
    let Value::Object(map) = value else {
        return value.clone();
    };

    let mut normalized = map.clone();

    match map.get("categories") {
        Some(Value::Object(categories)) => {
            let mut categories = categories.clone();
            if !categories.contains_key("brandSafety") {
                let alias = categories
                    .get("brand_safety")
                    .or_else(|| categories.get("brandsafety"))
                    .cloned();
                if let Some(alias) = alias {
                    categories.insert("brandSafety".to_string(), alias);
                }
            }
            normalized.insert("categories".to_string(), Value::Object(categories));
        }
        _ => {
            let mut categories = Map::new();
            for (target, aliases) in [
                ("factuality", vec!["factuality"]),
                ("compliance", vec!["compliance"]),
                ("brandSafety", vec!["brandSafety", "brand_safety", "brandsafety"]),
                ("clarity", vec!["clarity"]),
            ] {
                for alias in aliases {
                    if let Some(found) = map.get(alias) {
                        categories.insert(target.to_string(), found.clone());
                        break;
                    }
                }
            }

            if !categories.is_empty() {
                normalized.insert("categories".to_string(), Value::Object(categories));
            }
        }
    }

    Value::Object(normalized)
}

fn coerce_score_0_100(raw: &Value, field: &'static str) -> Result<f64, ValidationError> {
    let mut score =
        coerce_f64(raw).ok_or_else(|| ValidationError::invalid(field, "expected a number"))?;
    // scores reported on a 0-1 scale are re-expressed as percentages
    if (0.0..=1.0).contains(&score) {
        score *= 100.0;
    }
    Ok(score.clamp(0.0, 100.0))
}

impl RubricParsed {
    /// Validate a recovered JSON value into a rubric score.
    ///
    /// Callers should pass the value through [`normalize_rubric_value`]
    /// first; this function expects the canonical `categories` shape.
    pub fn from_value(value: &Value) -> Result<Self, ValidationError> {
        if !value.is_object() {
            return Err(ValidationError::NotObject);
        }

        let overall = coerce_score_0_100(
            value
                .get("overall")
                .ok_or(ValidationError::MissingField("overall"))?,
            "overall",
        )?;

        let categories_raw = value
            .get("categories")
            .ok_or(ValidationError::MissingField("categories"))?;
        if !categories_raw.is_object() {
            return Err(ValidationError::invalid("categories", "expected an object"));
        }

        let category = |field: &'static str| -> Result<f64, ValidationError> {
            coerce_score_0_100(
                categories_raw
                    .get(field)
                    .ok_or(ValidationError::MissingField(field))?,
                field,
            )
        };

        let categories = RubricCategories {
            factuality: category("factuality")?,
            compliance: category("compliance")?,
            brand_safety: category("brandSafety")?,
            clarity: category("clarity")?,
        };

        let summary = value
            .get("summary")
            .ok_or(ValidationError::MissingField("summary"))?
            .as_str()
            .ok_or_else(|| ValidationError::invalid("summary", "expected a string"))?
            .trim()
            .to_string();
        if summary.is_empty() || summary.chars().count() > 800 {
            return Err(ValidationError::invalid(
                "summary",
                "must be 1..=800 characters",
            ));
        }

        let issues = string_list(value, "issues", 12, 300)?;
        let recommendations = string_list(value, "recommendations", 12, 300)?;

        Ok(Self {
            overall,
            categories,
            summary,
            issues,
            recommendations,
        })
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn population_stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let avg = mean(values);
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Aggregate rubric runs into mean scores plus a representative run.
///
/// With zero ok runs all means are 0, dispersion is 1, and no run is
/// selected.
pub fn summarize_rubric_runs(runs: &[RubricRun], config: &RubricConfig) -> RubricSummary {
    let ok: Vec<&RubricRun> = runs.iter().filter(|run| run.score().is_some()).collect();

    let overalls: Vec<f64> = ok.iter().filter_map(|run| run.score()).map(|p| p.overall).collect();
    let mean_overall = mean(&overalls);
    let stdev_overall = population_stdev(&overalls);

    let dispersion = if ok.is_empty() {
        1.0
    } else {
        (stdev_overall / config.dispersion_stdev_scale).min(1.0)
    };

    let pick = |f: fn(&RubricCategories) -> f64| -> f64 {
        mean(
            &ok.iter()
                .filter_map(|run| run.score())
                .map(|p| f(&p.categories))
                .collect::<Vec<f64>>(),
        )
    };

    let mean_scores = RubricMeanScores {
        overall: mean_overall,
        factuality: pick(|c| c.factuality),
        compliance: pick(|c| c.compliance),
        brand_safety: pick(|c| c.brand_safety),
        clarity: pick(|c| c.clarity),
    };

    let selected_run = ok.iter().copied().reduce(|best, candidate| {
        let best_distance = (best.parsed.as_ref().map(|p| p.overall).unwrap_or(0.0) - mean_overall).abs();
        let candidate_distance =
            (candidate.parsed.as_ref().map(|p| p.overall).unwrap_or(0.0) - mean_overall).abs();

        if candidate_distance < best_distance {
            candidate
        } else if candidate_distance == best_distance && candidate.run_index < best.run_index {
            candidate
        } else {
            best
        }
    });

    RubricSummary {
        ok_runs: ok.len(),
        mean_scores,
        stdev_overall,
        dispersion,
        selected_run_index: selected_run.map(|run| run.run_index),
        selected: selected_run.and_then(|run| run.parsed.clone()),
    }
}
