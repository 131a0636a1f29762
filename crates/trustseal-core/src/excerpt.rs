//! Query-relevant excerpt selection.
//!
//! Verifier prompts carry a bounded excerpt of the source document rather
//! than the whole text. Paragraphs are scored by the fraction of their
//! tokens that appear in the query, then greedily packed under the char and
//! paragraph caps. When nothing scores, the head of the document is used.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref PARAGRAPH_SPLIT_RE: Regex = Regex::new(r"\n{2,}").expect("paragraph regex");
}

/// Caps for excerpt packing.
#[derive(Debug, Clone, Copy)]
pub struct ExcerptOptions {
    pub max_chars: usize,
    pub max_paragraphs: usize,
}

impl Default for ExcerptOptions {
    fn default() -> Self {
        Self {
            max_chars: 3_500,
            max_paragraphs: 4,
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

/// Select the paragraphs of `full_text` most relevant to `query`.
pub fn select_relevant_excerpt(full_text: &str, query: &str, options: ExcerptOptions) -> String {
    let query_tokens: std::collections::HashSet<String> = tokenize(query).into_iter().collect();

    let paragraphs: Vec<&str> = PARAGRAPH_SPLIT_RE
        .split(full_text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    let mut scored: Vec<(f64, &str)> = paragraphs
        .iter()
        .map(|paragraph| {
            let tokens = tokenize(paragraph);
            let hits = tokens
                .iter()
                .filter(|token| query_tokens.contains(*token))
                .count();
            let score = if tokens.is_empty() {
                0.0
            } else {
                hits as f64 / tokens.len() as f64
            };
            (score, *paragraph)
        })
        .collect();

    // stable sort keeps document order among equally relevant paragraphs
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut selected: Vec<&str> = Vec::new();
    let mut used = 0usize;

    for (score, paragraph) in &scored {
        if *score <= 0.0 || selected.len() >= options.max_paragraphs {
            break;
        }

        let separator = if selected.is_empty() { 0 } else { 2 };
        let next_used = used + paragraph.chars().count() + separator;
        if next_used > options.max_chars {
            continue;
        }

        selected.push(paragraph);
        used = next_used;
    }

    let excerpt = if selected.is_empty() {
        full_text.chars().take(options.max_chars).collect::<String>()
    } else {
        selected.join("\n\n")
    };

    excerpt.chars().take(options.max_chars).collect()
}
