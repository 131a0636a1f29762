//! Text reduction helpers: HTML to readable text, entity decoding,
//! char-safe truncation.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref ENTITY_RE: Regex =
        Regex::new(r"(?i)&(#x[0-9a-f]+|#\d+|[a-z]+);").expect("entity regex");
    static ref COMMENT_RE: Regex = Regex::new(r"(?s)<!--.*?-->").expect("comment regex");
    static ref OPAQUE_TAG_RES: Vec<Regex> = ["script", "style", "noscript", "svg", "canvas", "iframe"]
        .iter()
        .map(|tag| {
            Regex::new(&format!(r"(?is)<{tag}[^>]*>.*?</{tag}>")).expect("opaque tag regex")
        })
        .collect();
    static ref BR_RE: Regex = Regex::new(r"(?i)<br\s*/?>").expect("br regex");
    static ref BLOCK_CLOSE_RE: Regex =
        Regex::new(r"(?i)</(p|div|section|article|header|footer|li|h[1-6])>").expect("block regex");
    static ref TAG_RE: Regex = Regex::new(r"<[^>]+>").expect("tag regex");
    static ref TITLE_RE: Regex = Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title regex");
    static ref SPACES_RE: Regex = Regex::new("[ \u{00A0}]+").expect("spaces regex");
    static ref BLANK_LINES_RE: Regex = Regex::new(r"\n{3,}").expect("blank lines regex");
}

/// Truncate to at most `max_chars` characters, appending an ellipsis when
/// anything was cut. Always lands on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('\u{2026}');
    out
}

fn decode_entities(input: &str) -> String {
    ENTITY_RE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let entity = caps[1].to_lowercase();

            if let Some(hex) = entity.strip_prefix("#x") {
                if let Ok(code) = u32::from_str_radix(hex, 16) {
                    if let Some(ch) = char::from_u32(code) {
                        return ch.to_string();
                    }
                }
                return caps[0].to_string();
            }

            if let Some(dec) = entity.strip_prefix('#') {
                if let Ok(code) = dec.parse::<u32>() {
                    if let Some(ch) = char::from_u32(code) {
                        return ch.to_string();
                    }
                }
                return caps[0].to_string();
            }

            match entity.as_str() {
                "amp" => "&".to_string(),
                "lt" => "<".to_string(),
                "gt" => ">".to_string(),
                "quot" => "\"".to_string(),
                "apos" => "'".to_string(),
                "nbsp" => " ".to_string(),
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn normalize_text(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\t', " ");
    let text = SPACES_RE.replace_all(&text, " ");
    let text = BLANK_LINES_RE.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Pull the document title out of raw HTML.
pub fn extract_title(html: &str) -> Option<String> {
    let captured = TITLE_RE.captures(html)?.get(1)?;
    let title = normalize_text(&decode_entities(captured.as_str()));
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

/// Reduce an HTML document to readable text.
///
/// Script-like elements and comments are dropped entirely, block-level
/// closers become paragraph breaks, remaining tags become spaces, and
/// entities are decoded.
pub fn strip_html_to_text(html: &str) -> String {
    let mut out = COMMENT_RE.replace_all(html, " ").into_owned();

    for re in OPAQUE_TAG_RES.iter() {
        out = re.replace_all(&out, " ").into_owned();
    }

    out = BR_RE.replace_all(&out, "\n").into_owned();
    out = BLOCK_CLOSE_RE.replace_all(&out, "\n\n").into_owned();
    out = TAG_RE.replace_all(&out, " ").into_owned();
    out = decode_entities(&out);

    normalize_text(&out)
}
