//! Text normalization for ingested and generated articles.
//!
//! Everything here is pure: HTML cleanup, truncation, excerpts, slugs,
//! keyword tags and the small display helpers used by the templates.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use sha2::{Digest, Sha256};

const ELLIPSIS: &str = "...";
const MAX_SLUG_LEN: usize = 60;
const WORDS_PER_MINUTE: usize = 200;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());
static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[a-z]{3,}\b").unwrap());
static IMG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<img[^>]+src\s*=\s*["']([^"'>]+)["']"#).unwrap());

/// Elements whose text never makes it into cleaned content.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "iframe", "noscript"];

const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "br", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "tr", "td", "th",
    "section", "article", "blockquote", "header", "footer", "figcaption", "pre",
];

pub const STOP_WORDS: &[&str] = &[
    "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by", "is", "are",
    "was", "were", "be", "been", "being", "have", "has", "had", "do", "does", "did", "will",
    "would", "shall", "should", "may", "might", "must", "can", "could", "a", "an", "this",
    "that", "these", "those", "i", "you", "he", "she", "it", "we", "they", "me", "him", "her",
    "us", "them", "my", "your", "his", "its", "our", "their", "mine", "yours", "hers", "ours",
    "theirs", "from", "into", "more", "also", "than", "then", "there", "which", "what", "when",
    "who", "not", "all", "any", "new", "said", "about", "after", "over", "read",
];

const SMALL_WORDS: &[&str] = &[
    "a", "an", "and", "as", "at", "but", "by", "for", "if", "in", "of", "on", "or", "the", "to",
    "with",
];

/// Convert an HTML fragment to plain text of at most `max_len` characters.
pub fn clean_html(html: &str, max_len: usize) -> String {
    if html.trim().is_empty() {
        return String::new();
    }

    let fragment = Html::parse_fragment(html);
    let mut raw = String::with_capacity(html.len());

    for node in fragment.root_element().descendants() {
        if let Some(element) = node.value().as_element() {
            if BLOCK_ELEMENTS.contains(&element.name()) {
                raw.push(' ');
            }
            continue;
        }
        if let Some(text) = node.value().as_text() {
            let skipped = node.ancestors().any(|ancestor| {
                ancestor
                    .value()
                    .as_element()
                    .map_or(false, |e| SKIPPED_ELEMENTS.contains(&e.name()))
            });
            if !skipped {
                raw.push_str(text);
            }
        }
    }

    // Feeds regularly double-encode entities ("&amp;amp;")
    let decoded = html_escape::decode_html_entities(&raw);
    let collapsed = collapse_whitespace(&decoded);
    truncate_chars(&collapsed, max_len)
}

/// Plain text as a single HTML paragraph. Markup in the text is escaped,
/// so stored feed content never renders as live HTML.
pub fn text_to_html(text: &str) -> String {
    format!("<p>{}</p>", html_escape::encode_text(text))
}

/// Remove tags without parsing; used where the input is known markup.
pub fn strip_tags(html: &str) -> String {
    let without_tags = TAG_RE.replace_all(html, " ");
    collapse_whitespace(&html_escape::decode_html_entities(&without_tags))
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to at most `max_len` characters, ellipsis included.
pub fn truncate_chars(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    if max_len <= ELLIPSIS.len() {
        return text.chars().take(max_len).collect();
    }
    let mut out: String = text.chars().take(max_len - ELLIPSIS.len()).collect();
    out.truncate(out.trim_end().len());
    out.push_str(ELLIPSIS);
    out
}

/// Shorten `text` to a preview of at most `max_len` characters.
///
/// Prefers ending on a sentence terminator in the second half of the window,
/// then on a word boundary past 70% of it, and only hard-cuts as a last resort.
pub fn make_excerpt(text: &str, max_len: usize) -> String {
    let text = text.trim();
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_len {
        return text.to_string();
    }
    if max_len <= ELLIPSIS.len() {
        return chars[..max_len].iter().collect();
    }

    let window = &chars[..max_len];
    let sentence_end = (0..max_len).rev().find(|&i| {
        matches!(window[i], '.' | '!' | '?')
            && chars.get(i + 1).map_or(true, |next| next.is_whitespace())
    });
    if let Some(end) = sentence_end {
        if end + 1 > max_len / 2 {
            return window[..=end].iter().collect();
        }
    }

    let budget = max_len - ELLIPSIS.len();
    let word_end = (0..budget).rev().find(|&i| chars[i].is_whitespace());
    let cut = match word_end {
        Some(i) if i * 10 > budget * 7 => i,
        _ => budget,
    };
    let mut out: String = chars[..cut].iter().collect();
    out.truncate(out.trim_end().len());
    out.push_str(ELLIPSIS);
    out
}

/// URL-safe slug: `[a-z0-9]` runs joined by single hyphens.
pub fn slugify(title: &str) -> String {
    let ascii = deunicode::deunicode(title).to_lowercase();
    let mut slug = String::with_capacity(ascii.len());
    let mut pending_dash = false;

    for c in ascii.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else if c != '\'' {
            pending_dash = true;
        }
    }

    if slug.len() > MAX_SLUG_LEN {
        slug.truncate(MAX_SLUG_LEN);
        while slug.ends_with('-') {
            slug.pop();
        }
    }

    if slug.is_empty() {
        "post".to_string()
    } else {
        slug
    }
}

/// First `len` hex characters of the SHA-256 of `input`.
pub fn short_hash(input: &str, len: usize) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(len);
    hex
}

/// Deterministic slug for an article from an external source. The same title
/// from the same source always yields the same slug, which is what ingestion
/// deduplicates on.
pub fn source_slug(title: &str, source_name: &str) -> String {
    format!(
        "{}-{}-{}",
        slugify(title),
        short_hash(source_name, 6),
        short_hash(title, 6)
    )
}

/// Most frequent non-stop-words, ties broken by first appearance.
pub fn extract_tags(text: &str, max_tags: usize) -> Vec<String> {
    let lowered = strip_tags(text).to_lowercase();
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();

    for (position, m) in WORD_RE.find_iter(&lowered).enumerate() {
        let word = m.as_str();
        if STOP_WORDS.contains(&word) {
            continue;
        }
        counts.entry(word).or_insert((0, position)).0 += 1;
    }

    let mut ranked: Vec<(&str, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked
        .into_iter()
        .take(max_tags)
        .map(|(word, _)| word.to_string())
        .collect()
}

/// Title case with small words kept lowercase except at either end.
pub fn optimize_title(title: &str) -> String {
    let words: Vec<&str> = title.split_whitespace().collect();
    let last = words.len().saturating_sub(1);

    words
        .iter()
        .enumerate()
        .map(|(i, word)| {
            let lower = word.to_lowercase();
            if i != 0 && i != last && SMALL_WORDS.contains(&lower.as_str()) {
                lower
            } else {
                capitalize(&lower)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Estimated reading time in minutes, never below one.
pub fn reading_time(text: &str) -> usize {
    let words = strip_tags(text).split_whitespace().count();
    words.div_ceil(WORDS_PER_MINUTE).max(1)
}

/// First `<img src>` in a block of HTML.
pub fn first_image_src(html: &str) -> Option<String> {
    IMG_RE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {} ago", unit)
    } else {
        format!("{} {}s ago", n, unit)
    }
}

/// Human relative time between a stored RFC 3339 timestamp and `now`.
pub fn time_ago(timestamp: &str, now: DateTime<Utc>) -> String {
    let then = match DateTime::parse_from_rfc3339(timestamp) {
        Ok(t) => t.with_timezone(&Utc),
        Err(_) => return "Recently".to_string(),
    };

    let diff = now.signed_duration_since(then);
    let days = diff.num_days();
    if days > 365 {
        plural(days / 365, "year")
    } else if days > 30 {
        plural(days / 30, "month")
    } else if days > 0 {
        plural(days, "day")
    } else if diff.num_hours() > 0 {
        plural(diff.num_hours(), "hour")
    } else if diff.num_minutes() > 0 {
        plural(diff.num_minutes(), "minute")
    } else {
        "Just now".to_string()
    }
}

/// Format a stored timestamp as "May 01, 2024".
pub fn format_date(timestamp: &str) -> String {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|t| t.format("%B %d, %Y").to_string())
        .unwrap_or_else(|_| timestamp.to_string())
}
