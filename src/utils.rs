use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

static SENTENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)([^.!?]+[.!?]+)|([^.!?]+$)").expect("sentence pattern"));
static FORBIDDEN_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[?\\"%*:|<>]"#).expect("filename pattern"));
static WITHOUT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"( [wW]\s?/\s?[oO0])").expect("without pattern"));
static WITH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"( [wW]\s?/)").expect("with pattern"));
static FRACTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s?/\s?(\d+)").expect("fraction pattern"));
static ALTERNATIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w+)\s?/\s?(\w+)").expect("alternative pattern"));
static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(https?://|www\.)\S+").expect("url pattern"));
static UNSPOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\^_~@;#:%—“”‘"*/{}\[\]()\\|<>=]"#).expect("symbol pattern"));
static NOT_ID_CHAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s-]").expect("id pattern"));

/// Longest title fragment used as an output file name.
pub const MAX_FILENAME_CHARS: usize = 200;

/// Groups sentences into chunks of at most `max_chars` (a single long sentence may exceed it).
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let sentences: Vec<&str> = SENTENCE
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .collect();
    if sentences.is_empty() {
        warn!("No sentence breaks found; returning whole text as one chunk");
        return vec![text.trim().to_string()];
    }
    let mut chunks = Vec::new();
    let mut current = String::new();
    for s in sentences {
        if current.is_empty() {
            current.push_str(s);
        } else if current.len() + 1 + s.len() <= max_chars {
            current.push(' ');
            current.push_str(s);
        } else {
            chunks.push(current);
            current = s.to_string();
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

pub fn wrap_text(s: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in s.split_whitespace() {
        if current.len() + word.len() + 1 > width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        } else {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Turns a thread title into something usable as a file name: drops characters that
/// filesystems reject and spells out slashes ("w/" -> "with", "1/2" -> "1 of 2").
pub fn name_normalize(name: &str) -> String {
    let name = FORBIDDEN_FILENAME_CHARS.replace_all(name, "");
    let name = WITHOUT.replace_all(&name, " without");
    let name = WITH.replace_all(&name, " with");
    let name = FRACTION.replace_all(&name, "$1 of $2");
    let name = ALTERNATIVE.replace_all(&name, "$1 or $2");
    name.replace('/', "")
}

/// `name_normalize` cut to [`MAX_FILENAME_CHARS`] characters. Titles with nothing
/// usable left fall back to the sanitized `id`.
pub fn output_file_stem(title: &str, id: &str) -> String {
    let stem = name_normalize(title)
        .chars()
        .take(MAX_FILENAME_CHARS)
        .collect::<String>()
        .trim()
        .to_string();
    if stem.is_empty() { sanitize_id(id) } else { stem }
}

/// Prepares text for a voice: drops links and markup symbols, spells out `&` and `+`
/// and collapses whitespace.
pub fn sanitize_text(text: &str) -> String {
    let text = URL.replace_all(text, " ");
    let text = text.replace('&', " and ").replace('+', " plus ");
    let text = UNSPOKEN.replace_all(&text, " ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Filesystem-safe run id derived from a thread id.
pub fn sanitize_id(id: &str) -> String {
    NOT_ID_CHAR.replace_all(id, "").into_owned()
}
