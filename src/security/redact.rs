//! Masks secrets in text that ends up in logs, audit rows or alert mails.

use once_cell::sync::Lazy;
use regex::Regex;

static PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"[\w.+-]+@[\w-]+\.[\w.]+", "***@***.***"),
        (
            r#"(?i)(password['"]?\s*[:=]\s*)['"]?[^\s'",;]+['"]?"#,
            "${1}***",
        ),
        (r"(?i)(authorization:\s*\w+\s+)[\w.=+/-]+", "${1}***"),
        (
            r#"(?i)(api[_-]?key['"]?\s*[:=]\s*)['"]?[\w-]+['"]?"#,
            "${1}***",
        ),
        (r#"(?i)(token['"]?\s*[:=]\s*)['"]?[\w-]+['"]?"#, "${1}***"),
        (r#"(?i)(secret['"]?\s*[:=]\s*)['"]?[\w-]+['"]?"#, "${1}***"),
        (r"(?i)(bearer\s+)[\w.=+/-]+", "${1}***"),
        (r"gAAAAA[\w=+/-]{20,}", "gAAAAA***"),
    ]
    .into_iter()
    .map(|(p, r)| (Regex::new(p).expect("redaction regex"), r))
    .collect()
});

pub fn redact(text: &str) -> String {
    let mut out = text.to_string();
    for (re, rep) in PATTERNS.iter() {
        out = re.replace_all(&out, *rep).into_owned();
    }
    out
}

/// Cut to at most `max` chars, appending `...` when something was dropped.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push_str("...");
    out
}
