//! Incident type derivation from free-text descriptions.

use std::sync::LazyLock;

use regex::Regex;

static DIGITS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").unwrap_or_else(|_| unreachable!()));

static EDGE_PUNCTUATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\p{L}\p{N}]+|[^\p{L}\p{N}]+$").unwrap_or_else(|_| unreachable!())
});

/// Derives an incident type from a feed description.
///
/// Digits are removed, then the first whitespace-delimited word is taken
/// with leading and trailing punctuation stripped. When nothing is left the
/// service name is used instead.
#[must_use]
pub fn derive_type(description: &str, service: &str) -> String {
    let without_digits = DIGITS_RE.replace_all(description.trim(), "");
    without_digits
        .split_whitespace()
        .next()
        .map(|word| EDGE_PUNCTUATION_RE.replace_all(word, ""))
        .filter(|word| !word.is_empty())
        .map_or_else(|| service.to_string(), |word| word.into_owned())
}
