//! Removes personal identifiers from report text before it is handed to the generator.
//!
//! Three rewrites run in a fixed order, each over the output of the previous one:
//! honorific + full name, then `First M. Last`, then a capitalised possessive.

use regex::Regex;
use std::sync::LazyLock;

/// Neutral phrase substituted for a detected name.
pub const NAME_REPLACEMENT: &str = "the patient";
/// Substituted for a capitalised word carrying a possessive `'s`.
pub const POSSESSIVE_REPLACEMENT: &str = "your";

// Name words stay on one line so a heading on the next line is never swallowed.
static HONORIFIC_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?i:mr|mrs|ms|dr)\.[^\S\r\n]+[A-Z][a-z]+(?:[^\S\r\n]+[A-Z]\.)?(?:[^\S\r\n]+[A-Z][a-z]+)+")
        .expect("honorific pattern is valid")
});

static NAME_WITH_INITIAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z][a-z]+[^\S\r\n]+[A-Z]\.[^\S\r\n]+[A-Z][a-z]+")
        .expect("name-with-initial pattern is valid")
});

static CAPITALISED_POSSESSIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z][a-z]+['’]s\b").expect("possessive pattern is valid")
});

pub fn redact(text: &str) -> String {
    let text = HONORIFIC_NAME.replace_all(text, NAME_REPLACEMENT);
    let text = NAME_WITH_INITIAL.replace_all(&text, NAME_REPLACEMENT);
    CAPITALISED_POSSESSIVE
        .replace_all(&text, POSSESSIVE_REPLACEMENT)
        .into_owned()
}
