use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap()
});

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:https?://|www\.)\S+|\b(?:github\.com|linkedin\.com|gitlab\.com)/\S*").unwrap()
});

// Candidate only; a match needs at least MIN_PHONE_DIGITS digits to count.
static PHONE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\+?\(?\d[\d\s().-]{6,}\d").unwrap()
});

const MIN_PHONE_DIGITS: usize = 10;

pub const EMAIL_PLACEHOLDER: &str = "[email removed]";
pub const PHONE_PLACEHOLDER: &str = "[phone removed]";
pub const LINK_PLACEHOLDER: &str = "[link removed]";

/// Replaces e-mail addresses, links and phone numbers embedded in free text.
/// Returns the scrubbed text and the number of replacements.
pub fn scrub(text: &str) -> (String, usize) {
    let mut count = 0;

    let scrubbed = EMAIL_PATTERN.replace_all(text, |_: &Captures| {
        count += 1;
        EMAIL_PLACEHOLDER
    });

    let scrubbed = URL_PATTERN.replace_all(&scrubbed, |_: &Captures| {
        count += 1;
        LINK_PLACEHOLDER
    });

    // Year ranges such as "2018 - 2022" match the shape but not the digit count.
    let scrubbed = PHONE_PATTERN.replace_all(&scrubbed, |caps: &Captures| {
        let candidate = &caps[0];
        let digits = candidate.chars().filter(char::is_ascii_digit).count();
        if digits >= MIN_PHONE_DIGITS {
            count += 1;
            PHONE_PLACEHOLDER.to_string()
        } else {
            candidate.to_string()
        }
    });

    (scrubbed.into_owned(), count)
}
