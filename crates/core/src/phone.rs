use phonenumber::{country, Mode};
use regex::Regex;
use thiserror::Error;

/// A validated phone number found inside free text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhoneMatch {
    /// Normalized `+<country><number>` form, no separators.
    pub e164: String,
    /// The input with the matched span removed and dangling separators
    /// trimmed; treated as a candidate display name by the lead flow.
    pub residual: String,
}

#[derive(Debug, Error)]
#[error("unknown phone region `{0}`")]
pub struct UnknownRegionError(pub String);

/// Finds and normalizes the first valid phone number in free text.
///
/// Candidate spans are located syntactically, then checked for real
/// numbering-plan validity under the default region. A digit string that is
/// merely phone-shaped is rejected; only the first valid match in reading
/// order is used.
#[derive(Clone, Debug)]
pub struct PhoneExtractor {
    region: country::Id,
    candidate: Regex,
}

impl PhoneExtractor {
    pub fn new(region: country::Id) -> Self {
        // Tolerates spacing, parentheses and dashes a human would still read
        // as a phone number. Validity is decided separately.
        let candidate = Regex::new(r"[+(]?\d[\d\s().-]{5,}\d").unwrap_or_else(|_| unreachable!());
        Self { region, candidate }
    }

    pub fn from_region_code(code: &str) -> Result<Self, UnknownRegionError> {
        let region = code
            .to_ascii_uppercase()
            .parse::<country::Id>()
            .map_err(|_| UnknownRegionError(code.to_string()))?;
        Ok(Self::new(region))
    }

    /// True if at least one valid phone number occurs anywhere in `text`.
    pub fn exists(&self, text: &str) -> bool {
        self.first_valid(text).is_some()
    }

    /// Locates the first valid number, normalized to E.164, plus the
    /// residual text with the matched span removed.
    pub fn extract(&self, text: &str) -> Option<PhoneMatch> {
        let (start, end, e164) = self.first_valid(text)?;
        let mut residual = String::with_capacity(text.len());
        residual.push_str(&text[..start]);
        residual.push_str(&text[end..]);
        Some(PhoneMatch { e164, residual: trim_residual(&residual).to_string() })
    }

    fn first_valid(&self, text: &str) -> Option<(usize, usize, String)> {
        for candidate in self.candidate.find_iter(text) {
            // A leading digit run (an order number, a quantity) can get
            // merged into the candidate span. When the whole span fails
            // validation, retry from each later digit-group boundary before
            // giving up on the span.
            for start in group_starts(text, candidate.start(), candidate.end()) {
                if let Ok(parsed) = phonenumber::parse(Some(self.region), &text[start..candidate.end()])
                {
                    if phonenumber::is_valid(&parsed) {
                        let e164 = parsed.format().mode(Mode::E164).to_string();
                        return Some((start, candidate.end(), e164));
                    }
                }
            }
        }
        None
    }
}

/// Start offsets of every digit group inside `text[start..end]`, in reading
/// order. A `+` or `(` immediately before a group belongs to it.
fn group_starts(text: &str, start: usize, end: usize) -> Vec<usize> {
    let bytes = text.as_bytes();
    let mut starts = Vec::new();
    let mut in_group = false;
    for index in start..end {
        if bytes[index].is_ascii_digit() {
            if !in_group {
                let group = if index > start && matches!(bytes[index - 1], b'+' | b'(') {
                    index - 1
                } else {
                    index
                };
                starts.push(group);
                in_group = true;
            }
        } else {
            in_group = false;
        }
    }
    starts
}

/// Strips whitespace plus the separators that typically surround a phone
/// number ("Ivan, <phone>" should leave just "Ivan").
fn trim_residual(residual: &str) -> &str {
    residual.trim_matches(|c: char| c.is_whitespace() || matches!(c, ',' | ':' | ';' | '-'))
}
