use regex::Regex;

/// Strips citation-style bracket annotations from assistant answers.
///
/// The assistant is prompted to emit `[...]` annotations; only hyperlinks are
/// meaningful to the end user, so a span survives only when its content
/// starts with `http://` or `https://` (case-insensitive). Everything else is
/// deleted, brackets included. Matching is shortest-span, left to right,
/// non-overlapping, which also handles nested and adjacent brackets.
#[derive(Clone, Debug)]
pub struct ResponseSanitizer {
    bracket: Regex,
}

impl Default for ResponseSanitizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseSanitizer {
    pub fn new() -> Self {
        // `[^\]]*` never crosses a closing bracket, so each match is the
        // shortest span starting at its opening bracket.
        Self { bracket: Regex::new(r"\[([^\]]*)\]").unwrap_or_else(|_| unreachable!()) }
    }

    pub fn clean(&self, text: &str) -> String {
        self.bracket
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let content = &caps[1];
                if is_hyperlink(content) {
                    caps[0].to_string()
                } else {
                    String::new()
                }
            })
            .into_owned()
    }
}

fn is_hyperlink(content: &str) -> bool {
    let lower = content.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}
