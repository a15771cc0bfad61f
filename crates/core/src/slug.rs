//! URL-safe slug tokens.

#![forbid(unsafe_code)]

use once_cell::sync::Lazy;
use regex::Regex;

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("static regex"));

/// Lowercase `input`, collapse every run of characters outside `[a-z0-9]`
/// into a single hyphen and trim hyphens from both ends.
pub fn slugify(input: &str) -> String {
    let lowered = input.to_lowercase();
    NON_ALNUM.replace_all(&lowered, "-").trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_and_trims() {
        assert_eq!(slugify("Deep Blue"), "deep-blue");
        assert_eq!(slugify("  --Navy / Gold!! "), "navy-gold");
        assert_eq!(slugify("XL"), "xl");
        assert_eq!(slugify("42.5 EU"), "42-5-eu");
    }

    #[test]
    fn empty_and_symbol_only_inputs() {
        assert_eq!(slugify(""), "");
        assert_eq!(slugify("***"), "");
    }

    #[test]
    fn non_ascii_letters_become_separators() {
        assert_eq!(slugify("Crème Brûlée"), "cr-me-br-l-e");
    }
}
