//! Term list parsing for `keywords` and `focuses`.
//!
//! Trac stores both fields as free text. Some tickets separate terms with
//! commas, others with spaces, so the delimiter is picked per string.

/// Split a raw term string into trimmed terms.
///
/// Splits on `,` when the string contains a comma anywhere, otherwise on a
/// single space. Order is preserved and duplicates are kept. An empty input
/// yields one empty term, so callers check for emptiness first.
pub fn parse_terms(raw: &str) -> Vec<String> {
    let delimiter = if raw.contains(',') { ',' } else { ' ' };
    raw.split(delimiter).map(|t| t.trim().to_string()).collect()
}

/// Like [`parse_terms`], but an empty input yields no terms.
pub fn parse_terms_or_empty(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        Vec::new()
    } else {
        parse_terms(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comma_wins_over_space() {
        assert_eq!(
            parse_terms("has-patch, needs unit-tests,commit"),
            vec!["has-patch", "needs unit-tests", "commit"]
        );
    }

    #[test]
    fn leading_comma_still_splits_on_comma() {
        assert_eq!(parse_terms(",ui"), vec!["", "ui"]);
    }

    #[test]
    fn space_separated() {
        assert_eq!(
            parse_terms("has-patch needs-testing"),
            vec!["has-patch", "needs-testing"]
        );
    }

    #[test]
    fn single_term_is_trimmed() {
        assert_eq!(parse_terms("commit\t"), vec!["commit"]);
    }

    #[test]
    fn double_space_keeps_empty_piece() {
        assert_eq!(parse_terms("a  b"), vec!["a", "", "b"]);
    }

    #[test]
    fn duplicates_are_kept() {
        assert_eq!(parse_terms("ui ui"), vec!["ui", "ui"]);
    }

    #[test]
    fn empty_input() {
        assert_eq!(parse_terms(""), vec![""]);
        assert!(parse_terms_or_empty("").is_empty());
    }
}
