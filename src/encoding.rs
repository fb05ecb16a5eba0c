//! Degraded text handling for the re-encoding retry.
//!
//! Text that the index rejected is rewritten into a conservative form:
//! control characters other than tab, newline and carriage return are
//! dropped, Unicode noncharacters and replacement characters left over from
//! lossy decoding are removed, and private-use code points become `?`.

/// Rewrite free text into a form the index accepts.
pub fn reencode(text: &str) -> String {
    text.chars().filter_map(reencode_char).collect()
}

/// Apply [`reencode`] only when `enabled` is set.
pub fn maybe_reencode(text: &str, enabled: bool) -> String {
    if enabled {
        reencode(text)
    } else {
        text.to_string()
    }
}

fn reencode_char(c: char) -> Option<char> {
    match c {
        '\t' | '\n' | '\r' => Some(c),
        c if c.is_control() => None,
        '\u{FFFD}' => None,
        c if is_noncharacter(c) => None,
        '\u{E000}'..='\u{F8FF}' | '\u{F0000}'..='\u{10FFFF}' => Some('?'),
        c => Some(c),
    }
}

fn is_noncharacter(c: char) -> bool {
    let cp = c as u32;
    (0xFDD0..=0xFDEF).contains(&cp) || (cp & 0xFFFE) == 0xFFFE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_untouched() {
        let text = "Fix the \"Add New\" screen\n\twith ümlauts and 日本語";
        assert_eq!(reencode(text), text);
    }

    #[test]
    fn control_characters_are_dropped() {
        assert_eq!(reencode("a\u{0}b\u{1b}c\u{7f}"), "abc");
    }

    #[test]
    fn lossy_leftovers_are_dropped() {
        assert_eq!(reencode("caf\u{FFFD}\u{FFFF}\u{FDD0}e"), "cafe");
    }

    #[test]
    fn private_use_becomes_question_mark() {
        assert_eq!(reencode("x\u{E000}y"), "x?y");
    }

    #[test]
    fn disabled_is_identity() {
        assert_eq!(maybe_reencode("a\u{0}b", false), "a\u{0}b");
    }
}
