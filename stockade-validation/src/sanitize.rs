//! Output-side cleaning applied to values that passed validation.

use crate::patterns::dangerous_code_point;
use unicode_normalization::UnicodeNormalization;

/// Produce the sanitized form of a validated value.
///
/// Null bytes are stripped, the text is NFC-normalized (or projected to
/// ASCII when unicode is disallowed), and dangerous code points are removed
/// once more after normalization so composition can never re-introduce a
/// flagged character. The function is idempotent: sanitizing a sanitized
/// value returns it unchanged.
pub fn sanitize_value(value: &str, allow_unicode: bool) -> String {
    let stripped: String = value.chars().filter(|c| *c != '\u{0}').collect();
    let normalized: String = if allow_unicode {
        stripped.nfc().collect()
    } else {
        stripped.chars().filter(char::is_ascii).collect()
    };
    normalized
        .chars()
        .filter(|c| dangerous_code_point(*c).is_none())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn strips_null_bytes() {
        assert_eq!(sanitize_value("a\u{0}b\u{0}c", true), "abc");
    }

    #[test]
    fn normalizes_to_composed_form() {
        // 'e' followed by combining acute composes to a single code point
        let decomposed = "cafe\u{0301}";
        assert_eq!(sanitize_value(decomposed, true), "café");
    }

    #[test]
    fn removes_dangerous_code_points_after_normalization() {
        let input = "safe\u{202E}name\u{200B}";
        assert_eq!(sanitize_value(input, true), "safename");
    }

    #[test]
    fn ascii_projection_drops_non_ascii() {
        assert_eq!(sanitize_value("héllo wörld", false), "hllo wrld");
    }

    #[test]
    fn sanitization_is_a_fixed_point() {
        for input in ["plain text", "cafe\u{0301}", "a\u{0}b", "mixed\u{200D}é"] {
            let once = sanitize_value(input, true);
            let twice = sanitize_value(&once, true);
            assert_eq!(once, twice);
        }
    }
}
