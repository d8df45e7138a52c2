//! Binary verdict parsing for model responses.
//!
//! The mapping from response text to a label is an explicit allow-list so the
//! evaluation stays auditable: anything outside the list is `Unresolved`.

use serde::{Deserialize, Serialize};

/// Tokens accepted as "construct present".
pub const PRESENT_TOKENS: &[&str] = &["1", "yes", "true", "present"];

/// Tokens accepted as "construct absent".
pub const ABSENT_TOKENS: &[&str] = &["0", "no", "false", "absent"];

/// Leading markers a model sometimes echoes back before the verdict.
const ANSWER_PREFIXES: &[&str] = &["answer:", "label:", "code:"];

/// A model (or human) verdict for one (row, construct) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Absent,
    Present,
    /// The response could not be mapped to a binary decision.
    Unresolved,
}

impl Label {
    /// `Some(0 | 1)` for resolved labels.
    pub fn as_binary(self) -> Option<u8> {
        match self {
            Label::Absent => Some(0),
            Label::Present => Some(1),
            Label::Unresolved => None,
        }
    }

    pub fn from_binary(value: u8) -> Option<Self> {
        match value {
            0 => Some(Label::Absent),
            1 => Some(Label::Present),
            _ => None,
        }
    }

    pub fn is_resolved(self) -> bool {
        self != Label::Unresolved
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Label::Absent => "0",
            Label::Present => "1",
            Label::Unresolved => "unresolved",
        }
    }
}

fn is_wrapper(c: char) -> bool {
    c.is_whitespace()
        || matches!(
            c,
            '"' | '\'' | '`' | '(' | ')' | '[' | ']' | '{' | '}' | '*' | '.' | ',' | '!' | ';' | ':'
        )
}

/// Map raw response text to a label.
pub fn parse_label(text: &str) -> Label {
    let lowered = text.trim().to_lowercase();
    let mut token = lowered.as_str();

    for prefix in ANSWER_PREFIXES {
        if let Some(rest) = token.strip_prefix(prefix) {
            token = rest;
            break;
        }
    }

    let token = token.trim_matches(is_wrapper);

    if PRESENT_TOKENS.contains(&token) {
        Label::Present
    } else if ABSENT_TOKENS.contains(&token) {
        Label::Absent
    } else {
        Label::Unresolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_digits() {
        assert_eq!(parse_label("1"), Label::Present);
        assert_eq!(parse_label("0"), Label::Absent);
    }

    #[test]
    fn test_incidental_formatting_is_tolerated() {
        assert_eq!(parse_label("Yes."), Label::Present);
        assert_eq!(parse_label("  NO  "), Label::Absent);
        assert_eq!(parse_label("'1'"), Label::Present);
        assert_eq!(parse_label("\"0\"\n"), Label::Absent);
        assert_eq!(parse_label("**1**"), Label::Present);
        assert_eq!(parse_label("`0`"), Label::Absent);
        assert_eq!(parse_label("True!"), Label::Present);
    }

    #[test]
    fn test_answer_prefix_is_stripped() {
        assert_eq!(parse_label("Answer: 1"), Label::Present);
        assert_eq!(parse_label("label: no"), Label::Absent);
    }

    #[test]
    fn test_ambiguous_text_is_unresolved() {
        assert_eq!(parse_label("I'm not sure"), Label::Unresolved);
        assert_eq!(parse_label(""), Label::Unresolved);
        assert_eq!(parse_label("1 or 0"), Label::Unresolved);
        assert_eq!(parse_label("Yes, it does"), Label::Unresolved);
        assert_eq!(parse_label("10"), Label::Unresolved);
        assert_eq!(parse_label("maybe"), Label::Unresolved);
    }

    #[test]
    fn test_no_substring_matching() {
        // A verdict buried in prose must not be picked out.
        assert_eq!(
            parse_label("The answer is 1 because the if header changed"),
            Label::Unresolved
        );
    }

    #[test]
    fn test_binary_round_trip() {
        assert_eq!(Label::Present.as_binary(), Some(1));
        assert_eq!(Label::Absent.as_binary(), Some(0));
        assert_eq!(Label::Unresolved.as_binary(), None);
        assert_eq!(Label::from_binary(1), Some(Label::Present));
        assert_eq!(Label::from_binary(2), None);
    }

    #[test]
    fn test_label_serializes_snake_case() {
        let json = serde_json::to_string(&Label::Unresolved).unwrap();
        assert_eq!(json, "\"unresolved\"");
    }
}
