//! The construct codebook: the fixed set of qualitative-coding categories a
//! code change is labeled against, with their definitions.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::config::ConstructConfig;
use crate::error::CodelabelError;

/// A named qualitative-coding category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Construct {
    pub name: String,
    pub definition: String,
}

impl Construct {
    pub fn new(name: impl Into<String>, definition: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            definition: definition.into(),
        }
    }
}

const BUILTIN: &[(&str, &str)] = &[
    ("If Header", "Modifications to the if condition/header."),
    (
        "If Body",
        "Modifications to the lines enabled by the if condition/header.",
    ),
    ("Function Return", "Modifications inside the return statement."),
    (
        "Function Body",
        "Modifications inside the body of the function. These modifications include adding more conditional statements, auxiliary variables, and others.",
    ),
    (
        "Comment",
        "A new commented line or a deletion or modification of an already existing comment.",
    ),
    (
        "Testing",
        "Modifications inside the Main function (section of the code used for testing), such as adding a line to print results in the console and testing the correct functioning of their code.",
    ),
    ("Added Lines", "Contains at least one completely new code line."),
    ("Removed Lines", "Student removed code lines in the submission."),
    (
        "Variable Usage & Assignment",
        "Student submission adds a new variable or deletes or modifies the value assignment of an already existing variable.",
    ),
    (
        "Variable-type Change",
        "A modification of the type of variable on its initial declaration.",
    ),
    (
        "Variable-type Conversion Change",
        "Modification in the conversion of the type of variable after its initial declaration or a conversion in the type of variable obtained after using an already existing method.",
    ),
    (
        "Value Change",
        "Modification of any value. It can be in the if header/condition, in the coefficient in an equation, or in the assignment of a variable.",
    ),
    (
        "Operator",
        "Modification of an operator, such as changing the \u{201c}greater than\u{201d} operator to \u{201c}equal to\u{201d} in a conditional statement.",
    ),
    (
        "Syntax Change",
        "A modification in the syntax of a code line to correct a compiler error.",
    ),
];

/// Ordered, immutable set of constructs for one run.
#[derive(Debug, Clone)]
pub struct Codebook {
    constructs: Vec<Construct>,
}

impl Codebook {
    /// The 14 constructs of the study, in study order.
    pub fn builtin() -> Self {
        Self {
            constructs: BUILTIN
                .iter()
                .map(|(name, definition)| Construct::new(*name, *definition))
                .collect(),
        }
    }

    /// Build a codebook from an explicit list. Names must be unique after
    /// canonicalization and definitions non-empty.
    pub fn new(constructs: Vec<Construct>) -> Result<Self, CodelabelError> {
        if constructs.is_empty() {
            return Err(CodelabelError::Codebook(
                "codebook must contain at least one construct".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for c in &constructs {
            let canon = canonical(&c.name);
            if canon.is_empty() {
                return Err(CodelabelError::Codebook(format!(
                    "construct name '{}' is empty after normalization",
                    c.name
                )));
            }
            if c.definition.trim().is_empty() {
                return Err(CodelabelError::Codebook(format!(
                    "construct '{}' has an empty definition",
                    c.name
                )));
            }
            if !seen.insert(canon) {
                return Err(CodelabelError::Codebook(format!(
                    "duplicate construct '{}'",
                    c.name
                )));
            }
        }

        Ok(Self { constructs })
    }

    /// The configured codebook, or the built-in one when none is configured.
    /// A configured but empty list is an error.
    pub fn from_config(entries: Option<&[ConstructConfig]>) -> Result<Self, CodelabelError> {
        let Some(entries) = entries else {
            return Ok(Self::builtin());
        };
        if entries.is_empty() {
            return Err(CodelabelError::Codebook(
                "constructs is configured but lists no construct".to_string(),
            ));
        }
        Self::new(
            entries
                .iter()
                .map(|e| Construct::new(e.name.trim(), e.definition.trim()))
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = &Construct> {
        self.constructs.iter()
    }

    pub fn len(&self) -> usize {
        self.constructs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructs.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Construct> {
        self.constructs.iter().find(|c| c.name == name)
    }

    /// Find the construct whose canonical name equals the canonical form of
    /// `column`. Exact match only.
    pub fn resolve(&self, column: &str) -> Option<&Construct> {
        let target = canonical(column);
        if target.is_empty() {
            return None;
        }
        self.constructs.iter().find(|c| canonical(&c.name) == target)
    }
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

fn disallowed_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9 ]").expect("valid regex"))
}

/// Canonical form of a construct or column name so that small variants
/// (`&` vs `and`, hyphens, case, punctuation, spacing) compare equal.
pub fn canonical(name: &str) -> String {
    let s = name.trim().to_lowercase();
    let s = s.replace('&', " and ").replace('-', " ");
    let s = whitespace_re().replace_all(&s, " ");
    let s = disallowed_re().replace_all(&s, "");
    s.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_has_fourteen_unique_constructs() {
        let codebook = Codebook::builtin();
        assert_eq!(codebook.len(), 14);
        let names: Vec<_> = codebook.iter().map(|c| c.name.clone()).collect();
        assert_eq!(names.first().map(String::as_str), Some("If Header"));
        assert_eq!(names.last().map(String::as_str), Some("Syntax Change"));
        // Built-in list must itself pass validation.
        assert!(Codebook::new(codebook.iter().cloned().collect()).is_ok());
    }

    #[test]
    fn test_canonical_variants() {
        assert_eq!(
            canonical("Variable Usage & Assignment"),
            "variable usage and assignment"
        );
        assert_eq!(
            canonical("variable usage and assignment"),
            canonical("Variable Usage & Assignment")
        );
        assert_eq!(canonical("Variable-type Change"), "variable type change");
        assert_eq!(canonical("  IF   header "), "if header");
        assert_eq!(canonical("Operator(s)!"), "operators");
        assert_eq!(canonical("!!!"), "");
    }

    #[test]
    fn test_resolve_matches_exact_canonical_only() {
        let codebook = Codebook::builtin();
        assert_eq!(
            codebook.resolve("variable_type change").map(|c| c.name.as_str()),
            None,
            "underscore is dropped, not turned into a space"
        );
        assert_eq!(
            codebook.resolve("VARIABLE-TYPE CHANGE").map(|c| c.name.as_str()),
            Some("Variable-type Change")
        );
        assert_eq!(
            codebook
                .resolve("Variable Usage and Assignment")
                .map(|c| c.name.as_str()),
            Some("Variable Usage & Assignment")
        );
        assert!(codebook.resolve("If Headr").is_none());
        assert!(codebook.resolve("").is_none());
    }

    #[test]
    fn test_duplicate_canonical_names_rejected() {
        let result = Codebook::new(vec![
            Construct::new("If Header", "a"),
            Construct::new("if-header", "b"),
        ]);
        assert!(matches!(result, Err(CodelabelError::Codebook(_))));
    }

    #[test]
    fn test_empty_codebook_rejected() {
        assert!(Codebook::new(Vec::new()).is_err());
    }

    #[test]
    fn test_from_config_falls_back_to_builtin() {
        let codebook = Codebook::from_config(None).unwrap();
        assert_eq!(codebook.len(), 14);

        let entries = vec![ConstructConfig {
            name: " Operator ".to_string(),
            definition: "Operator changed.".to_string(),
        }];
        let custom = Codebook::from_config(Some(entries.as_slice())).unwrap();
        assert_eq!(custom.len(), 1);
        assert_eq!(custom.get("Operator").unwrap().definition, "Operator changed.");
    }

    #[test]
    fn test_from_config_rejects_empty_list() {
        let result = Codebook::from_config(Some(Vec::new().as_slice()));
        assert!(matches!(result, Err(CodelabelError::Codebook(_))));
    }
}
