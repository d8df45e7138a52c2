use crate::codebook::Construct;
use crate::models::Row;

/// A system/user message pair for one (row, construct) decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Build the zero-shot prompt. The system message carries only this
/// construct's name and definition; the user message carries only this
/// row's diff text.
pub fn build_prompt(construct: &Construct, row: &Row) -> Prompt {
    let system = format!(
        "Please review the provided text and code it based on the construct: {name}. \
         The definition of this construct is: {definition} \
         After reviewing the text, assign a code of '1' if you believe the text exemplifies {name}, \
         or a '0' if it does not. Your response should only be '1' or '0'.",
        name = construct.name,
        definition = construct.definition,
    );

    Prompt {
        system,
        user: row.text.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codebook::Codebook;
    use crate::models::RowId;

    fn row(id: &str, text: &str) -> Row {
        Row {
            id: RowId::normalize(id).unwrap(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_system_names_construct_and_definition() {
        let construct = Construct::new("Operator", "Modification of an operator.");
        let prompt = build_prompt(&construct, &row("1", "- if a > b\n+ if a == b"));

        assert!(prompt.system.contains("construct: Operator."));
        assert!(prompt.system.contains("Modification of an operator."));
        assert!(prompt.system.contains("'1' or '0'"));
        assert_eq!(prompt.user, "- if a > b\n+ if a == b");
    }

    #[test]
    fn test_prompt_is_scoped_to_one_pair() {
        let codebook = Codebook::builtin();
        let target = codebook.get("Comment").unwrap();
        let prompt = build_prompt(target, &row("7", "+ // note"));

        for other in codebook.iter().filter(|c| c.name != target.name) {
            assert!(
                !prompt.system.contains(&other.definition),
                "system prompt leaked definition of {}",
                other.name
            );
        }
        assert!(!prompt.user.contains(&target.definition));
    }

    #[test]
    fn test_deterministic() {
        let construct = Construct::new("Testing", "Main function changes.");
        let r = row("3", "+ println!(\"x\");");
        assert_eq!(build_prompt(&construct, &r), build_prompt(&construct, &r));
    }
}
