//! `dockhand classify`

use colored::Colorize;

use crate::router::{classify, split_prefix, Classification};

/// One-line, colored description of where `command` would be routed.
pub fn describe(command: &str) -> String {
    match classify(command) {
        Classification::Prefixed(prefix) => {
            let rest = split_prefix(command).map(|(_, rest)| rest).unwrap_or("");
            format!(
                "{} {} handler, argument: {:?}",
                "prefixed".cyan(),
                prefix.as_str().bold(),
                rest
            )
        }
        Classification::ShellLike => format!("{} runs verbatim in the project", "shell".green()),
        Classification::NaturalLanguage => {
            format!("{} goes to the assistant", "natural language".yellow())
        }
    }
}

/// Print the classification of the joined words.
///
/// With `json`, prints the classification as a JSON object instead.
pub fn run_classify(words: &[String], json: bool) -> crate::error::Result<()> {
    let command = words.join(" ");
    if json {
        println!("{}", serde_json::to_string(&classify(&command))?);
    } else {
        println!("{}", describe(&command));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_names_the_route() {
        colored::control::set_override(false);
        assert_eq!(describe("git status"), "shell runs verbatim in the project");
        assert_eq!(
            describe("file:read a.txt"),
            "prefixed file: handler, argument: \"read a.txt\""
        );
        assert!(describe("explain the build").starts_with("natural language"));
    }
}
