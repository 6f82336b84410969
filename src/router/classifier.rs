//! Command classification
//!
//! [`classify`] decides, without side effects, whether a client's command is
//! a structured prefix command, something to run in a shell, or a request
//! for the AI assistant. It is total and deterministic.

use serde::Serialize;

/// Structured command prefixes, matched case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Prefix {
    /// `code:` runs the rest as a shell command
    Code,
    /// `file:` reads, lists, writes or deletes files
    File,
    /// `git:` runs a git subcommand
    Git,
    /// `info:` prints environment diagnostics
    Info,
    /// `help:` or a bare `help`
    Help,
}

impl Prefix {
    /// Every prefix, in match order.
    pub const ALL: [Prefix; 5] = [
        Prefix::Code,
        Prefix::File,
        Prefix::Git,
        Prefix::Info,
        Prefix::Help,
    ];

    /// Literal prefix text including the colon.
    pub fn as_str(&self) -> &'static str {
        match self {
            Prefix::Code => "code:",
            Prefix::File => "file:",
            Prefix::Git => "git:",
            Prefix::Info => "info:",
            Prefix::Help => "help:",
        }
    }
}

/// Outcome of classifying a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "prefix", rename_all = "snake_case")]
pub enum Classification {
    /// Starts with a structured prefix
    Prefixed(Prefix),
    /// Looks like a shell command
    ShellLike,
    /// Should go to the AI assistant
    NaturalLanguage,
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::Prefixed(p) => write!(f, "prefixed ({})", p.as_str()),
            Classification::ShellLike => f.write_str("shell"),
            Classification::NaturalLanguage => f.write_str("natural language"),
        }
    }
}

/// Executables whose name as the first word marks a shell command.
///
/// English words that are also commands but usually start a sentence
/// (`help`, `test`) are left out.
const SHELL_COMMANDS: &[&str] = &[
    // shell builtins and coreutils
    "ls", "cd", "pwd", "cat", "echo", "printf", "grep", "egrep", "rg", "find", "fd", "awk", "sed",
    "sort", "uniq", "wc", "head", "tail", "cut", "tr", "xargs", "tee", "diff", "mkdir", "rmdir",
    "rm", "cp", "mv", "chmod", "chown", "chgrp", "ln", "touch", "file", "stat", "which", "whereis",
    "type", "ps", "top", "htop", "kill", "killall", "jobs", "bg", "fg", "nohup", "screen", "tmux",
    "tar", "gzip", "gunzip", "zip", "unzip", "curl", "wget", "ssh", "scp", "rsync", "ping",
    "source", "export", "alias", "unset", "history", "man", "info", "date", "sleep", "true",
    "false", "tree", "less", "more", "clear", "whoami", "id", "hostname", "uptime",
    // interpreters and compilers
    "python", "python3", "node", "deno", "bun", "go", "cargo", "rustc", "rustup", "gcc", "g++",
    "clang", "java", "javac", "ruby", "php", "perl", "bash", "zsh", "sh", "fish",
    // package managers
    "npm", "npx", "yarn", "pnpm", "pip", "pip3", "pipx", "poetry", "uv", "gem", "bundle",
    "composer", "apt", "apt-get", "brew",
    // version control
    "git", "gh", "svn", "hg",
    // containers and orchestration
    "docker", "docker-compose", "podman", "kubectl", "helm", "terraform", "ansible",
    // build and test tools
    "make", "cmake", "ninja", "bazel", "gradle", "mvn", "ant", "pytest", "jest", "tsc",
    // system
    "sudo", "su", "systemctl", "service", "crontab", "mount", "umount", "df", "du", "free",
    "uname", "env", "lsof", "netstat",
    // editors
    "vim", "vi", "nano", "emacs",
];

/// Two-word prefixes that are tool invocations even in sentence-like input.
const COMBINED_COMMANDS: &[&str] = &[
    "npm install", "npm run", "npm start", "npm test", "npm build", "git clone", "git add",
    "git commit", "git push", "git pull", "git checkout", "git branch", "docker run",
    "docker build", "docker exec", "docker ps", "docker images", "docker compose", "python -m",
    "node -e", "go run", "go build", "go test", "cargo run", "cargo build", "cargo test",
    "pip install",
];

const SHELL_METACHARACTERS: &[&str] = &["|", "&&", "||", ";", ">", "<", "`", "$(", "${", "2>", "&>"];

const PATH_PREFIXES: &[&str] = &["./", "../", "/", "~/"];

/// Words and phrases that signal a request to the assistant.
const NATURAL_LANGUAGE_CUES: &[&str] = &[
    "create", "write", "generate", "make a", "build a", "help me", "can you", "please", "add",
    "modify", "update", "fix", "explain", "show me", "tell me", "how to", "what is", "what are",
    "what does", "implement", "develop", "design", "refactor", "optimize", "improve", "debug",
    "review", "analyze", "i want", "i need", "i would like", "could you", "would you",
];

const QUESTION_STARTERS: &[&str] = &[
    "what", "how", "why", "when", "where", "who", "which", "can", "could", "would", "should", "is",
    "are", "do", "does", "did",
];

const CONVERSATIONAL_WORDS: &[&str] = &[
    "hello", "hi", "hey", "thanks", "thank", "yes", "no", "ok", "okay",
];

/// Split a structured prefix from `command`.
///
/// Returns the prefix and the trimmed remainder. A bare `help` (the whole
/// input) counts as the help prefix with an empty remainder.
pub fn split_prefix(command: &str) -> Option<(Prefix, &str)> {
    let trimmed = command.trim();
    if trimmed.eq_ignore_ascii_case("help") {
        return Some((Prefix::Help, ""));
    }
    Prefix::ALL.into_iter().find_map(|prefix| {
        let tag = prefix.as_str();
        let head = trimmed.get(..tag.len())?;
        if head.eq_ignore_ascii_case(tag) {
            Some((prefix, trimmed[tag.len()..].trim()))
        } else {
            None
        }
    })
}

fn is_assignment(token: &str) -> bool {
    let Some((name, _)) = token.split_once('=') else {
        return false;
    };
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(i, _)| {
        let before = haystack[..i].chars().next_back();
        let after = haystack[i + needle.len()..].chars().next();
        !before.is_some_and(|c| c.is_ascii_alphanumeric())
            && !after.is_some_and(|c| c.is_ascii_alphanumeric())
    })
}

/// Classify a command.
///
/// # Examples
///
/// ```
/// use dockhand::router::{classify, Classification, Prefix};
///
/// assert_eq!(classify("git status"), Classification::ShellLike);
/// assert_eq!(classify("file:read README.md"), Classification::Prefixed(Prefix::File));
/// assert_eq!(
///     classify("Create a Python script that prints Hello"),
///     Classification::NaturalLanguage
/// );
/// ```
pub fn classify(command: &str) -> Classification {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return Classification::NaturalLanguage;
    }

    if let Some((prefix, _)) = split_prefix(trimmed) {
        return Classification::Prefixed(prefix);
    }

    let lower = trimmed.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();
    let first = words.first().copied().unwrap_or_default();

    if SHELL_COMMANDS.contains(&first) {
        return Classification::ShellLike;
    }

    if !trimmed.is_ascii() {
        return Classification::NaturalLanguage;
    }

    if SHELL_METACHARACTERS.iter().any(|m| trimmed.contains(m))
        || PATH_PREFIXES.iter().any(|p| trimmed.starts_with(p))
        || trimmed.split_whitespace().any(is_assignment)
    {
        return Classification::ShellLike;
    }

    if NATURAL_LANGUAGE_CUES.iter().any(|cue| contains_word(&lower, cue))
        || (words.len() > 1 && QUESTION_STARTERS.contains(&first))
        || trimmed.ends_with('?')
        || (words.len() == 1 && CONVERSATIONAL_WORDS.contains(&first))
    {
        return Classification::NaturalLanguage;
    }

    if words.len() >= 2 {
        let pair = format!("{} {}", words[0], words[1]);
        if COMBINED_COMMANDS.contains(&pair.as_str()) {
            return Classification::ShellLike;
        }
    }

    Classification::NaturalLanguage
}
