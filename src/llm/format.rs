//! Text helpers for user input and rendered replies.

use std::sync::LazyLock;

use regex::{Captures, Regex};

const FENCE: &str = "```";

/// Keywords that mark a line as a code statement when they open the input.
const CODE_KEYWORDS: [&str; 5] = ["function", "const", "let", "var", "import"];

/// A fenced block whose body is a single line, with an optional language tag.
static SINGLE_LINE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```(\w*?)\n?([^\n`]+)\n?```").expect("fence pattern is valid")
});

fn is_fenced(trimmed: &str) -> bool {
    trimmed.starts_with(FENCE) && trimmed.ends_with(FENCE)
}

/// Whether `text` looks like source code rather than prose.
pub fn is_code_input(text: &str) -> bool {
    let trimmed = text.trim();
    if is_fenced(trimmed) {
        return true;
    }
    if [";", "=>", "{", "}", "\n"].iter().any(|needle| trimmed.contains(needle)) {
        return true;
    }
    CODE_KEYWORDS.iter().any(|keyword| {
        trimmed
            .strip_prefix(keyword)
            .and_then(|rest| rest.chars().next())
            .is_some_and(char::is_whitespace)
    })
}

/// Prepares user input for storage in the history.
///
/// Already-fenced input is trimmed, code-like input is wrapped in a
/// `javascript` fence, and anything else is returned as typed.
///
/// # Examples
///
/// ```
/// use relaychat::llm::format::format_input;
///
/// assert_eq!(format_input("  hello there "), "  hello there ");
/// assert_eq!(format_input("let x = 1"), "```javascript\nlet x = 1\n```");
/// assert_eq!(format_input(" ```py\nx\n``` "), "```py\nx\n```");
/// ```
pub fn format_input(text: &str) -> String {
    let trimmed = text.trim();
    if is_fenced(trimmed) {
        trimmed.to_owned()
    } else if is_code_input(trimmed) {
        format!("{FENCE}javascript\n{trimmed}\n{FENCE}")
    } else {
        text.to_owned()
    }
}

/// Rewrites untagged single-line fenced blocks as inline code so they render
/// inside the surrounding sentence.
pub fn preprocess_markdown(markdown: &str) -> String {
    SINGLE_LINE_FENCE
        .replace_all(markdown, |caps: &Captures<'_>| {
            if caps[1].is_empty() {
                format!("`{}`", &caps[2])
            } else {
                caps[0].to_owned()
            }
        })
        .into_owned()
}
