//! Heuristic gate against stub output.
//!
//! Only detects that *something* was implemented; it says nothing about
//! correctness.

use std::sync::LazyLock;

use regex::Regex;

/// Minimum number of non-comment, non-blank lines.
pub const MIN_CODE_LINES: usize = 10;
/// Minimum number of structurally significant or long lines.
pub const MIN_SUBSTANTIAL_LINES: usize = 3;
/// Lines longer than this count as substantial regardless of keywords.
const LONG_LINE_CHARS: usize = 20;

const NO_OP_STATEMENTS: &[&str] = &["pass", "...", ";"];

static UNFINISHED_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(todo|fixme)\b|\bNotImplementedError\b|\bunimplemented!|\btodo!")
        .expect("unfinished marker regex must compile")
});

static STRUCTURAL_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(async\s+)?(def|class|fn|function|if|elif|else|for|while|try|except|finally|raise|with|return|yield|match|case|import|from)\b",
    )
    .expect("structural keyword regex must compile")
});

/// Whether `text` looks like a real implementation rather than a placeholder.
pub fn is_substantial(text: &str) -> bool {
    let code = code_lines(text);

    if code
        .iter()
        .any(|line| NO_OP_STATEMENTS.contains(line) || UNFINISHED_MARKER.is_match(line))
    {
        return false;
    }
    if code.len() < MIN_CODE_LINES {
        return false;
    }

    let substantial = code
        .iter()
        .filter(|line| STRUCTURAL_KEYWORD.is_match(line) || line.chars().count() > LONG_LINE_CHARS)
        .count();
    substantial >= MIN_SUBSTANTIAL_LINES
}

/// Trimmed lines with block-comment spans, line comments and blanks removed.
fn code_lines(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut open_block: Option<&str> = None;

    for raw in text.lines() {
        let line = raw.trim();

        if let Some(delim) = open_block {
            if line.contains(delim) {
                open_block = None;
            }
            continue;
        }

        if let Some(delim) = block_opener(line) {
            let rest = &line[delim.len()..];
            let close = if delim == "/*" { "*/" } else { delim };
            if !rest.contains(close) {
                open_block = Some(close);
            }
            continue;
        }

        if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
            continue;
        }
        lines.push(line);
    }
    lines
}

/// Block-comment delimiter that starts `line`, if any.
fn block_opener(line: &str) -> Option<&'static str> {
    ["\"\"\"", "'''", "/*"]
        .into_iter()
        .find(|delim| line.starts_with(delim))
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMPLEMENTED: &str = r#""""Inventory helpers."""
import json


def load_items(path):
    with open(path, "r", encoding="utf-8") as handle:
        return json.load(handle)


def total_quantity(items):
    total = 0
    for item in items:
        if item.get("quantity", 0) > 0:
            total += item["quantity"]
    return total


try:
    print(total_quantity(load_items("items.json")))
except FileNotFoundError:
    print(0)
"#;

    #[test]
    fn bare_no_op_file_is_not_substantial() {
        let text = "# placeholder\n\ndef main():\n    pass\n";
        assert_eq!(text.lines().count(), 4);
        assert!(!is_substantial(text));
    }

    #[test]
    fn implemented_module_is_substantial() {
        assert!(IMPLEMENTED.lines().count() >= 20);
        assert!(is_substantial(IMPLEMENTED));
    }

    #[test]
    fn verdict_is_stable_across_calls() {
        for text in [IMPLEMENTED, "pass\n", ""] {
            assert_eq!(is_substantial(text), is_substantial(text));
        }
    }

    #[test]
    fn unfinished_marker_rejects_otherwise_real_code() {
        let text = format!("{IMPLEMENTED}\nresult = compute()  # TODO: handle errors\n");
        assert!(!is_substantial(&text));
    }

    #[test]
    fn markers_inside_comments_are_ignored() {
        let text = format!("# TODO: tidy up later\n\"\"\"\nTODO in a docstring\n\"\"\"\n{IMPLEMENTED}");
        assert!(is_substantial(&text));
    }

    #[test]
    fn short_simple_files_are_rejected() {
        let text = "a = 1\nb = 2\nc = a + b\nprint(c)\n";
        assert!(!is_substantial(text));
    }

    #[test]
    fn many_trivial_lines_without_structure_are_rejected() {
        let text = (0..12).map(|i| format!("x{i} = {i}\n")).collect::<String>();
        assert!(!is_substantial(&text));
    }
}
