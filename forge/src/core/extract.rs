//! Turning oracle responses into file content.

const FENCE: &str = "```";

/// Lines of new content inspected for its own imports before carrying old headers.
const IMPORT_SCAN_LINES: usize = 10;

/// Extract the first fenced block from `response`, or the trimmed raw response.
///
/// The info string after the opening fence (e.g. `python`) is dropped. An
/// unterminated fence yields everything after the opening line.
pub fn extract_content(response: &str) -> String {
    let Some(open) = response.find(FENCE) else {
        return response.trim().to_string();
    };
    let after_fence = &response[open + FENCE.len()..];
    let body = match after_fence.find('\n') {
        Some(newline) => &after_fence[newline + 1..],
        None => return response.trim().to_string(),
    };
    let block = match body.find(FENCE) {
        Some(close) => &body[..close],
        None => body,
    };
    block.trim_end().to_string()
}

fn is_import(trimmed: &str) -> bool {
    trimmed.starts_with("import ") || (trimmed.starts_with("from ") && trimmed.contains(" import"))
}

fn is_preamble(trimmed: &str) -> bool {
    trimmed.starts_with("#!")
        || (trimmed.starts_with('#') && (trimmed.contains("coding:") || trimmed.contains("coding=")))
        || trimmed.starts_with("<?php")
}

/// Number of lines taken by a docstring opening at `lines[0]`, if any.
fn docstring_len(lines: &[&str]) -> Option<usize> {
    let first = lines.first()?.trim();
    let quote = ["\"\"\"", "'''"]
        .into_iter()
        .find(|q| first.starts_with(q))?;
    if first.len() >= 2 * quote.len() && first[quote.len()..].contains(quote) {
        return Some(1);
    }
    lines[1..]
        .iter()
        .position(|line| line.contains(quote))
        .map_or(Some(lines.len()), |close| Some(close + 2))
}

/// Number of lines taken by the import statement opening at `lines[0]`.
///
/// Parenthesized imports run to the closing `)`; backslash continuations to
/// the first line without one.
fn import_len(lines: &[&str]) -> usize {
    let first = lines[0].trim_end();
    if first.contains('(') && !first.contains(')') {
        return lines[1..]
            .iter()
            .position(|line| line.contains(')'))
            .map_or(lines.len(), |close| close + 2);
    }
    let mut len = 1;
    while lines[len - 1].trim_end().ends_with('\\') && len < lines.len() {
        len += 1;
    }
    len
}

/// Header declarations at the top of `previous`, one entry per statement.
///
/// The scan passes over blank lines, comments and one module docstring, and
/// stops at the first other code line. A multi-line import is a single entry
/// with its lines joined by `\n`.
pub fn header_lines(previous: &str) -> Vec<String> {
    let lines: Vec<&str> = previous.lines().collect();
    let mut headers = Vec::new();
    let mut docstring_seen = false;
    let mut i = 0;
    while i < lines.len() {
        let trimmed = lines[i].trim();
        if is_preamble(trimmed) {
            headers.push(lines[i].to_string());
            i += 1;
        } else if is_import(trimmed) {
            let len = import_len(&lines[i..]);
            headers.push(lines[i..i + len].join("\n"));
            i += len;
        } else if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("//") {
            i += 1;
        } else if let Some(len) = docstring_len(&lines[i..]).filter(|_| !docstring_seen) {
            docstring_seen = true;
            i += len;
        } else {
            break;
        }
    }
    headers
}

/// Whether `generated` declares its own imports near the top.
fn declares_imports(generated: &str) -> bool {
    generated
        .lines()
        .take(IMPORT_SCAN_LINES)
        .any(|line| is_import(line.trim()))
}

/// Prepend header declarations from `previous` when `generated` has none of its own.
///
/// New content that imports anything in its first lines is taken as complete
/// and returned unchanged, so dropped imports stay dropped. Otherwise missing
/// shebang and encoding lines lead the file, and missing imports follow the
/// module docstring of `generated`.
pub fn merge_headers(previous: &str, generated: &str) -> String {
    if declares_imports(generated) {
        return generated.to_string();
    }
    let (directives, imports): (Vec<String>, Vec<String>) = header_lines(previous)
        .into_iter()
        .filter(|header| !already_present(generated, header))
        .partition(|header| is_preamble(header.trim()));
    if directives.is_empty() && imports.is_empty() {
        return generated.to_string();
    }

    let (own_directives, docstring, body) = split_preamble(generated);
    let mut merged = String::new();
    for line in own_directives
        .iter()
        .copied()
        .chain(directives.iter().map(String::as_str))
    {
        merged.push_str(line);
        merged.push('\n');
    }
    merged.push_str(docstring);
    if !docstring.is_empty() && !docstring.ends_with('\n') {
        merged.push('\n');
    }
    for header in &imports {
        merged.push_str(header);
        merged.push('\n');
    }
    merged.push_str(body);
    merged
}

fn already_present(generated: &str, header: &str) -> bool {
    if header.contains('\n') {
        generated.contains(header)
    } else {
        generated.lines().any(|line| line.trim() == header.trim())
    }
}

/// Split `text` into leading shebang/encoding lines, a module docstring and the rest.
fn split_preamble(text: &str) -> (Vec<&str>, &str, &str) {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let mut directives = Vec::new();
    let mut offset = 0;
    let mut i = 0;
    while i < lines.len() && is_preamble(lines[i].trim()) {
        directives.push(lines[i].trim_end_matches(['\r', '\n']));
        offset += lines[i].len();
        i += 1;
    }
    let docstring_start = offset;
    if let Some(len) = docstring_len(&lines[i..]) {
        offset += lines[i..i + len].iter().map(|line| line.len()).sum::<usize>();
    }
    (directives, &text[docstring_start..offset], &text[offset..])
}
