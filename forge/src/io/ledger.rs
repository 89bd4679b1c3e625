//! Project ledger (`DEVELOPMENT_LOG.md`): one entry per task, marked on completion.
//!
//! Entries are `### Task: <title>` headings followed by an `**Id**` line.
//! Completion inserts a status line directly under the heading. Marking is
//! idempotent, and resume reads completed entries back by id.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::types::{ProjectSpec, Task};

const ENTRY_PREFIX: &str = "### Task: ";
const ID_PREFIX: &str = "- **Id**:";
/// Status line appended under a task entry once it reaches DONE.
pub const COMPLETED_MARKER: &str = "- Status: [COMPLETED]";

/// Write a fresh ledger listing every task, if none exists yet.
pub fn ensure_ledger(path: &Path, spec: &ProjectSpec) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    let mut buf = format!("# {} - Development Log\n\n", spec.project_name);
    for task in &spec.tasks {
        buf.push_str(&render_entry(task));
    }
    fs::write(path, buf).with_context(|| format!("write ledger {}", path.display()))
}

fn render_entry(task: &Task) -> String {
    format!(
        "{ENTRY_PREFIX}{}\n{ID_PREFIX} {}\n- **Description**: {}\n- **Target path**: {}\n- **Flexibility**: {}\n- **Technical requirement**: {}\n- **Verification**: {}\n\n",
        task.title,
        task.id,
        task.description,
        task.target_path,
        task.flexibility.as_str(),
        task.technical_requirement,
        task.verification,
    )
}

/// One `### Task:` entry spanning `lines[start..end]`.
struct Entry<'a> {
    start: usize,
    title: &'a str,
    id: Option<&'a str>,
    completed: bool,
}

fn entries<'a>(lines: &[&'a str]) -> Vec<Entry<'a>> {
    let mut found = Vec::new();
    let mut at = 0;
    while at < lines.len() {
        let Some(title) = lines[at].strip_prefix(ENTRY_PREFIX) else {
            at += 1;
            continue;
        };
        let end = lines[at + 1..]
            .iter()
            .position(|line| line.starts_with("### "))
            .map_or(lines.len(), |offset| at + 1 + offset);
        let body = &lines[at + 1..end];
        found.push(Entry {
            start: at,
            title: title.trim_end(),
            id: body
                .iter()
                .find_map(|line| line.trim().strip_prefix(ID_PREFIX))
                .map(str::trim),
            completed: body.iter().any(|line| line.trim() == COMPLETED_MARKER),
        });
        at = end;
    }
    found
}

/// Append the completion marker to `task`'s entry.
///
/// Entries are matched on their `**Id**` line; an entry without one matches by
/// title. Tasks without an entry (e.g. synthesized completion tasks) get one
/// appended. Returns `false` when the entry was already marked.
pub fn mark_completed(path: &Path, task: &Task) -> Result<bool> {
    let contents = if path.exists() {
        fs::read_to_string(path).with_context(|| format!("read ledger {}", path.display()))?
    } else {
        String::new()
    };

    let mut lines: Vec<&str> = contents.lines().collect();
    let found = entries(&lines);
    let entry = found
        .iter()
        .find(|e| e.id == Some(task.id.as_str()))
        .or_else(|| found.iter().find(|e| e.id.is_none() && e.title == task.title));
    let updated = match entry {
        Some(entry) => {
            if entry.completed {
                debug!(task = %task.id, "ledger entry already marked");
                return Ok(false);
            }
            lines.insert(entry.start + 1, COMPLETED_MARKER);
            let mut buf = lines.join("\n");
            buf.push('\n');
            buf
        }
        None => {
            let mut buf = contents.clone();
            if !buf.is_empty() && !buf.ends_with("\n\n") {
                buf.push_str(if buf.ends_with('\n') { "\n" } else { "\n\n" });
            }
            buf.push_str(&format!(
                "{ENTRY_PREFIX}{}\n{COMPLETED_MARKER}\n{ID_PREFIX} {}\n",
                task.title, task.id
            ));
            buf
        }
    };

    fs::write(path, updated).with_context(|| format!("write ledger {}", path.display()))?;
    debug!(task = %task.id, "ledger entry marked completed");
    Ok(true)
}

/// Ids of every entry carrying the completion marker.
///
/// Entries without an `**Id**` line are ignored.
pub fn completed_ids(path: &Path) -> Result<HashSet<String>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read ledger {}", path.display()))?;
    let lines: Vec<&str> = contents.lines().collect();
    Ok(entries(&lines)
        .into_iter()
        .filter(|entry| entry.completed)
        .filter_map(|entry| entry.id.map(str::to_string))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{project, task};

    #[test]
    fn marks_existing_entry_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("DEVELOPMENT_LOG.md");
        let spec = project(vec![task("a", &[]), task("b", &["a"])]);
        ensure_ledger(&path, &spec).expect("ensure");

        assert!(mark_completed(&path, &spec.tasks[1]).expect("mark"));
        assert!(!mark_completed(&path, &spec.tasks[1]).expect("mark again"));

        let contents = fs::read_to_string(&path).expect("read");
        assert_eq!(contents.matches(COMPLETED_MARKER).count(), 1);
        assert!(contents.contains(&format!("### Task: b title\n{COMPLETED_MARKER}\n")));
        assert_eq!(
            completed_ids(&path).expect("ids"),
            HashSet::from(["b".to_string()])
        );
    }

    #[test]
    fn marker_in_next_entry_does_not_count() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("DEVELOPMENT_LOG.md");
        let spec = project(vec![task("a", &[]), task("b", &[])]);
        ensure_ledger(&path, &spec).expect("ensure");
        mark_completed(&path, &spec.tasks[1]).expect("mark b");

        assert!(mark_completed(&path, &spec.tasks[0]).expect("mark a"));
        assert_eq!(completed_ids(&path).expect("ids").len(), 2);
    }

    #[test]
    fn unknown_task_gets_appended_entry() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("DEVELOPMENT_LOG.md");
        fs::write(&path, "# demo\n").expect("write");

        let extra = task("discover-1", &[]);
        assert!(mark_completed(&path, &extra).expect("mark"));
        let contents = fs::read_to_string(&path).expect("read");
        assert_eq!(
            contents,
            format!("# demo\n\n### Task: discover-1 title\n{COMPLETED_MARKER}\n- **Id**: discover-1\n")
        );
        assert_eq!(
            completed_ids(&path).expect("ids"),
            HashSet::from(["discover-1".to_string()])
        );
    }

    #[test]
    fn tasks_sharing_a_title_are_tracked_by_id() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("DEVELOPMENT_LOG.md");
        let mut first = task("setup-db", &[]);
        first.title = "Setup".to_string();
        let mut second = task("setup-cache", &[]);
        second.title = "Setup".to_string();
        let spec = project(vec![first, second]);
        ensure_ledger(&path, &spec).expect("ensure");

        assert!(mark_completed(&path, &spec.tasks[0]).expect("mark first"));
        assert_eq!(
            completed_ids(&path).expect("ids"),
            HashSet::from(["setup-db".to_string()])
        );

        assert!(mark_completed(&path, &spec.tasks[1]).expect("mark second"));
        let contents = fs::read_to_string(&path).expect("read");
        assert_eq!(contents.matches(COMPLETED_MARKER).count(), 2);
        assert_eq!(completed_ids(&path).expect("ids").len(), 2);
    }

    #[test]
    fn hand_written_entry_without_id_matches_by_title() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("DEVELOPMENT_LOG.md");
        fs::write(&path, "# demo\n\n### Task: a title\n- notes\n").expect("write");

        assert!(mark_completed(&path, &task("a", &[])).expect("mark"));
        let contents = fs::read_to_string(&path).expect("read");
        assert_eq!(contents, format!("# demo\n\n### Task: a title\n{COMPLETED_MARKER}\n- notes\n"));
        assert!(completed_ids(&path).expect("ids").is_empty());
    }

    #[test]
    fn ensure_does_not_overwrite() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("DEVELOPMENT_LOG.md");
        fs::write(&path, "custom\n").expect("write");
        ensure_ledger(&path, &project(vec![task("a", &[])])).expect("ensure");
        assert_eq!(fs::read_to_string(&path).expect("read"), "custom\n");
    }
}
