//! Symbol-mismatch diagnostics for repair prompts.
//!
//! Output is advisory text for the oracle; nothing here edits files.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::core::dependencies::module_paths_for_target;

static CANNOT_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"cannot import name '(\w+)' from '([\w.]+)'").expect("import pattern must compile")
});
static NO_ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"'(\w+)' object has no attribute '(\w+)'").expect("attribute pattern must compile")
});
static MODULE_NO_ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"module '([\w.]+)' has no attribute '(\w+)'")
        .expect("module attribute pattern must compile")
});
static IMPORTED_MODULE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"from '([\w.]+)'|from ([\w.]+) import|No module named '([\w.]+)'|import ([\w.]+)")
        .expect("imported module pattern must compile")
});
static DEFINITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:async\s+)?(class|def)\s+(\w+)").expect("definition pattern must compile")
});

/// Explain naming/import mismatches in `failure_text` using sources under `root`.
///
/// Returns an empty string when nothing useful can be said.
pub fn explain(failure_text: &str, root: &Path) -> String {
    let mut notes = Vec::new();

    if let Some(caps) = CANNOT_IMPORT.captures(failure_text) {
        let symbol = &caps[1];
        let module = &caps[2];
        match locate_module(root, module) {
            Some(path) => {
                let names = definitions_in(&path);
                if names.is_empty() {
                    notes.push(format!(
                        "{} defines no classes or functions, but '{symbol}' is imported from it.",
                        path.display()
                    ));
                } else {
                    notes.push(format!(
                        "{} defines: {}. The import asks for '{symbol}'; use one of the defined names or add the definition.",
                        path.display(),
                        names.join(", ")
                    ));
                }
            }
            None => notes.push(format!(
                "module '{module}' was not found under the project; '{symbol}' cannot be imported from it."
            )),
        }
    }

    if let Some(caps) = NO_ATTRIBUTE.captures(failure_text) {
        notes.push(format!(
            "'{}' objects have no attribute '{}'.",
            &caps[1], &caps[2]
        ));
    }
    if let Some(caps) = MODULE_NO_ATTRIBUTE.captures(failure_text) {
        notes.push(format!(
            "module '{}' has no attribute '{}'.",
            &caps[1], &caps[2]
        ));
    }

    notes.join("\n")
}

/// Source of the project module an import failure refers to, as `(path, contents)`.
pub fn related_module_source(failure_text: &str, root: &Path) -> Option<(PathBuf, String)> {
    let caps = IMPORTED_MODULE.captures(failure_text)?;
    let module = (1..=4).find_map(|i| caps.get(i))?.as_str();
    let path = locate_module(root, module)?;
    let contents = fs::read_to_string(&path).ok()?;
    Some((path, contents))
}

/// Warning text when the failure shows the target importing its own module.
pub fn self_import_hint(failure_text: &str, target_path: &str) -> Option<String> {
    if !(failure_text.contains("ImportError") || failure_text.contains("circular import")) {
        return None;
    }
    module_paths_for_target(target_path)
        .into_iter()
        .find(|module| failure_text.contains(&format!("'{module}'")))
        .map(|module| {
            format!(
                "The failure references this file's own module '{module}'. Do not import names from the file itself; define them locally or move shared code to a separate module."
            )
        })
}

/// Find the file backing `module` (flat or `src/`, plain file or package).
pub fn locate_module(root: &Path, module: &str) -> Option<PathBuf> {
    let rel = module.replace('.', "/");
    let candidates = [
        root.join(format!("{rel}.py")),
        root.join(&rel).join("__init__.py"),
        root.join("src").join(format!("{rel}.py")),
        root.join("src").join(&rel).join("__init__.py"),
    ];
    let found = candidates.into_iter().find(|p| p.is_file());
    debug!(module, found = ?found, "module lookup");
    found
}

fn definitions_in(path: &Path) -> Vec<String> {
    let Ok(contents) = fs::read_to_string(path) else {
        return Vec::new();
    };
    let mut names: Vec<String> = Vec::new();
    for caps in DEFINITION.captures_iter(&contents) {
        let name = caps[2].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project_with_module() -> tempfile::TempDir {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("src").join("app");
        fs::create_dir_all(&dir).expect("dirs");
        fs::write(
            dir.join("models.py"),
            "class UserRecord:\n    pass\n\n\ndef load_user(uid):\n    return UserRecord()\n",
        )
        .expect("write");
        temp
    }

    #[test]
    fn lists_definitions_of_the_source_module() {
        let temp = project_with_module();
        let text = "ImportError: cannot import name 'User' from 'app.models' (/x/app/models.py)";
        let note = explain(text, temp.path());
        assert!(note.contains("UserRecord, load_user"), "{note}");
        assert!(note.contains("'User'"));
    }

    #[test]
    fn reports_missing_module() {
        let temp = tempfile::tempdir().expect("tempdir");
        let note = explain("cannot import name 'A' from 'nowhere'", temp.path());
        assert!(note.contains("module 'nowhere' was not found"));
    }

    #[test]
    fn surfaces_attribute_errors_verbatim() {
        let temp = tempfile::tempdir().expect("tempdir");
        let note = explain(
            "AttributeError: 'Inventory' object has no attribute 'total_items'",
            temp.path(),
        );
        assert_eq!(note, "'Inventory' objects have no attribute 'total_items'.");
    }

    #[test]
    fn unrelated_failures_yield_no_advice() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(explain("ZeroDivisionError: division by zero", temp.path()).is_empty());
    }

    #[test]
    fn finds_related_source_for_import_failure() {
        let temp = project_with_module();
        let (path, contents) =
            related_module_source("from app.models import User", temp.path()).expect("related");
        assert!(path.ends_with("src/app/models.py"));
        assert!(contents.contains("class UserRecord"));
    }

    #[test]
    fn detects_self_import() {
        let text = "ImportError: cannot import name 'Cart' from partially initialized module 'shop.cart'";
        let hint = self_import_hint(text, "src/shop/cart.py").expect("hint");
        assert!(hint.contains("'shop.cart'"));
        assert!(self_import_hint(text, "src/shop/other.py").is_none());
    }
}
