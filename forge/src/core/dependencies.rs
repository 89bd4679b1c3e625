//! Pure helpers for runtime-dependency detection.
//!
//! Filesystem-aware filtering (local packages, pending artifacts) lives in
//! [`crate::io::environment`]; this module only parses text.

use std::sync::LazyLock;

use regex::Regex;

static MISSING_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"ModuleNotFoundError: No module named '([^']+)'",
        r"ImportError: No module named '([^']+)'",
        r"No module named ([^,\s]+)",
        r"cannot import name '([^']+)' from",
        r"name '([^']+)' is not defined",
    ]
    .into_iter()
    .map(|p| Regex::new(p).expect("dependency pattern must compile"))
    .collect()
});

/// Fragments that show a capture is not a module name.
const NOT_A_MODULE: &[&str] = &["built-in", "file", "<frozen", "__main__"];

/// Import name → distributable package name.
const PACKAGE_ALIASES: &[(&str, &str)] = &[
    ("cv2", "opencv-python"),
    ("PIL", "Pillow"),
    ("sklearn", "scikit-learn"),
    ("skimage", "scikit-image"),
    ("flask", "Flask"),
    ("jwt", "PyJWT"),
    ("yaml", "PyYAML"),
    ("bs4", "beautifulsoup4"),
    ("dotenv", "python-dotenv"),
    ("PyQt5", "PyQt5"),
    ("PySide6", "PySide6"),
];

/// Candidate dependency names in failure text, deduplicated, in first-seen order.
pub fn candidate_names(failure_text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for pattern in MISSING_PATTERNS.iter() {
        for caps in pattern.captures_iter(failure_text) {
            let name = caps[1].trim_matches(['\'', '"']).to_string();
            if name.is_empty() || NOT_A_MODULE.iter().any(|skip| name.contains(skip)) {
                continue;
            }
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

/// First dotted segment of a module name (`PyQt5.QtWidgets` → `PyQt5`).
pub fn top_level(module: &str) -> &str {
    module.split('.').next().unwrap_or(module)
}

/// Map an import name to the package that provides it.
pub fn package_for(module: &str) -> String {
    let head = top_level(module);
    PACKAGE_ALIASES
        .iter()
        .find(|(import, _)| *import == head)
        .map(|(_, package)| (*package).to_string())
        .unwrap_or_else(|| head.to_string())
}

/// Module paths implied by a target path (`src/app/models.py` → `src.app.models`, `app.models`).
pub fn module_paths_for_target(target_path: &str) -> Vec<String> {
    let trimmed = target_path.trim_start_matches(['/', '\\']);
    let Some(stem) = trimmed.strip_suffix(".py") else {
        return Vec::new();
    };
    let stem = stem.strip_suffix("/__init__").unwrap_or(stem);
    let dotted = stem.replace(['/', '\\'], ".");
    let mut paths = vec![dotted.clone()];
    if let Some(rest) = dotted.strip_prefix("src.") {
        paths.push(rest.to_string());
    }
    paths
}

/// A symbol family whose use requires a declaration line.
struct DeclarationRule {
    label: &'static str,
    usage: &'static str,
    declarations: &'static [&'static str],
}

const DECLARATION_RULES: &[DeclarationRule] = &[
    DeclarationRule {
        label: "PyQt5 (QApplication)",
        usage: r"\bQApplication\b",
        declarations: &[r"from\s+PyQt5(\.\w+)*\s+import", r"import\s+PyQt5"],
    },
    DeclarationRule {
        label: "sys",
        usage: r"\bsys\.",
        declarations: &[r"import\s+sys\b", r"import\s+.*\bsys\b"],
    },
    DeclarationRule {
        label: "os",
        usage: r"\bos\.",
        declarations: &[r"import\s+os\b", r"import\s+.*\bos\b"],
    },
    DeclarationRule {
        label: "cv2",
        usage: r"\bcv2\.",
        declarations: &[r"import\s+cv2\b"],
    },
    DeclarationRule {
        label: "numpy (np)",
        usage: r"\bnp\.",
        declarations: &[r"import\s+numpy\s+as\s+np\b"],
    },
];

static COMPILED_RULES: LazyLock<Vec<(&'static str, Regex, Vec<Regex>)>> = LazyLock::new(|| {
    DECLARATION_RULES
        .iter()
        .map(|rule| {
            let usage = Regex::new(rule.usage).expect("usage pattern must compile");
            let declarations = rule
                .declarations
                .iter()
                .map(|d| {
                    Regex::new(&format!("(?m)^\\s*(from\\s+\\S+\\s+)?{d}"))
                        .expect("declaration pattern must compile")
                })
                .collect();
            (rule.label, usage, declarations)
        })
        .collect()
});

/// Symbol families used in `code` without a matching declaration line.
pub fn undeclared_symbols(code: &str) -> Vec<&'static str> {
    COMPILED_RULES
        .iter()
        .filter(|(_, usage, declarations)| {
            usage.is_match(code) && !declarations.iter().any(|d| d.is_match(code))
        })
        .map(|(label, _, _)| *label)
        .collect()
}
