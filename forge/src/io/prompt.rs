//! Oracle prompt rendering.

use std::path::PathBuf;

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::types::{ProjectSpec, Task};

const GENERATE_TEMPLATE: &str = include_str!("prompts/generate.md");
const REPAIR_TEMPLATE: &str = include_str!("prompts/repair.md");

#[derive(Debug, Clone, Serialize)]
struct TaskContext<'a> {
    title: &'a str,
    description: &'a str,
    technical_requirement: &'a str,
    target_path: &'a str,
    verification: &'a str,
    flexibility: &'a str,
}

impl<'a> TaskContext<'a> {
    fn from_task(task: &'a Task) -> Self {
        Self {
            title: task.title.trim(),
            description: task.description.trim(),
            technical_requirement: task.technical_requirement.trim(),
            target_path: &task.target_path,
            verification: task.verification.trim(),
            flexibility: task.flexibility.as_str(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct RelatedContext<'a> {
    path: String,
    content: &'a str,
}

/// Inputs for a repair prompt.
#[derive(Debug, Clone, Default)]
pub struct RepairInputs {
    pub target_path: String,
    pub task_title: String,
    pub current_content: String,
    pub failure: String,
    /// Advisory symbol-mismatch text (may be empty).
    pub mismatch: String,
    /// Source of the module named in an import failure.
    pub related: Option<(PathBuf, String)>,
    pub self_import: Option<String>,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("generate", GENERATE_TEMPLATE)
            .expect("generate template should be valid");
        env.add_template("repair", REPAIR_TEMPLATE)
            .expect("repair template should be valid");
        Self { env }
    }

    /// Generation prompt: architecture, task fields and the file's current content.
    pub fn render_generate(
        &self,
        spec: &ProjectSpec,
        task: &Task,
        current_content: &str,
    ) -> Result<String> {
        let template = self.env.get_template("generate")?;
        let rendered = template.render(context! {
            project => context! {
                name => spec.project_name.as_str(),
                architecture => non_empty(&spec.architecture_proposal).unwrap_or(spec.description.trim()),
            },
            task => TaskContext::from_task(task),
            language => language_hint(&task.target_path),
            current_content => current_content.trim_end(),
        })?;
        debug!(task = %task.id, bytes = rendered.len(), "rendered generation prompt");
        Ok(rendered)
    }

    /// Repair prompt: content, failure text, mismatch diagnostics and constraints.
    pub fn render_repair(&self, input: &RepairInputs) -> Result<String> {
        let template = self.env.get_template("repair")?;
        let related = input.related.as_ref().map(|(path, content)| RelatedContext {
            path: path.display().to_string(),
            content: content.trim_end(),
        });
        let rendered = template.render(context! {
            target_path => input.target_path.as_str(),
            task_title => input.task_title.as_str(),
            language => language_hint(&input.target_path),
            current_content => input.current_content.trim_end(),
            failure => input.failure.trim(),
            mismatch => non_empty(&input.mismatch),
            related => related,
            self_import => input.self_import.as_deref().and_then(non_empty),
        })?;
        debug!(target = %input.target_path, bytes = rendered.len(), "rendered repair prompt");
        Ok(rendered)
    }
}

fn non_empty(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Fence info string for a target path.
fn language_hint(target_path: &str) -> &'static str {
    match target_path.rsplit_once('.').map(|(_, ext)| ext) {
        Some("py") => "python",
        Some("md") => "markdown",
        Some("json") => "json",
        Some("toml") => "toml",
        Some("yaml" | "yml") => "yaml",
        Some("sh") => "bash",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{project, task};

    #[test]
    fn generation_prompt_embeds_task_and_content() {
        let mut spec = project(vec![task("core", &[])]);
        spec.architecture_proposal = "Layered modules under src/".to_string();
        spec.tasks[0].technical_requirement = "use dataclasses".to_string();

        let prompt = PromptEngine::new()
            .render_generate(&spec, &spec.tasks[0], "# placeholder\n")
            .expect("render");
        assert!(prompt.contains("Layered modules under src/"));
        assert!(prompt.contains("- Title: core title"));
        assert!(prompt.contains("- Technical requirement: use dataclasses"));
        assert!(prompt.contains("- Target path: src/core.py"));
        assert!(prompt.contains("```python\n# placeholder\n```"));
        assert!(!prompt.contains("- Verification:"));
    }

    #[test]
    fn repair_prompt_includes_optional_sections_only_when_present() {
        let engine = PromptEngine::new();
        let mut input = RepairInputs {
            target_path: "src/app.py".to_string(),
            task_title: "App".to_string(),
            current_content: "import missing\n".to_string(),
            failure: "ImportError: boom".to_string(),
            ..RepairInputs::default()
        };
        let bare = engine.render_repair(&input).expect("render");
        assert!(bare.contains("ImportError: boom"));
        assert!(bare.contains("Never import this file's own module"));
        assert!(!bare.contains("## Related file"));
        assert!(!bare.contains("## Symbol analysis"));

        input.mismatch = "models.py defines: User".to_string();
        input.related = Some((PathBuf::from("src/models.py"), "class User: ...".to_string()));
        let full = engine.render_repair(&input).expect("render");
        assert!(full.contains("## Related file (src/models.py)"));
        assert!(full.contains("models.py defines: User"));
    }
}
