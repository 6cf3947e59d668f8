//! Prompt rendering for agent invocations.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::types::Task;
use crate::io::config::LoopConfig;
use crate::workflow::LegacyDocument;

const TASK_TEMPLATE: &str = include_str!("prompts/task.md");
const LEGACY_TEMPLATE: &str = include_str!("prompts/legacy.md");

/// Selected task context for template rendering.
#[derive(Debug, Clone, Serialize)]
struct TaskContext {
    id: String,
    title: String,
    task_type: String,
    priority: u8,
    description: Option<String>,
    labels: Vec<String>,
}

impl TaskContext {
    fn from_task(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            title: task.title.clone(),
            task_type: task.task_type.as_str().to_string(),
            priority: task.priority,
            description: task
                .description
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            labels: task.labels.clone(),
        }
    }
}

/// Renders one prompt per agent invocation.
pub struct PromptBuilder {
    env: Environment<'static>,
    sentinel: String,
    tracker: String,
    /// User template replacing the built-in task prompt.
    task_override: Option<String>,
}

impl PromptBuilder {
    /// Builder using the built-in templates.
    pub fn new(sentinel: impl Into<String>, tracker: impl Into<String>) -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("task", TASK_TEMPLATE)
            .context("load built-in task template")?;
        env.add_template("legacy", LEGACY_TEMPLATE)
            .context("load built-in legacy template")?;
        Ok(Self {
            env,
            sentinel: sentinel.into(),
            tracker: tracker.into(),
            task_override: None,
        })
    }

    /// Builder honoring `[prompt] template`, resolved against `workdir`.
    pub fn from_config(cfg: &LoopConfig, workdir: &Path) -> Result<Self> {
        let builder = Self::new(&cfg.completion_sentinel, &cfg.tracker.command)?;
        match cfg.prompt.template.as_deref() {
            Some(path) => builder.with_task_template_file(&workdir.join(path)),
            None => Ok(builder),
        }
    }

    /// Replace the task template with the contents of `path`.
    pub fn with_task_template_file(mut self, path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path)
            .with_context(|| format!("read prompt template {}", path.display()))?;
        self.env
            .template_from_str(&source)
            .map(|_| ())
            .with_context(|| format!("parse prompt template {}", path.display()))?;
        self.task_override = Some(source);
        debug!(path = %path.display(), "using custom task template");
        Ok(self)
    }

    /// Prompt for working on one selected task.
    pub fn render_task(&self, task: &Task, scope: Option<&str>) -> Result<String> {
        let ctx = context! {
            task => TaskContext::from_task(task),
            scope => scope,
            sentinel => self.sentinel.as_str(),
            tracker => self.tracker.as_str(),
        };
        let rendered = match &self.task_override {
            Some(source) => self.env.render_str(source, ctx),
            None => self.env.get_template("task")?.render(ctx),
        }
        .with_context(|| format!("render prompt for {}", task.id))?;
        Ok(rendered)
    }

    /// Prompt for the single-document workflow, where the agent picks its own work.
    pub fn render_legacy(&self, document: &LegacyDocument) -> Result<String> {
        let template = self.env.get_template("legacy")?;
        let rendered = template
            .render(context! {
                document => document.path.display().to_string(),
                sentinel => self.sentinel.as_str(),
            })
            .context("render legacy prompt")?;
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::task;
    use std::path::PathBuf;

    const SENTINEL: &str = "<promise>COMPLETE</promise>";

    fn builder() -> PromptBuilder {
        PromptBuilder::new(SENTINEL, "bd").expect("builder")
    }

    #[test]
    fn task_prompt_embeds_identity_and_sentinel() {
        let mut selected = task("bd-7", 1);
        selected.title = "Fix login redirect".to_string();
        selected.description = Some("Users land on /404 after login.".to_string());
        selected.labels = vec!["auth".to_string()];

        let prompt = builder()
            .render_task(&selected, Some("bd-epic"))
            .expect("render");

        assert!(prompt.contains("- ID: bd-7"));
        assert!(prompt.contains("- Title: Fix login redirect"));
        assert!(prompt.contains("- Priority: P1"));
        assert!(prompt.contains("- Labels: auth"));
        assert!(prompt.contains("- Parent: bd-epic"));
        assert!(prompt.contains("Users land on /404 after login."));
        assert!(prompt.contains("bd close bd-7"));
        assert!(prompt.trim_end().ends_with(SENTINEL));
    }

    #[test]
    fn optional_sections_are_omitted() {
        let prompt = builder().render_task(&task("bd-1", 2), None).expect("render");
        assert!(!prompt.contains("## Description"));
        assert!(!prompt.contains("- Labels:"));
        assert!(!prompt.contains("- Parent:"));
    }

    #[test]
    fn legacy_prompt_names_the_document() {
        let prompt = builder()
            .render_legacy(&LegacyDocument {
                path: PathBuf::from("docs/PRD.md"),
            })
            .expect("render");
        assert!(prompt.contains("`docs/PRD.md`"));
        assert!(prompt.contains(SENTINEL));
    }

    #[test]
    fn custom_template_replaces_task_prompt() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(
            temp.path().join("prompt.md"),
            "Do {{ task.id }} then say {{ sentinel }}",
        )
        .expect("write");
        let cfg = LoopConfig {
            prompt: crate::io::config::PromptConfig {
                template: Some(PathBuf::from("prompt.md")),
            },
            ..LoopConfig::default()
        };

        let builder = PromptBuilder::from_config(&cfg, temp.path()).expect("builder");
        let prompt = builder.render_task(&task("bd-3", 0), None).expect("render");
        assert_eq!(prompt, format!("Do bd-3 then say {SENTINEL}"));
    }

    #[test]
    fn broken_custom_template_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("prompt.md");
        fs::write(&path, "{% if %}").expect("write");
        let Err(err) = builder().with_task_template_file(&path) else {
            panic!("expected parse error");
        };
        assert!(format!("{err:#}").contains("parse prompt template"));
    }

    #[test]
    fn missing_custom_template_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let Err(err) = builder().with_task_template_file(&temp.path().join("nope.md")) else {
            panic!("expected read error");
        };
        assert!(format!("{err:#}").contains("read prompt template"));
    }
}
