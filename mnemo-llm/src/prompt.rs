//! Prompt templates.
//!
//! The completion service only needs two things from a prompt source: render
//! a template with arguments, and read a named prompt verbatim. Both go
//! through [`PromptRenderer`] so callers can plug in their own template store.
//! [`DirectoryPrompts`] is the file-backed default, with a few compiled-in
//! templates as fallback.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{LlmError, Result};

/// Answer a question from retrieved context (user prompt).
pub const CONTEXT_FOR_QUESTION: &str = r"The question is: `{{ question }}`
And here is the context: `{{ context }}`";

/// System prompt for short factual answers.
pub const ANSWER_SIMPLE_QUESTION: &str = r"Answer the question using the provided context. Be as brief as possible.
If the context does not contain the answer, say that you do not know.";

/// System prompt for condensing search results.
pub const SUMMARIZE_SEARCH_RESULTS: &str = r"Summarize the search results below.
Keep every concrete fact, name and number. Drop repetition and filler.
Return plain text only.";

/// Source of prompt text.
#[async_trait]
pub trait PromptRenderer: Send + Sync {
    /// Load the template at `path` and substitute `args`.
    ///
    /// # Errors
    /// Returns `LlmError::Prompt` if the template cannot be loaded.
    async fn render(&self, path: &str, args: &[(&str, &str)]) -> Result<String>;

    /// Load a named prompt without substitution.
    ///
    /// # Errors
    /// Returns `LlmError::Prompt` if the prompt cannot be loaded.
    async fn read_named(&self, name: &str) -> Result<String>;
}

/// Simple template interpolation for prompts.
///
/// Replaces `{{ key }}`, `{{key}}` and `{key}` with the corresponding value in
/// a single pass over `template`; substituted values are never rescanned.
/// Unknown placeholders are left untouched.
#[must_use]
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let lookup = |key: &str| vars.iter().find(|(k, _)| *k == key).map(|(_, v)| *v);
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        rest = &rest[open..];
        if let Some((value, consumed)) = placeholder(rest, &lookup) {
            out.push_str(value);
            rest = &rest[consumed..];
        } else {
            out.push('{');
            rest = &rest[1..];
        }
    }
    out.push_str(rest);
    out
}

/// Value and byte length of a known placeholder at the start of `text`.
fn placeholder<'a>(text: &str, lookup: &impl Fn(&str) -> Option<&'a str>) -> Option<(&'a str, usize)> {
    if let Some(inner) = text.strip_prefix("{{") {
        if let Some(end) = inner.find("}}") {
            if let Some(value) = lookup(inner[..end].trim()) {
                return Some((value, end + 4));
            }
        }
    }
    let inner = text.strip_prefix('{')?;
    let end = inner.find('}')?;
    lookup(&inner[..end]).map(|value| (value, end + 2))
}

/// Prompts loaded from files under a root directory.
#[derive(Debug, Clone)]
pub struct DirectoryPrompts {
    root: PathBuf,
    builtin: HashMap<&'static str, &'static str>,
}

impl DirectoryPrompts {
    /// Prompts under `root`, falling back to the compiled-in set.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let mut builtin = HashMap::new();
        builtin.insert("context_for_question.txt", CONTEXT_FOR_QUESTION);
        builtin.insert("answer_simple_question.txt", ANSWER_SIMPLE_QUESTION);
        builtin.insert("summarize_search_results.txt", SUMMARIZE_SEARCH_RESULTS);
        Self {
            root: root.as_ref().to_path_buf(),
            builtin,
        }
    }

    /// Prompts under `root` with no compiled-in fallback.
    pub fn strict(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            builtin: HashMap::new(),
        }
    }

    async fn load(&self, name: &str) -> Result<String> {
        let path = self.root.join(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => self
                .builtin
                .get(name)
                .map(|s| (*s).to_string())
                .ok_or_else(|| LlmError::Prompt(format!("prompt not found: {}", path.display()))),
            Err(err) => Err(LlmError::Prompt(format!("failed to read {}: {err}", path.display()))),
        }
    }
}

#[async_trait]
impl PromptRenderer for DirectoryPrompts {
    async fn render(&self, path: &str, args: &[(&str, &str)]) -> Result<String> {
        Ok(render_template(&self.load(path).await?, args))
    }

    async fn read_named(&self, name: &str) -> Result<String> {
        self.load(name).await
    }
}

/// In-memory prompts keyed by name.
#[async_trait]
impl PromptRenderer for HashMap<String, String> {
    async fn render(&self, path: &str, args: &[(&str, &str)]) -> Result<String> {
        Ok(render_template(&self.read_named(path).await?, args))
    }

    async fn read_named(&self, name: &str) -> Result<String> {
        self.get(name)
            .cloned()
            .ok_or_else(|| LlmError::Prompt(format!("prompt not found: {name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_rendering_works() {
        let rendered = render_template(
            "Q: {{ question }} / {{context}} / {extra}",
            &[("question", "What is 2+2?"), ("context", "math basics"), ("extra", "x")],
        );
        assert_eq!(rendered, "Q: What is 2+2? / math basics / x");
    }

    #[test]
    fn template_handles_missing_vars() {
        let rendered = render_template("Hello {{ name }}, {{ unknown }}.", &[("name", "Ada")]);
        assert_eq!(rendered, "Hello Ada, {{ unknown }}.");
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let rendered = render_template(
            "Q: {{ question }}\nC: {{ context }}",
            &[("question", "What does {context} or {{ context }} mean?"), ("context", "SECRET-CTX")],
        );
        assert_eq!(rendered, "Q: What does {context} or {{ context }} mean?\nC: SECRET-CTX");
    }

    #[test]
    fn stray_braces_survive() {
        let rendered = render_template("fn f() { {{x}} } {y", &[("x", "1")]);
        assert_eq!(rendered, "fn f() { 1 } {y");
    }

    #[tokio::test]
    async fn directory_prompts_prefer_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("summarize_search_results.txt"), "custom summary")
            .expect("write prompt");

        let prompts = DirectoryPrompts::new(dir.path());
        assert_eq!(
            prompts.read_named("summarize_search_results.txt").await.expect("file prompt"),
            "custom summary"
        );
        assert!(prompts
            .read_named("answer_simple_question.txt")
            .await
            .expect("builtin prompt")
            .contains("Answer the question"));
    }

    #[tokio::test]
    async fn strict_prompts_error_on_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let prompts = DirectoryPrompts::strict(dir.path());
        let err = prompts.read_named("nope.txt").await.expect_err("missing");
        assert!(matches!(err, LlmError::Prompt(_)));
    }

    #[tokio::test]
    async fn builtin_context_prompt_renders() {
        let prompts = DirectoryPrompts::new("/nonexistent/mnemo/prompts");
        let text = prompts
            .render(
                "context_for_question.txt",
                &[("question", "What is 2+2?"), ("context", "math basics")],
            )
            .await
            .expect("render");
        assert!(text.contains("`What is 2+2?`"));
        assert!(text.contains("`math basics`"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn file_templates_render_on_a_single_thread_runtime() {
        let dir = tempfile::tempdir().expect("tempdir");
        tokio::fs::write(dir.path().join("context_for_question.txt"), "<{{ question }}|{{ context }}>")
            .await
            .expect("write template");
        let prompts = DirectoryPrompts::strict(dir.path());
        let text = prompts
            .render("context_for_question.txt", &[("question", "q"), ("context", "c")])
            .await
            .expect("render");
        assert_eq!(text, "<q|c>");
    }
}
