//! Prompt golden set.
//!
//! Curated template→expectation pairs for the compiled-in prompts and the
//! directory loader. Offline only: nothing here calls a backend.

use mnemo_llm::prompt::{self, DirectoryPrompts, PromptRenderer};

/// A golden rendering case.
struct GoldenCase {
    /// Human-readable name.
    name: &'static str,
    /// Template text.
    template: &'static str,
    /// Template variables.
    vars: Vec<(&'static str, &'static str)>,
    /// Strings that must appear in the rendered prompt.
    must_contain: Vec<&'static str>,
    /// Strings that must not appear in the rendered prompt.
    must_not_contain: Vec<&'static str>,
}

fn golden_cases() -> Vec<GoldenCase> {
    vec![
        GoldenCase {
            name: "arithmetic_question",
            template: prompt::CONTEXT_FOR_QUESTION,
            vars: vec![("question", "What is 2+2?"), ("context", "2+2 equals 4.")],
            must_contain: vec!["What is 2+2?", "2+2 equals 4."],
            must_not_contain: vec!["{{ question }}", "{{ context }}"],
        },
        GoldenCase {
            name: "question_with_code_context",
            template: prompt::CONTEXT_FOR_QUESTION,
            vars: vec![
                ("question", "Which function parses the config?"),
                ("context", "fn from_toml(s: &str) -> Result<Config>"),
            ],
            must_contain: vec!["Which function parses the config?", "from_toml"],
            must_not_contain: vec!["{{"],
        },
        GoldenCase {
            name: "empty_context",
            template: prompt::CONTEXT_FOR_QUESTION,
            vars: vec![("question", "Who wrote this?"), ("context", "")],
            must_contain: vec!["Who wrote this?", "And here is the context: ``"],
            must_not_contain: vec!["{{ context }}"],
        },
        GoldenCase {
            name: "question_quoting_placeholders",
            template: prompt::CONTEXT_FOR_QUESTION,
            vars: vec![
                ("question", "What does {context} mean in {{ context }}?"),
                ("context", "SECRET-CTX"),
            ],
            must_contain: vec!["`What does {context} mean in {{ context }}?`", "`SECRET-CTX`"],
            must_not_contain: vec!["What does SECRET-CTX"],
        },
    ]
}

#[test]
fn golden_prompts_render_without_unresolved_vars() {
    for case in &golden_cases() {
        let rendered = prompt::render_template(case.template, &case.vars);
        for needle in &case.must_contain {
            assert!(
                rendered.contains(needle),
                "golden case '{}': rendered prompt must contain '{}'\n{}",
                case.name,
                needle,
                rendered
            );
        }
        for needle in &case.must_not_contain {
            assert!(
                !rendered.contains(needle),
                "golden case '{}': rendered prompt must not contain '{}'\n{}",
                case.name,
                needle,
                rendered
            );
        }
    }
}

#[tokio::test]
async fn builtin_prompts_are_available_without_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let prompts = DirectoryPrompts::new(dir.path());
    for name in [
        "context_for_question.txt",
        "answer_simple_question.txt",
        "summarize_search_results.txt",
    ] {
        let text = prompts.read_named(name).await.expect("builtin prompt");
        assert!(!text.trim().is_empty(), "{name} is empty");
    }
}

#[tokio::test]
async fn files_on_disk_shadow_builtins() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("summarize_search_results.txt"), "Summarize in one line.")
        .expect("write prompt");
    let prompts = DirectoryPrompts::new(dir.path());
    assert_eq!(
        prompts.read_named("summarize_search_results.txt").await.expect("prompt"),
        "Summarize in one line."
    );
}

#[test]
fn summary_prompt_asks_for_plain_text() {
    assert!(prompt::SUMMARIZE_SEARCH_RESULTS.contains("plain text"));
    assert!(prompt::ANSWER_SIMPLE_QUESTION.contains("brief"));
}
