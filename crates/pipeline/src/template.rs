//! Prompt template rendering.
//!
//! Templates are plain text containing `{{name}}` placeholders. Rendering is
//! a single pass of literal substitution: bound values are opaque strings and
//! are never rescanned, so a value that itself contains `{{x}}` comes through
//! verbatim. There is no recursive expansion, no conditional logic, and no
//! escaping.
//!
//! Two entry points with explicitly different lenience:
//!
//! - [`render`] leaves an unresolved placeholder in the output literally
//!   (pass-through). This is what the driver uses.
//! - [`render_strict`] fails with [`TemplateError::UnboundPlaceholder`] on
//!   the first placeholder that has no binding.

use std::collections::BTreeMap;

use crate::TemplateError;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Named text bindings for a render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings(BTreeMap<String, String>);

impl Bindings {
    /// Creates an empty binding set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a binding, replacing any previous value for the same name.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Looks up a binding by placeholder name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

/// A named block of text folded into a prompt as context.
///
/// Reading the file is the caller's job (this crate does no I/O); the name is
/// whatever the caller wants the backend to see, typically the file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextFile {
    /// Name shown in the block delimiters.
    pub name: String,
    /// The file's text.
    pub text: String,
}

/// Folds context-file blocks into a prompt.
///
/// Each file becomes a `--- File: name ---` / `--- End of name ---` block;
/// the blocks are joined under a `Context files:` header with the original
/// prompt appended under `User request:`. With no files the prompt comes back
/// unchanged.
pub fn fold_context(prompt: &str, files: &[ContextFile]) -> String {
    if files.is_empty() {
        return prompt.to_string();
    }
    let blocks: Vec<String> = files
        .iter()
        .map(|f| format!("--- File: {name} ---\n{}\n--- End of {name} ---", f.text, name = f.name))
        .collect();
    format!(
        "Context files:\n\n{}\n\nUser request:\n{prompt}",
        blocks.join("\n\n")
    )
}

/// Renders `template`, substituting each `{{name}}` with its binding.
///
/// Placeholders without a binding pass through literally; callers that want
/// the fail-fast behaviour use [`render_strict`].
pub fn render(template: &str, bindings: &Bindings) -> String {
    // Only the strict variant can fail.
    match render_impl(template, bindings, false) {
        Ok(out) => out,
        Err(_) => unreachable!("lenient render cannot fail"),
    }
}

/// Renders `template`, failing on the first placeholder with no binding.
pub fn render_strict(template: &str, bindings: &Bindings) -> Result<String, TemplateError> {
    render_impl(template, bindings, true)
}

fn render_impl(
    template: &str,
    bindings: &Bindings,
    strict: bool,
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open_at) = rest.find(OPEN) {
        out.push_str(&rest[..open_at]);
        let after_open = &rest[open_at + OPEN.len()..];

        match after_open.find(CLOSE) {
            Some(close_at) => {
                let name = &after_open[..close_at];
                match bindings.get(name) {
                    Some(value) => out.push_str(value),
                    None if strict => {
                        return Err(TemplateError::UnboundPlaceholder {
                            name: name.to_string(),
                        });
                    }
                    // Pass-through: keep the placeholder syntax intact.
                    None => {
                        out.push_str(OPEN);
                        out.push_str(name);
                        out.push_str(CLOSE);
                    }
                }
                rest = &after_open[close_at + CLOSE.len()..];
            }
            // Unterminated opener: everything from here on is literal text.
            None => {
                out.push_str(&rest[open_at..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    Ok(out)
}
