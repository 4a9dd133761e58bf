//! System prompt template for answer synthesis.

use std::path::{Path, PathBuf};

const CONTEXT: &str = "context";
const COMMIT_MESSAGE: &str = "commit_message";
const COMMIT_AUTHOR: &str = "commit_author";
const REPOSITORY: &str = "repository";

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("failed to read prompt template {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("prompt template has no {{context}} placeholder")]
    MissingContext,
}

/// Values substituted into the system template.
#[derive(Debug, Clone, Copy)]
pub struct PromptVars<'a> {
    pub context: &'a str,
    pub commit_message: &'a str,
    pub commit_author: &'a str,
    pub repository: &'a str,
}

/// Externally supplied system instructions with `{placeholder}` slots.
///
/// `{context}` is required. `{commit_message}`, `{commit_author}` and `{repository}` are
/// optional; any other brace group is copied verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemPrompt {
    template: String,
}

impl SystemPrompt {
    /// # Errors
    ///
    /// Returns `PromptError::MissingContext` if the template never mentions `{context}`.
    pub fn new(template: impl Into<String>) -> Result<Self, PromptError> {
        let template = template.into();
        if !template.contains("{context}") {
            return Err(PromptError::MissingContext);
        }
        Ok(Self { template })
    }

    /// Read a template from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or lacks `{context}`.
    pub fn load(path: &Path) -> Result<Self, PromptError> {
        let template = std::fs::read_to_string(path).map_err(|source| PromptError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded system prompt");
        Self::new(template)
    }

    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Substitute placeholders in a single pass, so braces inside the substituted
    /// values (retrieved code, commit messages) are never expanded.
    #[must_use]
    pub fn render(&self, vars: &PromptVars<'_>) -> String {
        let mut out = String::with_capacity(self.template.len() + vars.context.len());
        let mut rest = self.template.as_str();

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let value = after.find('}').and_then(|close| {
                let name = &after[..close];
                let value = match name {
                    CONTEXT => vars.context,
                    COMMIT_MESSAGE => vars.commit_message,
                    COMMIT_AUTHOR => vars.commit_author,
                    REPOSITORY => vars.repository,
                    _ => return None,
                };
                Some((value, close))
            });
            if let Some((value, close)) = value {
                out.push_str(value);
                rest = &after[close + 1..];
            } else {
                out.push('{');
                rest = after;
            }
        }
        out.push_str(rest);
        out
    }
}
