//! Prompt shaping for the completion call.
//!
//! Each command maps to a [`PromptMode`]; the mode picks a template with a
//! `{query}` placeholder that is filled with the user's text.

use crate::config::PromptConfig;

/// Placeholder replaced with the user's query.
pub const QUERY_PLACEHOLDER: &str = "{query}";

pub const DEFAULT_ASK_TEMPLATE: &str = "You are a helpful assistant. Provide clear, direct responses without unnecessary detail. Question: {query}";

/// Asks for a one-line explanation followed by `CODE:` and the code, which
/// is the shape the split formatter expects.
pub const DEFAULT_CODE_TEMPLATE: &str = "You are a programming teacher. First give a ONE-SENTENCE explanation. Then after 'CODE:', show simple, practical code examples with minimal comments. Keep both explanation and code concise. Question: {query}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    /// General question, answered as prose.
    Ask,
    /// Programming question, answered as explanation then code.
    Code,
}

impl PromptMode {
    /// Whether replies should be split into explanation and code.
    pub fn expects_code(self) -> bool {
        matches!(self, Self::Code)
    }
}

#[derive(Debug, Clone)]
pub struct PromptTemplates {
    ask: String,
    code: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            ask: DEFAULT_ASK_TEMPLATE.into(),
            code: DEFAULT_CODE_TEMPLATE.into(),
        }
    }
}

impl From<&PromptConfig> for PromptTemplates {
    fn from(config: &PromptConfig) -> Self {
        Self {
            ask: config.ask.clone(),
            code: config.code.clone(),
        }
    }
}

impl PromptTemplates {
    pub fn template(&self, mode: PromptMode) -> &str {
        match mode {
            PromptMode::Ask => &self.ask,
            PromptMode::Code => &self.code,
        }
    }

    pub fn render(&self, mode: PromptMode, query: &str) -> String {
        self.template(mode).replace(QUERY_PLACEHOLDER, query)
    }
}
