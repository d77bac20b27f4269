//! Context builder — turns the active conversation into a backend prompt.

use palaver_core::types::Message;
use palaver_providers::Prompt;

/// Builds the [`Prompt`] for one exchange from recent history.
#[derive(Clone, Debug)]
pub struct ContextBuilder {
    system_prompt: Option<String>,
    context_messages: usize,
}

impl ContextBuilder {
    /// `context_messages` caps how many prior messages reach the backend.
    pub fn new(system_prompt: Option<String>, context_messages: usize) -> Self {
        Self {
            system_prompt: system_prompt.filter(|s| !s.trim().is_empty()),
            context_messages,
        }
    }

    pub fn context_messages(&self) -> usize {
        self.context_messages
    }

    /// Prompt for `text`, keeping only the newest `context_messages` of
    /// `history` (which must be oldest first).
    pub fn build_prompt(&self, mut history: Vec<Message>, text: &str) -> Prompt {
        let skip = history.len().saturating_sub(self.context_messages);
        history.drain(..skip);
        Prompt::new(text)
            .with_history(history)
            .with_system(self.system_prompt.clone())
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new(None, 10)
    }
}
