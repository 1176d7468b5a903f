//! Shared gateway state.

use std::sync::Arc;

use uuid::Uuid;

use ansari_agent::{Agent, AgentSettings};
use ansari_core::config::Config;
use ansari_core::prompts::PromptStore;
use ansari_core::store::{ThreadLogger, ThreadStore};
use ansari_providers::{Credentials, LlmProvider};
use ansari_tools::ToolRegistry;

/// Fallback identity when no system template is installed.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Ansari, a helpful assistant that answers questions about Islam \
     grounded in the Quran, authentic hadith, fiqh scholarship, and tafsir. \
     Use the search tools before answering substantive questions, and cite \
     the sources you relied on.";

/// Immutable collaborators shared across requests. Each request builds its
/// own [`Agent`] from these.
pub struct AppState {
    pub config: Arc<Config>,
    pub provider: Arc<dyn LlmProvider>,
    pub credentials: Credentials,
    pub tools: Arc<ToolRegistry>,
    pub store: Arc<dyn ThreadStore>,
    pub prompts: PromptStore,
}

impl AppState {
    /// Render the system prompt from the versioned template set, falling
    /// back to the built-in identity.
    pub fn system_prompt(&self) -> String {
        self.prompts
            .render("system_msg", &[])
            .unwrap_or_else(|_| DEFAULT_SYSTEM_PROMPT.to_string())
    }

    /// Construct a fresh agent whose closed messages are persisted to the
    /// given thread.
    pub fn build_agent(&self, thread_id: Uuid) -> Agent {
        Agent::new(
            self.system_prompt(),
            Arc::clone(&self.provider),
            self.credentials.clone(),
            Arc::clone(&self.tools),
            Some(Arc::new(ThreadLogger::new(
                Arc::clone(&self.store),
                thread_id,
            ))),
            AgentSettings::from_config(&self.config),
        )
    }
}
