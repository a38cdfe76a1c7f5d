use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use ragloop_core::config::{AgentConfig, ModelConfig};
use ragloop_core::event::EventBus;
use ragloop_core::traits::LlmClient;
use ragloop_tools::ToolRegistry;

/// Everything a node needs besides the conversation itself.
///
/// Model parameters travel here explicitly; nodes read nothing ambient.
/// Cloning is cheap and clones share the same cancellation token.
#[derive(Clone)]
pub struct RunContext {
    pub llm: Arc<dyn LlmClient>,
    pub model: ModelConfig,
    pub agent: AgentConfig,
    pub tools: Arc<ToolRegistry>,
    pub event_bus: Arc<EventBus>,
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(
        llm: impl Into<Arc<dyn LlmClient>>,
        model: ModelConfig,
        agent: AgentConfig,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            llm: llm.into(),
            model,
            agent,
            tools,
            event_bus: Arc::new(EventBus::default()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    /// Token that aborts any run using this context.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
