pub mod providers;
pub mod retry;
pub mod streaming;

use ragloop_core::config::ModelConfig;
use ragloop_core::traits::LlmClient;

pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;

/// Create an LLM client based on the provider name.
///
/// Every supported provider speaks the OpenAI chat-completions dialect,
/// including Ollama's `/v1` endpoint.
pub fn create_client(config: &ModelConfig) -> Box<dyn LlmClient> {
    if providers::presets::get_preset(&config.provider).is_none() && config.base_url.is_none() {
        tracing::debug!(
            provider = %config.provider,
            "Unknown provider without base_url, using the OpenAI endpoint"
        );
    }
    Box::new(OpenAiClient::new())
}
