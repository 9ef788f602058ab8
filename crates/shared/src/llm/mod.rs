pub mod chat_completions;
pub mod context;
pub mod gateway;
pub mod prompts;

pub use chat_completions::{ChatCompletionsConfig, ChatCompletionsGateway, ModelRoute};
pub use context::ContextAssembler;
pub use gateway::{
    ChatMessage, LlmGateway, LlmGatewayError, LlmGatewayFuture, LlmGatewayRequest,
    LlmGatewayResponse,
};
pub use prompts::{PromptTemplate, template_for_language};
