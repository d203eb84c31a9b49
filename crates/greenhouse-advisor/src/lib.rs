pub mod limiter;
pub mod openai;
pub mod prompt;
pub mod providers;
pub mod streamer;

pub use limiter::{LimiterConfig, ReadingLimiter, estimate_tokens};
pub use openai::OpenAiProvider;
pub use providers::{ChatMessage, ChatRole, LlmProvider, LlmRequest, LlmStream, LlmStreamResponse};
pub use streamer::{AdviceSink, AdviceStreamer, StreamOutcome, StreamState, StreamerConfig};
