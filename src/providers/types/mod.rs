pub mod chat_completion;
pub mod chat_completion_chunk;
pub mod message;
pub mod request;
pub mod shared;

pub use chat_completion::ChatCompletion;
pub use chat_completion_chunk::{ChatCompletionChunk, ToolCallDelta};
pub use message::{
    CallType, ContentPart, FinishReason, FunctionCall, ImageUrl, Message, MessageContent,
    ToolCall,
};
pub use request::{ChatCompletionRequest, GenerationArgs, ToolSchema};
pub use shared::Usage;
