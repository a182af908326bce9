pub mod adapter;
pub mod client;
pub mod custom;
pub mod hub;
pub mod types;

pub use adapter::{create_adapter, ChunkStream, CompletionAdapter};
pub use client::ChatCompletionsClient;
pub use custom::CustomAdapter;
pub use hub::HubAdapter;
pub use types::{
    ChatCompletion, ChatCompletionChunk, FinishReason, GenerationArgs, Message, MessageContent,
    ToolCall, ToolSchema, Usage,
};
