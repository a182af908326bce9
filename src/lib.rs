pub mod budget;
pub mod catalog;
pub mod cli;
pub mod client;
pub mod core;
pub mod eventsource;
pub mod mcp;
pub mod providers;
pub mod server;
pub mod snippets;
pub mod stream;

pub use crate::core::{Config, GenerateRequest, GenerationLoop, GenerationOutput, LLMError};
pub use client::{CredentialSource, RelayClient};
pub use server::{router, AppState};
