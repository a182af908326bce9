pub mod accumulator;
pub mod config;
pub mod error;
pub mod generation;
pub mod request;

pub use config::Config;
pub use error::LLMError;
pub use generation::{GenerationLoop, GenerationOutput};
pub use request::{GenerateRequest, ModelDescriptor};
