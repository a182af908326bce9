//! The relay's SSE protocol: a writer on the serving side and a reader for
//! clients.

pub mod chunk;
pub mod reader;
pub mod writer;

pub use chunk::StreamChunk;
pub use reader::StreamReader;
pub use writer::{stream_from, SseBody, StreamWriter};
