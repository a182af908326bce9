use serde::{Deserialize, Serialize};

/// A frame of the relay's SSE protocol.
///
/// A stream carries any number of `Chunk` frames and ends with exactly one
/// `Done` or `Error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamChunk {
    Chunk {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    Done,
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl StreamChunk {
    pub fn chunk(content: impl Into<String>) -> Self {
        Self::Chunk {
            content: Some(content.into()),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: Some(error.into()),
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }

    /// Serializes the frame as `data: <json>\n\n`.
    pub fn to_frame(&self) -> String {
        // Serializing a tagged enum of strings cannot fail
        let json = serde_json::to_string(self).unwrap_or_default();
        format!("data: {json}\n\n")
    }
}
