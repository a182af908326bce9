use crate::providers::types::chat_completion_chunk::ToolCallDelta;
use crate::providers::ToolCall;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Reassembles streamed tool-call fragments, keyed by their delta index.
///
/// `name` and `arguments` are appended in arrival order; the first `id` seen
/// for an index is kept.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<u32, PartialToolCall>,
}

impl ToolCallAccumulator {
    pub fn push(&mut self, delta: &ToolCallDelta) {
        let call = self.calls.entry(delta.index).or_default();
        if call.id.is_none() {
            call.id = delta.id.clone().filter(|id| !id.is_empty());
        }
        if let Some(function) = &delta.function {
            if let Some(name) = &function.name {
                call.name.push_str(name);
            }
            if let Some(arguments) = &function.arguments {
                call.arguments.push_str(arguments);
            }
        }
    }

    /// Completed calls in index order. Fragments without a name are dropped.
    pub fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_iter()
            .filter(|(_, call)| !call.name.is_empty())
            .map(|(index, call)| {
                let id = call.id.unwrap_or_else(|| format!("call_{index}"));
                ToolCall::function(id, call.name, call.arguments)
            })
            .collect()
    }
}
