use super::accumulator::ToolCallAccumulator;
use super::LLMError;
use crate::mcp::{execute_mcp_tool, McpConnection};
use crate::providers::{
    ChunkStream, CompletionAdapter, FinishReason, GenerationArgs, Message, ToolCall,
};
use crate::stream::StreamWriter;
use futures::future::join_all;
use futures::StreamExt;
use log::debug;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// What a finished generation hands back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub message: Message,
    pub completion_tokens: u32,
}

/// One assistant turn collected from a stream.
struct StreamedTurn {
    content: String,
    tool_calls: Vec<ToolCall>,
    finish_reason: FinishReason,
    completion_tokens: u32,
}

/// Drives a model through rounds of tool use until it produces a final
/// answer.
///
/// Each round asks the adapter for one assistant turn. A `tool_calls` finish
/// runs every requested tool against `connections`, appends the assistant
/// message and the tool results to the history and starts the next round.
/// Any other finish reason ends the loop.
pub struct GenerationLoop<'a> {
    adapter: &'a dyn CompletionAdapter,
    connections: &'a [McpConnection],
    max_rounds: u32,
}

impl<'a> GenerationLoop<'a> {
    pub fn new(
        adapter: &'a dyn CompletionAdapter,
        connections: &'a [McpConnection],
        max_rounds: u32,
    ) -> Self {
        Self {
            adapter,
            connections,
            max_rounds,
        }
    }

    /// Runs the loop with whole-turn completions.
    pub async fn run(
        &self,
        mut args: GenerationArgs,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutput, LLMError> {
        let mut completion_tokens = 0;

        for round in 0..self.max_rounds {
            debug!("[Generation] round: {round}");
            let completion = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(LLMError::Cancelled),
                completion = self.adapter.generate(&args) => completion?,
            };
            completion_tokens += completion.usage.map_or(0, |u| u.completion_tokens);

            let choice = completion
                .choices
                .into_iter()
                .next()
                .ok_or(LLMError::EmptyResponse)?;
            let finish_reason = choice.finish_reason.unwrap_or(FinishReason::Stop);
            let tool_calls = choice.message.tool_calls().to_vec();
            debug!("[Generation] finish reason: {finish_reason:?}");

            if finish_reason.is_terminal() || tool_calls.is_empty() {
                return Ok(GenerationOutput {
                    message: choice.message,
                    completion_tokens,
                });
            }

            let results = self.execute_tools(&tool_calls, cancel).await?;
            args.messages.push(choice.message);
            args.messages.extend(results);
        }

        Err(LLMError::RoundLimit(self.max_rounds))
    }

    /// Runs the loop with streamed turns, forwarding content to `writer` as
    /// it arrives.
    ///
    /// The writer is always closed on return: with `done` on success, or with
    /// an `error` frame carrying the failure.
    pub async fn run_streaming(
        &self,
        args: GenerationArgs,
        writer: &StreamWriter,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutput, LLMError> {
        let result = self.stream_rounds(args, writer, cancel).await;
        match &result {
            Ok(_) => writer.end(),
            Err(e) => writer.error(e),
        }
        result
    }

    async fn stream_rounds(
        &self,
        mut args: GenerationArgs,
        writer: &StreamWriter,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutput, LLMError> {
        let mut completion_tokens = 0;

        for round in 0..self.max_rounds {
            debug!("[Generation] streaming round: {round}");
            let stream = self.adapter.stream(&args, cancel).await?;
            let turn = Self::read_turn(stream, writer).await?;
            completion_tokens += turn.completion_tokens;
            debug!(
                "[Generation] finish reason: {:?}, {} tool calls",
                turn.finish_reason,
                turn.tool_calls.len()
            );

            let has_tool_calls = !turn.tool_calls.is_empty();
            let message = Message::assistant(turn.content, has_tool_calls.then_some(turn.tool_calls));

            if turn.finish_reason.is_terminal() || !has_tool_calls {
                return Ok(GenerationOutput {
                    message,
                    completion_tokens,
                });
            }

            let results = self.execute_tools(message.tool_calls(), cancel).await?;
            args.messages.push(message);
            args.messages.extend(results);
        }

        Err(LLMError::RoundLimit(self.max_rounds))
    }

    /// Consumes one streamed turn.
    ///
    /// The turn's content is complete at the first delta carrying a finish
    /// reason. Later chunks are only read for usage, which OpenAI-compatible
    /// servers send in a trailing chunk with no choices. A stream that ends
    /// without a finish reason counts as `stop`.
    async fn read_turn(
        mut stream: ChunkStream,
        writer: &StreamWriter,
    ) -> Result<StreamedTurn, LLMError> {
        let mut content = String::new();
        let mut tool_calls = ToolCallAccumulator::default();
        let mut completion_tokens = 0;
        let mut finish_reason = None;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if let Some(usage) = chunk.usage {
                completion_tokens = usage.completion_tokens;
            }
            if finish_reason.is_some() {
                continue;
            }
            let Some(choice) = chunk.choices.into_iter().next() else {
                continue;
            };

            if let Some(text) = choice.delta.content.filter(|text| !text.is_empty()) {
                writer.write_chunk(text.as_str());
                content.push_str(&text);
            }
            for delta in choice.delta.tool_calls.iter().flatten() {
                tool_calls.push(delta);
            }
            finish_reason = choice.finish_reason;
        }

        let finish_reason = finish_reason.unwrap_or_else(|| {
            debug!("[Generation] stream ended without a finish reason");
            FinishReason::Stop
        });
        Ok(StreamedTurn {
            content,
            tool_calls: tool_calls.finish(),
            finish_reason,
            completion_tokens,
        })
    }

    /// Executes every call concurrently; results keep the order of `tool_calls`.
    async fn execute_tools(
        &self,
        tool_calls: &[ToolCall],
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>, LLMError> {
        debug!("[Generation] executing {} tool calls", tool_calls.len());
        let calls = tool_calls
            .iter()
            .map(|tool_call| execute_mcp_tool(self.connections, tool_call));

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(LLMError::Cancelled),
            results = join_all(calls) => Ok(results),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::types::chat_completion::Choice as CompletionChoice;
    use crate::providers::types::chat_completion_chunk::{
        Choice as ChunkChoice, Delta, FunctionCallDelta, ToolCallDelta,
    };
    use crate::mcp::{McpResult, McpSession, McpTool, ToolOutput};
    use crate::providers::{ChatCompletion, ChatCompletionChunk, ToolSchema, Usage};
    use async_trait::async_trait;
    use futures::stream;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Replays scripted turns and records the history each call received.
    #[derive(Default)]
    struct ScriptedAdapter {
        completions: Mutex<VecDeque<ChatCompletion>>,
        streams: Mutex<VecDeque<Vec<ChatCompletionChunk>>>,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    #[async_trait]
    impl CompletionAdapter for ScriptedAdapter {
        async fn stream(
            &self,
            args: &GenerationArgs,
            _cancel: &CancellationToken,
        ) -> Result<ChunkStream, LLMError> {
            self.seen.lock().unwrap().push(args.messages.clone());
            let chunks = self.streams.lock().unwrap().pop_front().unwrap_or_default();
            Ok(stream::iter(chunks.into_iter().map(Ok)).boxed())
        }

        async fn generate(&self, args: &GenerationArgs) -> Result<ChatCompletion, LLMError> {
            self.seen.lock().unwrap().push(args.messages.clone());
            self.completions
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(LLMError::EmptyResponse)
        }
    }

    fn completion(message: Message, finish_reason: &str, tokens: u32) -> ChatCompletion {
        ChatCompletion {
            id: "cmpl".to_string(),
            model: "test".to_string(),
            choices: vec![CompletionChoice {
                index: 0,
                message,
                finish_reason: Some(FinishReason::from(finish_reason.to_string())),
            }],
            usage: Some(Usage {
                completion_tokens: tokens,
                ..Default::default()
            }),
        }
    }

    fn text_chunk(text: &str, finish_reason: Option<&str>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            choices: vec![ChunkChoice {
                delta: Delta {
                    content: Some(text.to_string()),
                    ..Default::default()
                },
                finish_reason: finish_reason.map(|r| FinishReason::from(r.to_string())),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn tool_chunk(id: Option<&str>, name: Option<&str>, args: &str) -> ChatCompletionChunk {
        ChatCompletionChunk {
            choices: vec![ChunkChoice {
                delta: Delta {
                    tool_calls: Some(vec![ToolCallDelta {
                        index: 0,
                        id: id.map(str::to_string),
                        call_type: None,
                        function: Some(FunctionCallDelta {
                            name: name.map(str::to_string),
                            arguments: Some(args.to_string()),
                        }),
                    }]),
                    ..Default::default()
                },
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn finish_chunk(reason: &str) -> ChatCompletionChunk {
        ChatCompletionChunk {
            choices: vec![ChunkChoice {
                finish_reason: Some(FinishReason::from(reason.to_string())),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    /// Answers after a delay so later calls in a round resolve first.
    struct SlowWeather;

    #[async_trait]
    impl McpSession for SlowWeather {
        async fn list_tools(&self) -> McpResult<Vec<McpTool>> {
            Ok(Vec::new())
        }

        async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<ToolOutput> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(ToolOutput {
                content: vec![json!({"type": "text", "text": format!("{name} {}", arguments["city"])})],
                is_error: false,
            })
        }
    }

    fn weather_connection() -> McpConnection {
        McpConnection {
            server_name: "weather".to_string(),
            session: Arc::new(SlowWeather),
            tools: vec![ToolSchema::function(
                "get_weather",
                None,
                json!({"type": "object"}),
            )],
        }
    }

    fn usage_chunk(completion_tokens: u32) -> ChatCompletionChunk {
        ChatCompletionChunk {
            usage: Some(Usage {
                completion_tokens,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn args() -> GenerationArgs {
        GenerationArgs {
            model: "test".to_string(),
            messages: vec![Message::user("What's the weather in Paris?")],
            ..Default::default()
        }
    }

    async fn drain(body: crate::stream::SseBody) -> String {
        body.map(|frame| String::from_utf8_lossy(&frame.unwrap_or_default()).into_owned())
            .collect::<Vec<_>>()
            .await
            .concat()
    }

    #[tokio::test]
    async fn test_stop_ends_after_one_round() {
        let adapter = ScriptedAdapter::default();
        adapter
            .completions
            .lock()
            .unwrap()
            .push_back(completion(Message::assistant("Sunny.", None), "stop", 4));

        let output = GenerationLoop::new(&adapter, &[], 10)
            .run(args(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.message.content(), "Sunny.");
        assert_eq!(output.completion_tokens, 4);
        assert_eq!(adapter.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_tool_round_appends_assistant_then_results() {
        let adapter = ScriptedAdapter::default();
        let call = ToolCall::function("call_1", "get_weather", "{\"city\":\"Paris\"}");
        {
            let mut completions = adapter.completions.lock().unwrap();
            completions.push_back(completion(
                Message::assistant("", Some(vec![call])),
                "tool_calls",
                7,
            ));
            completions.push_back(completion(Message::assistant("Sunny.", None), "stop", 3));
        }

        let output = GenerationLoop::new(&adapter, &[], 10)
            .run(args(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.message.content(), "Sunny.");
        assert_eq!(output.completion_tokens, 10);

        let seen = adapter.seen.lock().unwrap();
        let second = &seen[1];
        assert_eq!(second.len(), 3);
        assert_eq!(second[1].tool_calls()[0].id, "call_1");
        // No server exports the tool, so the result carries the error
        assert_eq!(second[2].tool_call_id(), Some("call_1"));
        assert!(second[2].content().contains("not found"));
    }

    #[tokio::test]
    async fn test_length_is_terminal() {
        let adapter = ScriptedAdapter::default();
        adapter
            .completions
            .lock()
            .unwrap()
            .push_back(completion(Message::assistant("Trunc", None), "length", 1));

        let output = GenerationLoop::new(&adapter, &[], 10)
            .run(args(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output.message.content(), "Trunc");
    }

    #[tokio::test]
    async fn test_round_limit() {
        let adapter = ScriptedAdapter::default();
        {
            let mut completions = adapter.completions.lock().unwrap();
            for i in 0..2 {
                let call = ToolCall::function(format!("call_{i}"), "loop", "{}");
                completions.push_back(completion(
                    Message::assistant("", Some(vec![call])),
                    "tool_calls",
                    1,
                ));
            }
        }

        let err = GenerationLoop::new(&adapter, &[], 2)
            .run(args(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LLMError::RoundLimit(2)));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_round() {
        let adapter = ScriptedAdapter::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = GenerationLoop::new(&adapter, &[], 10)
            .run(args(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LLMError::Cancelled));
    }

    #[tokio::test]
    async fn test_streaming_forwards_content_and_ends_with_done() {
        let adapter = ScriptedAdapter::default();
        adapter
            .streams
            .lock()
            .unwrap()
            .push_back(vec![text_chunk("Hel", None), text_chunk("lo", Some("stop"))]);

        let (writer, body) = StreamWriter::channel();
        let output = GenerationLoop::new(&adapter, &[], 10)
            .run_streaming(args(), &writer, &CancellationToken::new())
            .await
            .unwrap();
        drop(writer);

        assert_eq!(output.message.content(), "Hello");
        assert_eq!(
            drain(body).await,
            concat!(
                "data: {\"type\":\"chunk\",\"content\":\"Hel\"}\n\n",
                "data: {\"type\":\"chunk\",\"content\":\"lo\"}\n\n",
                "data: {\"type\":\"done\"}\n\n",
            )
        );
    }

    #[tokio::test]
    async fn test_streaming_accumulates_tool_call_fragments() {
        let adapter = ScriptedAdapter::default();
        {
            let mut streams = adapter.streams.lock().unwrap();
            streams.push_back(vec![
                tool_chunk(Some("call_1"), Some("get_"), "{\"city\":"),
                tool_chunk(None, Some("weather"), "\"Paris\"}"),
                finish_chunk("tool_calls"),
            ]);
            streams.push_back(vec![text_chunk("Sunny.", Some("stop"))]);
        }

        let (writer, body) = StreamWriter::channel();
        let output = GenerationLoop::new(&adapter, &[], 10)
            .run_streaming(args(), &writer, &CancellationToken::new())
            .await
            .unwrap();
        drop(writer);

        assert_eq!(output.message.content(), "Sunny.");
        let seen = adapter.seen.lock().unwrap();
        let call = &seen[1][1].tool_calls()[0];
        assert_eq!(call.function.name, "get_weather");
        assert_eq!(call.function.arguments, "{\"city\":\"Paris\"}");
        assert_eq!(seen[1][2].tool_call_id(), Some("call_1"));
        assert!(drain(body).await.ends_with("data: {\"type\":\"done\"}\n\n"));
    }

    #[tokio::test]
    async fn test_stream_without_finish_reason_counts_as_stop() {
        let adapter = ScriptedAdapter::default();
        adapter
            .streams
            .lock()
            .unwrap()
            .push_back(vec![text_chunk("partial", None)]);

        let (writer, _body) = StreamWriter::channel();
        let output = GenerationLoop::new(&adapter, &[], 10)
            .run_streaming(args(), &writer, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.message.content(), "partial");
        assert_eq!(adapter.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_streaming_failure_writes_error_frame() {
        let adapter = ScriptedAdapter::default();

        let (writer, body) = StreamWriter::channel();
        GenerationLoop::new(&adapter, &[], 0)
            .run_streaming(args(), &writer, &CancellationToken::new())
            .await
            .unwrap_err();
        drop(writer);

        assert_eq!(
            drain(body).await,
            "data: {\"type\":\"error\",\"error\":\"Tool-call round limit of 0 reached\"}\n\n"
        );
    }

    #[tokio::test]
    async fn test_failed_call_does_not_stop_the_round() {
        let adapter = ScriptedAdapter::default();
        let calls = vec![
            ToolCall::function("call_a", "get_weather", "{\"city\":\"Paris\"}"),
            ToolCall::function("call_b", "get_forecast", "{}"),
        ];
        {
            let mut completions = adapter.completions.lock().unwrap();
            completions.push_back(completion(
                Message::assistant("", Some(calls)),
                "tool_calls",
                2,
            ));
            completions.push_back(completion(Message::assistant("Done.", None), "stop", 1));
        }
        let connections = [weather_connection()];

        let output = GenerationLoop::new(&adapter, &connections, 10)
            .run(args(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output.message.content(), "Done.");

        let seen = adapter.seen.lock().unwrap();
        let history = &seen[1];
        assert_eq!(history.len(), 4);
        assert_eq!(history[2].tool_call_id(), Some("call_a"));
        assert_eq!(history[3].tool_call_id(), Some("call_b"));

        let weather: Value = serde_json::from_str(&history[2].content()).unwrap();
        assert_eq!(weather[0]["text"], "get_weather \"Paris\"");
        let missing: Value = serde_json::from_str(&history[3].content()).unwrap();
        assert_eq!(
            missing["error"],
            "Tool get_forecast not found in any connected MCP server"
        );
    }

    #[tokio::test]
    async fn test_streaming_reads_usage_after_finish() {
        let adapter = ScriptedAdapter::default();
        adapter.streams.lock().unwrap().push_back(vec![
            text_chunk("Hi", Some("stop")),
            text_chunk(" ignored", None),
            usage_chunk(7),
        ]);

        let (writer, body) = StreamWriter::channel();
        let output = GenerationLoop::new(&adapter, &[], 10)
            .run_streaming(args(), &writer, &CancellationToken::new())
            .await
            .unwrap();
        drop(writer);

        assert_eq!(output.message.content(), "Hi");
        assert_eq!(output.completion_tokens, 7);
        assert!(!drain(body).await.contains("ignored"));
    }

    #[tokio::test]
    async fn test_streaming_sums_usage_across_rounds() {
        let adapter = ScriptedAdapter::default();
        {
            let mut streams = adapter.streams.lock().unwrap();
            streams.push_back(vec![
                tool_chunk(Some("call_1"), Some("get_weather"), "{}"),
                finish_chunk("tool_calls"),
                usage_chunk(5),
            ]);
            streams.push_back(vec![text_chunk("Sunny.", Some("stop")), usage_chunk(9)]);
        }
        let connections = [weather_connection()];

        let (writer, _body) = StreamWriter::channel();
        let output = GenerationLoop::new(&adapter, &connections, 10)
            .run_streaming(args(), &writer, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output.completion_tokens, 14);
    }
}
