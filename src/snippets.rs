//! Code that reproduces a playground request against the inference router.
//!
//! Snippets read the credential from `HF_TOKEN` and never embed the caller's
//! token. Sampling configuration and `response_format` are spliced into the
//! call's argument block after the template is rendered.

use crate::core::GenerateRequest;
use crate::providers::hub::routed_model;
use crate::providers::types::request::RESERVED_KEYS;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value};

const INDENT: &str = "    ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Language {
    #[serde(rename = "python")]
    Python,
    #[serde(rename = "js")]
    JavaScript,
    #[serde(rename = "sh")]
    Shell,
}

impl Language {
    pub const ALL: [Self; 3] = [Self::Python, Self::JavaScript, Self::Shell];

    const fn client(self) -> &'static str {
        match self {
            Self::Python | Self::JavaScript => "openai",
            Self::Shell => "curl",
        }
    }

    /// Text just before the argument block of the completion call.
    const fn marker(self) -> &'static str {
        match self {
            Self::Python | Self::JavaScript => "client.chat.completions.create(",
            Self::Shell => "-d '",
        }
    }

    const fn delimiters(self) -> (u8, u8) {
        match self {
            Self::Python => (b'(', b')'),
            Self::JavaScript | Self::Shell => (b'{', b'}'),
        }
    }

    fn property(self, key: &str, value: &Value) -> String {
        match self {
            Self::Python => format!("{key}={}", python_literal(value)),
            Self::JavaScript => format!("{key}: {value}"),
            Self::Shell => format!("{}: {value}", Value::from(key)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snippet {
    pub language: Language,
    pub client: &'static str,
    pub content: String,
}

/// One snippet per language for `request`, routed through `base_url`.
///
/// Custom models have no snippets: their endpoint and credential are the
/// caller's own.
pub fn snippets(request: &GenerateRequest, base_url: &str) -> Vec<Snippet> {
    if request.model.is_custom {
        return Vec::new();
    }

    let model = routed_model(&request.model.id, request.provider.as_deref());
    let messages: Vec<Value> = request
        .messages
        .iter()
        .filter_map(|message| serde_json::to_value(message).ok())
        .collect();
    let properties = properties(request);

    Language::ALL
        .into_iter()
        .map(|language| {
            let template = match language {
                Language::Python => python(base_url, &model, &messages, request.streaming),
                Language::JavaScript => {
                    javascript(base_url, &model, &messages, request.streaming)
                }
                Language::Shell => shell(base_url, &model, &messages, request.streaming),
            };
            let mut content = insert_properties(&template, language, &properties);
            if language == Language::Shell {
                content = quote_shell_body(&content);
            }
            Snippet {
                language,
                client: language.client(),
                content,
            }
        })
        .collect()
}

/// Caller configuration the snippet should carry, in key order.
fn properties(request: &GenerateRequest) -> Map<String, Value> {
    let mut properties: Map<String, Value> = request
        .config
        .iter()
        .filter(|(key, value)| !RESERVED_KEYS.contains(&key.as_str()) && !value.is_null())
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    if let Some(format) = &request.response_format {
        properties.insert("response_format".to_string(), format.clone());
    }
    properties
}

fn python(base_url: &str, model: &str, messages: &[Value], streaming: bool) -> String {
    let messages: String = messages
        .iter()
        .map(|message| format!("        {},\n", python_literal(message)))
        .collect();
    let call = format!(
        "client.chat.completions.create(\n    model=\"{model}\",\n    messages=[\n{messages}    ],\n{stream})",
        stream = if streaming { "    stream=True,\n" } else { "" },
    );
    let usage = if streaming {
        format!("stream = {call}\n\nfor chunk in stream:\n    print(chunk.choices[0].delta.content, end=\"\")\n")
    } else {
        format!("completion = {call}\n\nprint(completion.choices[0].message)\n")
    };
    format!(
        "import os\nfrom openai import OpenAI\n\nclient = OpenAI(\n    base_url=\"{base_url}\",\n    api_key=os.environ[\"HF_TOKEN\"],\n)\n\n{usage}"
    )
}

fn javascript(base_url: &str, model: &str, messages: &[Value], streaming: bool) -> String {
    let messages: String = messages
        .iter()
        .map(|message| format!("        {message},\n"))
        .collect();
    let call = format!(
        "await client.chat.completions.create({{\n    model: \"{model}\",\n    messages: [\n{messages}    ],\n{stream}}});",
        stream = if streaming { "    stream: true,\n" } else { "" },
    );
    let usage = if streaming {
        format!("const stream = {call}\n\nfor await (const chunk of stream) {{\n    process.stdout.write(chunk.choices[0]?.delta?.content || \"\");\n}}\n")
    } else {
        format!("const chatCompletion = {call}\n\nconsole.log(chatCompletion.choices[0].message);\n")
    };
    format!(
        "import {{ OpenAI }} from \"openai\";\n\nconst client = new OpenAI({{\n    baseURL: \"{base_url}\",\n    apiKey: process.env.HF_TOKEN,\n}});\n\n{usage}"
    )
}

fn shell(base_url: &str, model: &str, messages: &[Value], streaming: bool) -> String {
    let mut body = Map::new();
    body.insert("messages".to_string(), Value::from(messages.to_vec()));
    body.insert("model".to_string(), Value::from(model));
    body.insert("stream".to_string(), Value::from(streaming));
    let body = pretty_json(&Value::Object(body)).replace('\n', &format!("\n{INDENT}"));
    format!(
        "curl {base_url}/chat/completions \\\n    -H \"Authorization: Bearer $HF_TOKEN\" \\\n    -H 'Content-Type: application/json' \\\n    -d '{body}'\n"
    )
}

fn pretty_json(value: &Value) -> String {
    let mut out = Vec::new();
    let formatter = PrettyFormatter::with_indent(INDENT.as_bytes());
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    if value.serialize(&mut serializer).is_err() {
        return value.to_string();
    }
    String::from_utf8(out).unwrap_or_else(|_| value.to_string())
}

/// Escapes single quotes inside the `-d '...'` body.
fn quote_shell_body(snippet: &str) -> String {
    let marker = Language::Shell.marker();
    let Some(start) = snippet.find(marker).map(|at| at + marker.len()) else {
        return snippet.to_string();
    };
    let Some(end) = snippet.rfind('\'').filter(|end| *end >= start) else {
        return snippet.to_string();
    };
    format!(
        "{}{}{}",
        &snippet[..start],
        snippet[start..end].replace('\'', r"'\''"),
        &snippet[end..]
    )
}

/// Renders JSON as a Python literal.
fn python_literal(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(_) | Value::String(_) => value.to_string(),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(python_literal).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Object(map) => {
            let entries: Vec<String> = map
                .iter()
                .map(|(key, value)| {
                    format!("{}: {}", Value::from(key.as_str()), python_literal(value))
                })
                .collect();
            format!("{{{}}}", entries.join(", "))
        }
    }
}

/// Adds `properties` to the argument block that follows the language's
/// call marker, one per line at the block's indentation.
///
/// The snippet is returned unchanged when there is nothing to add or no
/// block can be found.
pub fn insert_properties(
    snippet: &str,
    language: Language,
    properties: &Map<String, Value>,
) -> String {
    if properties.is_empty() {
        return snippet.to_string();
    }
    let (open, close) = language.delimiters();
    let marker = language.marker();
    let Some(marker_at) = snippet.find(marker) else {
        return snippet.to_string();
    };
    let search_from = marker_at + marker.len() - 1;
    let Some(open_at) = snippet.as_bytes()[search_from..]
        .iter()
        .position(|byte| *byte == open)
        .map(|at| at + search_from)
    else {
        return snippet.to_string();
    };
    let Some(close_at) = matching_close(snippet, open_at, open, close) else {
        return snippet.to_string();
    };

    let current = &snippet[open_at + 1..close_at];
    let indent = block_indent(current).unwrap_or_else(|| {
        let line_start = snippet[..open_at].rfind('\n').map_or(0, |at| at + 1);
        let line = &snippet[line_start..open_at];
        format!("{}{INDENT}", &line[..line.len() - line.trim_start().len()])
    });

    let added: String = properties
        .iter()
        .map(|(key, value)| format!("{indent}{},\n", language.property(key, value)))
        .collect();

    let mut existing = current.trim_end().to_string();
    if !existing.is_empty() && !existing.ends_with(',') {
        existing.push(',');
    }
    let mut combined = if !existing.is_empty() {
        format!("{existing}\n{added}")
    } else if current.starts_with('\n') {
        added
    } else {
        format!("\n{added}")
    };

    let kept = combined.trim_end().len();
    if combined[..kept].ends_with(',') {
        combined.truncate(kept - 1);
    }
    combined.push('\n');
    combined.push_str(indent.strip_suffix(INDENT).unwrap_or(""));

    format!("{}{combined}{}", &snippet[..=open_at], &snippet[close_at..])
}

/// Leading whitespace of the first indented line of a multi-line block.
fn block_indent(block: &str) -> Option<String> {
    if !block.contains('\n') {
        return None;
    }
    block.lines().find_map(|line| {
        let trimmed = line.trim_start();
        (!trimmed.is_empty() && trimmed.len() < line.len())
            .then(|| line[..line.len() - trimmed.len()].to_string())
    })
}

/// Index of the delimiter closing the one at `open_at`, skipping
/// double-quoted strings.
fn matching_close(snippet: &str, open_at: usize, open: u8, close: u8) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (at, byte) in snippet.bytes().enumerate().skip(open_at) {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        if byte == b'"' {
            in_string = true;
        } else if byte == open {
            depth += 1;
        } else if byte == close {
            depth -= 1;
            if depth == 0 {
                return Some(at);
            }
        }
    }
    None
}
