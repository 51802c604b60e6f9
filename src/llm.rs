use async_trait::async_trait;
use secrecy::{ExposeSecret, Secret};
use serde_json::Value;

use crate::{
    config::LlmSettings,
    error::{Error, Result},
    memory::normalize_tag,
};

/// Characters of file content shown to the model when suggesting tags.
pub const TAG_PROMPT_CONTENT_CHARS: usize = 1000;
/// Existing tags listed in the tag suggestion prompt.
pub const TAG_PROMPT_EXISTING_TAGS: usize = 20;

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Response from a completion call.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: Option<String>,
    pub tool_calls: Vec<LlmToolCall>,
}

/// A chat model with function calling.
///
/// Messages and tool declarations use the OpenAI chat completions shape.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Model identifier, e.g. "gpt-4o-mini".
    fn model(&self) -> &str;

    async fn complete(
        &self,
        messages: &[Value],
        tools: &[Value],
    ) -> Result<Completion>;
}

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    api_key: Secret<String>,
    base_url: String,
    model: String,
}

impl OpenAiCompatProvider {
    pub fn new(api_key: Secret<String>, base_url: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    /// Build a provider from settings; `None` when no API key is configured.
    pub fn from_settings(settings: &LlmSettings) -> Option<Self> {
        let key = settings.api_key.clone()?;
        Some(Self::new(key, &settings.base_url, &settings.model))
    }
}

impl std::fmt::Debug for OpenAiCompatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[Value],
        tools: &[Value],
    ) -> Result<Completion> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.to_vec());
            body["tool_choice"] = Value::String("auto".into());
        }

        tracing::debug!(
            model = %self.model,
            messages = messages.len(),
            "calling language model"
        );
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;

        parse_completion(&resp)
    }
}

/// Extract text and tool calls from a chat completions response body.
pub fn parse_completion(resp: &Value) -> Result<Completion> {
    let message = resp["choices"]
        .get(0)
        .map(|c| &c["message"])
        .ok_or_else(|| {
            Error::Upstream("response contained no choices".to_string())
        })?;

    let text = message["content"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let tool_calls = message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .filter_map(|tc| {
                    let name = tc["function"]["name"].as_str()?;
                    // Arguments arrive as a JSON-encoded string. Unparseable
                    // arguments are passed through so the tool reports them.
                    let arguments = match &tc["function"]["arguments"] {
                        Value::String(raw) => serde_json::from_str(raw)
                            .unwrap_or_else(|_| Value::String(raw.clone())),
                        Value::Null => Value::Object(Default::default()),
                        other => other.clone(),
                    };
                    Some(LlmToolCall {
                        id: tc["id"].as_str().unwrap_or_default().to_string(),
                        name: name.to_string(),
                        arguments,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Completion { text, tool_calls })
}

/// Prompt asking the model for tags describing a file.
pub fn tag_suggestion_prompt(
    file_path: &str,
    content: &str,
    existing_tags: &[String],
) -> String {
    let excerpt: String =
        content.chars().take(TAG_PROMPT_CONTENT_CHARS).collect();
    let mut prompt = format!(
        "Analyze the following file content and suggest 3-5 relevant tags.\n\
         Tags should be concise (1-2 words), describe the content or purpose, \
         and be lowercase with hyphens (e.g. \"machine-learning\", \"python\", \
         \"personal\").\n\n\
         File: {file_path}\n\nContent:\n{excerpt}\n"
    );
    if !existing_tags.is_empty() {
        let listed: Vec<&str> = existing_tags
            .iter()
            .take(TAG_PROMPT_EXISTING_TAGS)
            .map(String::as_str)
            .collect();
        prompt.push_str(&format!(
            "\nExisting tags: {}\nPrefer existing tags when they fit.\n",
            listed.join(", ")
        ));
    }
    prompt.push_str("\nReply with ONLY the tags as a comma-separated list.");
    prompt
}

/// Quoting and list markers models wrap around tags.
const TAG_DECORATIONS: [char; 6] = ['"', '\'', '`', '-', '*', '.'];

/// Parse a comma-separated tag reply into normalized, unique tags.
pub fn parse_tag_list(reply: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for raw in reply.split([',', '\n']) {
        let cleaned = raw.trim().trim_matches(TAG_DECORATIONS);
        match normalize_tag(cleaned) {
            Ok(tag) if !tags.contains(&tag) => tags.push(tag),
            _ => {}
        }
    }
    tags
}

/// Ask the model to suggest tags for a file.
pub async fn suggest_tags(
    provider: &dyn LlmProvider,
    file_path: &str,
    content: &str,
    existing_tags: &[String],
) -> Result<Vec<String>> {
    let prompt = tag_suggestion_prompt(file_path, content, existing_tags);
    let messages = [serde_json::json!({ "role": "user", "content": prompt })];
    let completion = provider.complete(&messages, &[]).await?;
    let reply = completion.text.ok_or_else(|| {
        Error::Upstream("language model returned no tags".to_string())
    })?;
    Ok(parse_tag_list(&reply))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{collections::VecDeque, sync::Mutex};

    use super::*;

    /// Provider replaying canned completions and recording every request.
    pub struct ScriptedProvider {
        replies: Mutex<VecDeque<Completion>>,
        pub requests: Mutex<Vec<Vec<Value>>>,
    }

    impl ScriptedProvider {
        pub fn new(replies: Vec<Completion>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn text(reply: &str) -> Completion {
            Completion {
                text: Some(reply.to_string()),
                tool_calls: Vec::new(),
            }
        }

        pub fn call(id: &str, name: &str, arguments: Value) -> Completion {
            Completion {
                text: None,
                tool_calls: vec![LlmToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments,
                }],
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            messages: &[Value],
            _tools: &[Value],
        ) -> Result<Completion> {
            self.requests.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| Error::Upstream("script exhausted".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{testing::ScriptedProvider, *};

    #[test]
    fn parses_text_reply() {
        let resp = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "Hello"}}]
        });
        let completion = parse_completion(&resp).unwrap();
        assert_eq!(completion.text.as_deref(), Some("Hello"));
        assert!(completion.tool_calls.is_empty());
    }

    #[test]
    fn parses_tool_calls_with_string_arguments() {
        let resp = serde_json::json!({
            "choices": [{"message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {
                        "name": "search_files",
                        "arguments": "{\"query\": \"budget\"}"
                    }
                }]
            }}]
        });
        let completion = parse_completion(&resp).unwrap();
        assert!(completion.text.is_none());
        assert_eq!(
            completion.tool_calls,
            vec![LlmToolCall {
                id: "call_1".into(),
                name: "search_files".into(),
                arguments: serde_json::json!({"query": "budget"}),
            }]
        );
    }

    #[test]
    fn malformed_arguments_pass_through() {
        let resp = serde_json::json!({
            "choices": [{"message": {"tool_calls": [{
                "id": "x",
                "function": {"name": "read_file", "arguments": "{oops"}
            }]}}]
        });
        let completion = parse_completion(&resp).unwrap();
        assert_eq!(
            completion.tool_calls[0].arguments,
            Value::String("{oops".into())
        );
    }

    #[test]
    fn missing_choices_is_upstream_error() {
        let err = parse_completion(&serde_json::json!({"error": "nope"}))
            .unwrap_err();
        assert!(matches!(err, Error::Upstream(_)));
    }

    #[test]
    fn prompt_is_bounded() {
        let content = "z".repeat(5000);
        let existing: Vec<String> =
            (0..30).map(|i| format!("tag{i}")).collect();
        let prompt = tag_suggestion_prompt("notes/a.md", &content, &existing);

        assert!(prompt.contains("notes/a.md"));
        assert!(prompt.contains(&"z".repeat(TAG_PROMPT_CONTENT_CHARS)));
        assert!(!prompt.contains(&"z".repeat(TAG_PROMPT_CONTENT_CHARS + 1)));
        assert!(prompt.contains("tag19"));
        assert!(!prompt.contains("tag20"));
    }

    #[test]
    fn tag_list_is_normalized_and_deduplicated() {
        assert_eq!(
            parse_tag_list("Python, machine-learning,  python , \"Data\", "),
            vec!["python", "machine-learning", "data"]
        );
        assert!(parse_tag_list("  ,  ").is_empty());
    }

    #[tokio::test]
    async fn suggest_tags_uses_provider_reply() {
        let provider = ScriptedProvider::new(vec![ScriptedProvider::text(
            "finance, Budget",
        )]);
        let tags = suggest_tags(&provider, "a.csv", "q1 numbers", &[])
            .await
            .unwrap();
        assert_eq!(tags, vec!["finance", "budget"]);

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0][0]["role"], "user");
    }
}
