use std::sync::Arc;

use serde_json::Value;

use crate::{
    error::{Error, Result},
    llm::{Completion, LlmProvider},
    tools::{self, Toolbox},
};

/// Upper bound on model round-trips for one user message.
pub const MAX_ITERATIONS: usize = 16;

pub const SYSTEM_PROMPT: &str = "You are a personal file concierge. You help \
the user find, organize and understand the files in their sandbox.\n\
Use the available tools to search files semantically, read them, suggest and \
apply tags, and group files into collections. File paths are always relative \
to the sandbox root. Prefer searching before answering questions about file \
contents, and confirm what you changed after tagging or collecting files.";

/// Function-calling loop with a multi-turn conversation.
///
/// History is kept per instance, so consecutive [`Orchestrator::query`]
/// calls continue the same conversation until [`Orchestrator::reset`].
pub struct Orchestrator {
    provider: Arc<dyn LlmProvider>,
    toolbox: Toolbox,
    declarations: Vec<Value>,
    history: Vec<Value>,
    max_iterations: usize,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn LlmProvider>, toolbox: Toolbox) -> Self {
        Self {
            provider,
            toolbox,
            declarations: tools::declarations(),
            history: vec![system_message()],
            max_iterations: MAX_ITERATIONS,
        }
    }

    /// Build from a toolbox carrying a language model.
    pub fn from_toolbox(toolbox: Toolbox) -> Result<Self> {
        let provider = toolbox.llm().cloned().ok_or_else(|| {
            Error::Validation("language model not configured".into())
        })?;
        Ok(Self::new(provider, toolbox))
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    pub fn history(&self) -> &[Value] {
        &self.history
    }

    /// Forget the conversation, keeping only the system prompt.
    pub fn reset(&mut self) {
        self.history.truncate(1);
    }

    /// Answer one user message, running tools as the model requests.
    ///
    /// On failure the history is rolled back to where it was before the
    /// message, so the conversation stays well-formed.
    pub async fn query(&mut self, text: &str) -> Result<String> {
        let checkpoint = self.history.len();
        self.history.push(serde_json::json!({
            "role": "user",
            "content": text,
        }));

        let result = self.run_loop().await;
        if result.is_err() {
            self.history.truncate(checkpoint);
        }
        result
    }

    async fn run_loop(&mut self) -> Result<String> {
        for iteration in 1..=self.max_iterations {
            let completion = self
                .provider
                .complete(&self.history, &self.declarations)
                .await?;

            if completion.tool_calls.is_empty() {
                let answer = completion.text.unwrap_or_default();
                self.history.push(serde_json::json!({
                    "role": "assistant",
                    "content": answer,
                }));
                tracing::debug!(iteration, "model answered");
                return Ok(answer);
            }

            tracing::debug!(
                iteration,
                calls = completion.tool_calls.len(),
                "model requested tools"
            );
            self.history.push(assistant_tool_message(&completion));

            for call in &completion.tool_calls {
                let response = self
                    .toolbox
                    .execute_named(&call.name, call.arguments.clone())
                    .await;
                tracing::info!(
                    tool = %call.name,
                    success = response.is_success(),
                    "tool call"
                );
                self.history.push(serde_json::json!({
                    "role": "tool",
                    "tool_call_id": call.id,
                    "content": response.to_value().to_string(),
                }));
            }
        }

        Err(Error::Upstream(format!(
            "no answer after {} model calls",
            self.max_iterations
        )))
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("model", &self.provider.model())
            .field("history", &self.history.len())
            .field("max_iterations", &self.max_iterations)
            .finish_non_exhaustive()
    }
}

fn system_message() -> Value {
    serde_json::json!({ "role": "system", "content": SYSTEM_PROMPT })
}

fn assistant_tool_message(completion: &Completion) -> Value {
    let tool_calls: Vec<Value> = completion
        .tool_calls
        .iter()
        .map(|tc| {
            serde_json::json!({
                "id": tc.id,
                "type": "function",
                "function": {
                    "name": tc.name,
                    "arguments": tc.arguments.to_string(),
                }
            })
        })
        .collect();
    serde_json::json!({
        "role": "assistant",
        "content": completion.text,
        "tool_calls": tool_calls,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        embedding::HashedEmbedder,
        llm::testing::ScriptedProvider,
        memory::LongTermMemory,
        processor::FileProcessor,
        sandbox::Sandbox,
        search::RankingWeights,
        vector_store::VectorStore,
    };

    struct Fixture {
        _tmp: tempfile::TempDir,
        toolbox: Toolbox,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let sandbox = Sandbox::new(tmp.path().join("sandbox"));
            sandbox.bootstrap().unwrap();
            std::fs::write(sandbox.root().join("notes/todo.md"), "buy milk")
                .unwrap();
            let memory =
                LongTermMemory::open(&tmp.path().join("memory.redb")).unwrap();
            let vectors = VectorStore::open(
                &tmp.path().join("vectors.redb"),
                Box::new(HashedEmbedder::default()),
            )
            .unwrap();
            let toolbox = Toolbox::new(
                Arc::new(memory),
                Arc::new(vectors),
                sandbox,
                FileProcessor::default(),
                RankingWeights::default(),
            );
            Self { _tmp: tmp, toolbox }
        }

        fn orchestrator(
            &self,
            replies: Vec<Completion>,
        ) -> (Orchestrator, Arc<ScriptedProvider>) {
            let provider = Arc::new(ScriptedProvider::new(replies));
            let orch =
                Orchestrator::new(provider.clone(), self.toolbox.clone());
            (orch, provider)
        }
    }

    #[tokio::test]
    async fn plain_answer() {
        let fx = Fixture::new();
        let (mut orch, provider) =
            fx.orchestrator(vec![ScriptedProvider::text("Hello!")]);

        assert_eq!(orch.query("hi").await.unwrap(), "Hello!");
        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0][0]["role"], "system");
        assert_eq!(requests[0][1]["content"], "hi");
    }

    #[tokio::test]
    async fn executes_tool_calls_and_feeds_results_back() {
        let fx = Fixture::new();
        let (mut orch, provider) = fx.orchestrator(vec![
            ScriptedProvider::call(
                "call_1",
                "apply_tags",
                json!({"file_path": "notes/todo.md", "tags": ["Errands"]}),
            ),
            ScriptedProvider::text("Tagged notes/todo.md as errands."),
        ]);

        let answer = orch.query("tag my todo list").await.unwrap();
        assert_eq!(answer, "Tagged notes/todo.md as errands.");
        assert_eq!(
            fx.toolbox.memory().get_file_tags("notes/todo.md").unwrap(),
            vec!["errands"]
        );

        let requests = provider.requests.lock().unwrap();
        let second = &requests[1];
        assert_eq!(second[2]["role"], "assistant");
        assert_eq!(
            second[2]["tool_calls"][0]["function"]["name"],
            "apply_tags"
        );
        assert_eq!(second[3]["role"], "tool");
        assert_eq!(second[3]["tool_call_id"], "call_1");
        let payload: Value =
            serde_json::from_str(second[3]["content"].as_str().unwrap())
                .unwrap();
        assert_eq!(payload["status"], "success");
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_to_the_model() {
        let fx = Fixture::new();
        let (mut orch, provider) = fx.orchestrator(vec![
            ScriptedProvider::call("c", "rm_rf", json!({})),
            ScriptedProvider::text("Sorry, I can't do that."),
        ]);

        orch.query("delete everything").await.unwrap();
        let requests = provider.requests.lock().unwrap();
        let payload: Value =
            serde_json::from_str(requests[1][3]["content"].as_str().unwrap())
                .unwrap();
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_kind"], "validation");
    }

    #[tokio::test]
    async fn history_spans_turns_until_reset() {
        let fx = Fixture::new();
        let (mut orch, provider) = fx.orchestrator(vec![
            ScriptedProvider::text("one"),
            ScriptedProvider::text("two"),
            ScriptedProvider::text("three"),
        ]);

        orch.query("first").await.unwrap();
        orch.query("second").await.unwrap();
        assert_eq!(orch.history().len(), 5);

        orch.reset();
        assert_eq!(orch.history().len(), 1);
        orch.query("third").await.unwrap();

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests[1].len(), 4);
        assert_eq!(requests[2].len(), 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_iterations() {
        let fx = Fixture::new();
        let replies = (0..3)
            .map(|i| {
                ScriptedProvider::call(&format!("c{i}"), "list_tags", json!({}))
            })
            .collect();
        let (orch, _) = fx.orchestrator(replies);
        let mut orch = orch.with_max_iterations(3);

        let err = orch.query("loop forever").await.unwrap_err();
        assert!(matches!(err, Error::Upstream(_)));
        assert_eq!(orch.history().len(), 1);
    }

    #[test]
    fn requires_a_language_model() {
        let fx = Fixture::new();
        let err = Orchestrator::from_toolbox(fx.toolbox.clone()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("language model not configured"));
    }
}
