//! The agent processing loop.
//!
//! One [`Agent`] instance owns one conversation for one turn: callers
//! construct a fresh agent per request from shared read-only collaborators
//! (provider, tool registry, logger) and discard it when the turn ends.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use ansari_core::history::to_row;
use ansari_core::message::{Message, Role};
use ansari_core::store::MessageLogger;
use ansari_providers::{ChatRequest, Credentials, LlmProvider, ToolDefinition};
use ansari_tools::ToolRegistry;

use crate::round::{PartialToolCall, RoundState};
use crate::{AgentError, AgentSettings};

/// Substituted for a tool-result body when the adapter returned zero hits.
pub const NO_RESULTS_PLACEHOLDER: &str = "No results found";

/// Stream of prose fragments produced by one processing turn. A fatal error
/// arrives as the final item.
pub type AnswerStream = UnboundedReceiverStream<Result<String, AgentError>>;

pub struct Agent {
    provider: Arc<dyn LlmProvider>,
    credentials: Credentials,
    tools: Arc<ToolRegistry>,
    logger: Option<Arc<dyn MessageLogger>>,
    settings: AgentSettings,
    history: Vec<Message>,
}

impl Agent {
    /// Build an agent seeded with its system message. The system turn is
    /// fixed at construction and never mutated afterwards.
    pub fn new(
        system_prompt: impl Into<String>,
        provider: Arc<dyn LlmProvider>,
        credentials: Credentials,
        tools: Arc<ToolRegistry>,
        logger: Option<Arc<dyn MessageLogger>>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            provider,
            credentials,
            tools,
            logger,
            settings,
            history: vec![Message::system(system_prompt)],
        }
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Append a user turn and process it to completion, streaming prose
    /// fragments as they arrive.
    pub fn process_input(self, user_text: impl Into<String>) -> AnswerStream {
        let user = Message::user(user_text);
        self.spawn_turn(Some(user))
    }

    /// Process with a caller-supplied prior history (reconstructed from
    /// storage); the last turn of `messages` is expected to be the pending
    /// user message. The agent's own system turn is kept.
    pub fn replace_message_history(mut self, messages: Vec<Message>) -> AnswerStream {
        self.history
            .extend(messages.into_iter().filter(|m| m.role != Role::System));
        self.spawn_turn(None)
    }

    fn spawn_turn(mut self, pending_user: Option<Message>) -> AnswerStream {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            if let Some(user) = pending_user {
                self.push_message(user).await;
            }
            if let Err(e) = self.run_turn(&tx).await {
                warn!(%e, "Agent turn failed");
                let _ = tx.send(Err(e));
            }
        });
        UnboundedReceiverStream::new(rx)
    }

    /// Append a closed message to the history and hand it to the logger.
    /// Logging is a side channel; its failures never abort the turn.
    async fn push_message(&mut self, message: Message) {
        if let Some(logger) = &self.logger {
            logger.log(&to_row(&message)).await;
        }
        self.history.push(message);
    }

    fn build_request(&self, tools_enabled: bool) -> ChatRequest {
        let system = self
            .history
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.text());

        let tools = if tools_enabled && !self.tools.is_empty() {
            let defs: Vec<ToolDefinition> = self
                .tools
                .schemas()
                .into_iter()
                .map(|s| ToolDefinition {
                    name: s.name,
                    description: s.description,
                    parameters_schema: s.parameters,
                })
                .collect();
            Some(self.provider.format_tools(&defs))
        } else {
            None
        };

        ChatRequest {
            model: self.settings.model.clone(),
            messages: self.provider.format_messages(&self.history),
            max_tokens: self.settings.max_tokens,
            // Deterministic sampling.
            temperature: 0.0,
            tools,
            system,
        }
    }

    /// Drive the round loop until an assistant turn closes.
    async fn run_turn(
        &mut self,
        tx: &mpsc::UnboundedSender<Result<String, AgentError>>,
    ) -> Result<(), AgentError> {
        let mut failures: u32 = 0;
        let mut tool_rounds: u32 = 0;

        loop {
            // Once the tool-round budget is spent, the provider no longer
            // sees tool schemas and must answer in prose.
            let tools_enabled = tool_rounds < self.settings.max_tool_rounds;
            let request = self.build_request(tools_enabled);

            // Open the stream, retrying transient failures with a fixed
            // backoff against the whole-turn budget.
            let mut stream = loop {
                match self.provider.stream(&request, &self.credentials).await {
                    Ok(s) => break s,
                    Err(e) => {
                        failures += 1;
                        warn!(%e, failures, "Provider request failed");
                        if failures >= self.settings.max_failures {
                            return Err(AgentError::ProviderExhausted);
                        }
                        tokio::time::sleep(self.settings.retry_backoff).await;
                    }
                }
            };

            let mut round = RoundState::new();
            let mut stream_failed = false;
            while let Some(item) = stream.next().await {
                match item {
                    Ok(event) => {
                        if let Some(text) = round.step(event)? {
                            let _ = tx.send(Ok(text));
                        }
                    }
                    Err(e) => {
                        warn!(%e, "Stream interrupted mid-round");
                        stream_failed = true;
                        break;
                    }
                }
            }

            if stream_failed {
                failures += 1;
                if failures >= self.settings.max_failures {
                    return Err(AgentError::ProviderExhausted);
                }
                tokio::time::sleep(self.settings.retry_backoff).await;
                continue;
            }

            let outcome = round.finish();
            debug!(
                mode = ?outcome.mode,
                calls = outcome.calls.len(),
                stop_reason = outcome.stop_reason.as_deref().unwrap_or(""),
                "Round finished"
            );

            if outcome.calls.is_empty() {
                let tool_stop = outcome
                    .stop_reason
                    .as_deref()
                    .is_some_and(|r| self.provider.is_tool_use_stop(r));
                if tool_stop {
                    warn!("Provider signaled tool use but streamed no calls");
                }
                // Words round. The buffer, possibly empty, closes the
                // assistant turn.
                self.push_message(Message::assistant(outcome.text)).await;
                return Ok(());
            }

            tool_rounds += 1;
            let calls = outcome.calls;
            for (i, call) in calls.iter().enumerate() {
                let text = if i == 0 { outcome.text.as_str() } else { "" };
                match self.dispatch_call(call, text).await {
                    Ok(_) => {}
                    Err(e) => {
                        failures += 1;
                        if failures >= self.settings.max_failures {
                            return Err(e);
                        }
                        // Keep the history well-formed for the next round:
                        // the invocation is already appended, so answer it
                        // with an error result.
                        let AgentError::ToolRuntime { ref message, .. } = e else {
                            return Err(e);
                        };
                        self.push_message(Message::tool_result(
                            call.id.clone(),
                            call.name.clone(),
                            format!("Tool failed: {message}"),
                            Vec::new(),
                        ))
                        .await;
                    }
                }
            }

            // The last message is not a closed assistant turn (a tool
            // result, or the untouched user turn when every call was
            // skipped) — go around again. Skipped-call loops stay bounded
            // by the tool-round budget above.
        }
    }

    /// Handle one parsed-or-skipped tool call. Returns `Ok(true)` when a
    /// result was appended, `Ok(false)` when the call was skipped (unknown
    /// tool or malformed arguments), and an error when the adapter failed.
    async fn dispatch_call(
        &mut self,
        call: &PartialToolCall,
        round_text: &str,
    ) -> Result<bool, AgentError> {
        let raw_args = if call.arguments.trim().is_empty() {
            "{}"
        } else {
            call.arguments.as_str()
        };
        let input: serde_json::Value = match serde_json::from_str(raw_args) {
            Ok(v) => v,
            Err(e) => {
                warn!(tool = %call.name, %e, "Malformed tool arguments, skipping call");
                return Ok(false);
            }
        };

        let registry = Arc::clone(&self.tools);
        let Some(tool) = registry.get(&call.name) else {
            warn!(tool = %call.name, "Unknown tool, skipping call");
            return Ok(false);
        };

        info!(tool = %call.name, "Executing tool");
        let query = input
            .get("query")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        // The invocation turn goes in first so the result can reference it.
        let invocation = Message::assistant_tool_use(
            round_text,
            call.id.clone(),
            call.name.clone(),
            input.clone(),
        );

        match tool.run(&query).await {
            Ok(results) => {
                self.push_message(invocation).await;
                let references = tool.format_as_ref_list(&results);
                let listing = tool.format_as_list(&results);
                let content = if listing.is_empty() {
                    NO_RESULTS_PLACEHOLDER.to_string()
                } else {
                    listing.join("\n\n")
                };
                self.push_message(Message::tool_result(
                    call.id.clone(),
                    call.name.clone(),
                    content,
                    references,
                ))
                .await;
                Ok(true)
            }
            Err(e) => {
                self.push_message(invocation).await;
                Err(AgentError::ToolRuntime {
                    tool: call.name.clone(),
                    message: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use ansari_core::message::{ContentBlock, MessageContent};
    use ansari_providers::{EventStream, ModelApi, StreamEvent};
    use ansari_tools::{SearchHit, SearchResults, SearchTool};

    fn settings() -> AgentSettings {
        AgentSettings {
            model: "test-model".into(),
            max_tokens: 1024,
            max_failures: 3,
            max_tool_rounds: 4,
            retry_backoff: Duration::from_millis(0),
        }
    }

    fn creds() -> Credentials {
        Credentials::ApiKey {
            api_key: "test".into(),
        }
    }

    // --- Provider stubs ---

    struct FailingProvider {
        attempts: AtomicU32,
    }

    #[async_trait]
    impl LlmProvider for FailingProvider {
        fn id(&self) -> &str {
            "failing"
        }
        fn api(&self) -> ModelApi {
            ModelApi::AnthropicMessages
        }
        fn format_messages(&self, _history: &[Message]) -> Vec<serde_json::Value> {
            Vec::new()
        }
        fn format_tools(&self, _tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
            Vec::new()
        }
        fn is_tool_use_stop(&self, s: &str) -> bool {
            s == "tool_use"
        }
        async fn stream(
            &self,
            _request: &ChatRequest,
            _credentials: &Credentials,
        ) -> anyhow::Result<EventStream> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("connection refused")
        }
    }

    /// Replays one scripted fragment list per round, recording whether each
    /// request carried tool schemas.
    struct ScriptedProvider {
        rounds: Mutex<VecDeque<Vec<anyhow::Result<StreamEvent>>>>,
        tools_seen: Mutex<Vec<bool>>,
    }

    impl ScriptedProvider {
        fn new(rounds: Vec<Vec<anyhow::Result<StreamEvent>>>) -> Self {
            Self {
                rounds: Mutex::new(rounds.into_iter().collect()),
                tools_seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn id(&self) -> &str {
            "scripted"
        }
        fn api(&self) -> ModelApi {
            ModelApi::AnthropicMessages
        }
        fn format_messages(&self, history: &[Message]) -> Vec<serde_json::Value> {
            history
                .iter()
                .map(|m| json!({"role": format!("{:?}", m.role), "text": m.content.text()}))
                .collect()
        }
        fn format_tools(&self, tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
            tools.iter().map(|t| json!({"name": t.name})).collect()
        }
        fn is_tool_use_stop(&self, s: &str) -> bool {
            s == "tool_use"
        }
        async fn stream(
            &self,
            request: &ChatRequest,
            _credentials: &Credentials,
        ) -> anyhow::Result<EventStream> {
            self.tools_seen
                .lock()
                .unwrap()
                .push(request.tools.is_some());
            let round = self
                .rounds
                .lock()
                .unwrap()
                .pop_front()
                .expect("script exhausted");
            Ok(Box::pin(futures::stream::iter(round)))
        }
    }

    fn tool_call_round(id: &str, name: &str, args: &str) -> Vec<anyhow::Result<StreamEvent>> {
        vec![
            Ok(StreamEvent::ToolUseStart {
                index: 0,
                id: id.into(),
                name: name.into(),
            }),
            Ok(StreamEvent::ToolInputDelta {
                index: 0,
                partial_json: args.into(),
            }),
            Ok(StreamEvent::Done {
                stop_reason: "tool_use".into(),
            }),
        ]
    }

    fn prose_round(text: &str) -> Vec<anyhow::Result<StreamEvent>> {
        vec![
            Ok(StreamEvent::TextDelta { text: text.into() }),
            Ok(StreamEvent::Done {
                stop_reason: "end_turn".into(),
            }),
        ]
    }

    // --- Tool stubs ---

    struct RecordingTool {
        queries: Arc<Mutex<Vec<String>>>,
        hits: Vec<SearchHit>,
    }

    #[async_trait]
    impl SearchTool for RecordingTool {
        fn name(&self) -> &str {
            "search_quran"
        }
        fn description(&self) -> &str {
            "stub"
        }
        async fn run(&self, query: &str) -> anyhow::Result<SearchResults> {
            self.queries.lock().unwrap().push(query.to_string());
            Ok(SearchResults {
                hits: self.hits.clone(),
            })
        }
    }

    struct BrokenTool;

    #[async_trait]
    impl SearchTool for BrokenTool {
        fn name(&self) -> &str {
            "search_quran"
        }
        fn description(&self) -> &str {
            "stub"
        }
        async fn run(&self, _query: &str) -> anyhow::Result<SearchResults> {
            anyhow::bail!("backend down")
        }
    }

    fn registry_with(tool: Box<dyn SearchTool>) -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(tool);
        Arc::new(registry)
    }

    fn coral_hits() -> Vec<SearchHit> {
        vec![
            SearchHit {
                id: "55:22".into(),
                source: "Quran 55:22".into(),
                arabic: None,
                english: Some("From both of them emerge pearl and coral.".into()),
                grade: None,
            },
            SearchHit {
                id: "55:58".into(),
                source: "Quran 55:58".into(),
                arabic: None,
                english: Some("As if they were rubies and coral.".into()),
                grade: None,
            },
        ]
    }

    async fn collect(stream: AnswerStream) -> Vec<Result<String, AgentError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_retry_bound_exact_attempts() {
        let provider = Arc::new(FailingProvider {
            attempts: AtomicU32::new(0),
        });
        let agent = Agent::new(
            "system",
            provider.clone(),
            creds(),
            Arc::new(ToolRegistry::new()),
            None,
            settings(),
        );

        let items = collect(agent.process_input("hello")).await;
        assert_eq!(items.last(), Some(&Err(AgentError::ProviderExhausted)));
        // Exactly max_failures attempts, not more, not fewer.
        assert_eq!(provider.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_plain_prose_turn() {
        let provider = Arc::new(ScriptedProvider::new(vec![prose_round("Wa alaykum salam.")]));
        let agent = Agent::new(
            "system",
            provider,
            creds(),
            Arc::new(ToolRegistry::new()),
            None,
            settings(),
        );

        let items = collect(agent.process_input("salam")).await;
        let text: String = items.iter().filter_map(|r| r.as_ref().ok().cloned()).collect();
        assert_eq!(text, "Wa alaykum salam.");
        assert!(items.iter().all(|r| r.is_ok()));
    }

    #[tokio::test]
    async fn test_tool_dispatch_full_scenario() {
        let queries = Arc::new(Mutex::new(Vec::new()));
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_call_round("toolu_1", "search_quran", r#"{"query": "coral"}"#),
            prose_round("Corals appear in Surah Ar-Rahman."),
        ]));
        let mut agent = Agent::new(
            "system",
            provider,
            creds(),
            registry_with(Box::new(RecordingTool {
                queries: queries.clone(),
                hits: coral_hits(),
            })),
            None,
            settings(),
        );
        agent.push_message(Message::user("Are corals mentioned in the Quran?")).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        agent.run_turn(&tx).await.unwrap();
        drop(tx);

        // The adapter ran exactly once, with the parsed query.
        assert_eq!(queries.lock().unwrap().as_slice(), ["coral"]);

        // History: system, user, assistant invocation, tool result, assistant.
        let history = agent.history();
        assert_eq!(history.len(), 5);
        assert_eq!(history[2].role, Role::Assistant);
        assert_eq!(history[2].tool_use_ids(), vec!["toolu_1"]);
        assert_eq!(history[3].role, Role::Tool);
        assert_eq!(history[3].references().len(), 2);
        match &history[3].content {
            MessageContent::Blocks(blocks) => {
                assert!(matches!(&blocks[0],
                    ContentBlock::ToolResult { tool_use_id, content }
                    if tool_use_id == "toolu_1" && content.contains("pearl and coral")));
            }
            _ => panic!("expected blocks"),
        }
        assert_eq!(history[4].role, Role::Assistant);
        assert_eq!(history[4].content.text(), "Corals appear in Surah Ar-Rahman.");

        // Prose arrived only from the final round.
        let mut fragments = Vec::new();
        while let Ok(item) = rx.try_recv() {
            fragments.push(item.unwrap());
        }
        assert_eq!(fragments.join(""), "Corals appear in Surah Ar-Rahman.");
    }

    #[tokio::test]
    async fn test_unknown_tool_skipped_silently() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_call_round("toolu_9", "search_nothing", r#"{"query": "x"}"#),
            prose_round("Done."),
        ]));
        let mut agent = Agent::new(
            "system",
            provider,
            creds(),
            Arc::new(ToolRegistry::new()),
            None,
            settings(),
        );
        agent.push_message(Message::user("q")).await;

        let (tx, _rx) = mpsc::unbounded_channel();
        agent.run_turn(&tx).await.unwrap();

        // No invocation and no tool-result message for the skipped call.
        assert!(agent.history().iter().all(|m| m.tool_name.is_none()));
        assert_eq!(agent.history().last().unwrap().content.text(), "Done.");
    }

    #[tokio::test]
    async fn test_malformed_arguments_skipped() {
        let queries = Arc::new(Mutex::new(Vec::new()));
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_call_round("toolu_1", "search_quran", "{not json"),
            prose_round("Sorry, let me answer directly."),
        ]));
        let mut agent = Agent::new(
            "system",
            provider,
            creds(),
            registry_with(Box::new(RecordingTool {
                queries: queries.clone(),
                hits: Vec::new(),
            })),
            None,
            settings(),
        );
        agent.push_message(Message::user("q")).await;

        let (tx, _rx) = mpsc::unbounded_channel();
        agent.run_turn(&tx).await.unwrap();

        assert!(queries.lock().unwrap().is_empty());
        assert!(agent.history().iter().all(|m| m.tool_name.is_none()));
    }

    #[tokio::test]
    async fn test_empty_results_placeholder() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_call_round("toolu_1", "search_quran", r#"{"query": "zzz"}"#),
            prose_round("Nothing found."),
        ]));
        let mut agent = Agent::new(
            "system",
            provider,
            creds(),
            registry_with(Box::new(RecordingTool {
                queries: Arc::new(Mutex::new(Vec::new())),
                hits: Vec::new(),
            })),
            None,
            settings(),
        );
        agent.push_message(Message::user("q")).await;

        let (tx, _rx) = mpsc::unbounded_channel();
        agent.run_turn(&tx).await.unwrap();

        let tool_turn = agent
            .history()
            .iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        match &tool_turn.content {
            MessageContent::Blocks(blocks) => {
                assert!(matches!(&blocks[0],
                    ContentBlock::ToolResult { content, .. }
                    if content == NO_RESULTS_PLACEHOLDER));
            }
            _ => panic!("expected blocks"),
        }
    }

    #[tokio::test]
    async fn test_tool_round_budget_forces_words_only() {
        let mut s = settings();
        s.max_tool_rounds = 1;
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_call_round("toolu_1", "search_quran", r#"{"query": "a"}"#),
            prose_round("Final answer."),
        ]));
        let mut agent = Agent::new(
            "system",
            provider.clone(),
            creds(),
            registry_with(Box::new(RecordingTool {
                queries: Arc::new(Mutex::new(Vec::new())),
                hits: coral_hits(),
            })),
            None,
            s,
        );
        agent.push_message(Message::user("q")).await;

        let (tx, _rx) = mpsc::unbounded_channel();
        agent.run_turn(&tx).await.unwrap();

        let tools_seen = provider.tools_seen.lock().unwrap().clone();
        // First request advertises tools; after the budget is spent the
        // second request strips them.
        assert_eq!(tools_seen, vec![true, false]);
    }

    #[tokio::test]
    async fn test_protocol_violation_is_fatal() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![Ok(
            StreamEvent::ToolInputDelta {
                index: 0,
                partial_json: "{}".into(),
            },
        )]]));
        let agent = Agent::new(
            "system",
            provider,
            creds(),
            Arc::new(ToolRegistry::new()),
            None,
            settings(),
        );

        let items = collect(agent.process_input("q")).await;
        assert!(matches!(
            items.last(),
            Some(Err(AgentError::ProtocolViolation(_)))
        ));
    }

    #[tokio::test]
    async fn test_tool_failure_exhausts_budget() {
        let mut s = settings();
        s.max_failures = 1;
        let provider = Arc::new(ScriptedProvider::new(vec![tool_call_round(
            "toolu_1",
            "search_quran",
            r#"{"query": "a"}"#,
        )]));
        let agent = Agent::new(
            "system",
            provider,
            creds(),
            registry_with(Box::new(BrokenTool)),
            None,
            s,
        );

        let items = collect(agent.process_input("q")).await;
        assert!(matches!(
            items.last(),
            Some(Err(AgentError::ToolRuntime { .. }))
        ));
    }

    #[tokio::test]
    async fn test_tool_failure_within_budget_continues() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_call_round("toolu_1", "search_quran", r#"{"query": "a"}"#),
            prose_round("Recovered."),
        ]));
        let mut agent = Agent::new(
            "system",
            provider,
            creds(),
            registry_with(Box::new(BrokenTool)),
            None,
            settings(),
        );
        agent.push_message(Message::user("q")).await;

        let (tx, _rx) = mpsc::unbounded_channel();
        agent.run_turn(&tx).await.unwrap();

        // The failed call got an error result so the history stays paired.
        let tool_turn = agent
            .history()
            .iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        assert!(tool_turn.content.text().is_empty()); // result text lives in the block
        match &tool_turn.content {
            MessageContent::Blocks(blocks) => {
                assert!(matches!(&blocks[0],
                    ContentBlock::ToolResult { content, .. }
                    if content.starts_with("Tool failed:")));
            }
            _ => panic!("expected blocks"),
        }
        assert_eq!(agent.history().last().unwrap().content.text(), "Recovered.");
    }

    #[tokio::test]
    async fn test_mid_stream_error_retries_round() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            vec![
                Ok(StreamEvent::TextDelta { text: "Par".into() }),
                Err(anyhow::anyhow!("connection reset")),
            ],
            prose_round("Full answer."),
        ]));
        let agent = Agent::new(
            "system",
            provider,
            creds(),
            Arc::new(ToolRegistry::new()),
            None,
            settings(),
        );

        let items = collect(agent.process_input("q")).await;
        assert!(items.iter().all(|r| r.is_ok()));
        let text: String = items.into_iter().map(|r| r.unwrap()).collect();
        assert!(text.ends_with("Full answer."));
    }

    #[tokio::test]
    async fn test_replace_message_history() {
        let provider = Arc::new(ScriptedProvider::new(vec![prose_round("Continuing.")]));
        let agent = Agent::new(
            "system",
            provider,
            creds(),
            Arc::new(ToolRegistry::new()),
            None,
            settings(),
        );

        let prior = vec![
            Message::user("first question"),
            Message::assistant("first answer"),
            Message::user("follow-up"),
        ];
        let items = collect(agent.replace_message_history(prior)).await;
        let text: String = items.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(text, "Continuing.");
    }

    #[tokio::test]
    async fn test_empty_round_closes_with_empty_assistant_turn() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![Ok(StreamEvent::Done {
            stop_reason: "end_turn".into(),
        })]]));
        let mut agent = Agent::new(
            "system",
            provider,
            creds(),
            Arc::new(ToolRegistry::new()),
            None,
            settings(),
        );
        agent.push_message(Message::user("q")).await;

        let (tx, _rx) = mpsc::unbounded_channel();
        agent.run_turn(&tx).await.unwrap();

        let last = agent.history().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        // Degenerate but structurally valid: empty text, never zero blocks.
        assert_eq!(last.content.text(), "");
    }
}
