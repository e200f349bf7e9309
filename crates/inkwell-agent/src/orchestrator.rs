//! The agent orchestrator.
//!
//! Drives the tool-calling loop: ask the model, run or gate each requested
//! tool call, feed the results back, repeat until the model stops asking
//! for tools, the iteration bound is hit, a call is rejected, or the run is
//! stopped.
//!
//! ```text
//! idle ──> running(0) ──> awaiting_approval ──> running(0) ──> running(1) ──> … ──> idle
//!               │                 │
//!               └──── stop ───────┴──> stopped ──> idle
//! ```
//!
//! The orchestrator is shared (`Arc<AgentOrchestrator>`): one task awaits
//! [`AgentOrchestrator::run_agent`] while UI code calls
//! [`approve`](AgentOrchestrator::approve), [`reject`](AgentOrchestrator::reject)
//! and [`stop`](AgentOrchestrator::stop) and observes [`AgentEvent`]s.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::approval::{ApprovalDecision, ApprovalGate, PendingApproval};
use crate::config::ContextSettings;
use crate::error::{AgentError, Result};
use crate::execution::{ExecutionStatus, ToolExecution};
use crate::llm::context::build_context;
use crate::llm::events::{ParsedStreamEvent, StreamCollector};
use crate::llm::provider::LlmProvider;
use crate::llm::types::{
    CompletionRequest, CompletionResponse, FinishReason, Message, ToolCall, ToolChoice,
    ToolResult, ToolSpec, new_call_id,
};
use crate::settings::AgenticSettings;
use crate::tools::{StoreAccess, ToolExecutor, ToolRegistry};

/// Capacity of the event broadcast channel.
const EVENT_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Observable orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    /// A plain chat completion is streaming.
    Streaming,
    Running { iteration: u32 },
    AwaitingApproval { iteration: u32 },
    /// Stop was requested; the run is unwinding.
    Stopped,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The model finished without requesting more tools.
    Completed,
    /// The iteration bound was reached while the model still wanted tools.
    MaxIterations,
    /// A gated call was rejected.
    Rejected,
    /// The run was stopped.
    Cancelled,
    /// Asking the model failed; the message was added to the conversation.
    Failed(String),
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Model round trips that completed.
    pub iterations: u32,
}

/// Notifications for UI layers.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Assistant text as it arrives.
    TextDelta(String),
    MessageAppended(Message),
    ExecutionUpdated(ToolExecution),
    ApprovalRequested(PendingApproval),
    StatusChanged(AgentStatus),
    RunFinished(RunReport),
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

struct ActiveRun {
    token: CancellationToken,
    agentic: bool,
}

struct State {
    messages: Vec<Message>,
    executions: Vec<ToolExecution>,
    status: AgentStatus,
    streaming: bool,
    active: Option<ActiveRun>,
}

/// Coordinates providers, tools and the approval gate for one conversation.
pub struct AgentOrchestrator {
    provider: RwLock<Arc<dyn LlmProvider>>,
    executor: ToolExecutor,
    context: ContextSettings,
    stream_responses: bool,
    gate: ApprovalGate,
    state: Mutex<State>,
    events: broadcast::Sender<AgentEvent>,
}

impl std::fmt::Debug for AgentOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentOrchestrator")
            .field("provider", &self.provider().name())
            .field("status", &self.status())
            .finish()
    }
}

impl AgentOrchestrator {
    /// Create an orchestrator using `provider` and the tools in `registry`.
    pub fn new(provider: Arc<dyn LlmProvider>, registry: ToolRegistry) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            provider: RwLock::new(provider),
            executor: ToolExecutor::new(registry),
            context: ContextSettings::default(),
            stream_responses: false,
            gate: ApprovalGate::new(),
            state: Mutex::new(State {
                messages: Vec::new(),
                executions: Vec::new(),
                status: AgentStatus::Idle,
                streaming: false,
                active: None,
            }),
            events,
        }
    }

    /// Set how history is sent to the provider.
    pub fn with_context(mut self, context: ContextSettings) -> Self {
        self.context = context;
        self
    }

    /// Use streaming completions inside agent runs so text arrives as
    /// [`AgentEvent::TextDelta`]s while the model is still answering.
    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.stream_responses = enabled;
        self
    }

    // -- Provider -------------------------------------------------------------

    /// The adapter used for the next request.
    pub fn provider(&self) -> Arc<dyn LlmProvider> {
        Arc::clone(&self.provider.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Swap in a new adapter.  A run in progress keeps the adapter it
    /// started with.
    pub fn set_provider(&self, provider: Arc<dyn LlmProvider>) {
        info!(provider = provider.name(), model = provider.model(), "provider changed");
        *self.provider.write().unwrap_or_else(PoisonError::into_inner) = provider;
    }

    pub fn registry(&self) -> &ToolRegistry {
        self.executor.registry()
    }

    // -- Observers ------------------------------------------------------------

    /// Subscribe to orchestrator events.
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    /// Tool executions of the current (or last) agent run.
    pub fn tool_executions(&self) -> Vec<ToolExecution> {
        self.lock().executions.clone()
    }

    pub fn pending_approval(&self) -> Option<PendingApproval> {
        self.gate.pending()
    }

    pub fn status(&self) -> AgentStatus {
        self.lock().status
    }

    pub fn is_agent_running(&self) -> bool {
        self.lock().active.as_ref().is_some_and(|r| r.agentic)
    }

    pub fn is_streaming(&self) -> bool {
        self.lock().streaming
    }

    /// Forget the conversation.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::RunInProgress`] while a run is active.
    pub fn clear_history(&self) -> Result<()> {
        let mut state = self.lock();
        if state.active.is_some() {
            return Err(AgentError::RunInProgress);
        }
        state.messages.clear();
        state.executions.clear();
        Ok(())
    }

    // -- Gate entries ---------------------------------------------------------

    /// Approve the pending tool call, running it against `store`.
    pub fn approve(&self, store: Arc<dyn StoreAccess>) -> bool {
        let resolved = self.gate.approve(store);
        debug!(resolved, "approve requested");
        resolved
    }

    /// Reject the pending tool call.  Ends the run.
    pub fn reject(&self, reason: impl Into<String>) -> bool {
        let resolved = self.gate.reject(reason);
        debug!(resolved, "reject requested");
        resolved
    }

    /// Stop the active run.  Returns false when nothing was running.
    pub fn stop(&self) -> bool {
        // Clear the gate before cancelling so an approval racing with the
        // stop either lands first or finds nothing pending.
        self.gate.cancel();
        let token = {
            let mut state = self.lock();
            let Some(run) = state.active.as_ref() else {
                return false;
            };
            let token = run.token.clone();
            if !token.is_cancelled() {
                state.status = AgentStatus::Stopped;
            }
            token
        };
        if token.is_cancelled() {
            return false;
        }
        token.cancel();
        info!("stop requested");
        self.emit(AgentEvent::StatusChanged(AgentStatus::Stopped));
        true
    }

    // -- Entry points ---------------------------------------------------------

    /// Handle a user prompt according to `settings`: a plain chat turn when
    /// the agent is disabled, an agent run otherwise.
    pub async fn submit(
        &self,
        prompt: &str,
        settings: &AgenticSettings,
        store: Arc<dyn StoreAccess>,
    ) -> Result<RunReport> {
        if settings.enabled {
            self.run_agent(prompt, settings, store).await
        } else {
            self.send_message(prompt).await
        }
    }

    /// One streamed completion without tools.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::RunInProgress`] while another run is active.
    /// Provider failures are reported through the returned outcome and an
    /// error message in the conversation.
    pub async fn send_message(&self, prompt: &str) -> Result<RunReport> {
        let (token, history) = self.begin(prompt, false)?;
        let provider = self.provider();
        self.set_status(AgentStatus::Streaming);

        let mut request = CompletionRequest::new(prompt);
        request.system_prompt = Some(self.context.system_prompt().to_owned());
        request.history = history;

        info!(provider = provider.name(), model = provider.model(), "sending chat message");
        let outcome = tokio::select! {
            response = self.stream_once(provider.as_ref(), &request) => match response {
                Ok(response) => {
                    self.append(Message::assistant(response.content));
                    RunOutcome::Completed
                }
                Err(e) => self.fail(&e),
            },
            _ = token.cancelled() => RunOutcome::Cancelled,
        };

        Ok(self.finish(RunReport {
            outcome,
            iterations: 1,
        }))
    }

    /// Run the agent loop for `prompt`.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::RunInProgress`] while another run is active.
    /// Everything else ends the run with a [`RunOutcome`].
    pub async fn run_agent(
        &self,
        prompt: &str,
        settings: &AgenticSettings,
        store: Arc<dyn StoreAccess>,
    ) -> Result<RunReport> {
        let (token, history) = self.begin(prompt, true)?;
        let provider = self.provider();
        let tools = self.registry().filtered(&settings.enabled_tools);
        let specs = tools.specs();

        info!(
            provider = provider.name(),
            model = provider.model(),
            max_iterations = settings.max_iterations,
            approval_mode = %settings.approval_mode,
            tool_count = specs.len(),
            "starting agent run"
        );

        let mut iteration = 0u32;
        let mut outcome = None;
        let mut seen_ids = HashSet::new();

        while iteration < settings.max_iterations {
            if token.is_cancelled() {
                outcome = Some(RunOutcome::Cancelled);
                break;
            }
            self.set_status(AgentStatus::Running { iteration });

            // The prompt is only sent once; later turns continue from the
            // tool results already in the transcript.
            let request = if iteration == 0 {
                self.request(prompt, history.clone(), &specs)
            } else {
                let window = build_context(&self.messages(), self.context.window());
                self.request("", window, &specs)
            };

            debug!(iteration, "asking model");
            let response = tokio::select! {
                r = self.ask(provider.as_ref(), &request) => r,
                _ = token.cancelled() => {
                    outcome = Some(RunOutcome::Cancelled);
                    break;
                }
            };
            let mut response = match response {
                Ok(r) => r,
                Err(e) => {
                    outcome = Some(self.fail(&e));
                    break;
                }
            };
            if token.is_cancelled() {
                outcome = Some(RunOutcome::Cancelled);
                break;
            }

            assign_unique_ids(&mut response.tool_calls, &mut seen_ids);
            if response.has_text() || !response.tool_calls.is_empty() {
                self.append(Message::assistant_with_tools(
                    response.content.clone(),
                    response.tool_calls.clone(),
                ));
            }

            if let Some(stop) = self
                .run_tool_calls(&response.tool_calls, &tools, settings, &store, &token, iteration)
                .await
            {
                outcome = Some(stop);
                iteration += 1;
                break;
            }

            iteration += 1;
            if response.finish_reason != FinishReason::ToolUse {
                outcome = Some(RunOutcome::Completed);
                break;
            }
        }

        let outcome = outcome.unwrap_or(RunOutcome::MaxIterations);
        if outcome == RunOutcome::MaxIterations {
            info!(max_iterations = settings.max_iterations, "agent run hit the iteration bound");
        }
        Ok(self.finish(RunReport {
            outcome,
            iterations: iteration,
        }))
    }

    // -- Loop steps -----------------------------------------------------------

    fn request(&self, prompt: &str, history: Vec<Message>, specs: &[ToolSpec]) -> CompletionRequest {
        let mut request = CompletionRequest::new(prompt);
        request.system_prompt = Some(self.context.system_prompt().to_owned());
        request.history = history;
        request.tools = specs.to_vec();
        if !specs.is_empty() {
            request.tool_choice = Some(ToolChoice::Auto);
        }
        request
    }

    async fn ask(
        &self,
        provider: &dyn LlmProvider,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse> {
        if !self.stream_responses {
            let response = provider.complete(request).await?;
            if response.has_text() {
                self.emit(AgentEvent::TextDelta(response.content.clone()));
            }
            return Ok(response);
        }
        self.stream_once(provider, request).await
    }

    async fn stream_once(
        &self,
        provider: &dyn LlmProvider,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse> {
        self.lock().streaming = true;
        let mut collector = StreamCollector::new(provider.name(), provider.model());
        let events = &self.events;
        let mut sink = |event: ParsedStreamEvent| {
            if let ParsedStreamEvent::Text(text) = &event {
                let _ = events.send(AgentEvent::TextDelta(text.clone()));
            }
            collector.apply(&event);
        };
        provider.stream_complete(request, &mut sink).await;
        self.lock().streaming = false;
        collector.into_response()
    }

    /// Handle the tool calls of one response in order.  Returns the run
    /// outcome when the run has to end here.
    async fn run_tool_calls(
        &self,
        calls: &[ToolCall],
        tools: &ToolRegistry,
        settings: &AgenticSettings,
        store: &Arc<dyn StoreAccess>,
        token: &CancellationToken,
        iteration: u32,
    ) -> Option<RunOutcome> {
        for call in calls {
            if token.is_cancelled() {
                return Some(RunOutcome::Cancelled);
            }
            let index = self.record(ToolExecution::new(call.clone()));

            let Some(tool) = tools.get(&call.name) else {
                warn!(tool = %call.name, call_id = %call.id, "model requested an unknown tool");
                let err = AgentError::UnknownTool {
                    tool_name: call.name.clone(),
                };
                let result = ToolResult::error(&call.id, format!("Error: {err}"));
                self.update(index, |e| e.finish(result.clone()));
                self.append(Message::tool_result(result));
                continue;
            };

            let run_store = if settings.approval_mode.requires_approval(tool) {
                match self.await_approval(index, call, tools, token, iteration).await {
                    Approval::Granted(store) => store,
                    Approval::Denied(reason) => {
                        info!(tool = %call.name, call_id = %call.id, "tool call rejected");
                        self.update(index, |e| e.transition(ExecutionStatus::Rejected));
                        let text = if reason.trim().is_empty() {
                            "Rejected by user.".to_owned()
                        } else {
                            format!("Rejected by user: {reason}")
                        };
                        self.append(Message::tool_result(ToolResult::error(&call.id, text)));
                        return Some(RunOutcome::Rejected);
                    }
                    Approval::Cancelled => return Some(RunOutcome::Cancelled),
                }
            } else {
                Arc::clone(store)
            };

            self.update(index, |e| e.transition(ExecutionStatus::Running));
            let result = self.executor.execute(call, run_store.as_ref()).await;
            self.update(index, |e| e.finish(result.clone()));
            self.append(Message::tool_result(result));
        }
        None
    }

    async fn await_approval(
        &self,
        index: usize,
        call: &ToolCall,
        tools: &ToolRegistry,
        token: &CancellationToken,
        iteration: u32,
    ) -> Approval {
        let execution_id = {
            let state = self.lock();
            state.executions.get(index).map(|e| e.id)
        };
        let Some(execution_id) = execution_id else {
            return Approval::Cancelled;
        };
        let view = PendingApproval {
            execution_id,
            tool_call: call.clone(),
            description: tools.describe_call(call),
            requested_at: Utc::now(),
        };
        let rx = match self.gate.open(view.clone()) {
            Ok(rx) => rx,
            Err(e) => {
                warn!(error = %e, "could not open approval gate");
                return Approval::Cancelled;
            }
        };

        info!(tool = %call.name, call_id = %call.id, "awaiting approval");
        self.set_status(AgentStatus::AwaitingApproval { iteration });
        self.emit(AgentEvent::ApprovalRequested(view));

        let decision = tokio::select! {
            biased;
            decision = rx => decision.ok(),
            _ = token.cancelled() => None,
        };
        self.gate.cancel();

        match decision {
            Some(ApprovalDecision::Approved(store)) => {
                self.update(index, |e| e.transition(ExecutionStatus::Approved));
                self.set_status(AgentStatus::Running { iteration });
                Approval::Granted(store)
            }
            Some(ApprovalDecision::Rejected(reason)) => Approval::Denied(reason),
            None => Approval::Cancelled,
        }
    }

    // -- Bookkeeping ----------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: AgentEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Claim the run slot, record the prompt and return the history that
    /// precedes it.
    fn begin(&self, prompt: &str, agentic: bool) -> Result<(CancellationToken, Vec<Message>)> {
        let token = CancellationToken::new();
        let message = Message::user(prompt);
        let history = {
            let mut state = self.lock();
            if state.active.is_some() {
                return Err(AgentError::RunInProgress);
            }
            state.active = Some(ActiveRun {
                token: token.clone(),
                agentic,
            });
            if agentic {
                state.executions.clear();
            }
            let history = build_context(&state.messages, self.context.window());
            state.messages.push(message.clone());
            history
        };
        self.emit(AgentEvent::MessageAppended(message));
        Ok((token, history))
    }

    fn finish(&self, report: RunReport) -> RunReport {
        self.gate.cancel();
        {
            let mut state = self.lock();
            state.active = None;
            state.streaming = false;
            state.status = AgentStatus::Idle;
        }
        info!(outcome = ?report.outcome, iterations = report.iterations, "run finished");
        self.emit(AgentEvent::StatusChanged(AgentStatus::Idle));
        self.emit(AgentEvent::RunFinished(report.clone()));
        report
    }

    /// Record a provider failure as a user-visible message.
    fn fail(&self, err: &AgentError) -> RunOutcome {
        let text = format!("Error ({}): {err}", err.kind());
        warn!(error = %err, "provider request failed");
        self.append(Message::assistant_error(text.clone()));
        RunOutcome::Failed(text)
    }

    fn set_status(&self, status: AgentStatus) {
        {
            let mut state = self.lock();
            // A stop request wins over later progress updates.
            if state.status == AgentStatus::Stopped {
                return;
            }
            state.status = status;
        }
        self.emit(AgentEvent::StatusChanged(status));
    }

    fn append(&self, message: Message) {
        self.lock().messages.push(message.clone());
        self.emit(AgentEvent::MessageAppended(message));
    }

    fn record(&self, execution: ToolExecution) -> usize {
        let index = {
            let mut state = self.lock();
            state.executions.push(execution.clone());
            state.executions.len() - 1
        };
        self.emit(AgentEvent::ExecutionUpdated(execution));
        index
    }

    fn update(&self, index: usize, f: impl FnOnce(&mut ToolExecution) -> bool) {
        let updated = {
            let mut state = self.lock();
            match state.executions.get_mut(index) {
                Some(e) => {
                    if f(e) {
                        Some(e.clone())
                    } else {
                        None
                    }
                }
                None => None,
            }
        };
        if let Some(execution) = updated {
            self.emit(AgentEvent::ExecutionUpdated(execution));
        }
    }
}

/// Give every call of a run its own id.  Empty ids and ids already used in
/// the run are replaced before the assistant message is recorded.
fn assign_unique_ids(calls: &mut [ToolCall], seen: &mut HashSet<String>) {
    for call in calls {
        if call.id.is_empty() || seen.contains(&call.id) {
            let id = new_call_id();
            warn!(tool = %call.name, old_id = %call.id, new_id = %id, "replacing missing or repeated call id");
            call.id = id;
        }
        seen.insert(call.id.clone());
    }
}

enum Approval {
    Granted(Arc<dyn StoreAccess>),
    Denied(String),
    Cancelled,
}
