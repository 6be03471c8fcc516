//! Tool dispatch loop: run a model-requested function, feed the result back,
//! and continue until the model answers in plain text.

use std::sync::Mutex;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::manager::{GenerateOptions, ProviderManager};
use crate::message::{FunctionCallRequest, Message};
use crate::providers::ModelOutput;
use crate::tools::{ToolError, ToolRegistry, ToolResult};
use crate::{ParleyError, Result};

/// Default cap on function-call rounds per turn
pub const DEFAULT_MAX_ITERATIONS: usize = 5;

/// Where a dispatch run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchState {
    AwaitingModel,
    HaveFunctionCall,
    Dispatching,
    AwaitingContinuation,
    Done,
    Errored,
}

impl DispatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DispatchState::Done | DispatchState::Errored)
    }
}

/// Lightweight counters for observability
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchStats {
    pub total_rounds: u64,
    pub total_tool_calls: u64,
    pub total_tool_errors: u64,
    pub rejected_calls: u64,
    pub avg_tool_latency_ms: f64,
}

/// Executes function calls against a [`ToolRegistry`] and resubmits the
/// conversation to the [`ProviderManager`] for a continuation.
///
/// Continuations go through the manager's internal completion step, not
/// [`ProviderManager::generate_response`]: the provider/model overrides were
/// already committed for this turn and are not applied again, and a function
/// call in the continuation stays in this loop instead of starting a nested one.
#[derive(Debug)]
pub struct ToolDispatchLoop {
    max_iterations: usize,
    stats: Mutex<DispatchStats>,
}

impl Default for ToolDispatchLoop {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITERATIONS)
    }
}

impl ToolDispatchLoop {
    pub fn new(max_iterations: usize) -> Self {
        Self {
            max_iterations: max_iterations.max(1),
            stats: Mutex::new(DispatchStats::default()),
        }
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record<F: FnOnce(&mut DispatchStats)>(&self, f: F) {
        f(&mut *self.stats.lock().unwrap_or_else(|e| e.into_inner()));
    }

    /// Drive `call` to a plain-text answer.
    ///
    /// Unknown functions, missing required arguments and tool failures end the
    /// run with a descriptive message; the model is not consulted again. Provider
    /// errors during a continuation propagate. Continuations run on the state
    /// committed at the start of the turn, without streaming. More than `max_iterations`
    /// consecutive function calls yields [`ParleyError::ToolLoopLimit`].
    #[tracing::instrument(name = "dispatch", skip_all, fields(function = %call.name))]
    pub async fn run(
        &self,
        manager: &ProviderManager,
        tools: &ToolRegistry,
        messages: &[Message],
        call: FunctionCallRequest,
        options: &GenerateOptions,
    ) -> Result<String> {
        let mut context = messages.to_vec();
        let mut call = call;
        let mut state = DispatchState::HaveFunctionCall;

        for round in 1..=self.max_iterations {
            self.record(|s| s.total_rounds += 1);
            transition(&mut state, DispatchState::Dispatching, round);

            let result = match self.execute(tools, &call).await {
                Ok(result) => result,
                Err(e) => {
                    transition(&mut state, DispatchState::Errored, round);
                    return Ok(describe_failure(&call.name, &e));
                }
            };

            context.push(Message::system(format!(
                "Function {} returned: {}",
                call.name, result
            )));

            transition(&mut state, DispatchState::AwaitingContinuation, round);
            match manager.complete(&context, options, false).await {
                Ok(ModelOutput::FunctionCall(next)) => {
                    debug!(target: "tool_dispatch", round, next = %next.name, "Continuation requested another function");
                    call = next;
                    transition(&mut state, DispatchState::HaveFunctionCall, round);
                }
                Ok(ModelOutput::Text(text)) => {
                    transition(&mut state, DispatchState::Done, round);
                    return Ok(text);
                }
                Ok(ModelOutput::Stream(stream)) => {
                    let text = ProviderManager::process_streaming_response(stream).await?;
                    transition(&mut state, DispatchState::Done, round);
                    return Ok(text);
                }
                Err(e) => {
                    transition(&mut state, DispatchState::Errored, round);
                    return Err(e);
                }
            }
        }

        transition(&mut state, DispatchState::Errored, self.max_iterations);
        warn!(target: "tool_dispatch", limit = self.max_iterations, function = %call.name, "Tool loop limit reached");
        Err(ParleyError::ToolLoopLimit(self.max_iterations))
    }

    /// Validate and invoke one call, returning the tool output as text.
    ///
    /// The callable is never invoked while a required parameter is absent.
    pub async fn execute(&self, tools: &ToolRegistry, call: &FunctionCallRequest) -> ToolResult<String> {
        let args = call.parse_arguments();

        let Some(required) = tools.required_params(&call.name) else {
            self.record(|s| s.rejected_calls += 1);
            warn!(target: "tool_dispatch", function = %call.name, "Function not found");
            return Err(ToolError::NotFound(call.name.clone()));
        };

        let missing: Vec<String> = required
            .into_iter()
            .filter(|p| args.get(p).map_or(true, Value::is_null))
            .collect();
        if !missing.is_empty() {
            self.record(|s| s.rejected_calls += 1);
            warn!(target: "tool_dispatch", function = %call.name, missing = ?missing, "Rejected call with missing arguments");
            return Err(ToolError::MissingArguments(missing));
        }

        let started = Instant::now();
        let result = tools.call(&call.name, args).await;
        let elapsed = started.elapsed().as_secs_f64() * 1000.0;

        self.record(|s| {
            s.total_tool_calls += 1;
            if result.is_err() {
                s.total_tool_errors += 1;
            }
            let n = s.total_tool_calls as f64;
            s.avg_tool_latency_ms = ((s.avg_tool_latency_ms * (n - 1.0)) + elapsed) / n;
        });

        match result {
            Ok(value) => {
                info!(target: "tool_dispatch", function = %call.name, latency_ms = %elapsed, "Function executed");
                Ok(render_value(&value))
            }
            Err(e) => Err(e),
        }
    }
}

fn transition(state: &mut DispatchState, next: DispatchState, round: usize) {
    debug!(target: "tool_dispatch", round, from = ?*state, to = ?next, "Dispatch state change");
    *state = next;
}

/// Message returned to the user when a round cannot complete
fn describe_failure(function: &str, e: &ToolError) -> String {
    match e {
        ToolError::NotFound(_) => format!(
            "I tried to use the function '{}', but it is not available.",
            function
        ),
        ToolError::MissingArguments(missing) => format!(
            "I could not call '{}' because required parameter(s) were missing: {}.",
            function,
            missing.join(", ")
        ),
        other => format!("The function '{}' failed: {}", function, other),
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}
