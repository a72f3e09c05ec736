//! The bounded agent loop.
//!
//! One loop drives one run: invoke the model, parse directives out of the
//! reply, execute them in textual order, append the joined outcomes as a
//! single tool-output message, repeat. The loop stops on the completion
//! signal (a reply with no `USE_TOOL:` marker), on a model transport
//! failure, or at the iteration ceiling.

use std::sync::Arc;

use async_stream::try_stream;
use futures_util::{Stream, StreamExt};
use serde_json::Value;

use crate::error::{BrowserError, LlmError, RunError};
use crate::llm::{wire_messages, LlmInvoker};
use crate::parse::{parse_directives, ToolDirective};
use crate::tools::{ToolCatalogue, ToolContext, ToolOutcome};
use crate::transcript::Transcript;

/// Consecutive session-not-ready failures tolerated before the session is
/// declared unusable and the run aborts.
const SESSION_FAILURE_LIMIT: u32 = 3;

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub max_iterations: u32,
    pub system_prompt: Option<String>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            system_prompt: None,
        }
    }
}

/// Observable loop phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Ready,
    InvokingModel,
    Parsing,
    ExecutingTools,
    Completed,
    Aborted,
}

/// Events yielded while the loop runs.
#[derive(Clone, Debug, PartialEq)]
pub enum LoopEvent {
    ModelReply {
        content: String,
    },
    ToolCall {
        tool: String,
        arguments: Value,
    },
    ToolOutcome {
        tool: String,
        report: String,
        success: bool,
    },
    Completed {
        final_reply: String,
    },
}

/// How the loop ended.
#[derive(Debug)]
pub enum LoopTermination {
    Completed { final_reply: String },
    IterationsExhausted,
    ModelFailure(LlmError),
    BrowserUnusable(BrowserError),
}

/// Aggregate result of one full loop run.
#[derive(Debug)]
pub struct LoopSummary {
    pub termination: LoopTermination,
    pub iterations: u32,
    pub steps_executed: u32,
}

pub struct AgentLoop {
    invoker: Arc<dyn LlmInvoker>,
    catalogue: Arc<ToolCatalogue>,
    ctx: Arc<ToolContext>,
    config: LoopConfig,
    transcript: Transcript,
    state: LoopState,
    iterations: u32,
    steps_executed: u32,
    consecutive_session_failures: u32,
}

impl AgentLoop {
    pub fn new(
        invoker: Arc<dyn LlmInvoker>,
        catalogue: Arc<ToolCatalogue>,
        ctx: Arc<ToolContext>,
        config: LoopConfig,
    ) -> Self {
        Self {
            invoker,
            catalogue,
            ctx,
            config,
            transcript: Transcript::new(),
            state: LoopState::Ready,
            iterations: 0,
            steps_executed: 0,
            consecutive_session_failures: 0,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Count of successful tool executions so far.
    pub fn steps_executed(&self) -> u32 {
        self.steps_executed
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Drives [`AgentLoop::run_stream`] to completion, folding fatal errors
    /// into the summary so callers always get the partial transcript.
    pub async fn run(&mut self, user_message: impl Into<String>) -> LoopSummary {
        let mut final_reply = None;
        let mut failure = None;

        {
            let stream = self.run_stream(user_message);
            futures_util::pin_mut!(stream);

            while let Some(event) = stream.next().await {
                match event {
                    Ok(LoopEvent::Completed { final_reply: reply }) => final_reply = Some(reply),
                    Ok(_) => {}
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }
        }

        let termination = match (final_reply, failure) {
            (Some(reply), None) => LoopTermination::Completed { final_reply: reply },
            (_, Some(RunError::Llm(err))) => LoopTermination::ModelFailure(err),
            (_, Some(RunError::Browser(err))) => LoopTermination::BrowserUnusable(err),
            (_, Some(_)) | (None, None) => LoopTermination::IterationsExhausted,
        };

        LoopSummary {
            termination,
            iterations: self.iterations,
            steps_executed: self.steps_executed,
        }
    }

    /// The loop as an event stream. Tool failures are folded into `❌`
    /// outcomes and never end the stream; model transport failures and the
    /// iteration ceiling do.
    pub fn run_stream(
        &mut self,
        user_message: impl Into<String>,
    ) -> impl Stream<Item = Result<LoopEvent, RunError>> + '_ {
        let user_message = user_message.into();

        try_stream! {
            if self.transcript.is_empty() {
                if let Some(system_prompt) = &self.config.system_prompt {
                    self.transcript.push_system(system_prompt.clone());
                }
            }
            self.transcript.push_user(user_message);

            for iteration in 0..self.config.max_iterations {
                self.state = LoopState::InvokingModel;
                self.iterations = iteration + 1;

                let messages = wire_messages(&self.transcript);
                let reply = match self.invoker.complete(&messages).await {
                    Ok(reply) => reply,
                    Err(err) => {
                        self.state = LoopState::Aborted;
                        Err::<(), RunError>(RunError::Llm(err))?;
                        return;
                    }
                };

                self.transcript.push_assistant(reply.clone());
                yield LoopEvent::ModelReply {
                    content: reply.clone(),
                };

                self.state = LoopState::Parsing;
                let directives = parse_directives(&reply);

                if directives.is_empty() {
                    self.state = LoopState::Completed;
                    tracing::info!(iteration = self.iterations, "completion signal observed");
                    yield LoopEvent::Completed { final_reply: reply };
                    return;
                }

                self.state = LoopState::ExecutingTools;
                let mut reports = Vec::new();

                for directive in directives {
                    let (tool, outcome) = match directive {
                        ToolDirective::Call(invocation) => {
                            yield LoopEvent::ToolCall {
                                tool: invocation.tool.clone(),
                                arguments: invocation.arguments.clone(),
                            };

                            tracing::debug!(tool = %invocation.tool, "executing tool");
                            let outcome = self
                                .catalogue
                                .dispatch(
                                    &invocation.tool,
                                    invocation.arguments,
                                    self.ctx.clone(),
                                )
                                .await;
                            (invocation.tool, outcome)
                        }
                        ToolDirective::Invalid { tool, reason } => {
                            let label = if tool.is_empty() {
                                "tool call".to_string()
                            } else {
                                tool.clone()
                            };
                            (
                                tool,
                                ToolOutcome::failed(format!("could not parse {label}: {reason}")),
                            )
                        }
                    };

                    if outcome.success {
                        self.steps_executed += 1;
                        self.consecutive_session_failures = 0;
                    } else if outcome.session_not_ready {
                        self.consecutive_session_failures += 1;
                    } else {
                        self.consecutive_session_failures = 0;
                    }

                    reports.push(outcome.report.clone());
                    yield LoopEvent::ToolOutcome {
                        tool,
                        report: outcome.report,
                        success: outcome.success,
                    };

                    if self.consecutive_session_failures >= SESSION_FAILURE_LIMIT {
                        self.transcript.push_tool_output(reports.join("\n\n"));
                        self.state = LoopState::Aborted;
                        tracing::warn!("browser session unusable, aborting run");
                        Err::<(), RunError>(RunError::Browser(BrowserError::SessionNotReady))?;
                        return;
                    }
                }

                self.transcript.push_tool_output(reports.join("\n\n"));
            }

            self.state = LoopState::Aborted;
            tracing::warn!(
                max_iterations = self.config.max_iterations,
                "iteration ceiling reached"
            );
            Err::<(), RunError>(RunError::State(format!(
                "iteration ceiling reached ({})",
                self.config.max_iterations
            )))?;
        }
    }
}

#[cfg(test)]
mod tests;
