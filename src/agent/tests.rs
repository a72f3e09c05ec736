use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::json;

use super::*;
use crate::browser::{BrowserOptions, BrowserSession};
use crate::error::{LlmError, ToolError};
use crate::llm::ChatMessage;
use crate::tools::ToolSpec;
use crate::transcript::Message;

#[derive(Default)]
struct MockInvoker {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
}

impl MockInvoker {
    fn scripted(replies: Vec<Result<String, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::from(replies)),
        })
    }

    /// Keeps serving the same reply forever; for ceiling tests.
    fn repeating(reply: &str) -> Arc<RepeatingInvoker> {
        Arc::new(RepeatingInvoker {
            reply: reply.to_string(),
        })
    }
}

#[async_trait]
impl LlmInvoker for MockInvoker {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, LlmError> {
        let mut guard = self.replies.lock().expect("lock poisoned");
        guard.pop_front().unwrap_or_else(|| {
            Err(LlmError::Response {
                provider: "mock",
                model: "scripted".to_string(),
                message: "no more scripted replies".to_string(),
            })
        })
    }
}

struct RepeatingInvoker {
    reply: String,
}

#[async_trait]
impl LlmInvoker for RepeatingInvoker {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, LlmError> {
        Ok(self.reply.clone())
    }
}

fn echo_tool() -> ToolSpec {
    ToolSpec::new("echo", "repeat the message back")
        .with_schema(json!({
            "type": "object",
            "properties": {"message": {"type": "string"}},
            "required": ["message"],
            "additionalProperties": false
        }))
        .expect("valid schema")
        .with_handler(|args, _ctx| async move {
            let message = args
                .get("message")
                .and_then(|value| value.as_str())
                .unwrap_or_default()
                .to_string();
            Ok(ToolOutcome::passed(format!("echoed: {message}")))
        })
}

fn fail_tool() -> ToolSpec {
    ToolSpec::new("fail", "always fail")
        .with_schema(json!({
            "type": "object",
            "properties": {},
            "required": [],
            "additionalProperties": false
        }))
        .expect("valid schema")
        .with_handler(|_args, _ctx| async move { Err(ToolError::Execution("boom".to_string())) })
}

fn needs_session_tool() -> ToolSpec {
    ToolSpec::new("probe", "touch the page")
        .with_schema(json!({
            "type": "object",
            "properties": {},
            "required": [],
            "additionalProperties": false
        }))
        .expect("valid schema")
        .with_handler(|_args, ctx| async move {
            ctx.session().page().await?;
            Ok(ToolOutcome::passed("probed"))
        })
}

fn test_loop(invoker: Arc<dyn LlmInvoker>, tools: Vec<ToolSpec>, max_iterations: u32) -> AgentLoop {
    let catalogue = Arc::new(ToolCatalogue::new(tools).expect("catalogue builds"));
    let ctx = Arc::new(ToolContext::new(
        Arc::new(BrowserSession::new()),
        BrowserOptions::default(),
        "./screenshots",
    ));
    AgentLoop::new(
        invoker,
        catalogue,
        ctx,
        LoopConfig {
            max_iterations,
            system_prompt: Some("You are a QA automation agent.".to_string()),
        },
    )
}

#[tokio::test]
async fn completion_signal_on_first_reply() {
    let invoker = MockInvoker::scripted(vec![Ok("All steps passed.".to_string())]);
    let mut agent = test_loop(invoker, vec![echo_tool()], 10);

    let summary = agent.run("run the test").await;

    assert!(matches!(
        summary.termination,
        LoopTermination::Completed { ref final_reply } if final_reply == "All steps passed."
    ));
    assert_eq!(summary.iterations, 1);
    assert_eq!(summary.steps_executed, 0);
    assert_eq!(agent.state(), LoopState::Completed);

    // system + user + assistant, nothing else.
    assert_eq!(agent.transcript().len(), 3);
    assert!(matches!(
        agent.transcript().messages()[2],
        Message::Assistant(_)
    ));
}

#[tokio::test]
async fn tool_call_then_completion_flow() {
    let invoker = MockInvoker::scripted(vec![
        Ok("USE_TOOL: echo\nARGS: {\"message\": \"hi\"}".to_string()),
        Ok("Done.".to_string()),
    ]);
    let mut agent = test_loop(invoker, vec![echo_tool()], 10);

    let events = {
        let stream = agent.run_stream("run");
        futures_util::pin_mut!(stream);
        stream
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .expect("no fatal errors")
    };

    assert_eq!(events.len(), 5);
    assert!(matches!(events[0], LoopEvent::ModelReply { .. }));
    assert!(matches!(events[1], LoopEvent::ToolCall { ref tool, .. } if tool == "echo"));
    assert!(matches!(
        events[2],
        LoopEvent::ToolOutcome { success: true, ref report, .. } if report == "✅ echoed: hi"
    ));
    assert!(matches!(events[3], LoopEvent::ModelReply { .. }));
    assert!(matches!(events[4], LoopEvent::Completed { .. }));

    assert_eq!(agent.steps_executed(), 1);
    assert_eq!(agent.iterations(), 2);
}

#[tokio::test]
async fn transcript_grows_monotonically() {
    let invoker = MockInvoker::scripted(vec![
        Ok("USE_TOOL: echo\nARGS: {\"message\": \"one\"}".to_string()),
        Ok("USE_TOOL: echo\nARGS: {\"message\": \"two\"}".to_string()),
        Ok("Finished.".to_string()),
    ]);
    let mut agent = test_loop(invoker, vec![echo_tool()], 10);

    {
        let stream = agent.run_stream("run");
        futures_util::pin_mut!(stream);
        while let Some(event) = stream.next().await {
            event.expect("no fatal errors");
        }
    }

    // system, user, (assistant, tool-output) x2, assistant.
    let final_transcript = agent.transcript().messages();
    assert_eq!(final_transcript.len(), 7);
    assert!(matches!(final_transcript[0], Message::System(_)));
    assert!(matches!(final_transcript[1], Message::User(_)));
    assert!(matches!(final_transcript[2], Message::Assistant(_)));
    assert!(matches!(final_transcript[3], Message::ToolOutput(_)));
    assert!(matches!(final_transcript[4], Message::Assistant(_)));
    assert!(matches!(final_transcript[5], Message::ToolOutput(_)));
    assert!(matches!(final_transcript[6], Message::Assistant(_)));
}

#[tokio::test]
async fn multiple_invocations_execute_in_order_as_one_message() {
    let invoker = MockInvoker::scripted(vec![
        Ok("USE_TOOL: echo\nARGS: {\"message\": \"first\"}\nUSE_TOOL: echo\nARGS: {\"message\": \"second\"}".to_string()),
        Ok("Done.".to_string()),
    ]);
    let mut agent = test_loop(invoker, vec![echo_tool()], 10);

    let summary = agent.run("run").await;
    assert!(matches!(summary.termination, LoopTermination::Completed { .. }));
    assert_eq!(summary.steps_executed, 2);

    let tool_outputs: Vec<&str> = agent.transcript().tool_outputs().collect();
    assert_eq!(tool_outputs.len(), 1);
    assert_eq!(tool_outputs[0], "✅ echoed: first\n\n✅ echoed: second");
}

#[tokio::test]
async fn iteration_ceiling_aborts_the_loop() {
    let invoker = MockInvoker::repeating("USE_TOOL: echo\nARGS: {\"message\": \"again\"}");
    let mut agent = test_loop(invoker, vec![echo_tool()], 3);

    let summary = agent.run("loop forever").await;

    assert!(matches!(
        summary.termination,
        LoopTermination::IterationsExhausted
    ));
    assert_eq!(summary.iterations, 3);
    assert_eq!(summary.steps_executed, 3);
    assert_eq!(agent.state(), LoopState::Aborted);

    let assistant_turns = agent
        .transcript()
        .messages()
        .iter()
        .filter(|message| matches!(message, Message::Assistant(_)))
        .count();
    assert_eq!(assistant_turns, 3);
    assert_eq!(agent.transcript().tool_outputs().count(), 3);
}

#[tokio::test]
async fn model_failure_aborts_with_partial_transcript() {
    let invoker = MockInvoker::scripted(vec![
        Ok("USE_TOOL: echo\nARGS: {\"message\": \"one\"}".to_string()),
        Err(LlmError::Request {
            provider: "mock",
            model: "scripted".to_string(),
            message: "connection reset".to_string(),
        }),
    ]);
    let mut agent = test_loop(invoker, vec![echo_tool()], 10);

    let summary = agent.run("run").await;

    assert!(matches!(
        summary.termination,
        LoopTermination::ModelFailure(_)
    ));
    assert_eq!(agent.state(), LoopState::Aborted);

    // The first turn's work is still on the record.
    assert_eq!(agent.transcript().tool_outputs().count(), 1);
    assert_eq!(summary.steps_executed, 1);
}

#[tokio::test]
async fn tool_failure_does_not_abort_the_loop() {
    let invoker = MockInvoker::scripted(vec![
        Ok("USE_TOOL: fail\nARGS: {}".to_string()),
        Ok("USE_TOOL: echo\nARGS: {\"message\": \"recovered\"}".to_string()),
        Ok("Done.".to_string()),
    ]);
    let mut agent = test_loop(invoker, vec![echo_tool(), fail_tool()], 10);

    let summary = agent.run("run").await;

    assert!(matches!(summary.termination, LoopTermination::Completed { .. }));
    assert_eq!(summary.steps_executed, 1);

    let tool_outputs: Vec<&str> = agent.transcript().tool_outputs().collect();
    assert!(tool_outputs[0].starts_with("❌"));
    assert!(tool_outputs[1].starts_with("✅"));
}

#[tokio::test]
async fn unknown_tool_surfaces_as_failure_outcome() {
    let invoker = MockInvoker::scripted(vec![
        Ok("USE_TOOL: teleport\nARGS: {}".to_string()),
        Ok("Done.".to_string()),
    ]);
    let mut agent = test_loop(invoker, vec![echo_tool()], 10);

    let summary = agent.run("run").await;

    assert!(matches!(summary.termination, LoopTermination::Completed { .. }));
    assert_eq!(summary.steps_executed, 0);

    let tool_outputs: Vec<&str> = agent.transcript().tool_outputs().collect();
    assert!(tool_outputs[0].contains("unknown tool: teleport"));
}

#[tokio::test]
async fn malformed_args_surface_as_failure_outcome() {
    let invoker = MockInvoker::scripted(vec![
        Ok("USE_TOOL: echo\nARGS: {\"message\": }".to_string()),
        Ok("Done.".to_string()),
    ]);
    let mut agent = test_loop(invoker, vec![echo_tool()], 10);

    let summary = agent.run("run").await;

    assert!(matches!(summary.termination, LoopTermination::Completed { .. }));
    let tool_outputs: Vec<&str> = agent.transcript().tool_outputs().collect();
    assert!(tool_outputs[0].starts_with("❌ could not parse echo"));
}

#[tokio::test]
async fn repeated_session_not_ready_aborts_as_browser_failure() {
    let invoker = MockInvoker::repeating("USE_TOOL: probe\nARGS: {}");
    let mut agent = test_loop(invoker, vec![needs_session_tool()], 10);

    let summary = agent.run("run").await;

    assert!(matches!(
        summary.termination,
        LoopTermination::BrowserUnusable(_)
    ));
    assert_eq!(agent.state(), LoopState::Aborted);
    assert_eq!(summary.steps_executed, 0);
}
