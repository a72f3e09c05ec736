//! Top-level run coordination.
//!
//! One coordinator executes one test instruction end to end: assemble and
//! validate prompts, drive the agent loop, extract the navigation graph,
//! close the browser, and emit the outcome record.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::{AgentLoop, LoopConfig, LoopTermination};
use crate::browser::{BrowserOptions, BrowserSession};
use crate::config::{LlmSettings, ProviderKind, RunSettings};
use crate::error::RunError;
use crate::graph::{self, Edge, PageNode};
use crate::llm::{
    AnthropicInvoker, AnthropicInvokerConfig, ChatMessage, HostedInvoker, HostedInvokerConfig,
    LlmInvoker,
};
use crate::prompt::{self, PromptLibrary};
use crate::tools::{ToolCatalogue, ToolContext};
use crate::transcript::Transcript;

/// Immutable input describing what to automate.
#[derive(Clone, Debug)]
pub struct TestInstruction {
    pub test_id: String,
    pub description: String,
    /// Prompt context only; never interpreted.
    pub module: Option<String>,
    pub functionality: Option<String>,
    pub priority: Option<String>,
    /// Pre-generated executable steps. When absent, the coordinator
    /// converts `description` through the conversion template.
    pub generated_prompt: Option<String>,
    pub browser: BrowserOptions,
}

impl TestInstruction {
    pub fn new(test_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            test_id: test_id.into(),
            description: description.into(),
            module: None,
            functionality: None,
            priority: None,
            generated_prompt: None,
            browser: BrowserOptions::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
    Error,
}

/// The structured result returned to the caller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub test_id: String,
    pub status: RunStatus,
    /// Wall-clock duration in seconds.
    pub execution_time: f64,
    /// Successful tool executions.
    pub steps_executed: u32,
    /// Full raw transcript.
    pub agent_output: String,
    pub pages: Vec<PageNode>,
    pub edges: Vec<Edge>,
    pub screenshots: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub executed_at: DateTime<Utc>,
}

/// Entry point for executing test instructions.
pub struct RunCoordinator {
    invoker: Arc<dyn LlmInvoker>,
    catalogue: Arc<ToolCatalogue>,
    library: PromptLibrary,
    settings: RunSettings,
}

impl RunCoordinator {
    pub fn new(invoker: Arc<dyn LlmInvoker>, settings: RunSettings) -> Self {
        let catalogue = Arc::new(ToolCatalogue::browser_catalogue());
        let library = PromptLibrary::new(&catalogue, settings.validation.clone());
        Self {
            invoker,
            catalogue,
            library,
            settings,
        }
    }

    /// Builds a coordinator from environment configuration, selecting the
    /// provider adapter by settings.
    pub fn from_env() -> Result<Self, RunError> {
        let llm = LlmSettings::from_env()?;
        let settings = RunSettings::from_env()?;

        let invoker: Arc<dyn LlmInvoker> = match llm.provider {
            ProviderKind::Hosted => {
                Arc::new(HostedInvoker::new(HostedInvokerConfig::from(&llm))?)
            }
            ProviderKind::Anthropic => {
                Arc::new(AnthropicInvoker::new(AnthropicInvokerConfig::from(&llm))?)
            }
        };

        Ok(Self::new(invoker, settings))
    }

    /// Converts a raw description into numbered automation steps via the
    /// conversion template and one model call.
    pub async fn convert_description(
        &self,
        instruction: &TestInstruction,
    ) -> Result<String, RunError> {
        let vars = HashMap::from([
            ("description".to_string(), instruction.description.clone()),
            (
                "module".to_string(),
                instruction.module.clone().unwrap_or_default(),
            ),
            (
                "functionality".to_string(),
                instruction.functionality.clone().unwrap_or_default(),
            ),
            (
                "priority".to_string(),
                instruction.priority.clone().unwrap_or_default(),
            ),
        ]);
        let prompt = self.library.format(prompt::TEST_CASE_CONVERSION, &vars)?;

        let messages = vec![
            ChatMessage::system(prompt.system),
            ChatMessage::user(prompt.user),
        ];
        let steps = self.invoker.complete(&messages).await?;
        Ok(steps)
    }

    /// Executes one instruction and returns its outcome record. Input and
    /// prompt validation fail fast (before any browser exists); everything
    /// after the loop starts is folded into the record.
    pub async fn execute(&self, instruction: &TestInstruction) -> Result<OutcomeRecord, RunError> {
        if instruction.test_id.trim().is_empty() {
            return Err(RunError::InvalidInput(
                "test_id must not be empty".to_string(),
            ));
        }
        instruction.browser.engine.ensure_supported()?;

        let executable = match &instruction.generated_prompt {
            Some(prompt) => {
                if prompt.trim().is_empty() {
                    return Err(RunError::InvalidInput(
                        "generated_prompt must not be empty".to_string(),
                    ));
                }
                prompt.clone()
            }
            None => {
                if instruction.description.trim().is_empty() {
                    return Err(RunError::InvalidInput(
                        "description must not be empty".to_string(),
                    ));
                }
                self.convert_description(instruction).await?
            }
        };

        let vars = HashMap::from([("test_description".to_string(), executable)]);
        let prompt = self.library.format(prompt::QA_AGENT, &vars)?;

        tracing::info!(test_id = %instruction.test_id, "starting run");
        let started = Instant::now();

        let session = Arc::new(BrowserSession::new());
        let ctx = Arc::new(ToolContext::new(
            session.clone(),
            instruction.browser.clone(),
            self.settings.screenshot_dir.clone(),
        ));

        let max_iterations = if instruction.browser.max_iterations > 0 {
            instruction.browser.max_iterations
        } else {
            self.settings.max_iterations
        };

        let mut agent = AgentLoop::new(
            self.invoker.clone(),
            self.catalogue.clone(),
            ctx.clone(),
            LoopConfig {
                max_iterations,
                system_prompt: Some(prompt.system),
            },
        );

        let summary = agent.run(prompt.user).await;

        let graph = graph::scan(agent.transcript());

        // Closed exactly once per run; a model-issued close tool call makes
        // this a no-op.
        if let Err(err) = session.close().await {
            tracing::warn!(error = %err, "session close failed");
        }

        let (status, error_message) = classify(&summary.termination, agent.transcript());
        let execution_time = started.elapsed().as_secs_f64();

        tracing::info!(
            test_id = %instruction.test_id,
            ?status,
            steps = summary.steps_executed,
            pages = graph.pages.len(),
            "run finished"
        );

        Ok(OutcomeRecord {
            test_id: instruction.test_id.clone(),
            status,
            execution_time,
            steps_executed: summary.steps_executed,
            agent_output: agent.transcript().render(),
            pages: graph.pages,
            edges: graph.edges,
            screenshots: ctx.screenshots(),
            error_message,
            executed_at: Utc::now(),
        })
    }
}

/// Failure prefixes for the critical tools; a `❌` on any of these turns a
/// completed run into `failed`.
const CRITICAL_FAILURE_PREFIXES: &[&str] = &[
    "❌ navigation failed",
    "❌ click failed",
    "❌ type failed",
];

fn classify(
    termination: &LoopTermination,
    transcript: &Transcript,
) -> (RunStatus, Option<String>) {
    match termination {
        LoopTermination::Completed { .. } => {
            if has_critical_failure(transcript) {
                (
                    RunStatus::Failed,
                    Some("a critical browser action failed during the run".to_string()),
                )
            } else {
                (RunStatus::Success, None)
            }
        }
        LoopTermination::IterationsExhausted => (
            RunStatus::Failed,
            Some("iteration ceiling reached before completion".to_string()),
        ),
        LoopTermination::ModelFailure(err) => (RunStatus::Error, Some(err.to_string())),
        LoopTermination::BrowserUnusable(err) => (RunStatus::Error, Some(err.to_string())),
    }
}

fn has_critical_failure(transcript: &Transcript) -> bool {
    transcript.tool_outputs().any(|output| {
        output.lines().any(|line| {
            let line = line.trim();
            CRITICAL_FAILURE_PREFIXES
                .iter()
                .any(|prefix| line.starts_with(prefix))
        })
    })
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::browser::BrowserEngine;
    use crate::error::{ConfigError, LlmError};

    struct ScriptedInvoker {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
    }

    impl ScriptedInvoker {
        fn new(replies: Vec<Result<String, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(VecDeque::from(replies)),
            })
        }
    }

    #[async_trait]
    impl LlmInvoker for ScriptedInvoker {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, LlmError> {
            self.replies
                .lock()
                .expect("lock poisoned")
                .pop_front()
                .unwrap_or_else(|| Ok("USE_TOOL: close\nARGS: {}".to_string()))
        }
    }

    fn coordinator(replies: Vec<Result<String, LlmError>>) -> RunCoordinator {
        RunCoordinator::new(ScriptedInvoker::new(replies), RunSettings::default())
    }

    fn instruction_with_prompt(prompt: &str) -> TestInstruction {
        let mut instruction = TestInstruction::new("TC-001", "Open the site");
        instruction.generated_prompt = Some(prompt.to_string());
        instruction
    }

    #[tokio::test]
    async fn empty_test_id_is_rejected() {
        let coordinator = coordinator(vec![]);
        let mut instruction = instruction_with_prompt("1. Open https://example.com");
        instruction.test_id = "  ".to_string();

        let err = coordinator.execute(&instruction).await.expect_err("fails");
        assert!(matches!(err, RunError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn empty_generated_prompt_is_rejected() {
        let coordinator = coordinator(vec![]);
        let instruction = instruction_with_prompt("   ");

        let err = coordinator.execute(&instruction).await.expect_err("fails");
        assert!(matches!(err, RunError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn unsupported_engine_is_a_configuration_error() {
        let coordinator = coordinator(vec![]);
        let mut instruction = instruction_with_prompt("1. Open https://example.com");
        instruction.browser.engine = BrowserEngine::Gecko;

        let err = coordinator.execute(&instruction).await.expect_err("fails");
        assert!(matches!(
            err,
            RunError::Configuration(ConfigError::UnsupportedEngine(_))
        ));
    }

    #[tokio::test]
    async fn injection_in_prompt_is_rejected_before_any_browser_work() {
        let coordinator = coordinator(vec![]);
        let instruction = instruction_with_prompt("<script>alert(1)</script>login to site");

        let err = coordinator.execute(&instruction).await.expect_err("fails");
        assert!(matches!(err, RunError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn completion_without_tools_is_success_with_zero_steps() {
        let coordinator = coordinator(vec![Ok(
            "The test description requires no browser actions.".to_string()
        )]);
        let instruction = instruction_with_prompt("1. Do nothing");

        let outcome = coordinator.execute(&instruction).await.expect("runs");

        assert_eq!(outcome.status, RunStatus::Success);
        assert_eq!(outcome.steps_executed, 0);
        assert!(outcome.pages.is_empty());
        assert!(outcome.edges.is_empty());
        assert!(outcome.screenshots.is_empty());
        assert!(outcome.error_message.is_none());
        assert!(outcome.agent_output.contains("[assistant]"));
    }

    #[tokio::test]
    async fn close_tool_then_completion_counts_one_step() {
        let coordinator = coordinator(vec![
            Ok("USE_TOOL: close\nARGS: {}".to_string()),
            Ok("Done.".to_string()),
        ]);
        let instruction = instruction_with_prompt("1. Close the browser");

        let outcome = coordinator.execute(&instruction).await.expect("runs");

        assert_eq!(outcome.status, RunStatus::Success);
        assert_eq!(outcome.steps_executed, 1);
        assert!(outcome.agent_output.contains("✅ browser closed"));
    }

    #[tokio::test]
    async fn iteration_exhaustion_is_classified_failed() {
        let mut coordinator = coordinator(vec![]);
        coordinator.settings.max_iterations = 3;
        let mut instruction = instruction_with_prompt("1. Loop forever");
        instruction.browser.max_iterations = 3;

        // The scripted invoker serves "close" forever once the script runs dry.
        let outcome = coordinator.execute(&instruction).await.expect("runs");

        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.steps_executed, 3);
        assert!(outcome
            .error_message
            .as_deref()
            .expect("message")
            .contains("iteration ceiling"));
    }

    #[tokio::test]
    async fn model_failure_is_classified_error_with_partial_transcript() {
        let coordinator = coordinator(vec![Err(LlmError::Request {
            provider: "mock",
            model: "scripted".to_string(),
            message: "connection reset".to_string(),
        })]);
        let instruction = instruction_with_prompt("1. Open https://example.com");

        let outcome = coordinator.execute(&instruction).await.expect("runs");

        assert_eq!(outcome.status, RunStatus::Error);
        assert!(outcome
            .error_message
            .as_deref()
            .expect("message")
            .contains("connection reset"));
        // System and user turns are still on the record.
        assert!(outcome.agent_output.contains("[system]"));
        assert!(outcome.agent_output.contains("[user]"));
    }

    #[tokio::test]
    async fn conversion_path_feeds_generated_steps_to_the_agent() {
        let coordinator = coordinator(vec![
            Ok("1. Open https://example.com\n2. Take a screenshot".to_string()),
            Ok("All steps passed.".to_string()),
        ]);
        let instruction = TestInstruction::new("TC-002", "Open the example page and capture it");

        let outcome = coordinator.execute(&instruction).await.expect("runs");

        assert_eq!(outcome.status, RunStatus::Success);
        assert!(outcome
            .agent_output
            .contains("1. Open https://example.com"));
    }

    #[tokio::test]
    async fn outcome_record_serializes_with_wire_field_names() {
        let coordinator = coordinator(vec![Ok("Done.".to_string())]);
        let instruction = instruction_with_prompt("1. Do nothing");

        let outcome = coordinator.execute(&instruction).await.expect("runs");
        let value = serde_json::to_value(&outcome).expect("serializes");

        for field in [
            "test_id",
            "status",
            "execution_time",
            "steps_executed",
            "agent_output",
            "pages",
            "edges",
            "screenshots",
            "executed_at",
        ] {
            assert!(value.get(field).is_some(), "missing field: {field}");
        }
        assert_eq!(value["status"], "success");
    }

    #[test]
    fn critical_failures_flip_completed_runs_to_failed() {
        let mut transcript = Transcript::new();
        transcript.push_tool_output("❌ click failed: timed out (selector: #missing)");
        transcript.push_tool_output("✅ navigated to https://example.com");

        let (status, message) = classify(
            &LoopTermination::Completed {
                final_reply: "done".to_string(),
            },
            &transcript,
        );
        assert_eq!(status, RunStatus::Failed);
        assert!(message.is_some());
    }

    #[test]
    fn noncritical_failures_do_not_flip_status() {
        let mut transcript = Transcript::new();
        transcript.push_tool_output("❌ wait failed: timed out (selector: #spinner)");

        let (status, _) = classify(
            &LoopTermination::Completed {
                final_reply: "done".to_string(),
            },
            &transcript,
        );
        assert_eq!(status, RunStatus::Success);
    }
}
