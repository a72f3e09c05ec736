//! # qa-agent-rs
//!
//! **LLM-driven browser QA runs with explicit control flow.**
//! One bounded agent loop drives a real browser through a closed catalogue
//! of ten operations, then distills the transcript into a navigation graph.
//!
//! ## How a run works
//! 1. A [`TestInstruction`] enters the [`RunCoordinator`].
//! 2. The prompt library assembles the agent framing (validated by the
//!    rule-based prompt validator) and, when needed, converts the raw
//!    description into numbered steps with one model call.
//! 3. The [`AgentLoop`] alternates model invocation and tool execution.
//!    The model emits `USE_TOOL:`/`ARGS:` directives; a reply without a
//!    directive is the completion signal.
//! 4. The transcript scanner rebuilds pages, elements, and edges from the
//!    tool outputs, and the coordinator emits an [`OutcomeRecord`].
//!
//! ## Quickstart
//! ```rust,no_run
//! use qa_agent_rs::{RunCoordinator, TestInstruction};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = RunCoordinator::from_env()?;
//!
//! let mut instruction =
//!     TestInstruction::new("TC-001", "Open https://example.com and take a screenshot");
//! instruction.browser.headless = true;
//!
//! let outcome = coordinator.execute(&instruction).await?;
//! println!("{} pages, status {:?}", outcome.pages.len(), outcome.status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Watching a run
//! The loop is observable as an event stream:
//! ```rust,ignore
//! use futures_util::StreamExt;
//! use qa_agent_rs::agent::LoopEvent;
//!
//! let stream = agent.run_stream("1. Open https://example.com");
//! futures_util::pin_mut!(stream);
//! while let Some(event) = stream.next().await {
//!     if let Ok(LoopEvent::ToolCall { tool, .. }) = event {
//!         println!("tool: {tool}");
//!     }
//! }
//! ```
//!
//! ## Evidence in this repository
//! - Completion-signal and ceiling semantics: `src/agent/tests.rs`
//! - Directive parsing round-trip: `src/parse.rs`
//! - Scanner determinism and revisit merging: `src/graph/mod.rs`
//! - Injection blocking before any browser work: `src/run.rs`

/// Bounded loop alternating model invocation and tool execution.
pub mod agent;
/// Per-run CDP browser session and engine selection.
pub mod browser;
/// Environment-backed settings structs.
pub mod config;
/// Error taxonomy surfaced by the crate.
pub mod error;
/// Navigation-graph extraction from the transcript.
pub mod graph;
/// Provider abstraction and the two invoker adapters.
pub mod llm;
/// `USE_TOOL`/`ARGS` directive parsing.
pub mod parse;
/// Prompt templates and the rule-based validator.
pub mod prompt;
/// Run coordination and the outcome record.
pub mod run;
/// The tool catalogue and its shared execution context.
pub mod tools;
/// Append-only conversation transcript.
pub mod transcript;

/// Loop runtime API.
pub use agent::{AgentLoop, LoopConfig, LoopEvent, LoopState, LoopSummary, LoopTermination};
/// Browser session and instruction-level browser options.
pub use browser::{BrowserEngine, BrowserOptions, BrowserSession};
/// Settings read from the environment.
pub use config::{LlmSettings, ProviderKind, RunSettings};
/// Error values exposed by the crate.
pub use error::{BrowserError, ConfigError, LlmError, RunError, SchemaError, ToolError};
/// Graph entities extracted from transcripts.
pub use graph::{Edge, ElementRecord, NavigationGraph, PageNode};
/// Invoker adapters and wire types.
pub use llm::{
    AnthropicInvoker, AnthropicInvokerConfig, ChatMessage, ChatRole, HostedInvoker,
    HostedInvokerConfig, LlmInvoker,
};
/// Directive parsing types.
pub use parse::{ToolDirective, ToolInvocation};
/// Prompt assembly and validation.
pub use prompt::{PromptLibrary, ValidationConfig, ValidationReport};
/// Run entry point and result types.
pub use run::{OutcomeRecord, RunCoordinator, RunStatus, TestInstruction};
/// Tool primitives.
pub use tools::{ToolCatalogue, ToolContext, ToolOutcome, ToolSpec};
/// Transcript types.
pub use transcript::{Message, Transcript};
