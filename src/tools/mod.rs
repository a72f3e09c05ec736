pub mod browser;

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::browser::{BrowserOptions, BrowserSession};
use crate::error::{SchemaError, ToolError};

pub use browser::all_tools;

/// Shared context injected into every tool execution. Tools are stateless;
/// everything they touch lives here.
pub struct ToolContext {
    session: Arc<BrowserSession>,
    options: BrowserOptions,
    screenshot_dir: PathBuf,
    screenshots: Mutex<Vec<String>>,
}

impl ToolContext {
    pub fn new(
        session: Arc<BrowserSession>,
        options: BrowserOptions,
        screenshot_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            session,
            options,
            screenshot_dir: screenshot_dir.into(),
            screenshots: Mutex::new(Vec::new()),
        }
    }

    pub fn session(&self) -> &Arc<BrowserSession> {
        &self.session
    }

    pub fn options(&self) -> &BrowserOptions {
        &self.options
    }

    pub fn screenshot_dir(&self) -> &PathBuf {
        &self.screenshot_dir
    }

    pub fn record_screenshot(&self, filename: impl Into<String>) {
        self.screenshots
            .lock()
            .expect("screenshot list lock poisoned")
            .push(filename.into());
    }

    /// Filenames recorded by successful screenshot executions, in order.
    pub fn screenshots(&self) -> Vec<String> {
        self.screenshots
            .lock()
            .expect("screenshot list lock poisoned")
            .clone()
    }
}

/// The textual result of one tool execution. The report always carries the
/// leading status marker the transcript scanner classifies by.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolOutcome {
    pub success: bool,
    pub report: String,
    /// Set when the failure was the session itself being unusable; the
    /// agent loop escalates after repeated occurrences.
    pub session_not_ready: bool,
}

impl ToolOutcome {
    pub fn passed(body: impl Into<String>) -> Self {
        Self {
            success: true,
            report: format!("✅ {}", body.into()),
            session_not_ready: false,
        }
    }

    pub fn failed(body: impl Into<String>) -> Self {
        Self {
            success: false,
            report: format!("❌ {}", body.into()),
            session_not_ready: false,
        }
    }
}

type ToolHandler = dyn Fn(Value, Arc<ToolContext>) -> BoxFuture<'static, Result<ToolOutcome, ToolError>>
    + Send
    + Sync;

/// One catalogue entry: name, model-facing description, argument schema,
/// and the async handler.
#[derive(Clone)]
pub struct ToolSpec {
    name: String,
    description: String,
    json_schema: Value,
    handler: Arc<ToolHandler>,
}

impl std::fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("json_schema", &self.json_schema)
            .finish()
    }
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            json_schema: serde_json::json!({
                "type": "object",
                "properties": {},
                "required": [],
                "additionalProperties": true,
            }),
            handler: Arc::new(|_args, _ctx| {
                Box::pin(async {
                    Err(ToolError::Execution(
                        "tool handler not configured".to_string(),
                    ))
                })
            }),
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Result<Self, SchemaError> {
        validate_schema(&schema)?;
        self.json_schema = schema;
        Ok(self)
    }

    pub fn with_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Value, Arc<ToolContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutcome, ToolError>> + Send + 'static,
    {
        self.handler = Arc::new(move |args, ctx| Box::pin(handler(args, ctx)));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn json_schema(&self) -> &Value {
        &self.json_schema
    }

    pub async fn execute(
        &self,
        args: Value,
        ctx: Arc<ToolContext>,
    ) -> Result<ToolOutcome, ToolError> {
        validate_arguments(self.name(), &self.json_schema, &args)?;
        (self.handler)(args, ctx).await
    }
}

/// Closed set of operations the model may invoke, keyed by name.
pub struct ToolCatalogue {
    tools: Vec<ToolSpec>,
    by_name: HashMap<String, usize>,
}

impl ToolCatalogue {
    pub fn new(tools: Vec<ToolSpec>) -> Result<Self, ToolError> {
        let mut by_name = HashMap::new();
        for (index, tool) in tools.iter().enumerate() {
            if by_name.insert(tool.name().to_string(), index).is_some() {
                return Err(ToolError::Execution(format!(
                    "duplicate tool registered: {}",
                    tool.name()
                )));
            }
        }
        Ok(Self { tools, by_name })
    }

    /// The ten browser operations.
    pub fn browser_catalogue() -> Self {
        Self::new(all_tools()).expect("built-in catalogue has unique names")
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.by_name.get(name).map(|index| &self.tools[*index])
    }

    pub fn tools(&self) -> &[ToolSpec] {
        &self.tools
    }

    /// Name + description lines for the agent framing prompt.
    pub fn describe(&self) -> String {
        self.tools
            .iter()
            .map(|tool| format!("- {}: {}", tool.name(), tool.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Runs one invocation, folding every failure into a `❌` outcome so
    /// the model can correct course on the next turn.
    pub async fn dispatch(&self, name: &str, args: Value, ctx: Arc<ToolContext>) -> ToolOutcome {
        let Some(tool) = self.get(name) else {
            return ToolOutcome::failed(format!("unknown tool: {name}"));
        };

        match tool.execute(args, ctx).await {
            Ok(outcome) => outcome,
            Err(err) => {
                let mut outcome = ToolOutcome::failed(format!("{name} failed: {err}"));
                outcome.session_not_ready = err.is_session_not_ready();
                outcome
            }
        }
    }
}

fn validate_schema(schema: &Value) -> Result<(), SchemaError> {
    let schema_obj = schema.as_object().ok_or(SchemaError::NotAnObject)?;

    let root_type = schema_obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or(SchemaError::RootNotObject)?;

    if root_type != "object" {
        return Err(SchemaError::RootNotObject);
    }

    if let Some(required) = schema_obj.get("required") {
        let required_arr = required
            .as_array()
            .ok_or(SchemaError::RequiredNotStrings)?;
        for item in required_arr {
            if !item.is_string() {
                return Err(SchemaError::RequiredNotStrings);
            }
        }
    }

    Ok(())
}

fn validate_arguments(tool_name: &str, schema: &Value, args: &Value) -> Result<(), ToolError> {
    let args_obj = args
        .as_object()
        .ok_or_else(|| ToolError::InvalidArguments {
            tool: tool_name.to_string(),
            message: "arguments must be a JSON object".to_string(),
        })?;

    let schema_obj = schema
        .as_object()
        .ok_or_else(|| ToolError::InvalidArguments {
            tool: tool_name.to_string(),
            message: "tool schema must be a JSON object".to_string(),
        })?;

    if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
        for field in required {
            let Some(field_name) = field.as_str() else {
                continue;
            };
            if !args_obj.contains_key(field_name) {
                return Err(ToolError::InvalidArguments {
                    tool: tool_name.to_string(),
                    message: format!("missing required field: {field_name}"),
                });
            }
        }
    }

    let properties = schema_obj
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    if schema_obj
        .get("additionalProperties")
        .and_then(Value::as_bool)
        == Some(false)
    {
        for key in args_obj.keys() {
            if !properties.contains_key(key) {
                return Err(ToolError::InvalidArguments {
                    tool: tool_name.to_string(),
                    message: format!("unknown field: {key}"),
                });
            }
        }
    }

    for (key, value) in args_obj {
        if let Some(field_schema) = properties.get(key) {
            if let Some(type_name) = field_schema.get("type").and_then(Value::as_str) {
                if !value_matches_type(value, type_name) {
                    return Err(ToolError::InvalidArguments {
                        tool: tool_name.to_string(),
                        message: format!("field '{key}' must be of type {type_name}"),
                    });
                }
            }
        }
    }

    Ok(())
}

fn value_matches_type(value: &Value, type_name: &str) -> bool {
    match type_name {
        "string" => value.is_string(),
        "integer" => value.as_i64().is_some() || value.as_u64().is_some(),
        "number" => value.as_f64().is_some(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}
