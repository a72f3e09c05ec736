use thiserror::Error;

/// Raised at catalogue construction when a tool registers a malformed
/// argument schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("tool argument schema is not a JSON object")]
    NotAnObject,
    #[error("tool argument schema root must be type=object")]
    RootNotObject,
    #[error("tool argument schema 'required' must list field names as strings")]
    RequiredNotStrings,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    MissingVariable(&'static str),
    #[error("invalid value for {variable}: {message}")]
    InvalidValue {
        variable: &'static str,
        message: String,
    },
    #[error("unknown browser engine: {0}")]
    UnknownEngine(String),
    #[error("browser engine {0} is not supported by the CDP driver")]
    UnsupportedEngine(String),
    #[error("unknown prompt template: {0}")]
    UnknownTemplate(String),
    #[error("template {template} is missing variable: {variable}")]
    MissingTemplateVariable { template: String, variable: String },
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("{provider} request failed for model {model}: {message}")]
    Request {
        provider: &'static str,
        model: String,
        message: String,
    },
    #[error("{provider} response invalid for model {model}: {message}")]
    Response {
        provider: &'static str,
        model: String,
        message: String,
    },
}

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("browser session is not ready; navigate to a URL first")]
    SessionNotReady,
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },
    #[error("browser operation failed: {0}")]
    Operation(String),
    #[error("timed out after {0} ms")]
    Timeout(u64),
}

impl From<chromiumoxide::error::CdpError> for BrowserError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        BrowserError::Operation(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid tool arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },
    #[error(transparent)]
    Browser(#[from] BrowserError),
    #[error("tool execution failed: {0}")]
    Execution(String),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl ToolError {
    /// Whether this failure indicates the session itself is unusable.
    pub fn is_session_not_ready(&self) -> bool {
        matches!(self, ToolError::Browser(BrowserError::SessionNotReady))
    }
}

/// Surface taxonomy returned by the run coordinator. `Database` is carried
/// for collaborators that persist outcome records; the core never raises it.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error("prompt validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Browser(#[from] BrowserError),
    #[error("run state error: {0}")]
    State(String),
    #[error("persistence failed: {0}")]
    Database(String),
}
