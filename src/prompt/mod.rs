mod templates;
mod validator;

pub use templates::{
    AssembledPrompt, PromptLibrary, PromptTemplate, QA_AGENT, TEST_CASE_CONVERSION,
};
pub use validator::{validate, Finding, Severity, ValidationConfig, ValidationReport};
