//! Named prompt templates with strict variable substitution.
//!
//! Two templates ship built in: `test_case_conversion` turns a raw test
//! description into numbered automation steps, and `qa_agent` frames the
//! model as the QA automation agent driving the tool catalogue. The agent
//! template's tool list is rendered from the live catalogue so the prompt
//! can never drift from the registered operations.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{ConfigError, RunError};
use crate::prompt::validator::{validate, ValidationConfig};
use crate::tools::ToolCatalogue;

/// One registered template: the framing system prompt plus a user prompt
/// with `{placeholder}` slots.
#[derive(Clone, Debug)]
pub struct PromptTemplate {
    pub system: String,
    pub user_template: String,
}

/// A formatted, validated prompt pair ready for the message list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssembledPrompt {
    pub system: String,
    pub user: String,
}

pub const TEST_CASE_CONVERSION: &str = "test_case_conversion";
pub const QA_AGENT: &str = "qa_agent";

const CONVERSION_SYSTEM: &str = "\
You are a senior QA engineer. You convert short test descriptions into \
precise, numbered browser automation steps. Every step is a single \
imperative action (open, click, type, verify, capture). Never invent \
functionality the description does not mention. Reply with the numbered \
steps only.";

const CONVERSION_USER: &str = "\
Convert this test case into numbered browser automation steps.

Description: {description}
Module: {module}
Functionality: {functionality}
Priority: {priority}";

const AGENT_SYSTEM: &str = "\
You are a QA automation agent. You drive a real browser to execute a test, \
one tool call at a time, and you verify each step's outcome before moving on.

Available tools:
{tool_list}

To invoke a tool, reply with:
USE_TOOL: <tool-name>
ARGS: <json-object>

You may invoke several tools in one reply; they run in the order written. \
Tool results are sent back to you prefixed with ✅ (success) or ❌ (failure). \
After a ❌ result, adapt: fix the selector, wait, or choose another approach.

When every step of the test is done (or cannot be completed), reply with a \
short summary and NO tool call. A reply without USE_TOOL ends the run.

Extraction rules: after each navigation use get-metadata to record the page, \
and pass a selector for the elements the test interacts with, so links, \
buttons, and form fields are captured with their attributes.";

const AGENT_USER: &str = "\
Execute this QA test:

{test_description}";

/// Registry of named templates.
pub struct PromptLibrary {
    templates: HashMap<String, PromptTemplate>,
    validation: ValidationConfig,
}

impl PromptLibrary {
    /// Builds the library with the built-in templates; the agent template's
    /// tool list comes from `catalogue`.
    pub fn new(catalogue: &ToolCatalogue, validation: ValidationConfig) -> Self {
        let mut templates = HashMap::new();
        templates.insert(
            TEST_CASE_CONVERSION.to_string(),
            PromptTemplate {
                system: CONVERSION_SYSTEM.to_string(),
                user_template: CONVERSION_USER.to_string(),
            },
        );
        templates.insert(
            QA_AGENT.to_string(),
            PromptTemplate {
                system: AGENT_SYSTEM.replace("{tool_list}", &catalogue.describe()),
                user_template: AGENT_USER.to_string(),
            },
        );

        Self {
            templates,
            validation,
        }
    }

    pub fn register(&mut self, name: impl Into<String>, template: PromptTemplate) {
        self.templates.insert(name.into(), template);
    }

    pub fn template(&self, name: &str) -> Option<&PromptTemplate> {
        self.templates.get(name)
    }

    /// Substitutes every `{placeholder}` strictly, then validates the user
    /// prompt. Missing variables are configuration errors; a critical
    /// validation verdict is an invalid-input error.
    pub fn format(
        &self,
        name: &str,
        vars: &HashMap<String, String>,
    ) -> Result<AssembledPrompt, RunError> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| ConfigError::UnknownTemplate(name.to_string()))?;

        let user = substitute(name, &template.user_template, vars)?;

        let report = validate(&user, &self.validation);
        if !report.is_valid() {
            return Err(RunError::InvalidInput(format!(
                "prompt rejected by validator: {}",
                report.summary()
            )));
        }

        Ok(AssembledPrompt {
            system: template.system.clone(),
            user,
        })
    }
}

fn placeholder_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"\{([a-z_]+)\}").expect("placeholder pattern compiles"))
}

fn substitute(
    template_name: &str,
    template: &str,
    vars: &HashMap<String, String>,
) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(template.len());
    let mut cursor = 0;

    for capture in placeholder_regex().captures_iter(template) {
        let whole = capture.get(0).expect("capture group zero");
        let variable = &capture[1];

        let value = vars
            .get(variable)
            .ok_or_else(|| ConfigError::MissingTemplateVariable {
                template: template_name.to_string(),
                variable: variable.to_string(),
            })?;

        out.push_str(&template[cursor..whole.start()]);
        out.push_str(value);
        cursor = whole.end();
    }

    out.push_str(&template[cursor..]);
    Ok(out)
}
