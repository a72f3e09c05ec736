//! Runtime configuration read from the environment.
//!
//! Plain structs with explicit readers; numeric fields are validated at
//! construction so a bad environment fails the run before any browser or
//! provider is touched.

use std::path::PathBuf;

use crate::error::ConfigError;
use crate::prompt::ValidationConfig;

/// Which provider adapter the run coordinator constructs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    /// Self-hosted OpenAI-compatible inference service.
    Hosted,
    /// Third-party chat service (Anthropic).
    Anthropic,
}

impl ProviderKind {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hosted" => Ok(ProviderKind::Hosted),
            "anthropic" => Ok(ProviderKind::Anthropic),
            other => Err(ConfigError::InvalidValue {
                variable: "QA_AGENT_PROVIDER",
                message: format!("expected 'hosted' or 'anthropic', got '{other}'"),
            }),
        }
    }
}

/// Provider settings for the LLM invoker.
#[derive(Clone, Debug)]
pub struct LlmSettings {
    pub provider: ProviderKind,
    pub model: String,
    pub api_key: String,
    pub api_base_url: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: u32,
}

impl LlmSettings {
    pub fn new(
        provider: ProviderKind,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let model = model.into();
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                variable: "QA_AGENT_MODEL",
                message: "model must not be empty".to_string(),
            });
        }
        Ok(Self {
            provider,
            model,
            api_key: api_key.into(),
            api_base_url: None,
            temperature: None,
            max_tokens: 4096,
        })
    }

    pub fn with_temperature(mut self, temperature: f32) -> Result<Self, ConfigError> {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::InvalidValue {
                variable: "QA_AGENT_TEMPERATURE",
                message: format!("temperature must be within [0, 2], got {temperature}"),
            });
        }
        self.temperature = Some(temperature);
        Ok(self)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let provider = match std::env::var("QA_AGENT_PROVIDER") {
            Ok(value) => ProviderKind::parse(&value)?,
            Err(_) => ProviderKind::Hosted,
        };

        let model = std::env::var("QA_AGENT_MODEL")
            .map_err(|_| ConfigError::MissingVariable("QA_AGENT_MODEL"))?;

        let api_key = std::env::var("QA_AGENT_API_KEY")
            .or_else(|_| match provider {
                ProviderKind::Hosted => std::env::var("HOSTED_LLM_API_KEY"),
                ProviderKind::Anthropic => std::env::var("ANTHROPIC_API_KEY"),
            })
            .map_err(|_| ConfigError::MissingVariable("QA_AGENT_API_KEY"))?;

        let mut settings = LlmSettings::new(provider, model, api_key)?;

        if let Ok(base_url) = std::env::var("QA_AGENT_API_BASE_URL") {
            settings.api_base_url = Some(base_url);
        }

        if let Ok(raw) = std::env::var("QA_AGENT_TEMPERATURE") {
            let temperature = raw
                .trim()
                .parse::<f32>()
                .map_err(|err| ConfigError::InvalidValue {
                    variable: "QA_AGENT_TEMPERATURE",
                    message: err.to_string(),
                })?;
            settings = settings.with_temperature(temperature)?;
        }

        if let Ok(raw) = std::env::var("QA_AGENT_MAX_TOKENS") {
            settings.max_tokens =
                raw.trim()
                    .parse::<u32>()
                    .map_err(|err| ConfigError::InvalidValue {
                        variable: "QA_AGENT_MAX_TOKENS",
                        message: err.to_string(),
                    })?;
        }

        Ok(settings)
    }
}

/// Run-level settings held by the coordinator.
#[derive(Clone, Debug)]
pub struct RunSettings {
    /// Directory screenshots are written to.
    pub screenshot_dir: PathBuf,
    /// Default iteration ceiling when the instruction does not set one.
    pub max_iterations: u32,
    /// Prompt validation policy.
    pub validation: ValidationConfig,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            screenshot_dir: PathBuf::from("./screenshots"),
            max_iterations: 10,
            validation: ValidationConfig::default(),
        }
    }
}

impl RunSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = RunSettings::default();

        if let Ok(dir) = std::env::var("QA_AGENT_SCREENSHOT_DIR") {
            settings.screenshot_dir = PathBuf::from(dir);
        }

        if let Ok(raw) = std::env::var("QA_AGENT_MAX_ITERATIONS") {
            let ceiling = raw
                .trim()
                .parse::<u32>()
                .map_err(|err| ConfigError::InvalidValue {
                    variable: "QA_AGENT_MAX_ITERATIONS",
                    message: err.to_string(),
                })?;
            if ceiling == 0 {
                return Err(ConfigError::InvalidValue {
                    variable: "QA_AGENT_MAX_ITERATIONS",
                    message: "iteration ceiling must be at least 1".to_string(),
                });
            }
            settings.max_iterations = ceiling;
        }

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_parse_accepts_known_kinds() {
        assert_eq!(
            ProviderKind::parse("hosted").expect("parses"),
            ProviderKind::Hosted
        );
        assert_eq!(
            ProviderKind::parse(" Anthropic ").expect("parses"),
            ProviderKind::Anthropic
        );
        assert!(ProviderKind::parse("bedrock").is_err());
    }

    #[test]
    fn temperature_outside_range_is_rejected() {
        let settings = LlmSettings::new(ProviderKind::Hosted, "qwen", "key").expect("settings");
        assert!(settings.clone().with_temperature(2.5).is_err());
        assert!(settings.with_temperature(0.7).is_ok());
    }

    #[test]
    fn empty_model_is_rejected() {
        assert!(LlmSettings::new(ProviderKind::Hosted, "  ", "key").is_err());
    }
}
