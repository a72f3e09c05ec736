//! Rule-based prompt validation.
//!
//! Pure function over a text prompt plus a policy. Findings are graded;
//! critical findings always block, errors block only in strict mode. A
//! sanitized form is produced regardless of verdict.

use std::sync::OnceLock;

use regex::Regex;

/// Finding grade, ordered by seriousness.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Clone, Debug)]
pub struct Finding {
    pub severity: Severity,
    pub code: &'static str,
    pub message: String,
}

/// Validation policy. Token count is estimated as characters divided by 4.
#[derive(Clone, Debug)]
pub struct ValidationConfig {
    pub max_length: usize,
    pub min_length: usize,
    pub max_tokens: usize,
    pub allow_html: bool,
    pub allow_code_fences: bool,
    pub strict_mode: bool,
    pub check_injection: bool,
    pub check_profanity: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_length: 10_000,
            min_length: 1,
            max_tokens: 4096,
            allow_html: false,
            allow_code_fences: true,
            strict_mode: false,
            check_injection: true,
            check_profanity: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ValidationReport {
    pub findings: Vec<Finding>,
    pub sanitized: String,
    is_valid: bool,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn has_critical(&self) -> bool {
        self.findings
            .iter()
            .any(|finding| finding.severity == Severity::Critical)
    }

    /// One-line summary of the worst findings, for error surfaces.
    pub fn summary(&self) -> String {
        let worst = self
            .findings
            .iter()
            .map(|finding| finding.severity)
            .max()
            .unwrap_or(Severity::Info);
        self.findings
            .iter()
            .filter(|finding| finding.severity == worst)
            .map(|finding| finding.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

struct InjectionPattern {
    regex: Regex,
    code: &'static str,
    message: &'static str,
}

fn injection_patterns() -> &'static [InjectionPattern] {
    static PATTERNS: OnceLock<Vec<InjectionPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let specs: &[(&str, &str, &str)] = &[
            (
                r"(?is)<script\b[^>]*>.*?</script\s*>",
                "script-tag",
                "prompt contains a script tag pair",
            ),
            (
                r"(?i)javascript\s*:",
                "javascript-scheme",
                "prompt contains the javascript: scheme",
            ),
            (
                r"(?i)\bon\w+\s*=",
                "inline-event-handler",
                "prompt contains an inline event handler",
            ),
            (r"(?i)\beval\s*\(", "eval-call", "prompt contains eval("),
            (r"(?i)\bexec\s*\(", "exec-call", "prompt contains exec("),
            (
                r"\$\{[^}]*\}",
                "template-placeholder",
                "prompt contains a ${...} template placeholder",
            ),
            (
                r"\{\{[^}]*\}\}",
                "template-placeholder",
                "prompt contains a {{...}} template placeholder",
            ),
            (
                r"(?i)__import__",
                "dangerous-builtin",
                "prompt contains __import__",
            ),
            (
                r"(?i)\bsubprocess\b",
                "dangerous-builtin",
                "prompt contains subprocess",
            ),
            (
                r"(?i)os\.system",
                "dangerous-builtin",
                "prompt contains os.system",
            ),
            (
                r"(?i)ignore\s+previous\s+instructions",
                "instruction-override",
                "prompt attempts to override prior instructions",
            ),
            (
                r"(?i)disregard\s+all\s+previous",
                "instruction-override",
                "prompt attempts to override prior instructions",
            ),
            (
                r"(?i)forget\s+everything",
                "instruction-override",
                "prompt attempts to override prior instructions",
            ),
            (
                r"(?i)\bjailbreak\b",
                "instruction-override",
                "prompt contains a jailbreak phrase",
            ),
        ];

        specs
            .iter()
            .map(|(pattern, code, message)| InjectionPattern {
                regex: Regex::new(pattern).expect("injection pattern compiles"),
                code,
                message,
            })
            .collect()
    })
}

fn html_tag_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"<[^>\n]+>").expect("html pattern compiles"))
}

const PROFANITY: &[&str] = &["damn", "hell", "crap"];

/// Validates `text` against `config`, always producing a sanitized form.
pub fn validate(text: &str, config: &ValidationConfig) -> ValidationReport {
    let mut findings = Vec::new();
    let char_count = text.chars().count();

    if char_count < config.min_length {
        findings.push(Finding {
            severity: Severity::Error,
            code: "too-short",
            message: format!(
                "prompt is {char_count} characters, minimum is {}",
                config.min_length
            ),
        });
    }

    if char_count > config.max_length {
        findings.push(Finding {
            severity: Severity::Error,
            code: "too-long",
            message: format!(
                "prompt is {char_count} characters, maximum is {}",
                config.max_length
            ),
        });
    }

    let estimated_tokens = char_count / 4;
    if estimated_tokens > config.max_tokens {
        findings.push(Finding {
            severity: Severity::Error,
            code: "token-ceiling",
            message: format!(
                "prompt is roughly {estimated_tokens} tokens, ceiling is {}",
                config.max_tokens
            ),
        });
    }

    if !config.allow_html && html_tag_regex().is_match(text) {
        findings.push(Finding {
            severity: Severity::Warning,
            code: "html-content",
            message: "prompt contains HTML markup".to_string(),
        });
    }

    if !config.allow_code_fences && text.contains("```") {
        findings.push(Finding {
            severity: Severity::Warning,
            code: "code-fence",
            message: "prompt contains a code fence".to_string(),
        });
    }

    if config.check_injection {
        for pattern in injection_patterns() {
            if pattern.regex.is_match(text) {
                findings.push(Finding {
                    severity: Severity::Critical,
                    code: pattern.code,
                    message: pattern.message.to_string(),
                });
            }
        }
    }

    if config.check_profanity {
        let lowered = text.to_lowercase();
        for word in PROFANITY {
            if lowered
                .split(|ch: char| !ch.is_alphanumeric())
                .any(|token| token == *word)
            {
                findings.push(Finding {
                    severity: Severity::Warning,
                    code: "profanity",
                    message: format!("prompt contains flagged word: {word}"),
                });
            }
        }
    }

    let has_critical = findings
        .iter()
        .any(|finding| finding.severity == Severity::Critical);
    let has_error = findings
        .iter()
        .any(|finding| finding.severity == Severity::Error);
    let is_valid = !has_critical && (!config.strict_mode || !has_error);

    ValidationReport {
        sanitized: sanitize(text),
        findings,
        is_valid,
    }
}

/// HTML stripped, suspicious sequences removed, whitespace collapsed.
fn sanitize(text: &str) -> String {
    let mut cleaned = html_tag_regex().replace_all(text, " ").into_owned();
    for pattern in injection_patterns() {
        cleaned = pattern.regex.replace_all(&cleaned, " ").into_owned();
    }

    let mut collapsed = String::with_capacity(cleaned.len());
    let mut last_was_space = false;
    for ch in cleaned.chars() {
        if ch.is_whitespace() && ch != '\n' {
            if !last_was_space {
                collapsed.push(' ');
            }
            last_was_space = true;
        } else {
            collapsed.push(ch);
            last_was_space = false;
        }
    }
    collapsed.trim().to_string()
}
