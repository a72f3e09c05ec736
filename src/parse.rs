//! Directive extraction from free-form model replies.
//!
//! The model is instructed to emit blocks of the form:
//!
//! ```text
//! USE_TOOL: <tool-name>
//! ARGS: {"key": "value"}
//! ```
//!
//! The parser is lenient about surrounding prose and whitespace but strict
//! about the markers themselves (`USE_TOOL:` is case-sensitive). A reply
//! with no marker at all is the loop's completion signal.

use serde_json::Value;

const USE_TOOL_MARKER: &str = "USE_TOOL:";
const ARGS_MARKER: &str = "ARGS:";

/// One structured tool invocation extracted from an assistant message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolInvocation {
    pub tool: String,
    pub arguments: Value,
}

/// A parsed block: either a well-formed invocation or a malformed one that
/// must still flow back to the model as a `❌` outcome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolDirective {
    Call(ToolInvocation),
    Invalid { tool: String, reason: String },
}

/// Scans an assistant message for directives, in textual order. An empty
/// result is the completion signal.
pub fn parse_directives(message: &str) -> Vec<ToolDirective> {
    let mut directives = Vec::new();
    let mut cursor = 0;

    while let Some(offset) = message[cursor..].find(USE_TOOL_MARKER) {
        let marker_start = cursor + offset;
        let name_start = marker_start + USE_TOOL_MARKER.len();

        let line_end = message[name_start..]
            .find('\n')
            .map(|index| name_start + index)
            .unwrap_or(message.len());
        let tool = message[name_start..line_end].trim().to_string();
        cursor = line_end;

        if tool.is_empty() {
            directives.push(ToolDirective::Invalid {
                tool: String::new(),
                reason: "USE_TOOL marker without a tool name".to_string(),
            });
            continue;
        }

        // The ARGS marker must come before any subsequent USE_TOOL block;
        // a bare directive gets an empty argument object.
        let next_marker = message[cursor..]
            .find(USE_TOOL_MARKER)
            .map(|index| cursor + index)
            .unwrap_or(message.len());

        let args_region = &message[cursor..next_marker];
        let Some(args_offset) = args_region.find(ARGS_MARKER) else {
            directives.push(ToolDirective::Call(ToolInvocation {
                tool,
                arguments: Value::Object(serde_json::Map::new()),
            }));
            continue;
        };

        let json_start = cursor + args_offset + ARGS_MARKER.len();
        match extract_json_object(&message[json_start..next_marker]) {
            Some((raw, consumed)) => {
                cursor = json_start + consumed;
                match serde_json::from_str::<Value>(raw) {
                    Ok(arguments) if arguments.is_object() => {
                        directives.push(ToolDirective::Call(ToolInvocation { tool, arguments }));
                    }
                    Ok(_) => {
                        directives.push(ToolDirective::Invalid {
                            tool,
                            reason: "ARGS must be a JSON object".to_string(),
                        });
                    }
                    Err(err) => {
                        directives.push(ToolDirective::Invalid {
                            tool,
                            reason: format!("ARGS is not valid JSON: {err}"),
                        });
                    }
                }
            }
            None => {
                directives.push(ToolDirective::Invalid {
                    tool,
                    reason: "ARGS marker without a JSON object".to_string(),
                });
            }
        }
    }

    directives
}

/// Renders an invocation back into the wire syntax. The parser/printer pair
/// round-trips: `parse_directives(render_directive(x)) == [Call(x)]`.
pub fn render_directive(invocation: &ToolInvocation) -> String {
    format!(
        "{USE_TOOL_MARKER} {}\n{ARGS_MARKER} {}",
        invocation.tool, invocation.arguments
    )
}

/// Finds the first brace-balanced JSON object in `text`, honoring string
/// literals and escapes. Returns the slice and the offset just past it.
fn extract_json_object(text: &str) -> Option<(&str, usize)> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (index, &byte) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((&text[start..=index], index + 1));
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn message_without_marker_is_completion_signal() {
        let directives = parse_directives("The test is complete. All steps passed.");
        assert!(directives.is_empty());
    }

    #[test]
    fn single_directive_with_prose_around_it() {
        let message = "I will open the page first.\n\nUSE_TOOL: navigate\nARGS: {\"url\": \"https://example.com\"}\n\nThen I will inspect it.";
        let directives = parse_directives(message);

        assert_eq!(directives.len(), 1);
        assert_eq!(
            directives[0],
            ToolDirective::Call(ToolInvocation {
                tool: "navigate".to_string(),
                arguments: json!({"url": "https://example.com"}),
            })
        );
    }

    #[test]
    fn multiple_directives_keep_textual_order() {
        let message = "USE_TOOL: navigate\nARGS: {\"url\": \"https://a.test\"}\nUSE_TOOL: screenshot\nARGS: {\"filename\": \"a.png\"}";
        let directives = parse_directives(message);

        assert_eq!(directives.len(), 2);
        let ToolDirective::Call(first) = &directives[0] else {
            panic!("expected call");
        };
        let ToolDirective::Call(second) = &directives[1] else {
            panic!("expected call");
        };
        assert_eq!(first.tool, "navigate");
        assert_eq!(second.tool, "screenshot");
    }

    #[test]
    fn nested_braces_and_strings_are_balanced() {
        let message = "USE_TOOL: exec-js\nARGS: {\"script\": \"JSON.stringify({a: \\\"}\\\", b: {c: 1}})\"}";
        let directives = parse_directives(message);

        assert_eq!(directives.len(), 1);
        let ToolDirective::Call(call) = &directives[0] else {
            panic!("expected call");
        };
        assert!(call.arguments["script"]
            .as_str()
            .expect("script string")
            .contains("{c: 1}"));
    }

    #[test]
    fn malformed_json_surfaces_as_invalid_directive() {
        let message = "USE_TOOL: click\nARGS: {\"selector\": }";
        let directives = parse_directives(message);

        assert_eq!(directives.len(), 1);
        assert!(matches!(
            &directives[0],
            ToolDirective::Invalid { tool, .. } if tool == "click"
        ));
    }

    #[test]
    fn missing_args_defaults_to_empty_object() {
        let directives = parse_directives("USE_TOOL: close\n");
        assert_eq!(
            directives,
            vec![ToolDirective::Call(ToolInvocation {
                tool: "close".to_string(),
                arguments: json!({}),
            })]
        );
    }

    #[test]
    fn lowercase_marker_is_ignored() {
        let directives = parse_directives("use_tool: navigate\nargs: {\"url\": \"x\"}");
        assert!(directives.is_empty());
    }

    #[test]
    fn render_then_parse_round_trips() {
        let invocation = ToolInvocation {
            tool: "wait-for-selector".to_string(),
            arguments: json!({"selector": "#login", "timeout": 5000}),
        };

        let rendered = render_directive(&invocation);
        let directives = parse_directives(&rendered);
        assert_eq!(directives, vec![ToolDirective::Call(invocation)]);
    }

    #[test]
    fn whitespace_around_markers_is_tolerated() {
        let message = "USE_TOOL:    type   \nARGS:    {\"selector\": \"#q\", \"text\": \"laptops\"}   ";
        let directives = parse_directives(message);

        assert_eq!(directives.len(), 1);
        let ToolDirective::Call(call) = &directives[0] else {
            panic!("expected call");
        };
        assert_eq!(call.tool, "type");
        assert_eq!(call.arguments["text"], "laptops");
    }
}
