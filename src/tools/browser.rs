//! The ten browser operations exposed to the model.
//!
//! Every handler resolves the shared session out of the [`ToolContext`],
//! performs exactly one action, and reports a single marker-prefixed
//! string. Selector syntax accepted everywhere: plain CSS, XPath with a
//! `//` prefix, and `text=<visible text>`.

use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Element, Page};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{BrowserError, ToolError};
use crate::graph::element_kind;
use crate::tools::{ToolContext, ToolOutcome, ToolSpec};

const NAVIGATE_TIMEOUT: Duration = Duration::from_secs(30);
const ELEMENT_WAIT: Duration = Duration::from_secs(10);
const DEFAULT_WAIT_MS: u64 = 10_000;
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const MAX_METADATA_ELEMENTS: usize = 10;
const CONTENT_PREVIEW_CHARS: usize = 2000;
const TEXT_TRUNCATE_CHARS: usize = 200;

/// The full catalogue in presentation order.
pub fn all_tools() -> Vec<ToolSpec> {
    vec![
        navigate_tool(),
        click_tool(),
        type_tool(),
        screenshot_tool(),
        wait_for_selector_tool(),
        wait_for_text_tool(),
        get_content_tool(),
        execute_js_tool(),
        get_metadata_tool(),
        close_tool(),
    ]
}

pub fn navigate_tool() -> ToolSpec {
    ToolSpec::new(
        "navigate",
        "Open a URL in the browser and wait for the page to load",
    )
    .with_schema(json!({
        "type": "object",
        "properties": {
            "url": {"type": "string"}
        },
        "required": ["url"],
        "additionalProperties": false
    }))
    .expect("valid schema")
    .with_handler(|args, ctx| {
        let url = str_arg(&args, "url");

        async move {
            let options = ctx.options().clone();
            if let Err(err) = ctx
                .session()
                .initialize(options.engine, options.headless)
                .await
            {
                return Ok(ToolOutcome::failed(format!(
                    "navigation failed: {err} (url: {url})"
                )));
            }
            let page = ctx.session().page().await?;

            let navigation = tokio::time::timeout(NAVIGATE_TIMEOUT, page.goto(url.clone())).await;
            match navigation {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    return Ok(ToolOutcome::failed(format!(
                        "navigation failed: {err} (url: {url})"
                    )));
                }
                Err(_) => {
                    return Ok(ToolOutcome::failed(format!(
                        "navigation failed: timed out after {}s (url: {url})",
                        NAVIGATE_TIMEOUT.as_secs()
                    )));
                }
            }

            let metadata = page_metadata_block(&page).await?;
            Ok(ToolOutcome::passed(format!(
                "navigated to {url}\n{metadata}"
            )))
        }
    })
}

pub fn click_tool() -> ToolSpec {
    ToolSpec::new(
        "click",
        "Click an element identified by CSS selector, XPath (// prefix), or text=",
    )
    .with_schema(json!({
        "type": "object",
        "properties": {
            "selector": {"type": "string"},
            "description": {"type": "string"}
        },
        "required": ["selector"],
        "additionalProperties": false
    }))
    .expect("valid schema")
    .with_handler(|args, ctx| {
        let selector = str_arg(&args, "selector");
        let description = optional_str_arg(&args, "description").unwrap_or_else(|| selector.clone());

        async move {
            let page = ctx.session().page().await?;

            let element = match wait_for_element(&page, &selector, ELEMENT_WAIT).await {
                Ok(element) => element,
                Err(err) => {
                    return Ok(ToolOutcome::failed(format!(
                        "click failed: {err} (selector: {selector})"
                    )));
                }
            };

            match element.click().await {
                Ok(_) => Ok(ToolOutcome::passed(format!("clicked element: {description}"))),
                Err(err) => Ok(ToolOutcome::failed(format!(
                    "click failed: {err} (selector: {selector})"
                ))),
            }
        }
    })
}

pub fn type_tool() -> ToolSpec {
    ToolSpec::new(
        "type",
        "Clear an input element and type text into it",
    )
    .with_schema(json!({
        "type": "object",
        "properties": {
            "selector": {"type": "string"},
            "text": {"type": "string"},
            "description": {"type": "string"}
        },
        "required": ["selector", "text"],
        "additionalProperties": false
    }))
    .expect("valid schema")
    .with_handler(|args, ctx| {
        let selector = str_arg(&args, "selector");
        let text = str_arg(&args, "text");
        let description = optional_str_arg(&args, "description").unwrap_or_else(|| selector.clone());

        async move {
            let page = ctx.session().page().await?;

            let element = match wait_for_element(&page, &selector, ELEMENT_WAIT).await {
                Ok(element) => element,
                Err(err) => {
                    return Ok(ToolOutcome::failed(format!(
                        "type failed: {err} (selector: {selector})"
                    )));
                }
            };

            if let Err(err) = element.click().await {
                return Ok(ToolOutcome::failed(format!(
                    "type failed: element not focusable: {err}"
                )));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;

            // Clear existing content: select-all then overwrite.
            if let Err(err) = element.call_js_fn("function() { this.select && this.select(); }", false).await {
                tracing::debug!(error = %err, "select before typing failed");
            }
            if let Err(err) = element.press_key("Backspace").await {
                return Ok(ToolOutcome::failed(format!(
                    "type failed: could not clear element: {err}"
                )));
            }

            for (index, part) in text.split('\n').enumerate() {
                if index > 0 {
                    if let Err(err) = element.press_key("Enter").await {
                        return Ok(ToolOutcome::failed(format!("type failed: {err}")));
                    }
                }
                if !part.is_empty() {
                    if let Err(err) = element.type_str(part).await {
                        return Ok(ToolOutcome::failed(format!("type failed: {err}")));
                    }
                }
            }

            Ok(ToolOutcome::passed(format!("typed text into {description}")))
        }
    })
}

pub fn screenshot_tool() -> ToolSpec {
    ToolSpec::new(
        "screenshot",
        "Capture the current page to a PNG file",
    )
    .with_schema(json!({
        "type": "object",
        "properties": {
            "filename": {"type": "string"}
        },
        "required": ["filename"],
        "additionalProperties": false
    }))
    .expect("valid schema")
    .with_handler(|args, ctx| {
        let filename = sanitize_filename(&str_arg(&args, "filename"));

        async move {
            let page = ctx.session().page().await?;

            let data = match page.screenshot(ScreenshotParams::builder().build()).await {
                Ok(data) => data,
                Err(err) => {
                    return Ok(ToolOutcome::failed(format!("screenshot failed: {err}")));
                }
            };

            let dir = ctx.screenshot_dir().clone();
            if let Err(err) = tokio::fs::create_dir_all(&dir).await {
                return Ok(ToolOutcome::failed(format!("screenshot failed: {err}")));
            }
            let path = dir.join(&filename);
            if let Err(err) = tokio::fs::write(&path, &data).await {
                return Ok(ToolOutcome::failed(format!("screenshot failed: {err}")));
            }

            ctx.record_screenshot(filename.clone());
            Ok(ToolOutcome::passed(format!("screenshot saved: {filename}")))
        }
    })
}

pub fn wait_for_selector_tool() -> ToolSpec {
    ToolSpec::new(
        "wait-for-selector",
        "Wait until an element matching the selector appears",
    )
    .with_schema(json!({
        "type": "object",
        "properties": {
            "selector": {"type": "string"},
            "timeout": {}
        },
        "required": ["selector"],
        "additionalProperties": false
    }))
    .expect("valid schema")
    .with_handler(|args, ctx| {
        let selector = str_arg(&args, "selector");
        let timeout_ms = timeout_arg(&args, DEFAULT_WAIT_MS);

        async move {
            let page = ctx.session().page().await?;

            match wait_for_element(&page, &selector, Duration::from_millis(timeout_ms)).await {
                Ok(_) => Ok(ToolOutcome::passed(format!("element appeared: {selector}"))),
                Err(err) => Ok(ToolOutcome::failed(format!(
                    "wait failed: {err} (selector: {selector})"
                ))),
            }
        }
    })
}

pub fn wait_for_text_tool() -> ToolSpec {
    ToolSpec::new(
        "wait-for-text",
        "Wait until the given text appears anywhere in the page",
    )
    .with_schema(json!({
        "type": "object",
        "properties": {
            "text": {"type": "string"},
            "timeout": {}
        },
        "required": ["text"],
        "additionalProperties": false
    }))
    .expect("valid schema")
    .with_handler(|args, ctx| {
        let text = str_arg(&args, "text");
        let timeout_ms = timeout_arg(&args, DEFAULT_WAIT_MS);

        async move {
            let page = ctx.session().page().await?;
            let needle = serde_json::to_string(&text)
                .map_err(|err| ToolError::Execution(err.to_string()))?;
            let script = format!(
                "document.body !== null && document.body.innerText.includes({needle})"
            );

            let deadline = std::time::Instant::now() + Duration::from_millis(timeout_ms);
            loop {
                match page.evaluate(script.as_str()).await {
                    Ok(result) => {
                        if result.into_value::<bool>().unwrap_or(false) {
                            return Ok(ToolOutcome::passed(format!("text appeared: {text}")));
                        }
                    }
                    Err(err) => {
                        tracing::debug!(error = %err, "text poll evaluation failed");
                    }
                }

                if std::time::Instant::now() >= deadline {
                    return Ok(ToolOutcome::failed(format!(
                        "wait failed: text not found within {timeout_ms} ms: {text}"
                    )));
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    })
}

pub fn get_content_tool() -> ToolSpec {
    ToolSpec::new(
        "get-content",
        "Return a truncated outline of the current page DOM",
    )
    .with_schema(json!({
        "type": "object",
        "properties": {},
        "required": [],
        "additionalProperties": false
    }))
    .expect("valid schema")
    .with_handler(|_args, ctx| async move {
        let page = ctx.session().page().await?;

        let html = match page.content().await {
            Ok(html) => html,
            Err(err) => {
                return Ok(ToolOutcome::failed(format!("content capture failed: {err}")));
            }
        };

        let outline = condense_whitespace(&html);
        let preview = truncate_chars(&outline, CONTENT_PREVIEW_CHARS);
        Ok(ToolOutcome::passed(format!(
            "page content captured:\n{preview}"
        )))
    })
}

pub fn execute_js_tool() -> ToolSpec {
    ToolSpec::new(
        "exec-js",
        "Execute a JavaScript expression in the page and return its result",
    )
    .with_schema(json!({
        "type": "object",
        "properties": {
            "script": {"type": "string"}
        },
        "required": ["script"],
        "additionalProperties": false
    }))
    .expect("valid schema")
    .with_handler(|args, ctx| {
        let script = str_arg(&args, "script");

        async move {
            let page = ctx.session().page().await?;

            match page.evaluate(script.as_str()).await {
                Ok(result) => {
                    let rendered = match result.value() {
                        Some(value) => serde_json::to_string(value)
                            .unwrap_or_else(|_| "null".to_string()),
                        None => "undefined".to_string(),
                    };
                    Ok(ToolOutcome::passed(format!(
                        "script executed: {}",
                        truncate_chars(&rendered, 1000)
                    )))
                }
                Err(err) => Ok(ToolOutcome::failed(format!("script failed: {err}"))),
            }
        }
    })
}

pub fn get_metadata_tool() -> ToolSpec {
    ToolSpec::new(
        "get-metadata",
        "Report page URL and title, plus attributes of elements matching an optional selector",
    )
    .with_schema(json!({
        "type": "object",
        "properties": {
            "selector": {"type": "string"}
        },
        "required": [],
        "additionalProperties": false
    }))
    .expect("valid schema")
    .with_handler(|args, ctx| {
        let selector = optional_str_arg(&args, "selector");

        async move {
            let page = ctx.session().page().await?;

            let mut report = format!("metadata captured:\n{}", page_metadata_block(&page).await?);

            if let Some(selector) = selector {
                let elements = match collect_element_metadata(&page, &selector).await {
                    Ok(elements) => elements,
                    Err(err) => {
                        return Ok(ToolOutcome::failed(format!(
                            "metadata failed: {err} (selector: {selector})"
                        )));
                    }
                };

                if elements.is_empty() {
                    return Ok(ToolOutcome::failed(format!(
                        "metadata failed: no elements matched selector: {selector}"
                    )));
                }

                report.push('\n');
                report.push_str(&element_metadata_block(&elements));
            }

            Ok(ToolOutcome::passed(report))
        }
    })
}

pub fn close_tool() -> ToolSpec {
    ToolSpec::new("close", "Close the browser session")
        .with_schema(json!({
            "type": "object",
            "properties": {},
            "required": [],
            "additionalProperties": false
        }))
        .expect("valid schema")
        .with_handler(|_args, ctx| async move {
            ctx.session().close().await?;
            Ok(ToolOutcome::passed("browser closed"))
        })
}

/// The `📄` block both navigate and get_metadata emit; the transcript
/// scanner keys page allocation on these exact labels.
async fn page_metadata_block(page: &Page) -> Result<String, BrowserError> {
    let url = page
        .url()
        .await
        .map_err(BrowserError::from)?
        .unwrap_or_default();
    let title = page
        .get_title()
        .await
        .map_err(BrowserError::from)?
        .unwrap_or_default();

    Ok(format!(
        "📄 Page Metadata:\n  • URL: {url}\n  • Title: {title}"
    ))
}

#[derive(Debug, Deserialize)]
struct ElementMeta {
    selector: String,
    tag: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    href: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    class: Option<String>,
    #[serde(default)]
    input_type: Option<String>,
}

fn element_metadata_block(elements: &[ElementMeta]) -> String {
    let mut block = format!(
        "🎯 Element Metadata (Found {} element(s)):",
        elements.len()
    );

    for (index, element) in elements.iter().enumerate() {
        let kind = element_kind(&element.tag);
        let text = truncate_chars(&element.text, TEXT_TRUNCATE_CHARS);
        block.push_str(&format!(
            "\n  Element {}:\n  • Selector: {}\n  • Tag: <{}>\n  • Type: {}\n  • Text: {}\n  • Href: {}\n  • ID: {}\n  • Name: {}\n  • Class: {}\n  • InputType: {}",
            index + 1,
            element.selector,
            element.tag,
            kind,
            text,
            render_optional(&element.href),
            render_optional(&element.id),
            render_optional(&element.name),
            render_optional(&element.class),
            render_optional(&element.input_type),
        ));
    }

    block
}

fn render_optional(value: &Option<String>) -> &str {
    match value {
        Some(value) if !value.is_empty() => value,
        _ => "None",
    }
}

/// JS prelude shared by the locator and the metadata collector: resolves
/// any accepted selector syntax to element nodes and derives a stable CSS
/// path per node.
const SELECTOR_PRELUDE: &str = r#"
function cssPath(el) {
    const path = [];
    while (el && el.nodeType === Node.ELEMENT_NODE) {
        let part = el.nodeName.toLowerCase();
        if (el.id) {
            path.unshift('#' + CSS.escape(el.id));
            break;
        }
        let sibling = el;
        let nth = 1;
        while ((sibling = sibling.previousElementSibling)) {
            if (sibling.nodeName.toLowerCase() === el.nodeName.toLowerCase()) nth++;
        }
        if (nth > 1) part += ':nth-of-type(' + nth + ')';
        path.unshift(part);
        el = el.parentElement;
    }
    return path.join(' > ');
}
function resolveSelector(sel) {
    if (sel.startsWith('//')) {
        const out = [];
        const result = document.evaluate(sel, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
        for (let i = 0; i < result.snapshotLength; i++) {
            const node = result.snapshotItem(i);
            if (node.nodeType === Node.ELEMENT_NODE) out.push(node);
        }
        return out;
    }
    if (sel.startsWith('text=')) {
        const needle = sel.slice(5).trim();
        const out = [];
        for (const node of document.querySelectorAll('a, button, input, select, textarea, label, span, div, li, td, th, h1, h2, h3, h4, h5, h6, p')) {
            const text = (node.innerText || node.textContent || '').trim();
            if (text.includes(needle)) out.push(node);
        }
        return out;
    }
    return Array.from(document.querySelectorAll(sel));
}
"#;

/// Resolves any accepted selector syntax to a plain CSS path usable with
/// the driver's element queries. `Ok(None)` means nothing matched.
async fn resolve_to_css(page: &Page, selector: &str) -> Result<Option<String>, BrowserError> {
    let encoded =
        serde_json::to_string(selector).map_err(|err| BrowserError::Operation(err.to_string()))?;
    let script = format!(
        "(() => {{ {SELECTOR_PRELUDE}\nconst nodes = resolveSelector({encoded});\nreturn nodes.length ? cssPath(nodes[0]) : null; }})()"
    );

    let result = page.evaluate(script.as_str()).await?;
    Ok(result.into_value::<Option<String>>().unwrap_or(None))
}

/// Polls for an element until the timeout elapses.
async fn wait_for_element(
    page: &Page,
    selector: &str,
    timeout: Duration,
) -> Result<Element, BrowserError> {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if let Some(css) = resolve_to_css(page, selector).await? {
            if let Ok(element) = page.find_element(&css).await {
                return Ok(element);
            }
        }

        if std::time::Instant::now() >= deadline {
            return Err(BrowserError::Timeout(timeout.as_millis() as u64));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn collect_element_metadata(
    page: &Page,
    selector: &str,
) -> Result<Vec<ElementMeta>, BrowserError> {
    let encoded =
        serde_json::to_string(selector).map_err(|err| BrowserError::Operation(err.to_string()))?;
    let script = format!(
        "(() => {{ {SELECTOR_PRELUDE}\nreturn resolveSelector({encoded}).slice(0, {MAX_METADATA_ELEMENTS}).map(el => ({{\
            selector: cssPath(el),\
            tag: el.tagName.toLowerCase(),\
            text: (el.innerText || el.textContent || '').trim(),\
            href: el.getAttribute('href'),\
            id: el.getAttribute('id'),\
            name: el.getAttribute('name'),\
            class: el.getAttribute('class'),\
            input_type: el.getAttribute('type')\
        }})); }})()"
    );

    let result = page.evaluate(script.as_str()).await?;
    result
        .into_value::<Vec<ElementMeta>>()
        .map_err(|err| BrowserError::Operation(err.to_string()))
}

fn str_arg(args: &Value, key: &str) -> String {
    args.get(key)
        .and_then(|value| value.as_str())
        .unwrap_or_default()
        .to_string()
}

fn optional_str_arg(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(|value| value.as_str())
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

/// Timeouts arrive from the model as either numbers or numeric strings.
fn timeout_arg(args: &Value, default_ms: u64) -> u64 {
    match args.get("timeout") {
        Some(Value::Number(number)) => number.as_u64().unwrap_or(default_ms),
        Some(Value::String(raw)) => raw.trim().parse().unwrap_or(default_ms),
        _ => default_ms,
    }
}

/// Path components are stripped; screenshots always land in the configured
/// directory. Collision handling is left to the caller.
fn sanitize_filename(raw: &str) -> String {
    let base = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(raw)
        .trim()
        .to_string();
    let base = if base.is_empty() {
        "screenshot.png".to_string()
    } else {
        base
    };
    if base.contains('.') {
        base
    } else {
        format!("{base}.png")
    }
}

fn condense_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    out
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let truncated: String = text.chars().take(limit).collect();
    format!("{truncated}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_has_exactly_ten_operations() {
        let tools = all_tools();
        assert_eq!(tools.len(), 10);

        let names: Vec<&str> = tools.iter().map(|tool| tool.name()).collect();
        assert_eq!(
            names,
            vec![
                "navigate",
                "click",
                "type",
                "screenshot",
                "wait-for-selector",
                "wait-for-text",
                "get-content",
                "exec-js",
                "get-metadata",
                "close",
            ]
        );
    }

    #[test]
    fn sanitize_filename_strips_paths_and_adds_extension() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd.png");
        assert_eq!(sanitize_filename("step one"), "step one.png");
        assert_eq!(sanitize_filename("login.png"), "login.png");
        assert_eq!(sanitize_filename(""), "screenshot.png");
    }

    #[test]
    fn timeout_arg_accepts_numbers_and_strings() {
        assert_eq!(timeout_arg(&json!({"timeout": 5000}), 10_000), 5000);
        assert_eq!(timeout_arg(&json!({"timeout": "2500"}), 10_000), 2500);
        assert_eq!(timeout_arg(&json!({"timeout": "soon"}), 10_000), 10_000);
        assert_eq!(timeout_arg(&json!({}), 10_000), 10_000);
    }

    #[test]
    fn element_metadata_block_uses_fixed_labels() {
        let elements = vec![ElementMeta {
            selector: "a:nth-of-type(2)".to_string(),
            tag: "a".to_string(),
            text: "More information...".to_string(),
            href: Some("https://www.iana.org/domains/example".to_string()),
            id: None,
            name: None,
            class: None,
            input_type: None,
        }];

        let block = element_metadata_block(&elements);
        assert!(block.starts_with("🎯 Element Metadata (Found 1 element(s)):"));
        assert!(block.contains("  Element 1:"));
        assert!(block.contains("• Selector: a:nth-of-type(2)"));
        assert!(block.contains("• Tag: <a>"));
        assert!(block.contains("• Type: link"));
        assert!(block.contains("• Href: https://www.iana.org/domains/example"));
        assert!(block.contains("• ID: None"));
    }

    #[test]
    fn long_element_text_is_truncated() {
        let elements = vec![ElementMeta {
            selector: "p".to_string(),
            tag: "p".to_string(),
            text: "x".repeat(500),
            href: None,
            id: None,
            name: None,
            class: None,
            input_type: None,
        }];

        let block = element_metadata_block(&elements);
        let text_line = block
            .lines()
            .find(|line| line.trim_start().starts_with("• Text:"))
            .expect("text line");
        assert!(text_line.len() < 250);
        assert!(text_line.ends_with("..."));
    }
}
