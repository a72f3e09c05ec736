//! Navigation-graph extraction from the transcript.
//!
//! The scanner is a deterministic post-processor: it reads the tool-output
//! messages in order, recognizes the `📄`/`🎯` metadata blocks, and
//! reconstructs page nodes, element records, and navigation edges. It never
//! fabricates entities; a sparse transcript yields a sparse graph.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::transcript::Transcript;

const PAGE_MARKER: &str = "📄 Page Metadata:";
const ELEMENT_MARKER: &str = "🎯 Element Metadata";
const CLICK_PREFIX: &str = "✅ clicked element: ";
const NAVIGATE_PREFIX: &str = "✅ navigated to ";
const TEXT_TRUNCATE_CHARS: usize = 200;

/// Maps an HTML tag onto the element kind vocabulary; unknown tags pass
/// through as themselves.
pub fn element_kind(tag: &str) -> String {
    match tag.trim().to_ascii_lowercase().as_str() {
        "a" => "link".to_string(),
        "button" => "button".to_string(),
        "input" => "input".to_string(),
        "form" => "form".to_string(),
        "select" => "select".to_string(),
        "textarea" => "textarea".to_string(),
        other => other.to_string(),
    }
}

/// Attributes captured for an element, when present in the transcript.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "class", skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
}

/// One element observed on a page. Identifiers are positional within the
/// parent page, not global.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub tag: String,
    pub text: String,
    pub selector: String,
    pub attributes: ElementAttributes,
    /// Reserved for downstream enrichment; always empty here.
    pub dependencies: Vec<String>,
}

/// One distinct URL observed in the transcript.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PageNode {
    pub id: String,
    pub label: String,
    pub x: i64,
    pub y: i64,
    pub url: String,
    pub title: String,
    pub elements: Vec<ElementRecord>,
}

/// Directed, labelled transition between two pages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub label: String,
}

/// The extracted graph.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NavigationGraph {
    pub pages: Vec<PageNode>,
    pub edges: Vec<Edge>,
}

/// Scans the transcript's tool outputs into a navigation graph.
pub fn scan(transcript: &Transcript) -> NavigationGraph {
    let mut scanner = Scanner::default();
    for output in transcript.tool_outputs() {
        scanner.consume(output);
    }
    scanner.finish()
}

#[derive(Default)]
struct Scanner {
    pages: Vec<PageNode>,
    edges: Vec<Edge>,
    page_by_url: HashMap<String, usize>,
    seen_selectors: Vec<HashSet<String>>,
    current_page: Option<usize>,
    last_action: Option<String>,
}

impl Scanner {
    fn consume(&mut self, output: &str) {
        let lines: Vec<&str> = output.lines().collect();
        let mut index = 0;

        while index < lines.len() {
            let line = lines[index].trim();

            if let Some(description) = line.strip_prefix(CLICK_PREFIX) {
                self.last_action = Some(description.trim().to_string());
            } else if let Some(url) = line.strip_prefix(NAVIGATE_PREFIX) {
                self.last_action = Some(format!("navigate to {}", url.trim()));
            } else if line == PAGE_MARKER {
                index = self.consume_page_block(&lines, index + 1);
                continue;
            } else if line.starts_with(ELEMENT_MARKER) {
                index = self.consume_element_block(&lines, index + 1);
                continue;
            }

            index += 1;
        }
    }

    /// Reads the `• URL:` / `• Title:` bullets after a page marker and
    /// allocates or revisits the page. Returns the next unread line index.
    fn consume_page_block(&mut self, lines: &[&str], mut index: usize) -> usize {
        let mut url = None;
        let mut title = String::new();

        while index < lines.len() {
            let line = lines[index].trim();
            if let Some(value) = line.strip_prefix("• URL:") {
                url = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix("• Title:") {
                title = value.trim().to_string();
            } else if !line.is_empty() {
                break;
            } else if url.is_some() {
                break;
            }
            index += 1;
        }

        if let Some(url) = url {
            if !url.is_empty() {
                self.visit_page(url, title);
            }
        }
        index
    }

    fn visit_page(&mut self, url: String, title: String) {
        if let Some(&existing) = self.page_by_url.get(&url) {
            // Revisit: no new node, no edge; later elements merge in.
            self.current_page = Some(existing);
            self.last_action = None;
            return;
        }

        let index = self.pages.len();
        let id = format!("page_{}", index + 1);
        let host = url::Url::parse(&url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(ToString::to_string))
            .unwrap_or_default();

        self.pages.push(PageNode {
            id: id.clone(),
            label: format!("{title} ({host})"),
            x: 200 + 300 * index as i64,
            y: 100,
            url: url.clone(),
            title,
            elements: Vec::new(),
        });
        self.seen_selectors.push(HashSet::new());
        self.page_by_url.insert(url, index);

        if let Some(previous) = self.current_page {
            let label = self
                .last_action
                .take()
                .unwrap_or_else(|| "navigation".to_string());
            self.edges.push(Edge {
                source: self.pages[previous].id.clone(),
                target: id,
                label,
            });
        }

        self.current_page = Some(index);
        self.last_action = None;
    }

    /// Parses `Element <k>:` entries until a line that belongs to no entry.
    /// Returns the next unread line index.
    fn consume_element_block(&mut self, lines: &[&str], mut index: usize) -> usize {
        let Some(page) = self.current_page else {
            // Elements without a page to attach to are dropped, never invented.
            return index;
        };

        let mut entry: Option<PendingElement> = None;

        while index < lines.len() {
            let line = lines[index].trim();

            if line.starts_with("Element ") && line.ends_with(':') {
                if let Some(done) = entry.take() {
                    self.attach_element(page, done);
                }
                entry = Some(PendingElement::default());
            } else if let Some(pending) = entry.as_mut() {
                if let Some(value) = line.strip_prefix("• Selector:") {
                    pending.selector = value.trim().to_string();
                } else if let Some(value) = line.strip_prefix("• Tag:") {
                    pending.tag = value.trim().trim_matches(['<', '>']).to_string();
                } else if let Some(value) = line.strip_prefix("• Type:") {
                    pending.kind = Some(value.trim().to_string());
                } else if let Some(value) = line.strip_prefix("• Text:") {
                    pending.text = value.trim().to_string();
                } else if let Some(value) = line.strip_prefix("• Href:") {
                    pending.href = bullet_value(value);
                } else if let Some(value) = line.strip_prefix("• ID:") {
                    pending.id = bullet_value(value);
                } else if let Some(value) = line.strip_prefix("• Name:") {
                    pending.name = bullet_value(value);
                } else if let Some(value) = line.strip_prefix("• Class:") {
                    pending.class_name = bullet_value(value);
                } else if let Some(value) = line.strip_prefix("• InputType:") {
                    pending.input_type = bullet_value(value);
                } else if !line.is_empty() {
                    break;
                }
            } else if !line.is_empty() {
                break;
            }

            index += 1;
        }

        if let Some(done) = entry.take() {
            self.attach_element(page, done);
        }
        index
    }

    fn attach_element(&mut self, page: usize, pending: PendingElement) {
        if pending.selector.is_empty() && pending.tag.is_empty() {
            return;
        }

        // Append-only merge keyed by selector within the page.
        let key = if pending.selector.is_empty() {
            format!("{}#{}", pending.tag, pending.text)
        } else {
            pending.selector.clone()
        };
        if !self.seen_selectors[page].insert(key) {
            return;
        }

        let node = &mut self.pages[page];
        let kind = pending
            .kind
            .filter(|kind| !kind.is_empty())
            .unwrap_or_else(|| element_kind(&pending.tag));

        node.elements.push(ElementRecord {
            id: format!("element_{}", node.elements.len() + 1),
            kind,
            tag: pending.tag,
            text: truncate_chars(&pending.text, TEXT_TRUNCATE_CHARS),
            selector: pending.selector,
            attributes: ElementAttributes {
                id: pending.id,
                name: pending.name,
                class_name: pending.class_name,
                href: pending.href,
                input_type: pending.input_type,
            },
            dependencies: Vec::new(),
        });
    }

    fn finish(self) -> NavigationGraph {
        NavigationGraph {
            pages: self.pages,
            edges: self.edges,
        }
    }
}

#[derive(Default)]
struct PendingElement {
    selector: String,
    tag: String,
    kind: Option<String>,
    text: String,
    href: Option<String>,
    id: Option<String>,
    name: Option<String>,
    class_name: Option<String>,
    input_type: Option<String>,
}

fn bullet_value(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "None" {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    text.chars().take(limit).collect()
}
