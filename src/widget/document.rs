//! Mutable markup tree used by the bundling passes.
//!
//! Wraps a parsed [`scraper::Html`] with a set of per-node patches
//! (remove, replace, attribute edits, inline text). Passes query the
//! original tree with CSS selectors, record patches, and the final
//! document is produced by [`Document::to_html`], which serializes the
//! tree with every patch applied.

use std::collections::HashMap;
use std::sync::Arc;

use ego_tree::{NodeId, NodeRef};
use scraper::node::Element;
use scraper::{ElementRef, Html, Node, Selector};

use crate::{AppError, Result};

/// Elements whose children are serialized without escaping.
const RAW_TEXT_ELEMENTS: &[&str] = &[
    "script", "style", "xmp", "iframe", "noembed", "noframes", "plaintext", "noscript",
];

/// Elements that never have a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "keygen", "link", "meta",
    "param", "source", "track", "wbr",
];

/// Snapshot of a selected element: its node id and attributes.
#[derive(Debug, Clone)]
pub struct ElementInfo {
    id: NodeId,
    attributes: Vec<(String, String)>,
}

impl ElementInfo {
    /// Node id used to address patches.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Value of attribute `name`, if present.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(attr, _)| attr == name)
            .map(|(_, value)| value.as_str())
    }

    /// Whether a whitespace-separated attribute (e.g. `rel`) contains `token`.
    #[must_use]
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.attr(name).is_some_and(|value| {
            value
                .split_ascii_whitespace()
                .any(|candidate| candidate.eq_ignore_ascii_case(token))
        })
    }
}

#[derive(Debug)]
struct Replacement {
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
}

#[derive(Debug, Default)]
struct Patch {
    removed: bool,
    replacement: Option<Replacement>,
    /// `None` value means the attribute is removed.
    attributes: Vec<(String, Option<String>)>,
    inner_text: Option<String>,
}

impl Patch {
    fn attribute(&self, name: &str) -> Option<Option<&str>> {
        self.attributes
            .iter()
            .rev()
            .find(|(attr, _)| attr == name)
            .map(|(_, value)| value.as_deref())
    }

    fn detaches(&self) -> bool {
        self.removed || self.replacement.is_some()
    }
}

/// Serialized, pre-injection document.
///
/// Remembers the byte offset of the document's closing `</head>` tag so
/// content can be spliced in without searching the markup, which may carry
/// the same text inside inlined scripts or styles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shell {
    html: Arc<str>,
    head_end: Option<usize>,
}

impl Shell {
    /// Wrap serialized markup. `head_end` must fall on a char boundary.
    #[must_use]
    pub fn new(html: impl Into<Arc<str>>, head_end: Option<usize>) -> Self {
        let html = html.into();
        let head_end = head_end.filter(|&at| html.is_char_boundary(at));
        Self { html, head_end }
    }

    /// The markup.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.html
    }

    /// Byte offset of the document's closing `</head>` tag, if any.
    #[must_use]
    pub fn head_end(&self) -> Option<usize> {
        self.head_end
    }
}

/// Parsed HTML document plus pending edits.
pub struct Document {
    html: Html,
    patches: HashMap<NodeId, Patch>,
}

impl Document {
    /// Parse a full HTML document. Parsing is error-tolerant.
    #[must_use]
    pub fn parse(markup: &str) -> Self {
        Self {
            html: Html::parse_document(markup),
            patches: HashMap::new(),
        }
    }

    /// Select elements still attached to the output tree.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` if `css` is not a valid selector.
    pub fn select(&self, css: &str) -> Result<Vec<ElementInfo>> {
        let selector = Selector::parse(css)
            .map_err(|err| AppError::Validation(format!("invalid selector '{css}': {err}")))?;

        Ok(self
            .html
            .select(&selector)
            .filter(|element| !self.is_detached(element))
            .map(|element| ElementInfo {
                id: (*element).id(),
                attributes: element
                    .value()
                    .attrs()
                    .map(|(name, value)| (name.to_owned(), value.to_owned()))
                    .collect(),
            })
            .collect())
    }

    /// Drop the element and its subtree from the output.
    pub fn remove(&mut self, id: NodeId) {
        self.patches.entry(id).or_default().removed = true;
    }

    /// Replace the element with a new raw-text element (e.g. `<style>`).
    pub fn replace(
        &mut self,
        id: NodeId,
        name: &str,
        attributes: Vec<(String, String)>,
        text: String,
    ) {
        self.patches.entry(id).or_default().replacement = Some(Replacement {
            name: name.to_owned(),
            attributes,
            text,
        });
    }

    /// Set (or add) an attribute.
    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: String) {
        self.patches
            .entry(id)
            .or_default()
            .attributes
            .push((name.to_owned(), Some(value)));
    }

    /// Remove an attribute.
    pub fn remove_attribute(&mut self, id: NodeId, name: &str) {
        self.patches
            .entry(id)
            .or_default()
            .attributes
            .push((name.to_owned(), None));
    }

    /// Replace the element's children with a single text node.
    pub fn set_inner_text(&mut self, id: NodeId, text: String) {
        self.patches.entry(id).or_default().inner_text = Some(text);
    }

    /// Serialize the document with all patches applied.
    #[must_use]
    pub fn to_html(&self) -> String {
        self.serialize().0
    }

    /// Serialize the document and record where the document `<head>` closes.
    #[must_use]
    pub fn to_shell(&self) -> Shell {
        let (html, head_end) = self.serialize();
        Shell::new(html, head_end)
    }

    fn serialize(&self) -> (String, Option<usize>) {
        let mut out = String::new();
        let mut head_end = None;
        for child in self.html.tree.root().children() {
            self.write_node(child, &mut out, false, &mut head_end);
        }
        (out, head_end)
    }

    fn is_detached(&self, element: &ElementRef<'_>) -> bool {
        element.ancestors().any(|node| {
            self.patches
                .get(&node.id())
                .is_some_and(Patch::detaches)
        }) || self
            .patches
            .get(&(**element).id())
            .is_some_and(Patch::detaches)
    }

    fn write_node(
        &self,
        node: NodeRef<'_, Node>,
        out: &mut String,
        raw_text: bool,
        head_end: &mut Option<usize>,
    ) {
        match node.value() {
            Node::Doctype(doctype) => {
                out.push_str("<!DOCTYPE ");
                out.push_str(doctype.name());
                out.push('>');
            }
            Node::Comment(comment) => {
                out.push_str("<!--");
                out.push_str(comment);
                out.push_str("-->");
            }
            Node::Text(text) => {
                if raw_text {
                    out.push_str(text);
                } else {
                    escape_text_into(text, out);
                }
            }
            Node::Element(element) => self.write_element(node, element, out, head_end),
            Node::Document | Node::Fragment => {
                for child in node.children() {
                    self.write_node(child, out, raw_text, head_end);
                }
            }
            Node::ProcessingInstruction(_) => {}
        }
    }

    fn write_element(
        &self,
        node: NodeRef<'_, Node>,
        element: &Element,
        out: &mut String,
        head_end: &mut Option<usize>,
    ) {
        let patch = self.patches.get(&node.id());
        if let Some(patch) = patch {
            if patch.removed {
                return;
            }
            if let Some(replacement) = &patch.replacement {
                write_replacement(replacement, out);
                return;
            }
        }

        let name = element.name();
        out.push('<');
        out.push_str(name);
        for (attr, original) in element.attrs() {
            match patch.and_then(|patch| patch.attribute(attr)) {
                Some(Some(value)) => write_attribute(attr, value, out),
                Some(None) => {}
                None => write_attribute(attr, original, out),
            }
        }
        if let Some(patch) = patch {
            let mut added: Vec<&str> = Vec::new();
            for (attr, _) in &patch.attributes {
                let exists = element.attrs().any(|(original, _)| original == attr);
                if exists || added.contains(&attr.as_str()) {
                    continue;
                }
                if let Some(Some(value)) = patch.attribute(attr) {
                    write_attribute(attr, value, out);
                }
                added.push(attr);
            }
        }
        out.push('>');

        if VOID_ELEMENTS.contains(&name) {
            return;
        }

        let raw_text = RAW_TEXT_ELEMENTS.contains(&name);
        match patch.and_then(|patch| patch.inner_text.as_deref()) {
            Some(text) if raw_text => out.push_str(&escape_raw_text(name, text)),
            Some(text) => escape_text_into(text, out),
            None => {
                for child in node.children() {
                    self.write_node(child, out, raw_text, head_end);
                }
            }
        }

        if name == "head" && head_end.is_none() && is_document_head(node) {
            *head_end = Some(out.len());
        }
        out.push_str("</");
        out.push_str(name);
        out.push('>');
    }
}

/// The `<head>` that is a direct child of the root `<html>` element.
fn is_document_head(node: NodeRef<'_, Node>) -> bool {
    node.parent().is_some_and(|parent| {
        parent
            .value()
            .as_element()
            .is_some_and(|element| element.name() == "html")
    })
}

fn write_replacement(replacement: &Replacement, out: &mut String) {
    out.push('<');
    out.push_str(&replacement.name);
    for (attr, value) in &replacement.attributes {
        write_attribute(attr, value, out);
    }
    out.push('>');
    out.push_str(&escape_raw_text(&replacement.name, &replacement.text));
    out.push_str("</");
    out.push_str(&replacement.name);
    out.push('>');
}

fn write_attribute(name: &str, value: &str, out: &mut String) {
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(ch),
        }
    }
    out.push('"');
}

fn escape_text_into(text: &str, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(ch),
        }
    }
}

/// Escape `text` for use as HTML text content.
#[must_use]
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    escape_text_into(text, &mut out);
    out
}

/// Neutralize any `</name` sequence so inlined content cannot close its
/// raw-text element early. Matching is ASCII case-insensitive.
#[must_use]
pub fn escape_raw_text(name: &str, text: &str) -> String {
    let needle = format!("</{}", name.to_ascii_lowercase());
    let lowered = text.to_ascii_lowercase();
    if !lowered.contains(&needle) {
        return text.to_owned();
    }

    let mut out = String::with_capacity(text.len() + 8);
    let mut cursor = 0;
    while let Some(offset) = lowered[cursor..].find(&needle) {
        let start = cursor + offset;
        out.push_str(&text[cursor..start]);
        out.push_str("<\\/");
        out.push_str(&text[start + 2..start + needle.len()]);
        cursor = start + needle.len();
    }
    out.push_str(&text[cursor..]);
    out
}
