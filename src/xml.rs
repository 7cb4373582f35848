//! Owned XML element tree
//!
//! Configuration documents are parsed with roxmltree and converted into an
//! owned tree so table elements can outlive their source text, be compared
//! structurally and be written back to the managed definitions file.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub name: String,
    #[serde(default)]
    pub attributes: IndexMap<String, String>,
    #[serde(default)]
    pub children: Vec<Element>,
    #[serde(default)]
    pub text: Option<String>,
}

fn build_tree(node: roxmltree::Node<'_, '_>) -> Element {
    let attributes = node
        .attributes()
        .map(|attr| (attr.name().to_owned(), attr.value().to_owned()))
        .collect();
    let mut children = Vec::new();
    let mut text = String::new();
    for child in node.children() {
        if child.is_element() {
            children.push(build_tree(child));
        } else if child.is_text() {
            text.push_str(child.text().unwrap_or_default());
        }
    }
    let text = text.trim();
    Element {
        name: node.tag_name().name().to_owned(),
        attributes,
        children,
        text: (!text.is_empty()).then(|| text.to_owned()),
    }
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: IndexMap::new(),
            children: Vec::new(),
            text: None,
        }
    }

    /// Parse a document and return its root element.
    pub fn parse(src: &str) -> Result<Self, roxmltree::Error> {
        let document = roxmltree::Document::parse(src)?;
        Ok(build_tree(document.root_element()))
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn find(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.name == name)
    }

    pub fn find_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |child| child.name == name)
    }

    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }

    fn write_into(&self, out: &mut String, depth: usize) {
        let indent = "    ".repeat(depth);
        out.push_str(&indent);
        out.push('<');
        out.push_str(&self.name);
        for (name, value) in &self.attributes {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            out.push_str(&html_escape::encode_double_quoted_attribute(value));
            out.push('"');
        }
        match (&self.text, self.children.is_empty()) {
            (None, true) => out.push_str("/>\n"),
            (Some(text), true) => {
                out.push('>');
                out.push_str(&html_escape::encode_text(text));
                out.push_str("</");
                out.push_str(&self.name);
                out.push_str(">\n");
            }
            (text, false) => {
                out.push_str(">\n");
                if let Some(text) = text {
                    out.push_str(&indent);
                    out.push_str("    ");
                    out.push_str(&html_escape::encode_text(text));
                    out.push('\n');
                }
                for child in &self.children {
                    child.write_into(out, depth + 1);
                }
                out.push_str(&indent);
                out.push_str("</");
                out.push_str(&self.name);
                out.push_str(">\n");
            }
        }
    }

    /// Render as an indented fragment without an XML declaration.
    pub fn to_pretty_string(&self) -> String {
        let mut out = String::new();
        self.write_into(&mut out, 0);
        out
    }

    /// Render as a complete document with an XML declaration.
    pub fn to_document(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\"?>\n");
        self.write_into(&mut out, 0);
        out
    }
}
