//! A minimal in-memory XML element tree, built from and rendered back to
//! `quick-xml` events.
//!
//! The metadata registry (spec.md component C) is built around readers
//! and writers that operate on XML *subtrees* rather than a fixed,
//! compile-time schema — a reader is registered at runtime for an
//! arbitrary metadata prefix and must work against whatever shape of XML
//! that format uses. `quick_xml::de`'s serde-derived deserialization
//! (the pattern other OAI-PMH-adjacent code in this codebase's examples
//! use) requires the shape to be known at compile time, so it isn't a
//! fit here; this module gives readers/writers a small generic tree
//! instead, matching `lxml.etree`'s element-based API that the original
//! `oaipmh.metadata` module was written against.
//!
//! Path-based lookup in this module is a deliberate simplification of
//! full XPath (see DESIGN.md): a path is a `/`-separated sequence of
//! literal (possibly prefixed) tag names matched against child elements
//! in document order. Namespace URIs are not resolved against prefix
//! bindings; the configured prefix in a registry's namespace map is
//! expected to match the literal prefix used on the wire, which is true
//! for every format this crate ships or that real repositories emit in
//! practice.

use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;

use crate::error::{OaiError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Element {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
            text: String::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Direct children whose tag name matches.
    pub fn children_named<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn child_named(&self, name: &str) -> Option<&Element> {
        self.children_named(name).next()
    }

    /// Resolve a `/`-separated path of child tag names, starting from
    /// this element's children, returning every element at the end of
    /// the path (there may be several, e.g. repeated `setSpec`).
    pub fn find_path(&self, path: &str) -> Vec<&Element> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut frontier = vec![self];
        for segment in segments {
            let mut next = Vec::new();
            for el in frontier {
                next.extend(el.children_named(segment));
            }
            frontier = next;
        }
        frontier
    }

    /// Parse a single root element from a complete XML fragment.
    pub fn parse(xml: &[u8]) -> Result<Element> {
        let mut reader = Reader::from_reader(xml);
        {
            let config = reader.config_mut();
            config.trim_text_start = true;
            config.trim_text_end = true;
        }

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;
        let mut buf = Vec::new();

        loop {
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|e| OaiError::XmlSyntax(e.to_string()))?;
            match event {
                Event::Start(start) => {
                    stack.push(element_from_start(&start)?);
                }
                Event::Empty(start) => {
                    let el = element_from_start(&start)?;
                    push_child(&mut stack, &mut root, el);
                }
                Event::End(_) => {
                    let el = stack
                        .pop()
                        .ok_or_else(|| OaiError::XmlSyntax("unbalanced end tag".into()))?;
                    push_child(&mut stack, &mut root, el);
                }
                Event::Text(text) => {
                    let decoded = text
                        .unescape()
                        .map_err(|e| OaiError::XmlSyntax(e.to_string()))?;
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&decoded);
                    }
                }
                Event::CData(cdata) => {
                    let decoded = String::from_utf8_lossy(cdata.as_ref()).into_owned();
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&decoded);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        root.ok_or_else(|| OaiError::XmlSyntax("no root element found".into()))
    }

    /// Serialize this element (and its children) to a `quick_xml` writer.
    pub fn write_to<W: std::io::Write>(&self, writer: &mut Writer<W>) -> Result<()> {
        let has_content = !self.children.is_empty() || !self.text.is_empty();
        let mut start = BytesStart::new(self.name.clone());
        for (k, v) in &self.attrs {
            start.push_attribute((k.as_str(), v.as_str()));
        }

        if !has_content {
            writer
                .write_event(Event::Empty(start))
                .map_err(|e| OaiError::XmlSyntax(e.to_string()))?;
            return Ok(());
        }

        writer
            .write_event(Event::Start(start))
            .map_err(|e| OaiError::XmlSyntax(e.to_string()))?;
        if !self.text.is_empty() {
            writer
                .write_event(Event::Text(BytesText::new(&self.text)))
                .map_err(|e| OaiError::XmlSyntax(e.to_string()))?;
        }
        for child in &self.children {
            child.write_to(writer)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(self.name.clone())))
            .map_err(|e| OaiError::XmlSyntax(e.to_string()))?;
        Ok(())
    }

    pub fn to_xml_string(&self) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        self.write_to(&mut writer)?;
        String::from_utf8(writer.into_inner())
            .map_err(|e| OaiError::XmlSyntax(format!("non-UTF-8 output: {e}")))
    }
}

fn element_from_start(start: &BytesStart) -> Result<Element> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| OaiError::XmlSyntax(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| OaiError::XmlSyntax(e.to_string()))?
            .into_owned();
        attrs.push((key, value));
    }
    Ok(Element {
        name,
        attrs,
        children: Vec::new(),
        text: String::new(),
    })
}

fn push_child(stack: &mut Vec<Element>, root: &mut Option<Element>, el: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(el),
        None => *root = Some(el),
    }
}
