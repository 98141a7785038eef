use quick_xml::Reader;
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::name::QName;
use quick_xml::writer::Writer;

use crate::error::{KdmError, KdmResult};

/**
    A minimal in-memory XML tree, built by [`parse`]. Namespace prefixes are
    kept as written (`ds:Signature` stays `ds:Signature`) rather than
    resolved, since every element this crate reads or writes uses a small,
    fixed set of prefixes.
*/
#[derive(Debug, Clone)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone)]
pub enum Node {
    Element(Element),
    Text(String),
}

impl Element {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter_map(move |n| match n {
            Node::Element(e) if local_name(&e.name) == name => Some(e),
            _ => None,
        })
    }

    pub fn child(&self, name: &str) -> KdmResult<&Element> {
        self.children_named(name)
            .next()
            .ok_or_else(|| KdmError::Format(format!("missing <{name}>")))
    }

    pub fn optional_child(&self, name: &str) -> Option<&Element> {
        self.children_named(name).next()
    }

    /** Concatenated text content of direct text children. */
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|n| match n {
                Node::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn text_child(&self, name: &str) -> KdmResult<String> {
        Ok(self.child(name)?.text())
    }

    pub fn optional_text_child(&self, name: &str) -> Option<String> {
        self.optional_child(name).map(Element::text)
    }
}

/** The tag name with any namespace prefix stripped (`ds:Signature` -> `Signature`). */
pub fn local_name(name: &str) -> &str {
    name.split(':').next_back().unwrap_or(name)
}

/** Parse a complete XML document into a single root [`Element`]. */
pub fn parse(xml: &[u8]) -> KdmResult<Element> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    let mut buf = Vec::new();

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| KdmError::Format(e.to_string()))?
        {
            Event::Start(tag) => stack.push(element_from_start(&tag)?),
            Event::Empty(tag) => {
                let element = element_from_start(&tag)?;
                push_child(&mut stack, &mut root, Node::Element(element))?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| KdmError::Format("unbalanced XML".into()))?;
                push_child(&mut stack, &mut root, Node::Element(element))?;
            }
            Event::Text(text) => {
                let decoded = text
                    .unescape()
                    .map_err(|e| KdmError::Format(e.to_string()))?
                    .into_owned();
                if !decoded.trim().is_empty() {
                    push_child(&mut stack, &mut root, Node::Text(decoded))?;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    root.ok_or_else(|| KdmError::Format("empty document".into()))
}

fn element_from_start(tag: &BytesStart) -> KdmResult<Element> {
    let name = String::from_utf8_lossy(tag.name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in tag.attributes() {
        let attr = attr.map_err(|e| KdmError::Format(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| KdmError::Format(e.to_string()))?
            .into_owned();
        attributes.push((key, value));
    }
    Ok(Element {
        name,
        attributes,
        children: Vec::new(),
    })
}

fn push_child(stack: &mut [Element], root: &mut Option<Element>, node: Node) -> KdmResult<()> {
    if let Node::Element(e) = &node {
        if stack.is_empty() {
            *root = Some(e.clone());
            return Ok(());
        }
    }
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(node);
            Ok(())
        }
        None => Err(KdmError::Format("text or element outside root".into())),
    }
}

/**
    A thin wrapper over [`quick_xml::writer::Writer`] for the small set of
    shapes this crate emits: elements with ordered attributes and either
    text content or nested elements, with optional `prefix:` qualification.
*/
pub struct XmlWriter {
    writer: Writer<Vec<u8>>,
}

impl XmlWriter {
    pub fn new() -> Self {
        Self {
            writer: Writer::new(Vec::new()),
        }
    }

    pub fn start(&mut self, name: &str, attributes: &[(&str, &str)]) -> KdmResult<()> {
        let mut start = BytesStart::new(name);
        for (k, v) in attributes {
            start.push_attribute((*k, *v));
        }
        self.writer
            .write_event(Event::Start(start))
            .map_err(|e| KdmError::Format(e.to_string()))
    }

    pub fn end(&mut self, name: &str) -> KdmResult<()> {
        self.writer
            .write_event(Event::End(quick_xml::events::BytesEnd::new(name)))
            .map_err(|e| KdmError::Format(e.to_string()))
    }

    pub fn text(&mut self, text: &str) -> KdmResult<()> {
        self.writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(|e| KdmError::Format(e.to_string()))
    }

    /** `<name attr="v">text</name>` in one call. */
    pub fn text_element(
        &mut self,
        name: &str,
        attributes: &[(&str, &str)],
        text: &str,
    ) -> KdmResult<()> {
        self.start(name, attributes)?;
        self.text(text)?;
        self.end(name)
    }

    /** Splice in bytes already produced by another [`XmlWriter`] (e.g. a pre-rendered subtree). */
    pub fn raw(&mut self, bytes: &[u8]) -> KdmResult<()> {
        use std::io::Write;
        self.writer
            .get_mut()
            .write_all(bytes)
            .map_err(|e| KdmError::Format(e.to_string()))
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.writer.into_inner()
    }
}

impl Default for XmlWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_nested_elements() {
        let mut w = XmlWriter::new();
        w.start("Outer", &[("Id", "ID_Foo")]).unwrap();
        w.text_element("Inner", &[], "hello").unwrap();
        w.end("Outer").unwrap();
        let bytes = w.into_bytes();

        let root = parse(&bytes).unwrap();
        assert_eq!(local_name(&root.name), "Outer");
        assert_eq!(root.attribute("Id"), Some("ID_Foo"));
        assert_eq!(root.text_child("Inner").unwrap(), "hello");
    }
}
