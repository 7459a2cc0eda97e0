//! Glue between parsed `xmltree` elements and the streaming `xml-rs`
//! event writer. Request bodies are parsed into element trees; everything
//! we send back goes through an `EventWriter` so large responses can be
//! produced incrementally.

use std::io::Write;

use xml::writer::{EventWriter, XmlEvent};
use xmltree::{Element, XMLNode};

use crate::DavError;

pub(crate) const DAV_NS: &str = "DAV:";

/// Parse an XML request body.
pub(crate) fn parse_body(data: &[u8]) -> Result<Element, DavError> {
    Element::parse(data).map_err(|_| DavError::XmlParseError)
}

// Match on local name, accepting either the DAV: namespace or none at all
// (some clients omit the declaration).
pub(crate) fn is_dav(el: &Element, name: &str) -> bool {
    el.name == name && matches!(el.namespace.as_deref(), None | Some(DAV_NS))
}

pub(crate) fn child_elements(el: &Element) -> impl Iterator<Item = &Element> {
    el.children.iter().filter_map(XMLNode::as_element)
}

pub(crate) fn find_dav_child<'a>(el: &'a Element, name: &str) -> Option<&'a Element> {
    child_elements(el).find(|c| is_dav(c, name))
}

/// Build a DAV:-namespaced element.
pub(crate) fn dav_element(name: &str) -> Element {
    let mut el = Element::new(name);
    el.namespace = Some(DAV_NS.to_string());
    el.prefix = Some("D".to_string());
    el
}

/// Build a DAV:-namespaced element with text content.
pub(crate) fn dav_text_element(name: &str, text: &str) -> Element {
    let mut el = dav_element(name);
    el.children.push(XMLNode::Text(text.to_string()));
    el
}

/// Write a parsed element tree through the event writer.
///
/// DAV: elements reuse the `D` prefix declared on the document root;
/// anything else redeclares its namespace as the default on the element
/// itself, so foreign (dead-property) markup survives the round trip.
pub(crate) fn write_element<W: Write>(
    w: &mut EventWriter<W>,
    el: &Element,
) -> xml::writer::Result<()> {
    let qname;
    let mut start = match el.namespace.as_deref() {
        Some(DAV_NS) | None => {
            qname = format!("D:{}", el.name);
            XmlEvent::start_element(qname.as_str())
        }
        Some(ns) => {
            qname = el.name.clone();
            XmlEvent::start_element(qname.as_str()).default_ns(ns)
        }
    };
    for (key, value) in &el.attributes {
        start = start.attr(key.as_str(), value);
    }
    w.write(start)?;
    for node in &el.children {
        match node {
            XMLNode::Element(child) => write_element(w, child)?,
            XMLNode::Text(text) => w.write(XmlEvent::characters(text))?,
            XMLNode::CData(text) => w.write(XmlEvent::cdata(text))?,
            _ => {}
        }
    }
    w.write(XmlEvent::end_element())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::MemBuffer;
    use xml::writer::EmitterConfig;

    #[test]
    fn parse_and_match() {
        let el = parse_body(
            br#"<?xml version="1.0"?>
            <D:propfind xmlns:D="DAV:"><D:allprop/></D:propfind>"#,
        )
        .unwrap();
        assert!(is_dav(&el, "propfind"));
        assert!(find_dav_child(&el, "allprop").is_some());
        assert!(find_dav_child(&el, "propname").is_none());
    }

    #[test]
    fn foreign_namespace_round_trip() {
        let el = parse_body(
            br#"<x:note xmlns:x="http://x.example/ns">hi &amp; bye</x:note>"#,
        )
        .unwrap();
        let mut buf = MemBuffer::new();
        let mut w = EmitterConfig::new()
            .write_document_declaration(false)
            .create_writer(&mut buf);
        write_element(&mut w, &el).unwrap();
        let out = String::from_utf8(buf.take().to_vec()).unwrap();
        assert!(out.contains("xmlns=\"http://x.example/ns\""), "{}", out);
        assert!(out.contains("hi &amp; bye"), "{}", out);
    }
}
