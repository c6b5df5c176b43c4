use std::collections::VecDeque;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;

use super::XmlError;

/// Namespace-qualified name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QName {
    namespace: Option<String>,
    local: String,
}

impl QName {
    pub fn new(namespace: Option<&str>, local: impl Into<String>) -> Self {
        Self {
            namespace: namespace.map(ToOwned::to_owned),
            local: local.into(),
        }
    }

    pub fn local(local: impl Into<String>) -> Self {
        Self::new(None, local)
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn local_name(&self) -> &str {
        &self.local
    }

    fn strip_namespace(&mut self) {
        self.namespace = None;
    }
}

#[derive(Clone, Debug)]
pub struct Attribute {
    name: QName,
    value: String,
}

impl Attribute {
    pub fn name(&self) -> &QName {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

#[derive(Clone, Debug)]
enum Node {
    Element(Element),
    Text(String),
}

#[derive(Clone, Debug)]
pub struct Element {
    name: QName,
    attributes: Vec<Attribute>,
    nodes: Vec<Node>,
    self_closing: bool,
}

impl Element {
    fn new(name: QName, attributes: Vec<Attribute>, self_closing: bool) -> Self {
        Self {
            name,
            attributes,
            nodes: Vec::new(),
            self_closing,
        }
    }

    pub fn name(&self) -> &QName {
        &self.name
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn has_attributes(&self) -> bool {
        !self.attributes.is_empty()
    }

    /// Whether the element was written as `<name/>`.
    pub fn is_self_closing(&self) -> bool {
        self.self_closing
    }

    pub fn children(&self) -> impl Iterator<Item = &Element> {
        self.nodes.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            Node::Text(_) => None,
        })
    }

    pub fn has_children(&self) -> bool {
        self.children().next().is_some()
    }

    /// First direct child with exactly this name.
    pub fn child(&self, name: &QName) -> Option<&Element> {
        self.children().find(|child| child.name == *name)
    }

    /// Direct children with exactly this name, in document order.
    pub fn children_named<'a>(&'a self, name: &'a QName) -> impl Iterator<Item = &'a Element> {
        self.children().filter(move |child| child.name == *name)
    }

    /// Concatenated text of this element and all its descendants.
    pub fn value(&self) -> String {
        let mut text = String::new();
        self.collect_text(&mut text);
        text
    }

    fn collect_text(&self, text: &mut String) {
        for node in &self.nodes {
            match node {
                Node::Text(chunk) => text.push_str(chunk),
                Node::Element(element) => element.collect_text(text),
            }
        }
    }

    /// Descendants in document order, excluding `self`.
    pub fn descendants(&self) -> Vec<&Element> {
        let mut found = Vec::new();
        for child in self.children() {
            found.push(child);
            found.extend(child.descendants());
        }
        found
    }

    /// Descendants ordered by depth, ties kept in document order.
    pub fn descendants_by_depth(&self) -> Vec<&Element> {
        let mut found = Vec::new();
        let mut queue: VecDeque<&Element> = self.children().collect();
        while let Some(element) = queue.pop_front() {
            found.push(element);
            queue.extend(element.children());
        }
        found
    }

    /// `self` followed by its descendants ordered by depth.
    pub fn self_and_descendants_by_depth(&self) -> Vec<&Element> {
        let mut found = vec![self];
        found.extend(self.descendants_by_depth());
        found
    }

    fn strip_namespaces(&mut self) {
        self.name.strip_namespace();
        for attribute in &mut self.attributes {
            attribute.name.strip_namespace();
        }
        for node in &mut self.nodes {
            if let Node::Element(element) = node {
                element.strip_namespaces();
            }
        }
    }
}

/// Parsed XML document. Whitespace-only text and namespace declarations are
/// dropped while parsing.
#[derive(Clone, Debug)]
pub struct Document {
    root: Element,
}

fn resolved_namespace(resolved: ResolveResult<'_>) -> Option<String> {
    match resolved {
        ResolveResult::Bound(namespace) => {
            Some(String::from_utf8_lossy(namespace.as_ref()).into_owned())
        }
        _ => None,
    }
}

fn read_element(
    reader: &NsReader<&[u8]>,
    start: &BytesStart<'_>,
    self_closing: bool,
) -> Result<Element, XmlError> {
    let (resolved, local) = reader.resolve_element(start.name());
    let name = QName {
        namespace: resolved_namespace(resolved),
        local: String::from_utf8_lossy(local.as_ref()).into_owned(),
    };
    let mut attributes = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(quick_xml::Error::from)?;
        if attribute.key.as_namespace_binding().is_some() {
            continue;
        }
        let (resolved, local) = reader.resolve_attribute(attribute.key);
        let value = attribute.unescape_value()?.into_owned();
        attributes.push(Attribute {
            name: QName {
                namespace: resolved_namespace(resolved),
                local: String::from_utf8_lossy(local.as_ref()).into_owned(),
            },
            value,
        });
    }
    Ok(Element::new(name, attributes, self_closing))
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<(), XmlError> {
    match stack.last_mut() {
        Some(parent) => parent.nodes.push(Node::Element(element)),
        None if root.is_none() => *root = Some(element),
        None => return Err(XmlError::parse("multiple root elements")),
    }
    Ok(())
}

fn push_text(stack: &mut [Element], text: String) {
    if text.trim().is_empty() {
        return;
    }
    if let Some(parent) = stack.last_mut() {
        parent.nodes.push(Node::Text(text));
    }
}

impl Document {
    pub fn parse(xml: &str) -> Result<Self, XmlError> {
        let mut reader = NsReader::from_str(xml);
        let mut stack: Vec<Element> = Vec::new();
        let mut root = None;

        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    let element = read_element(&reader, &start, false)?;
                    stack.push(element);
                }
                Event::Empty(start) => {
                    let element = read_element(&reader, &start, true)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let Some(element) = stack.pop() else {
                        return Err(XmlError::parse("unexpected closing tag"));
                    };
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    push_text(&mut stack, text.unescape()?.into_owned());
                }
                Event::CData(data) => {
                    let text = String::from_utf8_lossy(&data.into_inner()).into_owned();
                    if let Some(parent) = stack.last_mut() {
                        parent.nodes.push(Node::Text(text));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(XmlError::parse("unclosed element at end of input"));
        }
        root.map(|root| Self { root })
            .ok_or_else(|| XmlError::parse("document has no root element"))
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn into_root(self) -> Element {
        self.root
    }

    /// Drops namespace qualifiers from every element and attribute.
    pub fn strip_namespaces(&mut self) {
        self.root.strip_namespaces();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{Document, QName};

    #[test]
    fn parses_nested_elements_and_text() {
        let document =
            Document::parse("<Root><Name>Alice</Name>\n  <Tags><Tag>a</Tag><Tag>b</Tag></Tags></Root>")
                .expect("document should parse");
        let root = document.root();

        assert_eq!(root.name().local_name(), "Root");
        assert_eq!(root.children().count(), 2);
        assert_eq!(root.value(), "Aliceab");
        let tags = root.child(&QName::local("Tags")).expect("tags element");
        assert_eq!(tags.children_named(&QName::local("Tag")).count(), 2);
    }

    #[test]
    fn resolves_and_strips_namespaces() {
        let xml = r#"<a:Root xmlns:a="urn:a" xmlns="urn:d"><Item a:id="7">x</Item></a:Root>"#;
        let mut document = Document::parse(xml).expect("document should parse");

        assert_eq!(document.root().name().namespace(), Some("urn:a"));
        let item = document.root().children().next().expect("item");
        assert_eq!(item.name().namespace(), Some("urn:d"));
        assert_eq!(item.attributes().len(), 1);
        assert_eq!(item.attributes()[0].name().namespace(), Some("urn:a"));

        document.strip_namespaces();
        let item = document.root().children().next().expect("item");
        assert_eq!(document.root().name(), &QName::local("Root"));
        assert_eq!(item.name(), &QName::local("Item"));
        assert_eq!(item.attributes()[0].name(), &QName::local("id"));
    }

    #[test]
    fn depth_order_prefers_shallow_elements() {
        let document = Document::parse("<R><A><B>deep</B></A><B>shallow</B></R>")
            .expect("document should parse");
        let names: Vec<String> = document
            .root()
            .descendants_by_depth()
            .iter()
            .map(|element| format!("{}={}", element.name().local_name(), element.value()))
            .collect();

        assert_eq!(names, vec!["A=deep", "B=shallow", "B=deep"]);
    }

    #[test]
    fn tracks_self_closing_elements() {
        let document = Document::parse(r#"<R><Empty/><Open></Open><Attr id="1"/></R>"#)
            .expect("document should parse");
        let flags: Vec<bool> = document
            .root()
            .children()
            .map(|element| element.is_self_closing())
            .collect();

        assert_eq!(flags, vec![true, false, true]);
    }

    #[test]
    fn rejects_malformed_documents() {
        assert!(Document::parse("").is_err());
        assert!(Document::parse("<a><b></a>").is_err());
        assert!(Document::parse("<a/><b/>").is_err());
    }
}
