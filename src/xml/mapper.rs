use tracing::trace;

use super::document::{Attribute, Document, Element, QName};
use super::schema::{Binding, XmlMapped};
use super::{XmlError, XmlMapperOptions};

/// Something the mapper can build from the (possibly re-rooted) document
/// root.
pub trait FromXml: Sized {
    fn from_root(root: &Element, mapper: &XmlMapper) -> Result<Self, XmlError>;
}

impl<T: XmlMapped> FromXml for T {
    fn from_root(root: &Element, mapper: &XmlMapper) -> Result<Self, XmlError> {
        let mut target = T::default();
        let schema = T::schema();
        if schema.is_list() {
            mapper.map_list_like(&mut target, root, schema.element_name())?;
        } else {
            mapper.map_fields(&mut target, root)?;
        }
        Ok(target)
    }
}

/// Top-level list response: every descendant named like the item type.
impl<E: XmlMapped> FromXml for Vec<E> {
    fn from_root(root: &Element, mapper: &XmlMapper) -> Result<Self, XmlError> {
        mapper
            .descendants_named(root, E::schema().element_name())
            .into_iter()
            .map(|element| mapper.map_element::<E>(element))
            .collect()
    }
}

fn strip_separators(name: &str) -> String {
    name.chars().filter(|c| *c != '_' && *c != '-').collect()
}

fn is_upper_case(text: &str) -> bool {
    text == text.to_uppercase()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn pascal_case(text: &str) -> String {
    let spaced = text.replace('_', " ");
    let words: Vec<&str> = spaced.split(' ').collect();
    let [single] = words.as_slice() else {
        return words.iter().map(|word| pascal_word(word)).collect();
    };
    if is_upper_case(single) {
        pascal_word(single)
    } else {
        capitalize(single)
    }
}

fn pascal_word(word: &str) -> String {
    let mut chars = word.chars();
    let Some(first) = chars.next() else {
        return String::new();
    };
    let rest = chars.as_str();
    let rest = if is_upper_case(rest) {
        rest.to_lowercase()
    } else {
        rest.to_owned()
    };
    first.to_uppercase().chain(rest.chars()).collect()
}

pub(crate) fn camel_case(text: &str) -> String {
    let pascal = pascal_case(text);
    let mut chars = pascal.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Maps parsed XML onto [`XmlMapped`] types. Stateless apart from its
/// options, so one instance can serve concurrent calls.
#[derive(Clone, Debug, Default)]
pub struct XmlMapper {
    options: XmlMapperOptions,
}

impl XmlMapper {
    pub fn new(options: XmlMapperOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &XmlMapperOptions {
        &self.options
    }

    pub fn map_str<T: FromXml>(&self, xml: &str) -> Result<T, XmlError> {
        self.map_document(Document::parse(xml)?)
    }

    pub fn map_document<T: FromXml>(&self, mut document: Document) -> Result<T, XmlError> {
        if self.options.namespace.is_none() {
            document.strip_namespaces();
        }
        let root = match self.options.root_element.as_deref() {
            Some(name) => document
                .root()
                .child(&self.qualified(name))
                .ok_or_else(|| XmlError::MissingRoot {
                    name: name.to_owned(),
                })?,
            None => document.root(),
        };
        T::from_root(root, self)
    }

    fn qualified(&self, local: &str) -> QName {
        QName::new(self.options.namespace.as_deref(), local)
    }

    /// Maps one element into a fresh instance of `T`.
    pub(crate) fn map_element<T: XmlMapped>(&self, element: &Element) -> Result<T, XmlError> {
        let mut target = T::default();
        self.map_fields(&mut target, element)?;
        Ok(target)
    }

    pub(crate) fn map_fields<T: XmlMapped>(&self, target: &mut T, root: &Element) -> Result<(), XmlError> {
        for field in T::schema().fields() {
            let name = self.qualified(field.source);
            let value = self.value_from_xml(root, &name);
            trace!(
                field = field.name,
                source = field.source,
                found = value.is_some(),
                "mapping xml field"
            );

            match (&field.binding, value) {
                (Binding::List { item, collect }, None) => {
                    // Items written inline, directly under the root.
                    let item_name = self.qualified(item.resolve());
                    let elements: Vec<&Element> = match self.element_by_name(root, &item_name) {
                        Some(first) => root.children_named(first.name()).collect(),
                        None => Vec::new(),
                    };
                    collect(target, elements.as_slice(), self)?;
                }
                (Binding::List { item, collect }, Some(_)) => {
                    let item_name = self.qualified(item.resolve());
                    let elements: Vec<&Element> = self
                        .element_by_name(root, &name)
                        .and_then(|container| {
                            self.element_by_name(container, &item_name)
                                .map(|first| container.children_named(first.name()).collect())
                        })
                        .unwrap_or_default();
                    collect(target, elements.as_slice(), self)?;
                }
                (_, None) => {}
                (Binding::Value(assign), Some(text)) => assign(target, text.as_str(), self)?,
                (Binding::Nested(assign), Some(text)) => {
                    let element = self.element_by_name(root, &name);
                    assign(target, text.as_str(), element, self)?;
                }
                (Binding::ListLike(assign), Some(_)) => assign(target, root, field.name, self)?,
            }
        }
        Ok(())
    }

    /// Fills a list-like target from matching descendants, then maps its own
    /// fields from the child named `property`, or from `root` itself.
    pub(crate) fn map_list_like<L: XmlMapped>(
        &self,
        target: &mut L,
        root: &Element,
        property: &str,
    ) -> Result<(), XmlError> {
        let schema = L::schema();
        let Some(items) = schema.items() else {
            return self.map_fields(target, root);
        };
        let elements = self.descendants_named(root, items.item.resolve());
        (items.collect)(target, elements.as_slice(), self)?;
        if !schema.fields().is_empty() {
            let own = root.child(&self.qualified(property)).unwrap_or(root);
            self.map_fields(target, own)?;
        }
        Ok(())
    }

    /// Text for `name`: the matched element's value, or a matching attribute.
    /// A bare `<name/>` counts as no value.
    fn value_from_xml(&self, root: &Element, name: &QName) -> Option<String> {
        match self.element_by_name(root, name) {
            Some(element) => (!element.is_self_closing()
                || element.has_children()
                || element.has_attributes())
            .then(|| element.value()),
            None => self
                .attribute_by_name(root, name)
                .map(|attribute| attribute.value().to_owned()),
        }
    }

    fn element_by_name<'a>(&self, root: &'a Element, name: &QName) -> Option<&'a Element> {
        let local = name.local_name();
        let lower = QName::new(name.namespace(), local.to_lowercase());
        let camel = QName::new(name.namespace(), camel_case(local));

        if let Some(element) = root
            .child(name)
            .or_else(|| root.child(&lower))
            .or_else(|| root.child(&camel))
        {
            return Some(element);
        }
        if local == "Value" {
            return Some(root);
        }

        let by_depth = root.descendants_by_depth();
        by_depth
            .iter()
            .find(|element| strip_separators(element.name().local_name()) == local)
            .or_else(|| {
                by_depth.iter().find(|element| {
                    strip_separators(element.name().local_name()).eq_ignore_ascii_case(local)
                })
            })
            .copied()
    }

    fn attribute_by_name<'a>(&self, root: &'a Element, name: &QName) -> Option<&'a Attribute> {
        let local = name.local_name();
        let candidates = [local.to_owned(), local.to_lowercase(), camel_case(local)];
        root.self_and_descendants_by_depth()
            .into_iter()
            .flat_map(Element::attributes)
            .find(|attribute| {
                let stripped = strip_separators(attribute.name().local_name());
                candidates.iter().any(|candidate| *candidate == stripped)
            })
    }

    /// Descendants in document order named like `name`, trying the exact,
    /// lowercase and camel-cased names, then separator-insensitive matches.
    fn descendants_named<'a>(&self, root: &'a Element, name: &str) -> Vec<&'a Element> {
        let descendants = root.descendants();
        let exact_names = [
            self.qualified(name),
            self.qualified(&name.to_lowercase()),
            self.qualified(&camel_case(name)),
        ];
        for candidate in &exact_names {
            let found: Vec<&Element> = descendants
                .iter()
                .copied()
                .filter(|element| element.name() == candidate)
                .collect();
            if !found.is_empty() {
                return found;
            }
        }

        let found: Vec<&Element> = descendants
            .iter()
            .copied()
            .filter(|element| strip_separators(element.name().local_name()) == name)
            .collect();
        if !found.is_empty() {
            return found;
        }
        descendants
            .into_iter()
            .filter(|element| strip_separators(element.name().local_name()).eq_ignore_ascii_case(name))
            .collect()
    }
}
