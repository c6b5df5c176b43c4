use super::document::Element;
use super::mapper::XmlMapper;
use super::value::XmlValue;
use super::XmlError;

/// A type the XML mapper can populate.
///
/// The schema is declared once per type, usually behind a `OnceLock`:
///
/// ```
/// use std::sync::OnceLock;
/// use restpipe::xml::{XmlMapped, XmlSchema};
///
/// #[derive(Debug, Default)]
/// struct Person {
///     name: String,
///     age: u32,
/// }
///
/// impl XmlMapped for Person {
///     fn schema() -> &'static XmlSchema<Self> {
///         static SCHEMA: OnceLock<XmlSchema<Person>> = OnceLock::new();
///         SCHEMA.get_or_init(|| {
///             XmlSchema::builder("Person")
///                 .field("Name", |person: &mut Person| &mut person.name)
///                 .field("Age", |person: &mut Person| &mut person.age)
///                 .build()
///         })
///     }
/// }
/// ```
pub trait XmlMapped: Default + Send + 'static {
    fn schema() -> &'static XmlSchema<Self>;

    /// Direct conversion from text for leaf-like composite kinds. Returning
    /// `None` makes the mapper recurse into the matching element instead.
    fn from_text(_text: &str) -> Option<Self> {
        None
    }
}

type ValueFn<T> = dyn Fn(&mut T, &str, &XmlMapper) -> Result<(), XmlError> + Send + Sync;
type ElementsFn<T> = dyn Fn(&mut T, &[&Element], &XmlMapper) -> Result<(), XmlError> + Send + Sync;
type NestedFn<T> =
    dyn Fn(&mut T, &str, Option<&Element>, &XmlMapper) -> Result<(), XmlError> + Send + Sync;
type ListLikeFn<T> = dyn Fn(&mut T, &Element, &str, &XmlMapper) -> Result<(), XmlError> + Send + Sync;

/// Element name of a list item. Schema-backed names resolve lazily so a
/// type may list itself.
#[derive(Clone, Copy)]
pub(crate) enum ItemName {
    Fixed(&'static str),
    Schema(fn() -> &'static str),
}

impl ItemName {
    pub(crate) fn resolve(self) -> &'static str {
        match self {
            Self::Fixed(name) => name,
            Self::Schema(name) => name(),
        }
    }
}

pub(crate) enum Binding<T> {
    /// Scalar converted from the located text.
    Value(Box<ValueFn<T>>),
    /// Homogeneous sequence; `item` is the element kind's name.
    List {
        item: ItemName,
        collect: Box<ElementsFn<T>>,
    },
    /// Composite converted from text or mapped from the matching element.
    Nested(Box<NestedFn<T>>),
    /// Field whose own type behaves as a list.
    ListLike(Box<ListLikeFn<T>>),
}

pub(crate) struct FieldSpec<T> {
    pub(crate) name: &'static str,
    pub(crate) source: &'static str,
    pub(crate) binding: Binding<T>,
}

pub(crate) struct ItemsSpec<T> {
    pub(crate) item: ItemName,
    pub(crate) collect: Box<ElementsFn<T>>,
}

/// Ordered field table for one target type.
pub struct XmlSchema<T> {
    element_name: &'static str,
    fields: Vec<FieldSpec<T>>,
    items: Option<ItemsSpec<T>>,
}

impl<T> std::fmt::Debug for XmlSchema<T> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fields: Vec<(&str, &str)> = self
            .fields
            .iter()
            .map(|field| (field.name, field.source))
            .collect();
        formatter
            .debug_struct("XmlSchema")
            .field("element_name", &self.element_name)
            .field("fields", &fields)
            .field("items", &self.items.is_some())
            .finish()
    }
}

impl<T: 'static> XmlSchema<T> {
    /// `element_name` is the name an element of this type carries when it
    /// appears as a list item.
    pub fn builder(element_name: &'static str) -> SchemaBuilder<T> {
        SchemaBuilder {
            schema: XmlSchema {
                element_name,
                fields: Vec::new(),
                items: None,
            },
        }
    }

    pub fn element_name(&self) -> &'static str {
        self.element_name
    }

    pub fn is_list(&self) -> bool {
        self.items.is_some()
    }

    pub(crate) fn fields(&self) -> &[FieldSpec<T>] {
        &self.fields
    }

    pub(crate) fn items(&self) -> Option<&ItemsSpec<T>> {
        self.items.as_ref()
    }
}

fn conversion_error(field: &str, kind: &'static str, value: &str, message: String) -> XmlError {
    XmlError::Conversion {
        field: field.to_owned(),
        kind,
        value: value.to_owned(),
        message,
    }
}

fn convert_scalar<V: XmlValue>(
    field: &'static str,
    element: &Element,
    mapper: &XmlMapper,
) -> Result<V, XmlError> {
    let text = element.value();
    V::from_xml_text(&text, mapper.options())
        .map_err(|message| conversion_error(field, V::KIND, &text, message))
}

pub struct SchemaBuilder<T> {
    schema: XmlSchema<T>,
}

impl<T: 'static> SchemaBuilder<T> {
    fn push(mut self, name: &'static str, binding: Binding<T>) -> Self {
        self.schema.fields.push(FieldSpec {
            name,
            source: name,
            binding,
        });
        self
    }

    /// Scalar field converted from element or attribute text.
    pub fn field<V, F>(self, name: &'static str, accessor: F) -> Self
    where
        V: XmlValue,
        F: Fn(&mut T) -> &mut V + Send + Sync + 'static,
    {
        let assign = move |target: &mut T, text: &str, mapper: &XmlMapper| -> Result<(), XmlError> {
            if V::SKIPS_EMPTY && text.is_empty() {
                return Ok(());
            }
            let value = V::from_xml_text(text, mapper.options())
                .map_err(|message| conversion_error(name, V::KIND, text, message))?;
            *accessor(target) = value;
            Ok(())
        };
        self.push(name, Binding::Value(Box::new(assign)))
    }

    /// Reads the previously declared field from `source` instead of its own
    /// name.
    pub fn rename(mut self, source: &'static str) -> Self {
        if let Some(field) = self.schema.fields.last_mut() {
            field.source = source;
        }
        self
    }

    /// Sequence of scalars whose elements are named `item`.
    pub fn list<E, F>(self, name: &'static str, item: &'static str, accessor: F) -> Self
    where
        E: XmlValue,
        F: Fn(&mut T) -> &mut Vec<E> + Send + Sync + 'static,
    {
        let collect = move |target: &mut T,
                            elements: &[&Element],
                            mapper: &XmlMapper|
              -> Result<(), XmlError> {
            let values = elements
                .iter()
                .map(|element| convert_scalar::<E>(name, element, mapper))
                .collect::<Result<Vec<_>, _>>()?;
            *accessor(target) = values;
            Ok(())
        };
        self.push(
            name,
            Binding::List {
                item: ItemName::Fixed(item),
                collect: Box::new(collect),
            },
        )
    }

    /// Sequence of mapped objects, each built from one element.
    pub fn object_list<E, F>(self, name: &'static str, accessor: F) -> Self
    where
        E: XmlMapped,
        F: Fn(&mut T) -> &mut Vec<E> + Send + Sync + 'static,
    {
        let collect = move |target: &mut T,
                            elements: &[&Element],
                            mapper: &XmlMapper|
              -> Result<(), XmlError> {
            let values = elements
                .iter()
                .map(|element| mapper.map_element::<E>(element))
                .collect::<Result<Vec<_>, _>>()?;
            *accessor(target) = values;
            Ok(())
        };
        self.push(
            name,
            Binding::List {
                item: ItemName::Schema(|| E::schema().element_name()),
                collect: Box::new(collect),
            },
        )
    }

    /// Nested composite field.
    pub fn nested<N, F>(self, name: &'static str, accessor: F) -> Self
    where
        N: XmlMapped,
        F: Fn(&mut T) -> &mut N + Send + Sync + 'static,
    {
        let assign = move |target: &mut T,
                           text: &str,
                           element: Option<&Element>,
                           mapper: &XmlMapper|
              -> Result<(), XmlError> {
            if let Some(value) = N::from_text(text) {
                *accessor(target) = value;
            } else if let Some(element) = element {
                *accessor(target) = mapper.map_element::<N>(element)?;
            }
            Ok(())
        };
        self.push(name, Binding::Nested(Box::new(assign)))
    }

    /// Field whose type behaves as a list and may carry fields of its own.
    pub fn list_like<L, F>(self, name: &'static str, accessor: F) -> Self
    where
        L: XmlMapped,
        F: Fn(&mut T) -> &mut L + Send + Sync + 'static,
    {
        let assign = move |target: &mut T,
                           root: &Element,
                           property: &str,
                           mapper: &XmlMapper|
              -> Result<(), XmlError> {
            let mut value = L::default();
            mapper.map_list_like(&mut value, root, property)?;
            *accessor(target) = value;
            Ok(())
        };
        self.push(name, Binding::ListLike(Box::new(assign)))
    }

    /// Makes the type itself a list of mapped objects.
    pub fn items<E, F>(mut self, accessor: F) -> Self
    where
        E: XmlMapped,
        F: Fn(&mut T) -> &mut Vec<E> + Send + Sync + 'static,
    {
        let collect = move |target: &mut T,
                            elements: &[&Element],
                            mapper: &XmlMapper|
              -> Result<(), XmlError> {
            let values = elements
                .iter()
                .map(|element| mapper.map_element::<E>(element))
                .collect::<Result<Vec<_>, _>>()?;
            accessor(target).extend(values);
            Ok(())
        };
        self.schema.items = Some(ItemsSpec {
            item: ItemName::Schema(|| E::schema().element_name()),
            collect: Box::new(collect),
        });
        self
    }

    /// Makes the type itself a list of scalars named `item`.
    pub fn value_items<E, F>(mut self, item: &'static str, accessor: F) -> Self
    where
        E: XmlValue,
        F: Fn(&mut T) -> &mut Vec<E> + Send + Sync + 'static,
    {
        let collect = move |target: &mut T,
                            elements: &[&Element],
                            mapper: &XmlMapper|
              -> Result<(), XmlError> {
            let values = elements
                .iter()
                .map(|element| convert_scalar::<E>(item, element, mapper))
                .collect::<Result<Vec<_>, _>>()?;
            accessor(target).extend(values);
            Ok(())
        };
        self.schema.items = Some(ItemsSpec {
            item: ItemName::Fixed(item),
            collect: Box::new(collect),
        });
        self
    }

    pub fn build(self) -> XmlSchema<T> {
        self.schema
    }
}
