//! Schema-table driven XML to object mapping.
//!
//! A target type declares its fields once through [`XmlSchema`]; the
//! [`XmlMapper`] then walks a parsed [`Document`] and fills the fields using
//! a cascade of name heuristics. Matching is best effort: a field with no
//! matching element or attribute keeps its default value.

mod document;
mod mapper;
mod schema;
mod value;

use thiserror::Error;

pub use document::{Attribute, Document, Element, QName};
pub use mapper::{FromXml, XmlMapper};
pub use schema::{SchemaBuilder, XmlMapped, XmlSchema};
pub use value::{UriRef, XmlValue, parse_enum};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum XmlError {
    #[error("malformed xml: {source}")]
    Malformed {
        #[from]
        source: quick_xml::Error,
    },
    #[error("invalid xml document: {message}")]
    Parse { message: String },
    #[error("root element {name} not found under document root")]
    MissingRoot { name: String },
    #[error("cannot convert {value:?} to {kind} for field {field}: {message}")]
    Conversion {
        field: String,
        kind: &'static str,
        value: String,
        message: String,
    },
}

impl XmlError {
    pub(crate) fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }
}

/// Mapper configuration, passed explicitly to each codec instance.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct XmlMapperOptions {
    /// Child of the document root to map from instead of the root itself.
    pub root_element: Option<String>,
    /// Namespace expected on element names. When unset every namespace is
    /// stripped before mapping.
    pub namespace: Option<String>,
    /// `chrono` format string for naive date/time fields.
    pub date_format: Option<String>,
}

impl XmlMapperOptions {
    pub fn root_element(mut self, name: impl Into<String>) -> Self {
        self.root_element = Some(name.into());
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn date_format(mut self, format: impl Into<String>) -> Self {
        self.date_format = Some(format.into());
        self
    }
}
