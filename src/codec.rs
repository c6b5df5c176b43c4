//! Pluggable value codecs.
//!
//! A codec serializes request payloads and deserializes response payloads,
//! and names the content type it speaks. The pipeline derives the `Accept`
//! header from that content type, so swapping the codec changes what the
//! server is asked for.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CodecError;
use crate::request::{APPLICATION_JSON, TEXT_XML};
use crate::response::RestResponse;
use crate::xml::{FromXml, XmlMapper, XmlMapperOptions};

pub trait Codec: Send + Sync + 'static {
    fn content_type(&self) -> &str;

    fn serialize<V>(&self, value: &V) -> Result<String, CodecError>
    where
        V: Serialize + ?Sized;
}

/// Decoding half of a codec for payload type `T`. An empty body decodes to
/// `None`.
pub trait Decode<T>: Codec {
    fn deserialize(&self, response: &RestResponse) -> Result<Option<T>, CodecError>;
}

#[derive(Clone, Debug)]
pub struct JsonCodec {
    content_type: String,
    pretty: bool,
}

impl JsonCodec {
    pub fn new() -> Self {
        Self::with_content_type(APPLICATION_JSON)
    }

    pub fn with_content_type(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            pretty: false,
        }
    }

    /// Emits indented JSON.
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for JsonCodec {
    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn serialize<V>(&self, value: &V) -> Result<String, CodecError>
    where
        V: Serialize + ?Sized,
    {
        if self.pretty {
            Ok(serde_json::to_string_pretty(value)?)
        } else {
            Ok(serde_json::to_string(value)?)
        }
    }
}

impl<T: DeserializeOwned> Decode<T> for JsonCodec {
    fn deserialize(&self, response: &RestResponse) -> Result<Option<T>, CodecError> {
        let body = response.body();
        if body.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(body)?))
    }
}

/// Serializes with `quick-xml`'s serde support and deserializes through the
/// schema-driven [`XmlMapper`].
#[derive(Clone, Debug)]
pub struct XmlCodec {
    content_type: String,
    mapper: XmlMapper,
}

impl XmlCodec {
    pub fn new() -> Self {
        Self::with_options(XmlMapperOptions::default())
    }

    pub fn with_options(options: XmlMapperOptions) -> Self {
        Self {
            content_type: TEXT_XML.to_owned(),
            mapper: XmlMapper::new(options),
        }
    }

    pub fn content_type_override(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn mapper(&self) -> &XmlMapper {
        &self.mapper
    }
}

impl Default for XmlCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for XmlCodec {
    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn serialize<V>(&self, value: &V) -> Result<String, CodecError>
    where
        V: Serialize + ?Sized,
    {
        quick_xml::se::to_string(value).map_err(|error| CodecError::XmlSerialize(error.to_string()))
    }
}

impl<T: FromXml> Decode<T> for XmlCodec {
    fn deserialize(&self, response: &RestResponse) -> Result<Option<T>, CodecError> {
        let body = response.body();
        if body.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.mapper.map_str(body)?))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::OnceLock;

    use http::{HeaderMap, StatusCode};
    use pretty_assertions::assert_eq;
    use serde::{Deserialize, Serialize};

    use super::{Codec, Decode, JsonCodec, XmlCodec};
    use crate::request::RestRequest;
    use crate::response::RestResponse;
    use crate::xml::{XmlMapped, XmlSchema};

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct TagList {
        tag: Vec<String>,
    }

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Widget {
        name: String,
        size: u32,
        tags: TagList,
    }

    impl XmlMapped for Widget {
        fn schema() -> &'static XmlSchema<Self> {
            static SCHEMA: OnceLock<XmlSchema<Widget>> = OnceLock::new();
            SCHEMA.get_or_init(|| {
                XmlSchema::builder("Widget")
                    .field("name", |widget: &mut Widget| &mut widget.name)
                    .field("size", |widget: &mut Widget| &mut widget.size)
                    .list("tags", "tag", |widget: &mut Widget| &mut widget.tags.tag)
                    .build()
            })
        }
    }

    fn envelope(body: &str) -> RestResponse {
        RestResponse::from_content(
            RestRequest::get("widgets/1").info(),
            StatusCode::OK,
            HeaderMap::new(),
            body.to_owned(),
        )
    }

    fn widget() -> Widget {
        Widget {
            name: "gear".to_owned(),
            size: 3,
            tags: TagList {
                tag: vec!["a".to_owned(), "b".to_owned()],
            },
        }
    }

    #[test]
    fn json_round_trip() {
        let codec = JsonCodec::new();
        let text = codec.serialize(&widget()).expect("serialize");
        let decoded: Option<Widget> = codec.deserialize(&envelope(&text)).expect("deserialize");

        assert_eq!(decoded, Some(widget()));
        assert_eq!(codec.content_type(), "application/json");
    }

    #[test]
    fn pretty_json_is_indented() {
        let text = JsonCodec::new()
            .pretty(true)
            .serialize(&widget())
            .expect("serialize");

        assert!(text.contains("\n  \"name\": \"gear\""), "unexpected json: {text}");
    }

    #[test]
    fn xml_round_trip() {
        let codec = XmlCodec::new();
        let text = codec.serialize(&widget()).expect("serialize");
        assert!(text.starts_with("<Widget>"), "unexpected xml: {text}");

        let decoded: Option<Widget> = codec.deserialize(&envelope(&text)).expect("deserialize");
        assert_eq!(decoded, Some(widget()));
        assert_eq!(codec.content_type(), "text/xml");
    }

    #[test]
    fn empty_body_decodes_to_none() {
        let json: Option<Widget> = JsonCodec::new().deserialize(&envelope("")).expect("json");
        let xml: Option<Widget> = XmlCodec::new().deserialize(&envelope("")).expect("xml");

        assert_eq!(json, None);
        assert_eq!(xml, None);
    }
}
