//! `restpipe` is a request/response dispatch pipeline with pluggable JSON and
//! XML codecs.
//!
//! A [`RestRequest`] describes one call: verb, path, content type, timeout and
//! the three behaviors that turn it into a wire message, validate the reply
//! and read the reply body. A [`RestClient`] runs descriptors through the
//! pipeline, reports failures to registered observers and returns either a
//! [`RestResponse`] or a [`TypedResponse`] decoded by its codec.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use restpipe::prelude::{CancellationToken, ErrorEvent, ErrorObserver, RestClient};
//! use restpipe::DispatchContext;
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct Item {
//!     id: String,
//! }
//!
//! struct LogFailures;
//!
//! impl ErrorObserver for LogFailures {
//!     fn on_error(&self, context: &DispatchContext, event: &ErrorEvent<'_>) {
//!         eprintln!("{} failed: {event}", context.request().path());
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RestClient::builder("https://api.example.com")
//!         .client_name("my-sdk")
//!         .timeout(Duration::from_secs(5))
//!         .observer(LogFailures)
//!         .try_build()?;
//!
//!     let request = client.request(http::Method::GET, "v1/items/7").typed::<Item>();
//!     let response = client.dispatch_typed(&request, &CancellationToken::new()).await?;
//!     println!("status={} item={:?}", response.status(), response.data());
//!     Ok(())
//! }
//! ```
//!
//! # XML
//!
//! [`RestClient::xml`] pairs the pipeline with [`XmlCodec`], which maps
//! response documents onto types implementing [`xml::XmlMapped`].

mod blocking;
mod client;
mod codec;
mod error;
mod observe;
mod request;
mod response;
mod transport;
mod util;

pub mod xml;

pub use tokio_util::sync::CancellationToken;

pub use crate::blocking::BlockingRestClient;
pub use crate::client::{RestClient, RestClientBuilder};
pub use crate::codec::{Codec, Decode, JsonCodec, XmlCodec};
pub use crate::error::{
    CodecError, Error, ErrorCode, ProtocolFailure, TimeoutPhase, TransportErrorKind,
};
pub use crate::observe::{DispatchContext, ErrorEvent, ErrorObserver, ResponseStatus, classify};
pub use crate::request::{
    APPLICATION_JSON, BodyReader, ContentMessageProducer, DefaultMessageProducer, MessageProducer,
    PermissiveValidator, RawBodyReader, RequestInfo, ResponseValidator, RestRequest,
    SoapMessageProducer, StatusValidator, TEXT_XML, TextBodyReader, TypedRequest,
};
pub use crate::response::{RestResponse, TypedResponse};
pub use crate::transport::{
    HyperTransport, ResponseBody, Transport, TransportFactory, TransportRequest, TransportResponse,
};
pub use crate::xml::{XmlError, XmlMapperOptions};

pub type RestResult<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        BlockingRestClient, CancellationToken, Codec, Decode, Error, ErrorCode, ErrorEvent,
        ErrorObserver, JsonCodec, RestClient, RestRequest, RestResponse, RestResult,
        TypedRequest, TypedResponse, XmlCodec, XmlMapperOptions,
    };
    pub use crate::xml::{XmlMapped, XmlSchema};
}
