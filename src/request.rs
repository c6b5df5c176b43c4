use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method, Request, Uri};

use crate::error::{CodecError, Error, ProtocolFailure};
use crate::response::RestResponse;
use crate::transport::{TransportRequest, TransportResponse};
use crate::util::{parse_header_name, parse_header_value};

pub const APPLICATION_JSON: &str = "application/json";
pub const TEXT_XML: &str = "text/xml";

const SOAP_ACTION_HEADER: &str = "soapaction";

/// Snapshot of a descriptor carried by responses and failures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestInfo {
    method: Method,
    path: String,
    content_type: Option<String>,
}

impl RequestInfo {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }
}

#[derive(Clone, Debug)]
struct RequestContent {
    bytes: Bytes,
    text: bool,
}

/// Produces the transport message for a descriptor. Never suspends.
pub trait MessageProducer: Send + Sync {
    fn create_message(&self, request: &RestRequest, target: &Uri) -> Result<TransportRequest, Error>;
}

/// Checks a transport response. Implementations must tolerate being called
/// more than once for the same response.
#[async_trait]
pub trait ResponseValidator: Send + Sync {
    async fn validate(
        &self,
        request: &RestRequest,
        response: &mut TransportResponse,
    ) -> Result<bool, Error>;
}

/// Reads the response content into text. An empty result leaves the
/// envelope body to be derived lazily from the raw content.
#[async_trait]
pub trait BodyReader: Send + Sync {
    async fn read_body(
        &self,
        request: &RestRequest,
        response: &mut TransportResponse,
    ) -> Result<String, Error>;
}

fn is_read_only(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD
}

fn build_message(
    request: &RestRequest,
    target: &Uri,
    attach_content: bool,
) -> Result<TransportRequest, Error> {
    let mut builder = Request::builder()
        .method(request.method.clone())
        .uri(target.clone());
    for (name, value) in &request.headers {
        builder = builder.header(name, value);
    }
    let body = match &request.content {
        Some(content) if attach_content => {
            let content_type = request.content_type.as_deref().unwrap_or("text/plain");
            let header = if content.text && !content_type.contains("charset") {
                format!("{content_type}; charset=utf-8")
            } else {
                content_type.to_owned()
            };
            builder = builder.header(CONTENT_TYPE, parse_header_value("content-type", &header)?);
            content.bytes.clone()
        }
        _ => Bytes::new(),
    };
    builder
        .body(body)
        .map_err(|source| Error::RequestBuild { source })
}

/// Builds `(method, path)` and attaches text content unless the method is a
/// read-only verb.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultMessageProducer;

impl MessageProducer for DefaultMessageProducer {
    fn create_message(&self, request: &RestRequest, target: &Uri) -> Result<TransportRequest, Error> {
        build_message(request, target, !is_read_only(&request.method))
    }
}

/// Always attaches the descriptor content, whatever the method.
#[derive(Clone, Copy, Debug, Default)]
pub struct ContentMessageProducer;

impl MessageProducer for ContentMessageProducer {
    fn create_message(&self, request: &RestRequest, target: &Uri) -> Result<TransportRequest, Error> {
        build_message(request, target, true)
    }
}

/// Attaches the envelope and a `SOAPAction: {service_url}/{operation}` header.
#[derive(Clone, Debug)]
pub struct SoapMessageProducer {
    service_url: String,
}

impl SoapMessageProducer {
    pub fn new(service_url: impl Into<String>) -> Self {
        Self {
            service_url: service_url.into(),
        }
    }
}

impl MessageProducer for SoapMessageProducer {
    fn create_message(&self, request: &RestRequest, target: &Uri) -> Result<TransportRequest, Error> {
        let mut message = build_message(request, target, true)?;
        let action = format!("{}/{}", self.service_url, request.path);
        message.headers_mut().insert(
            HeaderName::from_static(SOAP_ACTION_HEADER),
            parse_header_value(SOAP_ACTION_HEADER, &action)?,
        );
        Ok(message)
    }
}

/// Passes success statuses; anything else materializes the body and raises a
/// [`ProtocolFailure`].
#[derive(Clone, Copy, Debug, Default)]
pub struct StatusValidator;

#[async_trait]
impl ResponseValidator for StatusValidator {
    async fn validate(
        &self,
        request: &RestRequest,
        response: &mut TransportResponse,
    ) -> Result<bool, Error> {
        if response.is_success() {
            return Ok(true);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ProtocolFailure::new(
            response.status(),
            response.reason().to_owned(),
            request.info(),
            body,
        )
        .into())
    }
}

/// Reports the outcome without raising.
#[derive(Clone, Copy, Debug, Default)]
pub struct PermissiveValidator;

#[async_trait]
impl ResponseValidator for PermissiveValidator {
    async fn validate(
        &self,
        _request: &RestRequest,
        response: &mut TransportResponse,
    ) -> Result<bool, Error> {
        Ok(response.is_success())
    }
}

/// Materializes the entire content as text. No streaming, no size limit.
#[derive(Clone, Copy, Debug, Default)]
pub struct TextBodyReader;

#[async_trait]
impl BodyReader for TextBodyReader {
    async fn read_body(
        &self,
        _request: &RestRequest,
        response: &mut TransportResponse,
    ) -> Result<String, Error> {
        response
            .text()
            .await
            .map_err(|source| Error::ReadBody { source })
    }
}

/// Materializes the raw content only; text is decoded on first access.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawBodyReader;

#[async_trait]
impl BodyReader for RawBodyReader {
    async fn read_body(
        &self,
        _request: &RestRequest,
        response: &mut TransportResponse,
    ) -> Result<String, Error> {
        response
            .bytes()
            .await
            .map_err(|source| Error::ReadBody { source })?;
        Ok(String::new())
    }
}

/// Describes one request: what to send and how to read what comes back.
#[derive(Clone)]
pub struct RestRequest {
    method: Method,
    path: String,
    content_type: Option<String>,
    timeout: Duration,
    headers: HeaderMap,
    content: Option<RequestContent>,
    producer: Arc<dyn MessageProducer>,
    validator: Arc<dyn ResponseValidator>,
    reader: Arc<dyn BodyReader>,
}

impl std::fmt::Debug for RestRequest {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RestRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("content_type", &self.content_type)
            .field("timeout", &self.timeout)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl RestRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            content_type: None,
            timeout: Duration::ZERO,
            headers: HeaderMap::new(),
            content: None,
            producer: Arc::new(DefaultMessageProducer),
            validator: Arc::new(StatusValidator),
            reader: Arc::new(TextBodyReader),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Sends pre-encoded content with its own content type, whatever the
    /// method.
    pub fn with_content(
        method: Method,
        path: impl Into<String>,
        content_type: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        let mut request = Self::new(method, path).with_content_type(content_type);
        request.content = Some(RequestContent {
            bytes: content.into(),
            text: false,
        });
        request.producer = Arc::new(ContentMessageProducer);
        request
    }

    /// `text/xml` request sending `body` as UTF-8 text.
    pub fn xml(method: Method, path: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(method, path)
            .with_content_type(TEXT_XML)
            .text(body)
            .message_producer(ContentMessageProducer)
    }

    /// SOAP call: posts `envelope` to `operation` with a `SOAPAction` header.
    pub fn soap(
        operation: impl Into<String>,
        service_url: impl Into<String>,
        envelope: impl Into<String>,
    ) -> Self {
        Self::xml(Method::POST, operation, envelope)
            .message_producer(SoapMessageProducer::new(service_url))
    }

    /// Keeps the raw content and skips status validation.
    pub fn raw(method: Method, path: impl Into<String>) -> Self {
        Self::new(method, path)
            .validator(PermissiveValidator)
            .body_reader(RawBodyReader)
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Per-request timeout; zero inherits the pipeline default.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Text content, attached by the default producer for non read-only
    /// verbs.
    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.content = Some(RequestContent {
            bytes: Bytes::from(body.into()),
            text: true,
        });
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn try_header(self, name: &str, value: &str) -> Result<Self, Error> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.header(name, value))
    }

    pub fn message_producer(mut self, producer: impl MessageProducer + 'static) -> Self {
        self.producer = Arc::new(producer);
        self
    }

    pub fn validator(mut self, validator: impl ResponseValidator + 'static) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    pub fn body_reader(mut self, reader: impl BodyReader + 'static) -> Self {
        self.reader = Arc::new(reader);
        self
    }

    /// Turns this descriptor into one that also yields a typed payload.
    pub fn typed<T>(self) -> TypedRequest<T> {
        TypedRequest::new(self)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn content(&self) -> Option<&Bytes> {
        self.content.as_ref().map(|content| &content.bytes)
    }

    pub fn info(&self) -> RequestInfo {
        RequestInfo {
            method: self.method.clone(),
            path: self.path.clone(),
            content_type: self.content_type.clone(),
        }
    }

    pub fn create_message(&self, target: &Uri) -> Result<TransportRequest, Error> {
        self.producer.create_message(self, target)
    }

    pub async fn validate(&self, response: &mut TransportResponse) -> Result<bool, Error> {
        self.validator.validate(self, response).await
    }

    pub async fn read_body(&self, response: &mut TransportResponse) -> Result<String, Error> {
        self.reader.read_body(self, response).await
    }

    /// Untyped read: validates again, then memoizes the body into a fresh
    /// envelope.
    pub async fn read_message(&self, response: &mut TransportResponse) -> Result<RestResponse, Error> {
        self.validate(response).await?;
        let body = self.read_body(response).await?;
        let content = response
            .bytes()
            .await
            .map_err(|source| Error::ReadBody { source })?;
        Ok(RestResponse::new(
            self.info(),
            response.status(),
            response.headers().clone(),
            content,
            body,
        ))
    }
}

type DecodeFn<T> = dyn Fn(&RestResponse) -> Result<Option<T>, CodecError> + Send + Sync;

/// Descriptor whose response is also decoded into `T`. Dereferences to the
/// untyped [`RestRequest`], so it can be dispatched either way.
pub struct TypedRequest<T> {
    request: RestRequest,
    decoder: Option<Arc<DecodeFn<T>>>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Clone for TypedRequest<T> {
    fn clone(&self) -> Self {
        Self {
            request: self.request.clone(),
            decoder: self.decoder.clone(),
            _payload: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for TypedRequest<T> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TypedRequest")
            .field("request", &self.request)
            .field("custom_decoder", &self.decoder.is_some())
            .finish()
    }
}

impl<T> TypedRequest<T> {
    pub fn new(request: RestRequest) -> Self {
        Self {
            request,
            decoder: None,
            _payload: PhantomData,
        }
    }

    /// Replaces the codec for this descriptor's payload.
    pub fn decoder<F>(mut self, decoder: F) -> Self
    where
        F: Fn(&RestResponse) -> Result<Option<T>, CodecError> + Send + Sync + 'static,
    {
        self.decoder = Some(Arc::new(decoder));
        self
    }

    pub fn into_untyped(self) -> RestRequest {
        self.request
    }

    pub(crate) fn custom_decoder(&self) -> Option<&DecodeFn<T>> {
        self.decoder.as_deref()
    }
}

impl<T> Deref for TypedRequest<T> {
    type Target = RestRequest;

    fn deref(&self) -> &Self::Target {
        &self.request
    }
}
