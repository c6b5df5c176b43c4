//! Transport seam for the dispatch pipeline.
//!
//! The pipeline treats the transport as a black box exposing
//! `send(message) -> response`. Connection pooling, TLS and proxying all
//! live behind [`Transport`]; the default implementation is a pooled hyper
//! client.

use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Request, Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;

use crate::error::{BoxError, Error};

/// Outgoing message produced by a descriptor's message producer.
pub type TransportRequest = Request<Bytes>;

/// Streaming response content as handed back by the transport.
pub type ResponseBody = UnsyncBoxBody<Bytes, BoxError>;

/// Builds the shared transport handler on first use.
pub type TransportFactory = Arc<dyn Fn() -> Result<Arc<dyn Transport>, Error> + Send + Sync>;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, BoxError>;
}

enum BodyState {
    Pending(ResponseBody),
    Collected(Bytes),
}

/// A response as returned by the transport. The content is materialized at
/// most once; later reads return the collected bytes.
pub struct TransportResponse {
    status: StatusCode,
    reason: String,
    headers: HeaderMap,
    body: BodyState,
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

fn map_infallible_to_box_error(never: Infallible) -> BoxError {
    match never {}
}

impl TransportResponse {
    pub fn new(response: Response<ResponseBody>) -> Self {
        let reason = response
            .extensions()
            .get::<hyper::ext::ReasonPhrase>()
            .map(|phrase| String::from_utf8_lossy(phrase.as_bytes()).into_owned())
            .or_else(|| response.status().canonical_reason().map(ToOwned::to_owned))
            .unwrap_or_default();
        let (parts, body) = response.into_parts();
        Self {
            status: parts.status,
            reason,
            headers: parts.headers,
            body: BodyState::Pending(body),
        }
    }

    /// Builds a response around already-buffered content.
    pub fn from_bytes(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        let body = Full::new(body.into())
            .map_err(map_infallible_to_box_error)
            .boxed_unsync();
        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Self::new(response)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Materializes the entire response content.
    pub async fn bytes(&mut self) -> Result<Bytes, BoxError> {
        if let BodyState::Pending(body) = &mut self.body {
            let collected = body.collect().await?.to_bytes();
            self.body = BodyState::Collected(collected);
        }
        match &self.body {
            BodyState::Collected(bytes) => Ok(bytes.clone()),
            BodyState::Pending(_) => Ok(Bytes::new()),
        }
    }

    /// Materializes the response content as UTF-8 text.
    pub async fn text(&mut self) -> Result<String, BoxError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(feature = "tls-rustls-ring")]
type RustlsConnector = hyper_rustls::HttpsConnector<HttpConnector>;

#[derive(Clone)]
enum HyperClient {
    Plain(Client<HttpConnector, Full<Bytes>>),
    #[cfg(feature = "tls-rustls-ring")]
    Rustls(Client<RustlsConnector, Full<Bytes>>),
}

/// Default transport: a pooled hyper client speaking HTTP/1.1 and HTTP/2,
/// with rustls when the `tls-rustls-ring` feature is enabled.
#[derive(Clone)]
pub struct HyperTransport {
    client: HyperClient,
}

impl HyperTransport {
    pub fn new() -> Result<Self, Error> {
        Self::build()
    }

    /// Plain-text HTTP only, no TLS.
    pub fn plain() -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            client: HyperClient::Plain(client),
        }
    }

    #[cfg(feature = "tls-rustls-ring")]
    fn build() -> Result<Self, Error> {
        let mut connector = HttpConnector::new();
        connector.enforce_http(false);
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(rustls::crypto::ring::default_provider())
            .map_err(|source| Error::TransportInit {
                message: source.to_string(),
            })?
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(connector);
        let client = Client::builder(TokioExecutor::new()).build(https);
        Ok(Self {
            client: HyperClient::Rustls(client),
        })
    }

    #[cfg(not(feature = "tls-rustls-ring"))]
    fn build() -> Result<Self, Error> {
        Ok(Self::plain())
    }

    /// Factory producing a fresh hyper transport for each handler build.
    pub fn factory() -> TransportFactory {
        Arc::new(|| Ok(Arc::new(HyperTransport::new()?) as Arc<dyn Transport>))
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, BoxError> {
        let request = request.map(Full::new);
        let response = match &self.client {
            HyperClient::Plain(client) => client.request(request).await,
            #[cfg(feature = "tls-rustls-ring")]
            HyperClient::Rustls(client) => client.request(request).await,
        }?;
        let response = response.map(|body| {
            body.map_err(|error| Box::new(error) as BoxError)
                .boxed_unsync()
        });
        Ok(TransportResponse::new(response))
    }
}

/// Wraps an already-built transport as a factory.
pub(crate) fn shared_factory(transport: Arc<dyn Transport>) -> TransportFactory {
    Arc::new(move || Ok(Arc::clone(&transport)))
}
