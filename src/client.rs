use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::header::{ACCEPT, HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use serde::Serialize;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use crate::codec::{Codec, Decode, JsonCodec, XmlCodec};
use crate::error::{Error, TimeoutPhase};
use crate::observe::{DispatchContext, ErrorObserver, ResponseStatus, classify};
use crate::request::{RestRequest, TypedRequest};
use crate::response::{RestResponse, TypedResponse};
use crate::transport::{
    HyperTransport, Transport, TransportFactory, TransportRequest, TransportResponse,
    shared_factory,
};
use crate::util::{
    classify_transport_error, parse_header_name, parse_header_value, redact_uri_for_logs,
    resolve_uri, truncate_body, validate_base_url,
};
use crate::xml::XmlMapperOptions;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(100);
const DEFAULT_CLIENT_NAME: &str = "restpipe";

pub struct RestClientBuilder<C = JsonCodec> {
    base_url: String,
    timeout: Duration,
    client_name: String,
    default_headers: HeaderMap,
    observers: Vec<Arc<dyn ErrorObserver>>,
    transport_factory: Option<TransportFactory>,
    codec: C,
}

impl RestClientBuilder<JsonCodec> {
    pub(crate) fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            client_name: DEFAULT_CLIENT_NAME.to_owned(),
            default_headers: HeaderMap::new(),
            observers: Vec::new(),
            transport_factory: None,
            codec: JsonCodec::new(),
        }
    }
}

impl<C: Codec> RestClientBuilder<C> {
    /// Default per-dispatch timeout; zero disables it.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn try_default_header(self, name: &str, value: &str) -> Result<Self, Error> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.default_header(name, value))
    }

    pub fn observer_arc(mut self, observer: Arc<dyn ErrorObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Registers an observer; several observers are all notified, in
    /// registration order.
    pub fn observer<O>(self, observer: O) -> Self
    where
        O: ErrorObserver + 'static,
    {
        self.observer_arc(Arc::new(observer))
    }

    /// Uses an already-built transport for every dispatch.
    pub fn transport<T>(mut self, transport: T) -> Self
    where
        T: Transport + 'static,
    {
        self.transport_factory = Some(shared_factory(Arc::new(transport)));
        self
    }

    /// Builds the transport handler lazily, on the first dispatch.
    pub fn transport_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Transport>, Error> + Send + Sync + 'static,
    {
        self.transport_factory = Some(Arc::new(factory));
        self
    }

    pub fn codec<D: Codec>(self, codec: D) -> RestClientBuilder<D> {
        RestClientBuilder {
            base_url: self.base_url,
            timeout: self.timeout,
            client_name: self.client_name,
            default_headers: self.default_headers,
            observers: self.observers,
            transport_factory: self.transport_factory,
            codec,
        }
    }

    pub fn try_build(self) -> Result<RestClient<C>, Error> {
        validate_base_url(&self.base_url)?;

        Ok(RestClient {
            base_url: self.base_url,
            timeout: self.timeout,
            client_name: self.client_name,
            default_headers: self.default_headers,
            observers: self.observers,
            factory: self.transport_factory.unwrap_or_else(HyperTransport::factory),
            handler: OnceCell::new(),
            codec: self.codec,
        })
    }

    #[track_caller]
    pub fn build(self) -> RestClient<C> {
        self.try_build().unwrap_or_else(|error| {
            panic!("failed to build restpipe client: {error}; use try_build() to handle configuration errors")
        })
    }
}

/// Transport client scoped to one dispatch. Dropped on every exit path.
struct ScopedClient<'a> {
    transport: Arc<dyn Transport>,
    timeout: Option<Duration>,
    accept: Option<HeaderValue>,
    default_headers: &'a HeaderMap,
}

impl ScopedClient<'_> {
    fn prepare(&self, message: &mut TransportRequest) {
        let headers = message.headers_mut();
        for (name, value) in self.default_headers {
            if !headers.contains_key(name) {
                headers.insert(name.clone(), value.clone());
            }
        }
        if let Some(accept) = &self.accept {
            if !headers.contains_key(ACCEPT) {
                headers.insert(ACCEPT, accept.clone());
            }
        }
    }

    /// Runs one suspension point under the cancellation signal and the
    /// effective timeout.
    async fn guarded<F, R>(
        &self,
        phase: TimeoutPhase,
        cancel: &CancellationToken,
        method: &Method,
        uri: &str,
        future: F,
    ) -> Result<R, Error>
    where
        F: Future<Output = Result<R, Error>>,
    {
        let bounded = async {
            match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, future).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout {
                        phase,
                        timeout_ms: limit.as_millis(),
                        method: method.clone(),
                        uri: uri.to_owned(),
                    }),
                },
                None => future.await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled {
                phase,
                method: method.clone(),
                uri: uri.to_owned(),
            }),
            result = bounded => result,
        }
    }

    async fn send(
        &self,
        message: TransportRequest,
        cancel: &CancellationToken,
        method: &Method,
        uri: &str,
    ) -> Result<TransportResponse, Error> {
        let exchange = async {
            self.transport.send(message).await.map_err(|source| {
                let kind = classify_transport_error(source.as_ref());
                Error::Transport {
                    kind,
                    method: method.clone(),
                    uri: uri.to_owned(),
                    source,
                }
            })
        };
        self.guarded(TimeoutPhase::Transport, cancel, method, uri, exchange)
            .await
    }
}

impl Drop for ScopedClient<'_> {
    fn drop(&mut self) {
        debug!("released scoped transport client");
    }
}

/// Request/response dispatch pipeline.
///
/// Descriptors say what a request is; the pipeline sends it, validates the
/// response and reads it back as text or, through the codec `C`, as a typed
/// payload. Failures are reported to registered observers and then always
/// returned to the caller.
pub struct RestClient<C = JsonCodec> {
    base_url: String,
    timeout: Duration,
    client_name: String,
    default_headers: HeaderMap,
    observers: Vec<Arc<dyn ErrorObserver>>,
    factory: TransportFactory,
    handler: OnceCell<Arc<dyn Transport>>,
    codec: C,
}

impl<C> std::fmt::Debug for RestClient<C> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RestClient")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("client_name", &self.client_name)
            .field("observers", &self.observers.len())
            .field("handler_initialized", &self.handler.initialized())
            .finish_non_exhaustive()
    }
}

impl RestClient<JsonCodec> {
    pub fn builder(base_url: impl Into<String>) -> RestClientBuilder<JsonCodec> {
        RestClientBuilder::new(base_url)
    }

    /// JSON pipeline with default settings.
    pub fn json(base_url: impl Into<String>) -> Result<Self, Error> {
        Self::builder(base_url).try_build()
    }
}

impl RestClient<XmlCodec> {
    /// XML pipeline with default mapper options.
    pub fn xml(base_url: impl Into<String>) -> Result<Self, Error> {
        Self::xml_with_options(base_url, XmlMapperOptions::default())
    }

    pub fn xml_with_options(
        base_url: impl Into<String>,
        options: XmlMapperOptions,
    ) -> Result<Self, Error> {
        RestClient::builder(base_url)
            .codec(XmlCodec::with_options(options))
            .try_build()
    }
}

impl<C: Codec> RestClient<C> {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn default_timeout(&self) -> Duration {
        self.timeout
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn set_base_url(&mut self, base_url: impl Into<String>) -> Result<(), Error> {
        let base_url = base_url.into();
        validate_base_url(&base_url)?;
        self.base_url = base_url;
        Ok(())
    }

    pub fn set_default_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Replaces the transport factory and drops the current handler; the
    /// next dispatch builds a new one.
    pub fn set_transport_factory(&mut self, factory: TransportFactory) {
        self.factory = factory;
        if self.handler.take().is_some() {
            debug!(client = %self.client_name, "disposed transport handler");
        }
    }

    pub fn set_transport<T>(&mut self, transport: T)
    where
        T: Transport + 'static,
    {
        self.set_transport_factory(shared_factory(Arc::new(transport)));
    }

    /// Descriptor whose content type is the codec's.
    pub fn request(&self, method: Method, path: impl Into<String>) -> RestRequest {
        RestRequest::new(method, path).with_content_type(self.codec.content_type())
    }

    /// Descriptor carrying `value` serialized with the codec.
    pub fn request_with_body<V>(
        &self,
        method: Method,
        path: impl Into<String>,
        value: &V,
    ) -> Result<RestRequest, Error>
    where
        V: Serialize + ?Sized,
    {
        let body = self
            .codec
            .serialize(value)
            .map_err(|source| Error::Serialize { source })?;
        Ok(self.request(method, path).text(body))
    }

    /// Dispatches an untyped descriptor.
    pub async fn dispatch(
        &self,
        request: &RestRequest,
        cancel: &CancellationToken,
    ) -> Result<RestResponse, Error> {
        let span = self.dispatch_span(request);
        let mut observed = None;
        let result = async {
            let (_scope, response) = self.exchange(request, cancel, &mut observed).await?;
            Ok::<_, Error>(response)
        }
        .instrument(span)
        .await;
        self.report(request, observed, result)
    }

    /// Dispatches a typed descriptor, decoding the payload with the codec
    /// unless the descriptor brings its own decoder.
    pub async fn dispatch_typed<T>(
        &self,
        request: &TypedRequest<T>,
        cancel: &CancellationToken,
    ) -> Result<TypedResponse<T>, Error>
    where
        C: Decode<T>,
    {
        let span = self.dispatch_span(request);
        let mut observed = None;
        let result = async {
            let (_scope, response) = self.exchange(request, cancel, &mut observed).await?;
            let data = self.decode(request, &response)?;
            Ok::<_, Error>(TypedResponse::new(response, data))
        }
        .instrument(span)
        .await;
        self.report(request, observed, result)
    }

    pub async fn get_string(&self, path: impl Into<String>) -> Result<String, Error> {
        let request = self.request(Method::GET, path);
        let response = self.dispatch(&request, &CancellationToken::new()).await?;
        Ok(response.body().to_owned())
    }

    pub async fn get<T>(&self, path: impl Into<String>) -> Result<Option<T>, Error>
    where
        C: Decode<T>,
    {
        self.execute(self.request(Method::GET, path).typed()).await
    }

    /// Dispatches a typed descriptor without cancellation and returns the
    /// payload only.
    pub async fn execute<T>(&self, request: TypedRequest<T>) -> Result<Option<T>, Error>
    where
        C: Decode<T>,
    {
        let response = self
            .dispatch_typed(&request, &CancellationToken::new())
            .await?;
        Ok(response.into_data())
    }

    pub async fn post<V>(&self, path: impl Into<String>, value: &V) -> Result<RestResponse, Error>
    where
        V: Serialize + ?Sized,
    {
        let request = self.request_with_body(Method::POST, path, value)?;
        self.dispatch(&request, &CancellationToken::new()).await
    }

    pub async fn post_typed<V, T>(&self, path: impl Into<String>, value: &V) -> Result<Option<T>, Error>
    where
        V: Serialize + ?Sized,
        C: Decode<T>,
    {
        let request = self.request_with_body(Method::POST, path, value)?;
        self.execute(request.typed()).await
    }

    fn dispatch_span(&self, request: &RestRequest) -> tracing::Span {
        info_span!(
            "restpipe.dispatch",
            client = %self.client_name,
            method = %request.method(),
            path = %request.path()
        )
    }

    async fn acquire(&self, request: &RestRequest) -> Result<ScopedClient<'_>, Error> {
        let transport = self
            .handler
            .get_or_try_init(|| async {
                debug!(client = %self.client_name, "building transport handler");
                (self.factory)()
            })
            .await?;
        let timeout = if request.timeout().is_zero() {
            self.timeout
        } else {
            request.timeout()
        };
        let accept = request
            .content_type()
            .map(|content_type| parse_header_value(ACCEPT.as_str(), content_type))
            .transpose()?;

        Ok(ScopedClient {
            transport: Arc::clone(transport),
            timeout: (!timeout.is_zero()).then_some(timeout),
            accept,
            default_headers: &self.default_headers,
        })
    }

    /// Steps shared by both dispatch shapes: acquire, produce, send, validate
    /// and read. The scoped client is handed back so it outlives decoding.
    async fn exchange(
        &self,
        request: &RestRequest,
        cancel: &CancellationToken,
        observed: &mut Option<StatusCode>,
    ) -> Result<(ScopedClient<'_>, RestResponse), Error> {
        let scope = self.acquire(request).await?;
        let (uri_text, uri) = resolve_uri(&self.base_url, request.path())?;
        let redacted_uri = redact_uri_for_logs(&uri_text);
        let mut message = request.create_message(&uri)?;
        scope.prepare(&mut message);

        debug!(uri = %redacted_uri, "sending request");
        let started = Instant::now();
        let mut response = scope
            .send(message, cancel, request.method(), &redacted_uri)
            .await?;
        let status = response.status();
        *observed = Some(status);
        debug!(
            status = status.as_u16(),
            outcome = %ResponseStatus::from_http_status(status),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "received response"
        );

        let read = async {
            request.validate(&mut response).await?;
            request.read_message(&mut response).await
        };
        let envelope = scope
            .guarded(
                TimeoutPhase::ResponseBody,
                cancel,
                request.method(),
                &redacted_uri,
                read,
            )
            .await?;
        Ok((scope, envelope))
    }

    fn decode<T>(&self, request: &TypedRequest<T>, response: &RestResponse) -> Result<Option<T>, Error>
    where
        C: Decode<T>,
    {
        let decoded = match request.custom_decoder() {
            Some(decoder) => decoder(response),
            None => self.codec.deserialize(response),
        };
        decoded.map_err(|source| {
            warn!(
                error = %source,
                body = %truncate_body(response.body()),
                "failed to decode response payload"
            );
            Error::Deserialize {
                source,
                body: response.body().to_owned(),
            }
        })
    }

    /// Notifies observers of a failure and hands it back unchanged.
    fn report<R>(
        &self,
        request: &RestRequest,
        observed: Option<StatusCode>,
        result: Result<R, Error>,
    ) -> Result<R, Error> {
        let error = match result {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        let event = classify(observed, &error);
        warn!(
            client = %self.client_name,
            method = %request.method(),
            path = %request.path(),
            code = error.code().as_str(),
            outcome = %event.status(),
            "dispatch failed: {error}"
        );
        if !self.observers.is_empty() {
            let context = DispatchContext::new(&self.client_name, &self.base_url, request.info());
            for observer in &self.observers {
                observer.on_error(&context, &event);
            }
        }
        Err(error)
    }
}
