use std::sync::OnceLock;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};

use crate::request::RequestInfo;

/// Result envelope of an untyped dispatch.
///
/// The body text is memoized: once it has been computed it is never
/// recomputed, and the raw content handle stays available for callers that
/// need the bytes.
#[derive(Debug)]
pub struct RestResponse {
    request: RequestInfo,
    status: StatusCode,
    headers: HeaderMap,
    content: Bytes,
    body: OnceLock<String>,
}

impl RestResponse {
    pub(crate) fn new(
        request: RequestInfo,
        status: StatusCode,
        headers: HeaderMap,
        content: Bytes,
        body: String,
    ) -> Self {
        let cached = OnceLock::new();
        if !body.is_empty() {
            let _ = cached.set(body);
        }
        Self {
            request,
            status,
            headers,
            content,
            body: cached,
        }
    }

    /// Envelope over content that has not been decoded yet.
    pub fn from_content(
        request: RequestInfo,
        status: StatusCode,
        headers: HeaderMap,
        content: impl Into<Bytes>,
    ) -> Self {
        Self::new(request, status, headers, content.into(), String::new())
    }

    pub fn request(&self) -> &RequestInfo {
        &self.request
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    /// Body text, decoded from the raw content on first access.
    pub fn body(&self) -> &str {
        self.body
            .get_or_init(|| String::from_utf8_lossy(&self.content).into_owned())
    }

    pub fn into_content(self) -> Bytes {
        self.content
    }
}

/// Result envelope of a typed dispatch. `data` is absent when the body was
/// empty.
#[derive(Debug)]
pub struct TypedResponse<T> {
    response: RestResponse,
    data: Option<T>,
}

impl<T> TypedResponse<T> {
    pub(crate) fn new(response: RestResponse, data: Option<T>) -> Self {
        Self { response, data }
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn into_data(self) -> Option<T> {
        self.data
    }

    pub fn into_parts(self) -> (RestResponse, Option<T>) {
        (self.response, self.data)
    }
}

impl<T> std::ops::Deref for TypedResponse<T> {
    type Target = RestResponse;

    fn deref(&self) -> &Self::Target {
        &self.response
    }
}
