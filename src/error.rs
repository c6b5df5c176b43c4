use http::{Method, StatusCode};
use thiserror::Error;

use crate::request::RequestInfo;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

/// The suspension point a timeout or cancellation was observed at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TimeoutPhase {
    Transport,
    ResponseBody,
}

impl std::fmt::Display for TimeoutPhase {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Transport => "transport",
            Self::ResponseBody => "response_body",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    InvalidUri,
    InvalidHeaderName,
    InvalidHeaderValue,
    RequestBuild,
    Serialize,
    Transport,
    TransportInit,
    Timeout,
    Cancelled,
    ReadBody,
    Protocol,
    Deserialize,
    Runtime,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidUri => "invalid_uri",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::RequestBuild => "request_build",
            Self::Serialize => "serialize",
            Self::Transport => "transport",
            Self::TransportInit => "transport_init",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::ReadBody => "read_body",
            Self::Protocol => "protocol",
            Self::Deserialize => "deserialize",
            Self::Runtime => "runtime",
        }
    }
}

/// A response whose status code is outside the success range.
///
/// Built once by the validator with everything needed to diagnose the
/// failure without re-issuing the request.
#[derive(Clone, Debug)]
pub struct ProtocolFailure {
    status: StatusCode,
    reason: String,
    request: RequestInfo,
    body: String,
}

impl ProtocolFailure {
    pub fn new(
        status: StatusCode,
        reason: impl Into<String>,
        request: RequestInfo,
        body: impl Into<String>,
    ) -> Self {
        Self {
            status,
            reason: reason.into(),
            request,
            body: body.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn request(&self) -> &RequestInfo {
        &self.request
    }

    /// Raw response text; empty when the body could not be read.
    pub fn body(&self) -> &str {
        &self.body
    }
}

impl std::fmt::Display for ProtocolFailure {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "response status code does not indicate success: {} {} for {} {}",
            self.status.as_u16(),
            self.reason,
            self.request.method(),
            self.request.path()
        )
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("xml mapping error: {0}")]
    Xml(#[from] crate::xml::XmlError),
    #[error("xml serialization error: {0}")]
    XmlSerialize(String),
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid request uri: {uri}")]
    InvalidUri { uri: String },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("failed to build http request: {source}")]
    RequestBuild {
        #[source]
        source: http::Error,
    },
    #[error("failed to serialize request content: {source}")]
    Serialize {
        #[source]
        source: CodecError,
    },
    #[error("http transport error ({kind}) for {method} {uri}: {source}")]
    Transport {
        kind: TransportErrorKind,
        method: Method,
        uri: String,
        #[source]
        source: BoxError,
    },
    #[error("failed to initialize http transport: {message}")]
    TransportInit { message: String },
    #[error("http request timed out in {phase} after {timeout_ms}ms for {method} {uri}")]
    Timeout {
        phase: TimeoutPhase,
        timeout_ms: u128,
        method: Method,
        uri: String,
    },
    #[error("http request cancelled in {phase} for {method} {uri}")]
    Cancelled {
        phase: TimeoutPhase,
        method: Method,
        uri: String,
    },
    #[error("failed to read response body: {source}")]
    ReadBody {
        #[source]
        source: BoxError,
    },
    #[error("{0}")]
    Protocol(Box<ProtocolFailure>),
    #[error("failed to decode response payload: {source}; body={body}")]
    Deserialize {
        #[source]
        source: CodecError,
        body: String,
    },
    #[error("blocking facade runtime error: {message}")]
    Runtime { message: String },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidUri { .. } => ErrorCode::InvalidUri,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::RequestBuild { .. } => ErrorCode::RequestBuild,
            Self::Serialize { .. } => ErrorCode::Serialize,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::TransportInit { .. } => ErrorCode::TransportInit,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Cancelled { .. } => ErrorCode::Cancelled,
            Self::ReadBody { .. } => ErrorCode::ReadBody,
            Self::Protocol(_) => ErrorCode::Protocol,
            Self::Deserialize { .. } => ErrorCode::Deserialize,
            Self::Runtime { .. } => ErrorCode::Runtime,
        }
    }

    pub fn protocol_failure(&self) -> Option<&ProtocolFailure> {
        match self {
            Self::Protocol(failure) => Some(failure),
            _ => None,
        }
    }

    /// Response text captured alongside the failure, when there is one.
    pub fn response_body(&self) -> Option<&str> {
        match self {
            Self::Protocol(failure) => Some(failure.body()),
            Self::Deserialize { body, .. } => Some(body),
            _ => None,
        }
    }
}

impl From<ProtocolFailure> for Error {
    fn from(failure: ProtocolFailure) -> Self {
        Self::Protocol(Box::new(failure))
    }
}
