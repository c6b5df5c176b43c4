use http::StatusCode;

use crate::error::Error;
use crate::request::RequestInfo;

/// Outcome classification of a dispatch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ResponseStatus {
    #[default]
    None,
    Completed,
    Error,
    TimedOut,
    Aborted,
}

impl ResponseStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::TimedOut => "timed_out",
            Self::Aborted => "aborted",
        }
    }

    /// Classifies an HTTP status the transport returned.
    pub fn from_http_status(status: StatusCode) -> Self {
        if status.is_success() {
            Self::Completed
        } else {
            Self::Error
        }
    }
}

impl std::fmt::Display for ResponseStatus {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Pipeline-side context handed to observers next to each event.
#[derive(Clone, Debug)]
pub struct DispatchContext {
    client_name: String,
    base_url: String,
    request: RequestInfo,
}

impl DispatchContext {
    pub(crate) fn new(client_name: &str, base_url: &str, request: RequestInfo) -> Self {
        Self {
            client_name: client_name.to_owned(),
            base_url: base_url.to_owned(),
            request,
        }
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn request(&self) -> &RequestInfo {
        &self.request
    }
}

/// Classified, observer-visible record of one failed dispatch. Built fresh
/// for every failure.
#[derive(Debug)]
pub struct ErrorEvent<'a> {
    http_status: Option<StatusCode>,
    status: ResponseStatus,
    error: &'a Error,
    message: String,
}

impl<'a> ErrorEvent<'a> {
    /// `None` means no response was ever received.
    pub fn http_status(&self) -> Option<StatusCode> {
        self.http_status
    }

    pub fn status(&self) -> ResponseStatus {
        self.status
    }

    pub fn error(&self) -> &'a Error {
        self.error
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the transport returned a status before the failure.
    pub fn is_request_completed(&self) -> bool {
        self.http_status.is_some()
    }

    pub fn has_error(&self) -> bool {
        matches!(
            self.status,
            ResponseStatus::Error | ResponseStatus::TimedOut | ResponseStatus::Aborted
        )
    }
}

impl std::fmt::Display for ErrorEvent<'_> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.http_status {
            Some(status) => write!(
                formatter,
                "{} ({}): {}",
                self.status,
                status.as_u16(),
                self.message
            ),
            None => write!(formatter, "{}: {}", self.status, self.message),
        }
    }
}

/// Receives every classified dispatch failure before it is re-raised.
///
/// Runs synchronously on the dispatching task; keep it cheap.
pub trait ErrorObserver: Send + Sync {
    fn on_error(&self, context: &DispatchContext, event: &ErrorEvent<'_>);
}

impl<F> ErrorObserver for F
where
    F: Fn(&DispatchContext, &ErrorEvent<'_>) + Send + Sync,
{
    fn on_error(&self, context: &DispatchContext, event: &ErrorEvent<'_>) {
        self(context, event)
    }
}

/// Maps a dispatch failure to its outcome class.
///
/// `observed_status` is the status recorded after the send returned, if it
/// ever did.
pub fn classify(observed_status: Option<StatusCode>, error: &Error) -> ErrorEvent<'_> {
    let status = match error {
        Error::Transport { .. } if observed_status.is_none() => ResponseStatus::Aborted,
        Error::Timeout { .. } | Error::Cancelled { .. } => ResponseStatus::TimedOut,
        _ => ResponseStatus::Error,
    };
    let http_status = match error {
        Error::Protocol(failure) => Some(failure.status()),
        _ => observed_status,
    };
    ErrorEvent {
        http_status,
        status,
        error,
        message: error.to_string(),
    }
}
