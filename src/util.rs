use http::Uri;
use http::header::{HeaderName, HeaderValue};

use crate::error::{Error, TransportErrorKind};

const MAX_ERROR_BODY_LEN: usize = 2048;

fn invalid_base_url_error(base_url: &str) -> Error {
    Error::InvalidUri {
        uri: base_url.to_owned(),
    }
}

pub(crate) fn redact_uri_for_logs(uri_text: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(uri_text) else {
        return uri_text.split('?').next().unwrap_or(uri_text).to_owned();
    };

    let _ = parsed.set_username("");
    let _ = parsed.set_password(None);
    parsed.set_query(None);
    parsed.set_fragment(None);
    parsed.to_string()
}

/// Resolves a descriptor path against the pipeline base address. Absolute
/// `http`/`https` paths bypass the base address.
pub(crate) fn resolve_uri(base_url: &str, path: &str) -> Result<(String, Uri), Error> {
    let uri_text = match path.parse::<Uri>() {
        // A bare word such as `items` parses as an authority, so only a
        // scheme marks the path as absolute.
        Ok(uri) if uri.scheme().is_some() => {
            let scheme = uri.scheme_str().unwrap_or_default();
            if uri.host().is_some()
                && (scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https"))
            {
                path.to_owned()
            } else {
                return Err(Error::InvalidUri {
                    uri: path.to_owned(),
                });
            }
        }
        _ => join_base_path(base_url, path),
    };
    let uri = uri_text.parse().map_err(|_| Error::InvalidUri {
        uri: uri_text.clone(),
    })?;
    Ok((uri_text, uri))
}

pub(crate) fn validate_base_url(base_url: &str) -> Result<(), Error> {
    // An empty base address is allowed; every descriptor then carries an
    // absolute path.
    if base_url.is_empty() {
        return Ok(());
    }
    let normalized = base_url.trim();
    if normalized.len() != base_url.len() {
        return Err(invalid_base_url_error(base_url));
    }

    let parsed = url::Url::parse(normalized).map_err(|_| invalid_base_url_error(base_url))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid_base_url_error(base_url));
    }
    if parsed.host_str().is_none() {
        return Err(invalid_base_url_error(base_url));
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(invalid_base_url_error(base_url));
    }
    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(invalid_base_url_error(base_url));
    }
    Ok(())
}

pub(crate) fn join_base_path(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let relative = path.trim_start_matches('/');
    match (base.is_empty(), relative.is_empty()) {
        (true, true) => String::new(),
        (true, false) => relative.to_owned(),
        (false, true) => base.to_owned(),
        (false, false) => format!("{base}/{relative}"),
    }
}

pub(crate) fn parse_header_name(name: &str) -> Result<HeaderName, Error> {
    name.parse().map_err(|source| Error::InvalidHeaderName {
        name: name.to_owned(),
        source,
    })
}

pub(crate) fn parse_header_value(name: &str, value: &str) -> Result<HeaderValue, Error> {
    value.parse().map_err(|source| Error::InvalidHeaderValue {
        name: name.to_owned(),
        source,
    })
}

pub(crate) fn classify_transport_error(error: &(dyn std::error::Error + 'static)) -> TransportErrorKind {
    let text = error.to_string().to_ascii_lowercase();
    if text.contains("dns")
        || text.contains("name or service not known")
        || text.contains("failed to lookup address")
    {
        return TransportErrorKind::Dns;
    }
    if text.contains("tls") || text.contains("certificate") || text.contains("handshake") {
        return TransportErrorKind::Tls;
    }
    if text.contains("connect") || text.contains("refused") {
        return TransportErrorKind::Connect;
    }
    if text.contains("read")
        || text.contains("connection reset")
        || text.contains("broken pipe")
        || text.contains("unexpected eof")
    {
        return TransportErrorKind::Read;
    }
    TransportErrorKind::Other
}

pub(crate) fn truncate_body(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_LEN {
        return body.to_owned();
    }

    let truncated: String = body.chars().take(MAX_ERROR_BODY_LEN).collect();
    format!("{truncated}...(truncated)")
}
