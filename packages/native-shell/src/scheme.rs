//! Private resource scheme: routing and interception.
//!
//! The renderer loads every app resource as `scheme://host/path`. The
//! interceptor answers those loads from the bridge's [`ContentRouter`], and
//! keeps answering (with `410 Gone`) after the bridge is torn down so a
//! request in flight during disposal never hangs.

use std::borrow::Cow;
use std::sync::{Arc, Weak};

use http::header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Response, StatusCode};
use percent_encoding::percent_decode_str;
use tracing::{debug, trace, warn};
use url::Url;

use crate::content::ContentProvider;

/// Body type handed back to the renderer.
pub type SchemeResponse = Response<Cow<'static, [u8]>>;

/// A successful lookup.
#[derive(Debug, Clone)]
pub struct ServedContent {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Arc<[u8]>,
}

/// A failed lookup, carried as a status rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServeError {
    pub status: StatusCode,
}

impl ServeError {
    pub const BAD_REQUEST: Self = Self {
        status: StatusCode::BAD_REQUEST,
    };
    pub const NOT_FOUND: Self = Self {
        status: StatusCode::NOT_FOUND,
    };

    pub fn reason(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("Error")
    }
}

/// Maps content URIs onto a [`ContentProvider`].
pub struct ContentRouter {
    base: Url,
    root_document: String,
    provider: Arc<dyn ContentProvider>,
}

impl ContentRouter {
    pub fn new(
        base: Url,
        root_document: impl Into<String>,
        provider: Arc<dyn ContentProvider>,
    ) -> Self {
        Self {
            base,
            root_document: root_document.into().trim_start_matches('/').to_string(),
            provider,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Relative path of the document served for `/`.
    pub fn root_document(&self) -> &str {
        &self.root_document
    }

    /// Look up `request_uri` against the content provider.
    ///
    /// There is no fallback to the root document: a missing resource is a
    /// genuine 404, and so is a URI outside `scheme://host/`.
    pub fn try_serve(&self, request_uri: &str) -> Result<ServedContent, ServeError> {
        let url = Url::parse(request_uri).map_err(|_| ServeError::BAD_REQUEST)?;
        if !self.is_own_origin(&url) {
            return Err(ServeError::NOT_FOUND);
        }

        let decoded = percent_decode_str(url.path())
            .decode_utf8()
            .map_err(|_| ServeError::BAD_REQUEST)?;
        let relative = decoded.trim_start_matches('/');
        if relative.is_empty() {
            return Err(ServeError::NOT_FOUND);
        }

        let content = self.provider.get(relative).ok_or(ServeError::NOT_FOUND)?;

        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&content.content_type) {
            headers.insert(CONTENT_TYPE, value);
        }
        headers.insert(CONTENT_LENGTH, HeaderValue::from(content.len()));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        Ok(ServedContent {
            status: StatusCode::OK,
            headers,
            body: content.bytes,
        })
    }

    fn is_own_origin(&self, url: &Url) -> bool {
        url.scheme().eq_ignore_ascii_case(self.base.scheme())
            && match (url.host_str(), self.base.host_str()) {
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                (None, None) => true,
                _ => false,
            }
    }
}

/// Answers renderer resource loads under the private scheme.
///
/// Holds only a weak reference to the router: once the owning bridge drops
/// it, every request is answered with `410 Gone`.
#[derive(Clone)]
pub struct SchemeInterceptor {
    router: Weak<ContentRouter>,
}

impl SchemeInterceptor {
    pub fn new(router: &Arc<ContentRouter>) -> Self {
        Self {
            router: Arc::downgrade(router),
        }
    }

    /// An interceptor whose bridge is never available.
    pub fn detached() -> Self {
        Self { router: Weak::new() }
    }

    pub fn is_available(&self) -> bool {
        self.router.strong_count() > 0
    }

    pub fn handle(&self, request_uri: &str) -> SchemeResponse {
        let Ok(mut url) = Url::parse(request_uri) else {
            warn!(event = "shell.scheme.bad_request", uri = %request_uri);
            return text_response(StatusCode::BAD_REQUEST, "Missing or malformed URL");
        };

        let Some(router) = self.router.upgrade() else {
            debug!(event = "shell.scheme.gone", uri = %request_uri);
            return text_response(
                StatusCode::GONE,
                "The requested resource is no longer available.",
            );
        };

        if url.path().is_empty() || url.path() == "/" {
            url.set_path(&format!("/{}", router.root_document()));
        }

        match router.try_serve(url.as_str()) {
            Ok(served) => {
                trace!(
                    event = "shell.scheme.served",
                    uri = %url,
                    size = served.body.len()
                );
                let mut response = Response::new(Cow::Owned(served.body.to_vec()));
                *response.status_mut() = served.status;
                *response.headers_mut() = served.headers;
                response
            }
            Err(e) => {
                debug!(
                    event = "shell.scheme.not_served",
                    uri = %url,
                    status = e.status.as_u16()
                );
                text_response(
                    e.status,
                    &format!("{} {}", e.status.as_u16(), e.reason()),
                )
            }
        }
    }
}

/// Minimal `text/plain` response carrying `status` and `text`.
fn text_response(status: StatusCode, text: &str) -> SchemeResponse {
    let mut response = Response::new(Cow::Owned(text.as_bytes().to_vec()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Reason phrase for a response status.
pub fn reason_phrase(response: &SchemeResponse) -> &'static str {
    response.status().canonical_reason().unwrap_or("")
}
