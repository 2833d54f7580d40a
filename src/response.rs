//! Outgoing HTTP response type and the [`IntoResponse`] conversion trait.
//!
//! Build a [`Response`] in your handler and return it. The pipeline may wrap
//! it on the way out (the cache gateway attaches a delivery hook), but never
//! changes its status, headers or bytes.

use bytes::Bytes;
use http_body_util::Full;
use serde::Serialize;
use tracing::error;

use crate::capture::{CaptureBody, DeliveryHook};
use crate::status::Status;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for use with [`ResponseBuilder::bytes`].
pub enum ContentType {
    Json,         // application/json
    OctetStream,  // application/octet-stream
    Text,         // text/plain; charset=utf-8
}

impl ContentType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Text        => "text/plain; charset=utf-8",
        }
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// # Shortcuts (200 OK, no custom headers needed)
///
/// ```rust
/// use taskd::{Response, Status};
///
/// Response::json(br#"{"id":1}"#.to_vec());
/// Response::text("hello");
/// Response::status(Status::NoContent);
/// ```
///
/// # Builder (custom status or headers)
///
/// ```rust
/// use taskd::{Response, Status};
///
/// Response::builder()
///     .status(Status::Created)
///     .header("location", "/tasks/42")
///     .json(br#"{"id":42}"#.to_vec());
/// ```
pub struct Response {
    pub(crate) body: Bytes,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) status: u16,
    pub(crate) on_delivered: Option<DeliveryHook>,
}

impl Response {
    /// `200 OK`, `application/json`.
    pub fn json(body: impl Into<Bytes>) -> Self {
        Self::bytes_raw("application/json", body.into())
    }

    /// `200 OK`, `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::bytes_raw("text/plain; charset=utf-8", Bytes::from(body.into()))
    }

    /// Response with no body.
    pub fn status(code: Status) -> Self {
        Self { body: Bytes::new(), headers: Vec::new(), status: code.into(), on_delivered: None }
    }

    /// `{"error": message}` with the given status. The stable error payload.
    pub fn error(code: Status, message: &str) -> Self {
        Self::builder().status(code).error(message)
    }

    /// Builder for responses that need a custom status or extra headers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: Vec::new(), status: Status::Ok.into() }
    }

    /// Rebuilds a response from stored parts. Used for cache hits.
    pub(crate) fn from_parts(status: u16, content_type: Option<&str>, body: Bytes) -> Self {
        let headers = content_type
            .map(|ct| vec![("content-type".to_owned(), ct.to_owned())])
            .unwrap_or_default();
        Self { body, headers, status, on_delivered: None }
    }

    fn bytes_raw(content_type: &str, body: Bytes) -> Self {
        Self {
            body,
            headers: vec![("content-type".to_owned(), content_type.to_owned())],
            status: Status::Ok.into(),
            on_delivered: None,
        }
    }

    pub fn status_code(&self) -> u16 { self.status }
    pub fn body(&self) -> &Bytes { &self.body }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Runs `hook` with the delivered bytes once the client has been handed
    /// the complete body. Never runs for a response abandoned mid-flight.
    pub(crate) fn on_delivered(mut self, hook: DeliveryHook) -> Self {
        self.on_delivered = Some(hook);
        self
    }

    /// Converts into the wire type handed to hyper.
    ///
    /// A header that does not survive `http`'s validation turns the whole
    /// response into a bare 500 rather than a half-built one.
    pub fn into_inner(self) -> http::Response<CaptureBody> {
        let mut builder = http::Response::builder().status(self.status);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        match builder.body(CaptureBody::new(Full::new(self.body), self.on_delivered)) {
            Ok(res) => res,
            Err(e) => {
                error!("invalid response head: {e}");
                let mut res = http::Response::new(CaptureBody::new(Full::new(Bytes::new()), None));
                *res.status_mut() = http::StatusCode::INTERNAL_SERVER_ERROR;
                res
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Defaults to `Status::Ok` (200).
/// Terminated by a typed body method.
pub struct ResponseBuilder {
    headers: Vec<(String, String)>,
    status: u16,
}

impl ResponseBuilder {
    pub fn status(mut self, code: Status) -> Self {
        self.status = code.into();
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    /// Terminate with a JSON body (`application/json`).
    pub fn json(self, body: impl Into<Bytes>) -> Response {
        self.finish("application/json", body.into())
    }

    /// Terminate with `value` serialised as JSON. A value serde refuses
    /// becomes a bare 500.
    pub fn json_value<T: Serialize + ?Sized>(self, value: &T) -> Response {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.json(bytes),
            Err(e) => {
                error!("response serialization failed: {e}");
                Response::status(Status::InternalServerError)
            }
        }
    }

    /// Terminate with the `{"error": message}` payload.
    pub fn error(self, message: &str) -> Response {
        self.json_value(&ErrorBody { error: message })
    }

    /// Terminate with a plain-text body (`text/plain; charset=utf-8`).
    pub fn text(self, body: impl Into<String>) -> Response {
        self.finish("text/plain; charset=utf-8", Bytes::from(body.into()))
    }

    /// Terminate with a typed body.
    pub fn bytes(self, content_type: ContentType, body: impl Into<Bytes>) -> Response {
        self.finish(content_type.as_str(), body.into())
    }

    /// Terminate with no body.
    pub fn no_body(self) -> Response {
        Response { body: Bytes::new(), headers: self.headers, status: self.status, on_delivered: None }
    }

    fn finish(self, content_type: &str, body: Bytes) -> Response {
        let mut headers = vec![("content-type".to_owned(), content_type.to_owned())];
        headers.extend(self.headers);
        Response { body, headers, status: self.status, on_delivered: None }
    }
}

// ── IntoResponse ──────────────────────────────────────────────────────────────

/// Conversion into an HTTP [`Response`].
///
/// Implement on your own types to return them directly from handlers.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::text(self) }
}

/// Return a [`Status`] directly from a handler: `return Status::NotFound`
impl IntoResponse for Status {
    fn into_response(self) -> Response { Response::status(self) }
}

/// `200 OK` with `T` serialised as JSON.
///
/// ```rust,ignore
/// async fn list(_req: Request) -> Json<Vec<Task>> {
///     Json(vec![])
/// }
/// ```
pub struct Json<T>(pub T);

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        Response::builder().json_value(&self.0)
    }
}

impl<T: IntoResponse, E: IntoResponse> IntoResponse for Result<T, E> {
    fn into_response(self) -> Response {
        match self {
            Ok(v) => v.into_response(),
            Err(e) => e.into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;

    #[test]
    fn error_payload_is_stable_json() {
        let res = Response::error(Status::Unauthorized, "invalid or expired token");
        assert_eq!(res.status_code(), 401);
        assert_eq!(res.content_type(), Some("application/json"));
        assert_eq!(&res.body()[..], br#"{"error":"invalid or expired token"}"#);
    }

    #[test]
    fn json_wrapper_serializes() {
        let res = Json(vec![1, 2, 3]).into_response();
        assert_eq!(res.status_code(), 200);
        assert_eq!(&res.body()[..], b"[1,2,3]");
    }

    #[tokio::test]
    async fn into_inner_keeps_status_headers_and_bytes() {
        let res = Response::builder()
            .status(Status::Created)
            .header("location", "/tasks/9")
            .json(r#"{"id":9}"#);

        let wire = res.into_inner();
        assert_eq!(wire.status(), 201);
        assert_eq!(wire.headers()["content-type"], "application/json");
        assert_eq!(wire.headers()["location"], "/tasks/9");
        let body = wire.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], br#"{"id":9}"#);
    }

    #[test]
    fn typed_bytes_set_content_type() {
        let res = Response::builder().bytes(ContentType::OctetStream, vec![0u8, 1, 2]);
        assert_eq!(res.content_type(), Some("application/octet-stream"));
        assert_eq!(&res.body()[..], &[0, 1, 2]);
    }

    #[test]
    fn invalid_header_degrades_to_500() {
        let res = Response::builder().header("bad header", "x").text("hi");
        assert_eq!(res.into_inner().status(), 500);
    }
}
