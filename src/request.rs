//! Incoming HTTP request type.

use std::collections::HashMap;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};

use crate::identity::{Identity, UserId};
use crate::method::Method;

/// An incoming HTTP request with its body fully read.
pub struct Request {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) query: Option<String>,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) params: HashMap<String, String>,
    pub(crate) identity: Identity,
}

impl Request {
    /// Builds a request for `target` (`/path` or `/path?query`).
    ///
    /// The server constructs requests from the wire; this constructor exists
    /// for driving a [`Service`](crate::Service) directly.
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query.to_owned())),
            None => (target, None),
        };
        Self {
            method,
            path: path.to_owned(),
            query,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            params: HashMap::new(),
            identity: Identity::default(),
        }
    }

    pub(crate) fn from_parts(parts: http::request::Parts, method: Method, body: Bytes) -> Self {
        Self {
            method,
            path: parts.uri.path().to_owned(),
            query: parts.uri.query().map(str::to_owned),
            headers: parts.headers,
            body,
            params: HashMap::new(),
            identity: Identity::default(),
        }
    }

    /// Adds a header.
    ///
    /// # Panics
    ///
    /// Panics if `value` contains bytes not allowed in a header value.
    pub fn with_header(mut self, name: HeaderName, value: &str) -> Self {
        let value = HeaderValue::from_str(value).expect("invalid header value");
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> Method { self.method }
    pub fn path(&self) -> &str { &self.path }
    pub fn query(&self) -> Option<&str> { self.query.as_deref() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// Case-insensitive header lookup. Non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/tasks/{id}`, `req.param("id")` on `/tasks/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// The request's identity slot.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The authenticated caller.
    ///
    /// # Panics
    ///
    /// Panics if called on a route that does not run the auth stage. That is
    /// a wiring mistake, never a property of the incoming request, and it must
    /// not degrade to an anonymous caller.
    pub fn user_id(&self) -> UserId {
        self.identity.get().unwrap_or_else(|| {
            panic!("{} {}: identity read before authentication", self.method, self.path)
        })
    }
}
