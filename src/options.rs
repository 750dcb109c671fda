//! Per-call request options.
//!
//! A [`RequestOptions`] value describes one logical request: method, path,
//! headers, query, body, retry budget, streaming flag and any per-call
//! placeholder bindings. It is consumed by a single request invocation.

use crate::body::Body;
use crate::query::Query;
use indexmap::IndexMap;
use reqwest::Method;
use serde_json::Value;

#[derive(Debug, Default)]
pub struct RequestOptions {
    /// HTTP method; GET when not set.
    pub method: Option<Method>,
    /// Path below the base URL. A leading `/` or `.` resolves as a relative
    /// URL against the base; anything else is concatenated with a `/`.
    pub path: Option<String>,
    /// Extra request headers, in insertion order.
    pub headers: IndexMap<String, String>,
    /// Query string or structured query pairs.
    pub query: Option<Query>,
    pub body: Body,
    /// Per-call retry budget, overriding the client's.
    pub num_retries: Option<u32>,
    /// Deliver the response body as metadata/row events instead of
    /// buffering it. Forces the retry budget to zero.
    pub streaming: bool,
    /// Per-call placeholder bindings; looked up before the client scope.
    pub placeholders: IndexMap<String, Value>,
}

impl RequestOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for a GET of the given path
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new().with_method(Method::GET).with_path(path)
    }

    /// Shorthand for a PUT of the given path
    #[must_use]
    pub fn put(path: impl Into<String>) -> Self {
        Self::new().with_method(Method::PUT).with_path(path)
    }

    /// Shorthand for a POST of the given path
    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new().with_method(Method::POST).with_path(path)
    }

    /// Shorthand for a DELETE of the given path
    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new().with_method(Method::DELETE).with_path(path)
    }

    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_query(mut self, query: impl Into<Query>) -> Self {
        self.query = Some(query.into());
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub const fn with_num_retries(mut self, num_retries: u32) -> Self {
        self.num_retries = Some(num_retries);
        self
    }

    #[must_use]
    pub const fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    /// Bind a per-call placeholder value, shadowing the client scope
    #[must_use]
    pub fn with_placeholder(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.placeholders.insert(name.into(), value.into());
        self
    }

    /// Effective method (GET when unset)
    #[must_use]
    pub fn effective_method(&self) -> Method {
        self.method.clone().unwrap_or(Method::GET)
    }

    /// Case-insensitive header lookup
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Copy for a redispatch of the same logical request. Stream bodies
    /// are not replayable and duplicate to no body; the paths that
    /// redispatch (view-query recovery) never carry one.
    #[must_use]
    pub(crate) fn duplicate(&self) -> Self {
        let body = match &self.body {
            Body::None | Body::Stream(_) => Body::None,
            Body::Bytes(bytes) => Body::Bytes(bytes.clone()),
            Body::Text(text) => Body::Text(text.clone()),
            Body::Json(value) => Body::Json(value.clone()),
        };
        Self {
            method: self.method.clone(),
            path: self.path.clone(),
            headers: self.headers.clone(),
            query: self.query.clone(),
            body,
            num_retries: self.num_retries,
            streaming: self.streaming,
            placeholders: self.placeholders.clone(),
        }
    }

    /// Case-insensitive header removal; returns the removed value
    pub fn remove_header(&mut self, name: &str) -> Option<String> {
        let key = self
            .headers
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .cloned()?;
        self.headers.shift_remove(&key)
    }
}
