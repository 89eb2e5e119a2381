//! HTTP/1.1 request parsing using the [`httparse`] crate, plus URL and
//! query-string decomposition.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use bytes::Bytes;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
}

/// A parsed HTTP/1.1 request.
///
/// Created by [`Request::parse`] from a raw byte buffer, or by
/// [`Request::new`] when a custom server hands requests to the core directly.
///
/// # Examples
///
/// ```
/// use ssrv::http::request::Request;
///
/// let raw = b"GET /about?ref=home HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.url(), "/about?ref=home");
/// assert_eq!(request.path(), "/about");
/// assert_eq!(request.headers().get("host"), Some("localhost"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    /// Raw request target as received, query string included.
    url: String,
    path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    body: Bytes,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Builds an HTTP/1.1 request with no headers and no body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        let url = url.into();
        let path = ParsedUrl::split_target(&url).0.to_owned();
        Self {
            method,
            url,
            path,
            version: 1,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Appends a header, builder style.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Parse a raw HTTP/1.1 request from a byte slice.
    ///
    /// Returns the parsed `Request` and the byte offset at which the body begins
    /// in `buf` (i.e. immediately after the `\r\n\r\n` header terminator).
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: more data is needed to complete the request headers.
    /// - [`RequestError::Parse`]: the data is malformed and cannot be parsed.
    /// - [`RequestError::MissingField`]: a required field (method, path, version) is absent.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let Ok(method) = raw_req
            .method
            .ok_or(RequestError::MissingField { field: "method" })?
            .parse::<Method>();

        let url = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?
            .to_owned();

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        let path = ParsedUrl::split_target(&url).0.to_owned();
        let body = Bytes::copy_from_slice(&buf[body_offset..]);

        Ok((
            Self {
                method,
                url,
                path,
                version,
                headers: header_map,
                body,
            },
            body_offset,
        ))
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the raw request target, query string included.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the request body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection: keep-alive` is explicitly set.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }

    /// Returns the value of the `Content-Length` header parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.parse().ok()
    }
}

/// A single query-string value: one occurrence or a repeated key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryValue {
    Single(String),
    Multiple(Vec<String>),
}

impl QueryValue {
    /// Returns the first value.
    pub fn first(&self) -> Option<&str> {
        match self {
            Self::Single(v) => Some(v),
            Self::Multiple(vs) => vs.first().map(String::as_str),
        }
    }
}

/// A decoded query string: `name → value | [values]`.
///
/// # Examples
///
/// ```
/// use ssrv::http::{Query, QueryValue};
///
/// let query = Query::parse("tag=a&tag=b&q=hello+world");
/// assert_eq!(query.first("q"), Some("hello world"));
/// assert_eq!(
///     query.get("tag"),
///     Some(&QueryValue::Multiple(vec!["a".into(), "b".into()]))
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Query(BTreeMap<String, QueryValue>);

impl Query {
    /// Creates an empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a raw query string (`a=1&b=2`, no leading `?`).
    ///
    /// `+` decodes to a space, percent escapes are decoded (invalid UTF-8 is
    /// replaced lossily), empty pairs are skipped, and a key seen more than
    /// once collects all of its values in order.
    pub fn parse(raw: &str) -> Self {
        let mut query = Self::new();
        for pair in raw.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            query.append(decode_component(key), decode_component(value));
        }
        query
    }

    /// Adds a value, turning the entry into [`QueryValue::Multiple`] on repeats.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        match self.0.entry(key.into()) {
            Entry::Vacant(slot) => {
                slot.insert(QueryValue::Single(value));
            }
            Entry::Occupied(mut slot) => {
                let current = slot.get_mut();
                match current {
                    QueryValue::Single(prev) => {
                        let prev = std::mem::take(prev);
                        *current = QueryValue::Multiple(vec![prev, value]);
                    }
                    QueryValue::Multiple(values) => values.push(value),
                }
            }
        }
    }

    /// Sets `key`, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: QueryValue) -> Option<QueryValue> {
        self.0.insert(key.into(), value)
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&QueryValue> {
        self.0.get(key)
    }

    /// Returns the first value stored under `key`.
    pub fn first(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(QueryValue::first)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &QueryValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// A query that may or may not have been decoded yet.
///
/// Custom servers sometimes hand the core a URL whose query they already
/// parsed. Converting a [`QueryInput::Parsed`] is a no-op, so parsing is
/// idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryInput {
    Raw(String),
    Parsed(Query),
}

impl QueryInput {
    /// Resolves to a decoded [`Query`], parsing only when still raw.
    pub fn into_query(self) -> Query {
        match self {
            Self::Raw(raw) => Query::parse(&raw),
            Self::Parsed(query) => query,
        }
    }
}

impl From<&str> for QueryInput {
    fn from(raw: &str) -> Self {
        Self::Raw(raw.to_owned())
    }
}

impl From<String> for QueryInput {
    fn from(raw: String) -> Self {
        Self::Raw(raw)
    }
}

impl From<Query> for QueryInput {
    fn from(query: Query) -> Self {
        Self::Parsed(query)
    }
}

/// A request URL split into its pathname and decoded query.
///
/// Derived once per request; route dispatch runs on [`pathname`](Self::pathname).
///
/// # Examples
///
/// ```
/// use ssrv::http::ParsedUrl;
///
/// let url = ParsedUrl::parse("/blog/post?id=7#comments");
/// assert_eq!(url.pathname, "/blog/post");
/// assert_eq!(url.query.first("id"), Some("7"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUrl {
    pub pathname: String,
    pub query: Query,
}

impl ParsedUrl {
    /// Parses a request target (origin-form or absolute-form).
    pub fn parse(url: &str) -> Self {
        let (pathname, query) = Self::split_target(url);
        Self {
            pathname: pathname.to_owned(),
            query: query.map(Query::parse).unwrap_or_default(),
        }
    }

    /// Builds a parsed URL from parts whose query may already be decoded.
    pub fn from_parts(pathname: impl Into<String>, query: impl Into<QueryInput>) -> Self {
        Self {
            pathname: pathname.into(),
            query: query.into().into_query(),
        }
    }

    // Splits a target into (pathname, raw query), dropping any scheme,
    // authority and fragment. An empty pathname becomes `/`.
    pub(crate) fn split_target(url: &str) -> (&str, Option<&str>) {
        let url = url.split_once('#').map_or(url, |(head, _)| head);
        let url = match url.find("://") {
            Some(pos) => {
                let after = &url[pos + 3..];
                after.find(['/', '?']).map_or("", |i| &after[i..])
            }
            None => url,
        };
        let (path, query) = match url.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (url, None),
        };
        (if path.is_empty() { "/" } else { path }, query)
    }
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let (req, offset) = Request::parse(raw).unwrap();
        assert_eq!(req.method(), &Method::Get);
        assert_eq!(req.path(), "/");
        assert_eq!(req.version(), 1);
        assert_eq!(offset, raw.len());
    }

    #[test]
    fn incomplete_request() {
        let raw = b"GET / HTTP/1.1\r\nHost:";
        assert!(matches!(Request::parse(raw), Err(RequestError::Incomplete)));
    }

    #[test]
    fn connection_close() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert!(!req.is_keep_alive());
    }

    #[test]
    fn content_length() {
        let raw = b"POST / HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nhello";
        let (req, body_offset) = Request::parse(raw).unwrap();
        assert_eq!(req.content_length(), Some(5));
        assert_eq!(&raw[body_offset..], b"hello");
    }

    #[test]
    fn query_decodes_and_collects_repeats() {
        let q = Query::parse("a=1&a=2&a=3&name=J%C3%BCrgen&flag&&x=a+b");
        assert_eq!(
            q.get("a"),
            Some(&QueryValue::Multiple(vec!["1".into(), "2".into(), "3".into()]))
        );
        assert_eq!(q.first("name"), Some("Jürgen"));
        assert_eq!(q.first("flag"), Some(""));
        assert_eq!(q.first("x"), Some("a b"));
        assert_eq!(q.len(), 4);
    }

    #[test]
    fn parsed_query_input_is_left_untouched() {
        let mut query = Query::new();
        query.append("raw", "a%20b+c");
        let out = QueryInput::from(query.clone()).into_query();
        assert_eq!(out, query);
        assert_eq!(out.first("raw"), Some("a%20b+c"));
    }

    #[test]
    fn parsed_url_handles_absolute_form_and_fragments() {
        let url = ParsedUrl::parse("http://example.com:3000/about?x=1#top");
        assert_eq!(url.pathname, "/about");
        assert_eq!(url.query.first("x"), Some("1"));

        let bare = ParsedUrl::parse("http://example.com");
        assert_eq!(bare.pathname, "/");
        assert!(bare.query.is_empty());
    }

    #[test]
    fn parsed_url_without_query_is_empty_mapping() {
        let url = ParsedUrl::parse("/about");
        assert_eq!(url.pathname, "/about");
        assert!(url.query.is_empty());
    }

    #[test]
    fn query_serializes_as_plain_mapping() {
        let q = Query::parse("a=1&b=2&b=3");
        let json = serde_json::to_value(&q).unwrap();
        assert_eq!(json, serde_json::json!({ "a": "1", "b": ["2", "3"] }));
    }
}
