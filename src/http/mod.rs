//! HTTP/1.1 protocol types and parsing.
//!
//! This module provides the primitives the request-serving core is built on:
//! [`Method`], [`StatusCode`], [`Headers`], [`Request`], [`ParsedUrl`],
//! [`Response`], and the per-request [`ResponseWriter`].

use std::fmt;

pub mod headers;
pub mod request;
pub mod response;
pub mod writer;

pub use headers::Headers;
pub use request::{ParsedUrl, Query, QueryInput, QueryValue, Request};
pub use response::Response;
pub use writer::{AlreadySent, ResponseWriter};

/// An HTTP response status code.
///
/// The codes this server produces itself are named. Any other code in
/// `100..=599` that a render engine sets travels as [`StatusCode::Other`]
/// and is written to the wire unchanged.
///
/// # Examples
///
/// ```
/// use ssrv::http::StatusCode;
///
/// let status = StatusCode::NotFound;
/// assert_eq!(status.as_u16(), 404);
/// assert_eq!(status.canonical_reason(), "Not Found");
/// assert!(!status.is_success());
///
/// assert_eq!(StatusCode::from_u16(410), Some(StatusCode::Gone));
/// assert_eq!(StatusCode::from_u16(451), Some(StatusCode::Other(451)));
/// assert_eq!(StatusCode::from_u16(99), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    NoContent,

    MovedPermanently,
    Found,
    NotModified,
    TemporaryRedirect,
    PermanentRedirect,

    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    Gone,
    PayloadTooLarge,
    TooManyRequests,

    InternalServerError,
    NotImplemented,
    ServiceUnavailable,

    /// Any other code. Build it through [`StatusCode::from_u16`] so the
    /// value stays in `100..=599`.
    Other(u16),
}

impl StatusCode {
    /// Returns the numeric status code as a `u16`.
    pub fn as_u16(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::NoContent => 204,
            Self::MovedPermanently => 301,
            Self::Found => 302,
            Self::NotModified => 304,
            Self::TemporaryRedirect => 307,
            Self::PermanentRedirect => 308,
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::MethodNotAllowed => 405,
            Self::Gone => 410,
            Self::PayloadTooLarge => 413,
            Self::TooManyRequests => 429,
            Self::InternalServerError => 500,
            Self::NotImplemented => 501,
            Self::ServiceUnavailable => 503,
            Self::Other(code) => code,
        }
    }

    /// Maps a numeric code to its named variant, or to [`StatusCode::Other`].
    ///
    /// Returns `None` outside `100..=599`.
    pub fn from_u16(code: u16) -> Option<Self> {
        Some(match code {
            200 => Self::Ok,
            204 => Self::NoContent,
            301 => Self::MovedPermanently,
            302 => Self::Found,
            304 => Self::NotModified,
            307 => Self::TemporaryRedirect,
            308 => Self::PermanentRedirect,
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            405 => Self::MethodNotAllowed,
            410 => Self::Gone,
            413 => Self::PayloadTooLarge,
            429 => Self::TooManyRequests,
            500 => Self::InternalServerError,
            501 => Self::NotImplemented,
            503 => Self::ServiceUnavailable,
            100..=599 => Self::Other(code),
            _ => return None,
        })
    }

    /// Returns the canonical reason phrase for this status code.
    ///
    /// This is also the body written for bare status responses (the
    /// top-level `500` and the `501` for unsupported methods). Unnamed
    /// codes have an empty phrase.
    pub fn canonical_reason(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::NoContent => "No Content",
            Self::MovedPermanently => "Moved Permanently",
            Self::Found => "Found",
            Self::NotModified => "Not Modified",
            Self::TemporaryRedirect => "Temporary Redirect",
            Self::PermanentRedirect => "Permanent Redirect",
            Self::BadRequest => "Bad Request",
            Self::Unauthorized => "Unauthorized",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "Not Found",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::Gone => "Gone",
            Self::PayloadTooLarge => "Payload Too Large",
            Self::TooManyRequests => "Too Many Requests",
            Self::InternalServerError => "Internal Server Error",
            Self::NotImplemented => "Not Implemented",
            Self::ServiceUnavailable => "Service Unavailable",
            Self::Other(_) => "",
        }
    }

    /// Returns `true` for 2xx codes.
    pub fn is_success(self) -> bool {
        (200..300).contains(&self.as_u16())
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.canonical_reason() {
            "" => write!(f, "{}", self.as_u16()),
            reason => write!(f, "{} {reason}", self.as_u16()),
        }
    }
}

impl From<StatusCode> for u16 {
    fn from(code: StatusCode) -> u16 {
        code.as_u16()
    }
}

/// An HTTP request method.
///
/// The route table only binds `GET` and `HEAD`; everything else is carried
/// through so the server can answer `501 Not Implemented`.
///
/// # Examples
///
/// ```
/// use ssrv::http::Method;
///
/// let method: Method = "HEAD".parse().unwrap();
/// assert_eq!(method, Method::Head);
/// assert!(method.is_read());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Patch,
    /// Any other method token.
    Other(String),
}

impl Method {
    /// Returns the method as a string slice.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
            Self::Other(s) => s.as_str(),
        }
    }

    /// Returns `true` for the two methods the route table serves: `GET` and `HEAD`.
    pub fn is_read(&self) -> bool {
        matches!(self, Self::Get | Self::Head)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "GET" => Self::Get,
            "HEAD" => Self::Head,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "OPTIONS" => Self::Options,
            "PATCH" => Self::Patch,
            other => Self::Other(other.to_owned()),
        })
    }
}

impl AsRef<str> for Method {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_u16() {
        for code in [200, 304, 401, 404, 410, 418, 429, 500, 501, 599] {
            assert_eq!(StatusCode::from_u16(code).map(u16::from), Some(code));
        }
        assert_eq!(StatusCode::from_u16(418), Some(StatusCode::Other(418)));
        assert_eq!(StatusCode::from_u16(99), None);
        assert_eq!(StatusCode::from_u16(600), None);
    }

    #[test]
    fn unnamed_status_has_no_reason() {
        let teapot = StatusCode::Other(418);
        assert_eq!(teapot.canonical_reason(), "");
        assert_eq!(teapot.to_string(), "418");
        assert_eq!(StatusCode::Gone.to_string(), "410 Gone");
    }

    #[test]
    fn status_display_includes_reason() {
        assert_eq!(StatusCode::NotImplemented.to_string(), "501 Not Implemented");
    }

    #[test]
    fn method_parse_keeps_unknown_tokens() {
        let m: Method = "PROPFIND".parse().unwrap();
        assert_eq!(m, Method::Other("PROPFIND".into()));
        assert!(!m.is_read());
        assert_eq!(m.as_str(), "PROPFIND");
    }
}
