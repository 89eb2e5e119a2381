//! Per-request response writer with a single terminal write.

use thiserror::Error;
use tracing::warn;

use super::{Headers, Response, StatusCode};

/// Returned when something tries to finish a response that was already sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("response was already sent")]
pub struct AlreadySent;

/// Mutable response state threaded through every stage of a request.
///
/// Status and headers can be adjusted freely until [`end`](Self::end) is
/// called. `end` is the one terminal write: after it, headers and status are
/// frozen and a second `end` fails with [`AlreadySent`]. Pipeline stages check
/// [`is_sent`](Self::is_sent) before writing.
///
/// # Examples
///
/// ```
/// use ssrv::http::{ResponseWriter, StatusCode};
///
/// let mut res = ResponseWriter::new();
/// res.set_status(StatusCode::NotFound);
/// res.end("gone").unwrap();
///
/// assert!(res.is_sent());
/// assert!(res.end("again").is_err());
/// assert_eq!(res.into_response().unwrap().status(), StatusCode::NotFound);
/// ```
#[derive(Debug)]
pub struct ResponseWriter {
    status: StatusCode,
    headers: Headers,
    body: Vec<u8>,
    sent: bool,
}

impl Default for ResponseWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseWriter {
    /// Creates an open writer with status `200` and no headers.
    pub fn new() -> Self {
        Self {
            status: StatusCode::Ok,
            headers: Headers::new(),
            body: Vec::new(),
            sent: false,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Sets the status code. Ignored once the response is sent.
    pub fn set_status(&mut self, status: StatusCode) {
        if self.sent {
            warn!(status = status.as_u16(), "status change after response was sent");
            return;
        }
        self.status = status;
    }

    /// Sets a header, replacing earlier values. Ignored once the response is sent.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if self.sent {
            warn!(header = %name, "header set after response was sent");
            return;
        }
        self.headers.set(name, value);
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The body written by [`end`](Self::end); empty until then.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Returns `true` once the terminal write happened.
    pub fn is_sent(&self) -> bool {
        self.sent
    }

    /// Finishes the response with `body`.
    ///
    /// # Errors
    ///
    /// Returns [`AlreadySent`] if the response was already finished; the
    /// first body is kept.
    pub fn end(&mut self, body: impl Into<Vec<u8>>) -> Result<(), AlreadySent> {
        if self.sent {
            return Err(AlreadySent);
        }
        self.body = body.into();
        self.sent = true;
        Ok(())
    }

    /// Finishes the response without a body.
    pub fn end_empty(&mut self) -> Result<(), AlreadySent> {
        self.end(Vec::new())
    }

    /// Converts a sent writer into a [`Response`]; `None` if nothing was sent.
    pub fn into_response(self) -> Option<Response> {
        if !self.sent {
            return None;
        }
        Some(Response::from_parts(self.status, self.headers, self.body))
    }
}
