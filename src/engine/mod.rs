//! Render engine port.
//!
//! The engine turns a page module plus request data into markup. The server
//! never looks inside it; it only needs the two render calls and a way to
//! tell "page does not exist" apart from every other failure.

use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use thiserror::Error;

use crate::config::RenderOptions;
use crate::http::{Query, Request, ResponseWriter};

/// A boxed, sendable future borrowing from its receiver.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An application-level error raised while rendering a page.
///
/// Carries what the error page and the client script-error payload need:
/// a message and, when known, a stack trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{message}")]
pub struct PageError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl PageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    #[must_use]
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

/// Failure from [`RenderEngine::render_to_html`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// The page module does not exist.
    #[error("page `{page}` not found")]
    NotFound { page: String },

    #[error(transparent)]
    Failed(#[from] PageError),
}

/// Renders pages and error pages to HTML.
///
/// Implementations may set the status and headers on `res` (for example
/// cookies or a `410`). They may also finish `res` themselves, as a redirect
/// does; the pipeline then skips its own write.
pub trait RenderEngine: Send + Sync {
    fn render_to_html<'a>(
        &'a self,
        req: &'a Request,
        res: &'a mut ResponseWriter,
        pathname: &'a str,
        query: &'a Query,
        opts: &'a RenderOptions,
    ) -> BoxFuture<'a, Result<String, RenderError>>;

    /// Renders the error page. `err` is `None` for a plain 404.
    fn render_error_to_html<'a>(
        &'a self,
        err: Option<&'a PageError>,
        req: &'a Request,
        res: &'a mut ResponseWriter,
        pathname: &'a str,
        query: &'a Query,
        opts: &'a RenderOptions,
    ) -> BoxFuture<'a, Result<String, PageError>>;
}

/// Rewrites an error's stack so it points at original sources.
///
/// Best effort: the pipeline logs a failed translation and renders the
/// untranslated error.
pub trait SourceMapper: Send + Sync {
    fn apply<'a>(&'a self, err: &'a mut PageError) -> BoxFuture<'a, Result<(), PageError>>;
}

/// A [`SourceMapper`] that leaves errors untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSourceMaps;

impl SourceMapper for NoSourceMaps {
    fn apply<'a>(&'a self, _err: &'a mut PageError) -> BoxFuture<'a, Result<(), PageError>> {
        Box::pin(async { Ok(()) })
    }
}
