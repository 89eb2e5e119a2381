//! The page render pipeline.
//!
//! A page request moves through these states, and exactly one of them
//! performs the terminal write:
//!
//! ```text
//! START ─▶ dev compile errors? ──yes──▶ error render (500, first error)
//!             │ no
//!             ▼
//!          render page ──ok──▶ send
//!             │ NotFound ─────▶ error render (404, no error)
//!             │ Failed ───────▶ source maps ─▶ error render (500)
//!             ▼
//!          error render fails: dev retries once (500), production propagates
//! ```
//!
//! Every step checks [`ResponseWriter::is_sent`] before writing, so a
//! response the engine already finished is never written again.

pub mod html;
pub mod script;

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, warn};

pub use html::{etag, send_html};
pub use script::{ScriptError, render_script_error};

use crate::build::NO_STORE;
use crate::config::RenderOptions;
use crate::dev::HotReloader;
use crate::engine::{NoSourceMaps, PageError, RenderEngine, RenderError, SourceMapper};
use crate::http::{AlreadySent, ParsedUrl, Query, Request, ResponseWriter, StatusCode};

/// Framework pages that exist as modules but are never rendered by
/// navigating to them.
pub const BLOCKED_PAGES: [&str; 3] = ["/_document", "/_app", "/_error"];

/// Returns `true` if `pathname` names a blocked page (exact match).
pub fn is_blocked_page(pathname: &str) -> bool {
    BLOCKED_PAGES.contains(&pathname)
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The error page itself could not be rendered.
    #[error("failed to render error page: {0}")]
    ErrorPage(#[source] PageError),

    #[error(transparent)]
    AlreadySent(#[from] AlreadySent),
}

/// Renders pages and error pages through a [`RenderEngine`].
pub struct RenderPipeline {
    opts: Arc<RenderOptions>,
    engine: Arc<dyn RenderEngine>,
    hot_reloader: Option<Arc<dyn HotReloader>>,
    source_maps: Arc<dyn SourceMapper>,
    quiet: bool,
    powered_by: Option<String>,
}

impl RenderPipeline {
    pub fn new(opts: Arc<RenderOptions>, engine: Arc<dyn RenderEngine>) -> Self {
        Self {
            opts,
            engine,
            hot_reloader: None,
            source_maps: Arc::new(NoSourceMaps),
            quiet: false,
            powered_by: None,
        }
    }

    /// Compilation errors are only consulted in development.
    #[must_use]
    pub fn with_hot_reloader(mut self, hot_reloader: Option<Arc<dyn HotReloader>>) -> Self {
        self.hot_reloader = hot_reloader;
        self
    }

    #[must_use]
    pub fn with_source_maps(mut self, source_maps: Arc<dyn SourceMapper>) -> Self {
        self.source_maps = source_maps;
        self
    }

    #[must_use]
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// `X-Powered-By` value for rendered pages; `None` sends no header.
    #[must_use]
    pub fn powered_by(mut self, value: Option<String>) -> Self {
        self.powered_by = value;
        self
    }

    pub fn options(&self) -> &RenderOptions {
        &self.opts
    }

    /// The first outstanding compilation error, in development only.
    pub async fn compilation_error(&self) -> Option<PageError> {
        if !self.opts.dev {
            return None;
        }
        let hot_reloader = self.hot_reloader.as_ref()?;
        hot_reloader.compilation_errors().await.first().cloned()
    }

    /// Renders `pathname` and sends it. Blocked pages get the 404 page.
    pub async fn render_page(
        &self,
        req: &Request,
        res: &mut ResponseWriter,
        pathname: &str,
        query: &Query,
    ) -> Result<(), PipelineError> {
        if is_blocked_page(pathname) {
            return self.render_404(req, res, pathname, query).await;
        }

        let html = self.render_to_html(req, res, pathname, query).await?;
        if res.is_sent() {
            return Ok(());
        }
        if let Some(value) = &self.powered_by {
            res.set_header("X-Powered-By", value.as_str());
        }
        send_html(req, res, &html, &self.opts)?;
        Ok(())
    }

    /// Renders a page to HTML, falling back to the error page.
    ///
    /// Sets the status to `404` or `500` when it falls back.
    pub async fn render_to_html(
        &self,
        req: &Request,
        res: &mut ResponseWriter,
        pathname: &str,
        query: &Query,
    ) -> Result<String, PipelineError> {
        if let Some(err) = self.compilation_error().await {
            res.set_status(StatusCode::InternalServerError);
            return self.render_error_to_html(Some(&err), req, res, pathname, query).await;
        }

        match self
            .engine
            .render_to_html(req, res, pathname, query, &self.opts)
            .await
        {
            Ok(html) => Ok(html),
            Err(RenderError::NotFound { .. }) => {
                res.set_status(StatusCode::NotFound);
                self.render_error_to_html(None, req, res, pathname, query).await
            }
            Err(RenderError::Failed(mut err)) => {
                if let Err(map_err) = self.source_maps.apply(&mut err).await {
                    warn!(error = %map_err, "could not apply source maps");
                }
                if !self.quiet {
                    error!(pathname, error = %err, stack = err.stack.as_deref(), "render failed");
                }
                res.set_status(StatusCode::InternalServerError);
                self.render_error_to_html(Some(&err), req, res, pathname, query).await
            }
        }
    }

    /// Renders the error page for `err` (`None` is a plain not-found).
    ///
    /// In development an outstanding compilation error wins over `err`, and
    /// a failing error page is retried once with the new failure. In
    /// production a failing error page is returned as
    /// [`PipelineError::ErrorPage`].
    pub async fn render_error_to_html(
        &self,
        err: Option<&PageError>,
        req: &Request,
        res: &mut ResponseWriter,
        pathname: &str,
        query: &Query,
    ) -> Result<String, PipelineError> {
        if let Some(compile_err) = self.compilation_error().await {
            res.set_status(StatusCode::InternalServerError);
            return self
                .engine
                .render_error_to_html(Some(&compile_err), req, res, pathname, query, &self.opts)
                .await
                .map_err(PipelineError::ErrorPage);
        }

        let first = self
            .engine
            .render_error_to_html(err, req, res, pathname, query, &self.opts)
            .await;

        match first {
            Ok(html) => Ok(html),
            Err(err2) if self.opts.dev => {
                if !self.quiet {
                    error!(pathname, error = %err2, "error page failed to render; retrying");
                }
                res.set_status(StatusCode::InternalServerError);
                self.engine
                    .render_error_to_html(Some(&err2), req, res, pathname, query, &self.opts)
                    .await
                    .map_err(PipelineError::ErrorPage)
            }
            Err(err2) => Err(PipelineError::ErrorPage(err2)),
        }
    }

    /// Renders and sends the error page with `Cache-Control: no-store`.
    pub async fn render_error(
        &self,
        err: Option<&PageError>,
        req: &Request,
        res: &mut ResponseWriter,
        pathname: &str,
        query: &Query,
    ) -> Result<(), PipelineError> {
        res.set_header("Cache-Control", NO_STORE);
        let html = self
            .render_error_to_html(err, req, res, pathname, query)
            .await?;
        send_html(req, res, &html, &self.opts)?;
        Ok(())
    }

    /// Sends the 404 page for `pathname`.
    pub async fn render_404(
        &self,
        req: &Request,
        res: &mut ResponseWriter,
        pathname: &str,
        query: &Query,
    ) -> Result<(), PipelineError> {
        res.set_status(StatusCode::NotFound);
        self.render_error(None, req, res, pathname, query).await
    }

    /// [`render_404`](Self::render_404) for an already parsed URL.
    pub async fn render_404_url(
        &self,
        req: &Request,
        res: &mut ResponseWriter,
        url: &ParsedUrl,
    ) -> Result<(), PipelineError> {
        self.render_404(req, res, &url.pathname, &url.query).await
    }
}
