//! The server: socket lifecycle, request dispatch and the top-level catch-all.
//!
//! Accepts TCP connections and runs each one in its own task. HTTP/1.1
//! keep-alive is supported; each request on a connection is handled to
//! completion before the next one is read.

pub mod routes;

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Instant;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub use routes::{RouteAction, is_internal_url};

use crate::assets::{FsStaticFiles, StaticError, StaticFiles};
use crate::build::{BuildError, BuildIdentity, Mode, available_chunks};
use crate::config::{AssetPrefix, RenderOptions, RuntimeConfig, ServerOptions};
use crate::dev::{HotReloadError, HotReloader};
use crate::engine::{BoxFuture, NoSourceMaps, PageError, RenderEngine, SourceMapper};
use crate::http::{
    AlreadySent, Method, ParsedUrl, Query, Request, Response, ResponseWriter, StatusCode,
    request::RequestError,
};
use crate::render::{PipelineError, RenderPipeline};
use crate::router::{PatternError, Router};
use crate::security::StaticAssetGate;

/// Errors constructing, starting or stopping the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Production mode without a usable build.
    #[error(transparent)]
    NoBuild(#[from] BuildError),

    #[error("invalid route: {0}")]
    Route(#[from] PatternError),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server is already listening on {0}")]
    AlreadyListening(SocketAddr),

    #[error(transparent)]
    HotReload(#[from] HotReloadError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A failure while handling one request. Caught by
/// [`Server::handle_request`] and turned into a `500`.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Static(#[from] StaticError),

    #[error(transparent)]
    HotReload(#[from] HotReloadError),

    #[error(transparent)]
    Route(#[from] PatternError),

    #[error(transparent)]
    AlreadySent(#[from] AlreadySent),
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// Collects the server's collaborators.
///
/// Only the render engine is required. Static transmission defaults to
/// [`FsStaticFiles`] and source mapping to [`NoSourceMaps`]. A hot reloader
/// is used in development only.
pub struct ServerBuilder {
    options: ServerOptions,
    engine: Arc<dyn RenderEngine>,
    hot_reloader: Option<Arc<dyn HotReloader>>,
    static_files: Arc<dyn StaticFiles>,
    source_maps: Arc<dyn SourceMapper>,
}

impl ServerBuilder {
    #[must_use]
    pub fn hot_reloader(mut self, hot_reloader: Arc<dyn HotReloader>) -> Self {
        self.hot_reloader = Some(hot_reloader);
        self
    }

    #[must_use]
    pub fn static_files(mut self, static_files: Arc<dyn StaticFiles>) -> Self {
        self.static_files = static_files;
        self
    }

    #[must_use]
    pub fn source_maps(mut self, source_maps: Arc<dyn SourceMapper>) -> Self {
        self.source_maps = source_maps;
        self
    }

    /// Loads the build identity and assembles the server.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NoBuild`] in production when `<dist>/BUILD_ID`
    /// is missing or unreadable.
    pub fn build(self) -> Result<Server, ServerError> {
        let Self {
            options,
            engine,
            hot_reloader,
            static_files,
            source_maps,
        } = self;

        let mode = Mode::from_dev(options.dev);
        let dist = options.dist_path();
        let build = BuildIdentity::load(mode, &dist)?;

        let chunks = match mode {
            Mode::Development => BTreeMap::new(),
            Mode::Production => available_chunks(&dist),
        };
        let runtime_config = RuntimeConfig {
            server: options.server_runtime_config.clone(),
            public: options.public_runtime_config.clone(),
        };
        let asset_prefix = AssetPrefix::new(&options.asset_prefix);
        let render_opts = Arc::new(RenderOptions::new(
            &options,
            build.build_id(),
            chunks,
            asset_prefix.clone(),
        ));

        let hot_reloader = match hot_reloader {
            Some(hot) if mode.is_dev() => Some(hot),
            Some(_) => {
                debug!("ignoring hot reloader in production");
                None
            }
            None => None,
        };
        let powered_by = (!mode.is_dev() && options.powered_by_header)
            .then(|| format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")));

        let pipeline = RenderPipeline::new(render_opts, engine)
            .with_hot_reloader(hot_reloader.clone())
            .with_source_maps(source_maps)
            .quiet(options.quiet)
            .powered_by(powered_by);

        let client_dir = options.client_dir.as_ref().map(|dir| options.dir.join(dir));
        let mut roots = vec![dist, options.static_path()];
        roots.extend(client_dir.clone());
        let gate = StaticAssetGate::new(roots);

        info!(
            mode = ?mode,
            build_id = build.build_id(),
            dir = %options.dir.display(),
            "server configured"
        );

        Ok(Server {
            options,
            build,
            runtime_config,
            asset_prefix,
            pipeline,
            hot_reloader,
            static_files,
            gate,
            client_dir,
            router: OnceLock::new(),
            listening: Mutex::new(None),
        })
    }
}

struct Listening {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// The page server.
///
/// Share it as an `Arc<Server>`: [`start`](Self::start) hands a clone to the
/// accept loop. Custom servers can skip `start` and call
/// [`handle_request`](Self::handle_request) or [`render`](Self::render)
/// directly.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use ssrv::config::ServerOptions;
/// use ssrv::server::Server;
/// # use ssrv::engine::RenderEngine;
///
/// # async fn run(engine: Arc<dyn RenderEngine>) -> Result<(), Box<dyn std::error::Error>> {
/// let server = Arc::new(Server::builder(ServerOptions::new("."), engine).build()?);
/// let addr = server.start(3000, "127.0.0.1").await?;
/// println!("ready on http://{addr}");
/// server.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    options: ServerOptions,
    build: BuildIdentity,
    runtime_config: RuntimeConfig,
    asset_prefix: AssetPrefix,
    pipeline: RenderPipeline,
    hot_reloader: Option<Arc<dyn HotReloader>>,
    static_files: Arc<dyn StaticFiles>,
    gate: StaticAssetGate,
    client_dir: Option<PathBuf>,
    router: OnceLock<Router<RouteAction>>,
    listening: Mutex<Option<Listening>>,
}

impl Server {
    pub fn builder(options: ServerOptions, engine: Arc<dyn RenderEngine>) -> ServerBuilder {
        ServerBuilder {
            options,
            engine,
            hot_reloader: None,
            static_files: Arc::new(FsStaticFiles),
            source_maps: Arc::new(NoSourceMaps),
        }
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    pub fn build(&self) -> &BuildIdentity {
        &self.build
    }

    pub fn runtime_config(&self) -> &RuntimeConfig {
        &self.runtime_config
    }

    pub fn render_options(&self) -> &RenderOptions {
        self.pipeline.options()
    }

    pub fn pipeline(&self) -> &RenderPipeline {
        &self.pipeline
    }

    /// The hot reloader, present in development only.
    pub fn hot_reloader(&self) -> Option<&Arc<dyn HotReloader>> {
        self.hot_reloader.as_ref()
    }

    pub fn gate(&self) -> &StaticAssetGate {
        &self.gate
    }

    pub(crate) fn client_dir(&self) -> Option<&Path> {
        self.client_dir.as_deref()
    }

    /// Publishes a new asset prefix to every renderer; one trailing `/` is dropped.
    pub fn set_asset_prefix(&self, prefix: &str) {
        self.asset_prefix.set(prefix);
        debug!(asset_prefix = %self.asset_prefix.get(), "asset prefix updated");
    }

    /// Address of the listening socket, if started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listening
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|l| l.local_addr)
    }

    fn routes(&self) -> Result<&Router<RouteAction>, PatternError> {
        if let Some(router) = self.router.get() {
            return Ok(router);
        }
        let router = routes::build(&self.options)?;
        Ok(self.router.get_or_init(|| router))
    }

    /// Builds the route table and, in development, starts the hot reloader.
    ///
    /// # Errors
    ///
    /// Fails on an invalid export path or a hot reloader that cannot start.
    pub async fn prepare(&self) -> Result<(), ServerError> {
        self.routes()?;
        if let Some(hot) = &self.hot_reloader {
            hot.start().await?;
        }
        Ok(())
    }

    /// Prepares, binds `host:port` and starts accepting connections.
    ///
    /// Returns the bound address (useful with port `0`).
    ///
    /// # Errors
    ///
    /// [`ServerError::Bind`] if the address cannot be bound (e.g. port already
    /// in use); the hot reloader is stopped again in that case.
    pub async fn start(self: &Arc<Self>, port: u16, host: &str) -> Result<SocketAddr, ServerError> {
        if let Some(addr) = self.local_addr() {
            return Err(ServerError::AlreadyListening(addr));
        }
        self.prepare().await?;

        let addr = format!("{host}:{port}");
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(source) => {
                if let Some(hot) = &self.hot_reloader {
                    if let Err(err) = hot.stop().await {
                        warn!(error = %err, "failed to stop hot reloader after bind failure");
                    }
                }
                return Err(ServerError::Bind { addr, source });
            }
        };
        let local_addr = listener.local_addr()?;

        let (shutdown, signal) = oneshot::channel();
        let task = tokio::spawn(accept_loop(Arc::clone(self), listener, signal));
        *self.listening.lock().unwrap_or_else(PoisonError::into_inner) = Some(Listening {
            local_addr,
            shutdown,
            task,
        });

        info!(address = %local_addr, "listening");
        Ok(local_addr)
    }

    /// Stops the hot reloader, then closes the listening socket.
    ///
    /// Safe to call repeatedly and before [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::HotReload`] if the hot reloader fails to stop.
    pub async fn close(&self) -> Result<(), ServerError> {
        if let Some(hot) = &self.hot_reloader {
            hot.stop().await?;
        }

        let listening = self
            .listening
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listening) = listening {
            // The accept loop may already be gone; the listener drops with it.
            let _ = listening.shutdown.send(());
            if let Err(err) = listening.task.await {
                warn!(error = %err, "accept loop ended abnormally");
            }
            info!(address = %listening.local_addr, "closed");
        }
        Ok(())
    }

    /// Handles one request end to end.
    ///
    /// Resets the status to `200`, dispatches, and turns any failure into a
    /// bare `500 Internal Server Error` if nothing was sent yet. `url` may
    /// carry an already parsed URL; otherwise the request target is parsed.
    pub fn handle_request<'a>(
        &'a self,
        req: &'a Request,
        res: &'a mut ResponseWriter,
        url: Option<ParsedUrl>,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let url = url.unwrap_or_else(|| ParsedUrl::parse(req.url()));
            res.set_status(StatusCode::Ok);

            if let Err(err) = self.run(req, res, &url).await {
                if !self.options.quiet {
                    error!(method = %req.method(), url = req.url(), error = %err, "request failed");
                }
                if !res.is_sent() {
                    let status = StatusCode::InternalServerError;
                    res.set_status(status);
                    if let Err(err) = res.end(status.canonical_reason()) {
                        debug!(error = %err, "error response raced a send");
                    }
                }
            }
        })
    }

    async fn run(
        &self,
        req: &Request,
        res: &mut ResponseWriter,
        url: &ParsedUrl,
    ) -> Result<(), ServeError> {
        if let Some(hot) = &self.hot_reloader {
            hot.run(req, res).await?;
            if res.is_sent() {
                return Ok(());
            }
        }

        if let Some(hit) = self.routes()?.dispatch(req.method(), &url.pathname) {
            debug!(pattern = hit.pattern, path = %url.pathname, "route matched");
            return hit.handler.handle(self, req, res, &hit.params, url).await;
        }

        if req.method().is_read() {
            self.render_404(req, res, url).await
        } else {
            let status = StatusCode::NotImplemented;
            res.set_status(status);
            res.end(status.canonical_reason())?;
            Ok(())
        }
    }

    /// Renders `pathname` with `query`. Framework URLs (`/_next/…`,
    /// `/static/…`) are dispatched as requests instead.
    pub fn render<'a>(
        &'a self,
        req: &'a Request,
        res: &'a mut ResponseWriter,
        pathname: &'a str,
        query: &'a Query,
        url: Option<&'a ParsedUrl>,
    ) -> BoxFuture<'a, Result<(), ServeError>> {
        Box::pin(async move {
            if is_internal_url(req.url()) {
                self.handle_request(req, res, url.cloned()).await;
                return Ok(());
            }
            self.pipeline.render_page(req, res, pathname, query).await?;
            Ok(())
        })
    }

    /// Renders a page to HTML without sending it.
    pub async fn render_to_html(
        &self,
        req: &Request,
        res: &mut ResponseWriter,
        pathname: &str,
        query: &Query,
    ) -> Result<String, ServeError> {
        self.pipeline
            .render_to_html(req, res, pathname, query)
            .await
            .map_err(ServeError::from)
    }

    /// Renders the error page to HTML without sending it.
    pub async fn render_error_to_html(
        &self,
        err: Option<&PageError>,
        req: &Request,
        res: &mut ResponseWriter,
        pathname: &str,
        query: &Query,
    ) -> Result<String, ServeError> {
        self.pipeline
            .render_error_to_html(err, req, res, pathname, query)
            .await
            .map_err(ServeError::from)
    }

    /// Renders and sends the error page.
    pub async fn render_error(
        &self,
        err: Option<&PageError>,
        req: &Request,
        res: &mut ResponseWriter,
        pathname: &str,
        query: &Query,
    ) -> Result<(), ServeError> {
        self.pipeline
            .render_error(err, req, res, pathname, query)
            .await
            .map_err(ServeError::from)
    }

    /// Sends the 404 page for `url`.
    pub async fn render_404(
        &self,
        req: &Request,
        res: &mut ResponseWriter,
        url: &ParsedUrl,
    ) -> Result<(), ServeError> {
        self.pipeline
            .render_404_url(req, res, url)
            .await
            .map_err(ServeError::from)
    }

    /// Sends the file at `path` if the asset gate allows it; otherwise, or
    /// if it does not exist, sends the 404 page.
    pub async fn serve_static(
        &self,
        req: &Request,
        res: &mut ResponseWriter,
        path: &Path,
        url: &ParsedUrl,
    ) -> Result<(), ServeError> {
        if !self.gate.is_serveable(path) {
            debug!(path = %path.display(), "path outside static roots");
            return self.render_404(req, res, url).await;
        }

        match self.static_files.serve(req, res, path).await {
            Ok(()) => Ok(()),
            Err(StaticError::NotFound { .. }) => self.render_404(req, res, url).await,
            Err(err) => Err(err.into()),
        }
    }
}

async fn accept_loop(server: Arc<Server>, listener: TcpListener, mut shutdown: oneshot::Receiver<()>) {
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                debug!("accept loop shutting down");
                break;
            }
            accepted = listener.accept() => {
                let (stream, peer_addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                        continue;
                    }
                };

                debug!(peer = %peer_addr, "connection accepted");
                let server = Arc::clone(&server);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(server, stream, peer_addr).await {
                        warn!(peer = %peer_addr, error = %e, "connection closed with error");
                    }
                });
            }
        }
    }
}

/// Handles a single TCP connection over its lifetime.
///
/// HTTP/1.1 connections are persistent by default: we loop, answering one
/// request per iteration in arrival order, until the peer closes the
/// connection or signals `Connection: close`.
async fn handle_connection(
    server: Arc<Server>,
    mut stream: TcpStream,
    peer_addr: SocketAddr,
) -> Result<(), std::io::Error> {
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);
    // Pipelined requests may already sit in `buf`; only read when it holds
    // no complete request.
    let mut needs_read = true;

    loop {
        if needs_read {
            let bytes_read = stream.read_buf(&mut buf).await?;
            if bytes_read == 0 {
                debug!(peer = %peer_addr, "connection closed by peer");
                break;
            }
        }
        needs_read = true;

        if buf.len() > MAX_REQUEST_SIZE {
            warn!(peer = %peer_addr, "request too large, sending 413");
            let response = Response::new(StatusCode::PayloadTooLarge)
                .body("Request entity too large")
                .keep_alive(false);
            stream.write_all(&response.into_bytes()).await?;
            break;
        }

        let (request, body_offset) = match Request::parse(&buf) {
            Ok(pair) => pair,
            Err(RequestError::Incomplete) => continue,
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                let response = Response::new(StatusCode::BadRequest)
                    .body(format!("Bad Request: {e}"))
                    .keep_alive(false);
                stream.write_all(&response.into_bytes()).await?;
                break;
            }
        };

        let content_length = request.content_length().unwrap_or(0);
        let total_needed = body_offset + content_length;
        if buf.len() < total_needed {
            continue;
        }

        let keep_alive = request.is_keep_alive();
        let started = Instant::now();

        let mut writer = ResponseWriter::new();
        server.handle_request(&request, &mut writer, None).await;
        let response = match writer.into_response() {
            Some(response) => response,
            None => {
                warn!(
                    peer = %peer_addr,
                    method = %request.method(),
                    path = %request.path(),
                    "request finished without a response, sending 500"
                );
                let status = StatusCode::InternalServerError;
                Response::new(status).body(status.canonical_reason())
            }
        };
        let response = match request.method() {
            Method::Head => response.into_head(),
            _ => response,
        };
        let status = response.status();

        stream
            .write_all(&response.keep_alive(keep_alive).into_bytes())
            .await?;
        stream.flush().await?;

        info!(
            peer = %peer_addr,
            status = status.as_u16(),
            "{} {} - {} ({:?})",
            request.method(),
            request.path(),
            status.as_u16(),
            started.elapsed()
        );

        let _ = buf.split_to(total_needed);
        needs_read = buf.is_empty();

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close, shutting down");
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Blank;

    impl RenderEngine for Blank {
        fn render_to_html<'a>(
            &'a self,
            _req: &'a Request,
            _res: &'a mut ResponseWriter,
            pathname: &'a str,
            _query: &'a Query,
            _opts: &'a RenderOptions,
        ) -> BoxFuture<'a, Result<String, crate::engine::RenderError>> {
            Box::pin(async move { Ok(format!("<h1>{pathname}</h1>")) })
        }

        fn render_error_to_html<'a>(
            &'a self,
            _err: Option<&'a PageError>,
            _req: &'a Request,
            res: &'a mut ResponseWriter,
            _pathname: &'a str,
            _query: &'a Query,
            _opts: &'a RenderOptions,
        ) -> BoxFuture<'a, Result<String, PageError>> {
            Box::pin(async move { Ok(format!("<h1>{}</h1>", res.status().as_u16())) })
        }
    }

    fn dev_server() -> Server {
        Server::builder(ServerOptions::new("/nonexistent-app").dev(true), Arc::new(Blank))
            .build()
            .unwrap()
    }

    #[test]
    fn production_without_build_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let result = Server::builder(ServerOptions::new(dir.path()), Arc::new(Blank)).build();
        assert!(matches!(result, Err(ServerError::NoBuild(BuildError::Missing { .. }))));
    }

    #[test]
    fn production_build_loads_id_chunks_and_powered_by() {
        let dir = tempfile::tempdir().unwrap();
        let dist = dir.path().join(".next");
        std::fs::create_dir_all(dist.join("chunks")).unwrap();
        std::fs::write(dist.join("BUILD_ID"), "b42\n").unwrap();
        std::fs::write(dist.join("chunks/comments-1a2b.js"), "").unwrap();

        let options = ServerOptions::new(dir.path())
            .public_runtime_config(serde_json::json!({"api": "/api"}))
            .server_runtime_config(serde_json::json!({"secret": "s"}));
        let server = Server::builder(options, Arc::new(Blank)).build().unwrap();

        assert_eq!(server.build().build_id(), "b42");
        let opts = server.render_options();
        assert_eq!(opts.build_id, "b42");
        assert_eq!(opts.available_chunks.get("comments").map(String::as_str), Some("comments-1a2b.js"));
        assert_eq!(opts.runtime_config, Some(serde_json::json!({"api": "/api"})));
        assert_eq!(server.runtime_config().server, serde_json::json!({"secret": "s"}));
    }

    #[test]
    fn asset_prefix_reaches_render_options() {
        let server = dev_server();
        server.set_asset_prefix("https://cdn.example.com/");
        assert_eq!(server.render_options().asset_prefix(), "https://cdn.example.com");
    }

    #[test]
    fn gate_covers_dist_and_static_only() {
        let server = dev_server();
        assert!(server.gate().is_serveable(Path::new("/nonexistent-app/.next/static/a.js")));
        assert!(server.gate().is_serveable(Path::new("/nonexistent-app/static/a.png")));
        assert!(!server.gate().is_serveable(Path::new("/nonexistent-app/package.json")));
    }

    #[tokio::test]
    async fn dev_pages_render_without_powered_by() {
        let server = dev_server();
        let req = Request::new(Method::Get, "/about?x=1");
        let mut res = ResponseWriter::new();
        server.handle_request(&req, &mut res, None).await;

        assert_eq!(res.status(), StatusCode::Ok);
        assert!(res.header("x-powered-by").is_none());
        assert_eq!(res.body(), b"<h1>/about</h1>");
    }

    #[tokio::test]
    async fn unroutable_method_is_not_implemented() {
        let server = dev_server();
        let req = Request::new(Method::Delete, "/about");
        let mut res = ResponseWriter::new();
        server.handle_request(&req, &mut res, None).await;

        assert_eq!(res.status(), StatusCode::NotImplemented);
        assert_eq!(res.body(), b"Not Implemented");
    }

    #[tokio::test]
    async fn close_before_start_is_fine() {
        let server = dev_server();
        server.close().await.unwrap();
        server.close().await.unwrap();
        assert!(server.local_addr().is_none());
    }
}
