//! # ssrv
//!
//! The request-serving core of a server-rendering web framework, on an async
//! HTTP/1.1 server written from scratch.
//!
//! A request is resolved to a static asset, a build artifact or a rendered
//! page. Routing is an ordered first-match table; files are only sent from
//! allow-listed roots; versioned page bundles are checked against the build
//! id; page rendering goes through a pipeline that falls back to error pages
//! and writes each response exactly once.
//!
//! The render engine and the development bundler are collaborators behind
//! the [`engine::RenderEngine`] and [`dev::HotReloader`] traits.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use ssrv::config::{RenderOptions, ServerOptions};
//! use ssrv::engine::{BoxFuture, PageError, RenderEngine, RenderError};
//! use ssrv::http::{Query, Request, ResponseWriter};
//! use ssrv::server::Server;
//!
//! struct Hello;
//!
//! impl RenderEngine for Hello {
//!     fn render_to_html<'a>(
//!         &'a self,
//!         _req: &'a Request,
//!         _res: &'a mut ResponseWriter,
//!         pathname: &'a str,
//!         _query: &'a Query,
//!         _opts: &'a RenderOptions,
//!     ) -> BoxFuture<'a, Result<String, RenderError>> {
//!         Box::pin(async move { Ok(format!("<h1>{pathname}</h1>")) })
//!     }
//!
//!     fn render_error_to_html<'a>(
//!         &'a self,
//!         _err: Option<&'a PageError>,
//!         _req: &'a Request,
//!         res: &'a mut ResponseWriter,
//!         _pathname: &'a str,
//!         _query: &'a Query,
//!         _opts: &'a RenderOptions,
//!     ) -> BoxFuture<'a, Result<String, PageError>> {
//!         Box::pin(async move { Ok(format!("<h1>{}</h1>", res.status())) })
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = ServerOptions::new(".").dev(true);
//!     let server = Arc::new(Server::builder(options, Arc::new(Hello)).build()?);
//!     let addr = server.start(3000, "127.0.0.1").await?;
//!     println!("Listening on http://{addr}");
//!     tokio::signal::ctrl_c().await?;
//!     server.close().await?;
//!     Ok(())
//! }
//! ```

pub mod assets;
pub mod build;
pub mod cache;
pub mod config;
pub mod context;
pub mod dev;
pub mod engine;
pub mod http;
pub mod render;
pub mod router;
pub mod security;
pub mod server;

pub use build::{BuildIdentity, Mode};
pub use config::{RenderOptions, ServerOptions};
pub use http::{Headers, Method, ParsedUrl, Query, Request, Response, ResponseWriter, StatusCode};
pub use router::{PathMatcher, Router};
pub use security::StaticAssetGate;
pub use server::{ServeError, Server, ServerBuilder, ServerError};
