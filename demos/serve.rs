//! Serves a project directory with a placeholder render engine.
//!
//! ```text
//! cargo run --example serve -- [DIR] [--dev] [--port N]
//! RUST_LOG=ssrv=debug cargo run --example serve -- ./my-app --dev
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use ssrv::config::{RenderOptions, ServerOptions};
use ssrv::engine::{BoxFuture, PageError, RenderEngine, RenderError};
use ssrv::http::{Query, Request, ResponseWriter};
use ssrv::server::{Server, ServerError};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Renders every page as a heading plus its query.
struct Placeholder;

impl RenderEngine for Placeholder {
    fn render_to_html<'a>(
        &'a self,
        _req: &'a Request,
        _res: &'a mut ResponseWriter,
        pathname: &'a str,
        query: &'a Query,
        opts: &'a RenderOptions,
    ) -> BoxFuture<'a, Result<String, RenderError>> {
        Box::pin(async move {
            if pathname == "/crash" {
                return Err(PageError::new("the /crash page always fails").into());
            }
            let query = serde_json::to_string(query).map_err(|e| PageError::new(e.to_string()))?;
            Ok(format!(
                "<!DOCTYPE html><html><body><h1>{}</h1><pre>{}</pre>\
                 <small>build {}</small></body></html>",
                escape(pathname),
                escape(&query),
                escape(&opts.build_id)
            ))
        })
    }

    fn render_error_to_html<'a>(
        &'a self,
        err: Option<&'a PageError>,
        _req: &'a Request,
        res: &'a mut ResponseWriter,
        _pathname: &'a str,
        _query: &'a Query,
        opts: &'a RenderOptions,
    ) -> BoxFuture<'a, Result<String, PageError>> {
        Box::pin(async move {
            let detail = match err {
                Some(err) if opts.dev => format!("<pre>{}</pre>", escape(&err.to_string())),
                _ => String::new(),
            };
            Ok(format!(
                "<!DOCTYPE html><html><body><h1>{}</h1>{detail}</body></html>",
                res.status()
            ))
        })
    }
}

/// Minimal HTML text escaping for values reflected from the request.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

struct Args {
    dir: String,
    dev: bool,
    port: u16,
}

fn parse_args() -> Args {
    let mut args = Args {
        dir: ".".to_owned(),
        dev: false,
        port: 3000,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--dev" => args.dev = true,
            "--port" => {
                if let Some(port) = iter.next().and_then(|p| p.parse().ok()) {
                    args.port = port;
                }
            }
            _ => args.dir = arg,
        }
    }
    args
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ssrv=info")),
        )
        .init();

    let args = parse_args();
    let options = ServerOptions::new(&args.dir).dev(args.dev);

    let server = match Server::builder(options, Arc::new(Placeholder)).build() {
        Ok(server) => Arc::new(server),
        Err(ServerError::NoBuild(err)) => {
            error!(dir = %args.dir, error = %err, "no production build found, run a build first or pass --dev");
            return ExitCode::FAILURE;
        }
        Err(err) => {
            error!(error = %err, "failed to configure server");
            return ExitCode::FAILURE;
        }
    };

    let addr = match server.start(args.port, "127.0.0.1").await {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, "failed to start");
            return ExitCode::FAILURE;
        }
    };
    info!("ready on http://{addr}");

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "could not listen for ctrl-c");
    }
    info!("shutting down");

    match server.close().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "shutdown failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reflected_markup_is_escaped() {
        assert_eq!(
            escape("/<script>alert(\"x\")</script>&"),
            "/&lt;script&gt;alert(&quot;x&quot;)&lt;/script&gt;&amp;"
        );
        assert_eq!(escape("/blog/post"), "/blog/post");
    }

    #[tokio::test]
    async fn placeholder_page_does_not_reflect_script_tags() {
        let req = Request::new(ssrv::http::Method::Get, "/x");
        let mut res = ResponseWriter::new();
        let opts = RenderOptions::for_mode(true, "-", std::path::Path::new("."));
        let html = Placeholder
            .render_to_html(&req, &mut res, "/<script>x</script>", &Query::new(), &opts)
            .await
            .unwrap();
        assert!(!html.contains("<script>"));
        assert!(html.contains("/&lt;script&gt;x&lt;/script&gt;"));
    }
}
