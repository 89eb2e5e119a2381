//! The built-in route surface.
//!
//! Registration order is the match priority:
//!
//! | Pattern                               | Serves                                   |
//! |---------------------------------------|------------------------------------------|
//! | `/_next-prefetcher.js`                | prefetcher bundle from the client dir    |
//! | `/_next/webpack/chunks/:name`         | dynamic-import chunks                    |
//! | `/_next/webpack/:id`                  | dynamic-import chunks (dev HMR)          |
//! | `/_next/:buildId/page/:path*.js.map`  | page bundle source maps                  |
//! | `/_next/:buildId/page/:path*.js`      | page bundles                             |
//! | `/_next/static/:path*`                | build static output                      |
//! | `/_next/:path*`                       | client dir                               |
//! | `/static/:path*`                      | the project's `static/` directory        |
//! | export path map (dev only)            | mapped pages                             |
//! | `/:path*`                             | page render                              |
//!
//! The last two exist only with filesystem routing enabled. Every pattern is
//! registered for `GET` and `HEAD`.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, error, warn};

use crate::build::NO_STORE;
use crate::config::ServerOptions;
use crate::context::Params;
use crate::http::{Method, ParsedUrl, Query, Request, ResponseWriter};
use crate::render::{ScriptError, render_script_error};
use crate::router::{PatternError, Router};

use super::{ServeError, Server};

/// Pages whose bundles are always served as built, even in development.
const UNCOMPILED_PAGES: [&str; 2] = ["/_error", "/_app"];

/// What a matched route does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteAction {
    Prefetcher,
    WebpackChunk,
    WebpackModule,
    PageSourceMap,
    PageScript,
    NextStatic,
    ClientAsset,
    UserStatic,
    ExportPath { page: String, query: Query },
    Page,
}

/// Builds the route table for `options`.
pub(crate) fn build(options: &ServerOptions) -> Result<Router<RouteAction>, PatternError> {
    let mut table: Vec<(String, RouteAction)> = [
        ("/_next-prefetcher.js", RouteAction::Prefetcher),
        ("/_next/webpack/chunks/:name", RouteAction::WebpackChunk),
        ("/_next/webpack/:id", RouteAction::WebpackModule),
        ("/_next/:buildId/page/:path*.js.map", RouteAction::PageSourceMap),
        ("/_next/:buildId/page/:path*.js", RouteAction::PageScript),
        ("/_next/static/:path*", RouteAction::NextStatic),
        ("/_next/:path*", RouteAction::ClientAsset),
        ("/static/:path*", RouteAction::UserStatic),
    ]
    .into_iter()
    .map(|(pattern, action)| (pattern.to_owned(), action))
    .collect();

    if options.use_file_system_public_routes {
        if options.dev {
            table.extend(options.export_path_map.iter().map(|route| {
                (
                    route.path.clone(),
                    RouteAction::ExportPath {
                        page: route.page.clone(),
                        query: route.query.clone(),
                    },
                )
            }));
        }
        table.push(("/:path*".to_owned(), RouteAction::Page));
    }

    let mut router = Router::new();
    for (pattern, action) in table {
        router.add(Method::Get, &pattern, action.clone())?;
        router.add(Method::Head, &pattern, action)?;
    }
    debug!(routes = router.len(), "route table built");
    Ok(router)
}

/// `true` for URLs that belong to the framework rather than to pages.
pub fn is_internal_url(url: &str) -> bool {
    url.starts_with("/_next/") || url.starts_with("/static/")
}

impl RouteAction {
    pub(crate) async fn handle(
        &self,
        server: &Server,
        req: &Request,
        res: &mut ResponseWriter,
        params: &Params,
        url: &ParsedUrl,
    ) -> Result<(), ServeError> {
        let options = server.options();
        let dist = options.dist_path();

        match self {
            Self::Prefetcher => match server.client_dir() {
                Some(dir) => {
                    let path = dir.join("next-prefetcher-bundle.js");
                    server.serve_static(req, res, &path, url).await
                }
                None => server.render_404(req, res, url).await,
            },
            Self::WebpackChunk => {
                if !options.dev {
                    res.set_header("Cache-Control", server.build().cache_control());
                }
                let name = params.one("name").unwrap_or_default();
                server
                    .serve_static(req, res, &dist.join("chunks").join(name), url)
                    .await
            }
            Self::WebpackModule => {
                let id = params.one("id").unwrap_or_default();
                server
                    .serve_static(req, res, &dist.join("chunks").join(id), url)
                    .await
            }
            Self::PageSourceMap => {
                let page = page_name(params.many("path"));
                if let Some(hot) = server.hot_reloader() {
                    if let Err(err) = hot.ensure_page(&page).await {
                        debug!(page, error = %err, "source map for unknown page");
                        return server.render_404(req, res, url).await;
                    }
                }
                let path = page_bundle(&dist, &page, "js.map");
                server.serve_static(req, res, &path, url).await
            }
            Self::PageScript => page_script(server, req, res, params, url, &dist).await,
            Self::NextStatic => {
                let segments = params.many("path");
                if options.dev && segments.first().is_some_and(|s| s == "commons") {
                    res.set_header("Cache-Control", NO_STORE);
                }
                let path = join_segments(dist.join("static"), segments);
                server.serve_static(req, res, &path, url).await
            }
            Self::ClientAsset => match server.client_dir() {
                Some(dir) => {
                    let path = join_segments(dir.to_path_buf(), params.many("path"));
                    server.serve_static(req, res, &path, url).await
                }
                None => server.render_404(req, res, url).await,
            },
            Self::UserStatic => {
                let path = join_segments(options.static_path(), params.many("path"));
                server.serve_static(req, res, &path, url).await
            }
            Self::ExportPath { page, query } => {
                let mut merged = url.query.clone();
                for (key, value) in query.iter() {
                    if merged.get(key).is_some() {
                        warn!(
                            url = req.url(),
                            key, "url query overridden by export path map query"
                        );
                    }
                    merged.insert(key, value.clone());
                }
                server.render(req, res, page, &merged, Some(url)).await
            }
            Self::Page => {
                server
                    .render(req, res, &url.pathname, &url.query, Some(url))
                    .await
            }
        }
    }
}

// Validate the build id, compile in dev, then serve the bundle. Every
// failure becomes a script error rather than a 404 page.
async fn page_script(
    server: &Server,
    req: &Request,
    res: &mut ResponseWriter,
    params: &Params,
    url: &ParsedUrl,
    dist: &Path,
) -> Result<(), ServeError> {
    let page = page_name(params.many("path"));
    let build = server.build();

    let requested = params.one("buildId").unwrap_or_default();
    if let Err(err) = build.validate(requested) {
        debug!(page, requested, "stale page bundle requested");
        return script_error(server, req, res, &page, err.into());
    }
    res.set_header("Cache-Control", build.cache_control());

    if let Some(hot) = server.hot_reloader() {
        if !UNCOMPILED_PAGES.contains(&page.as_str()) {
            if let Err(err) = hot.ensure_page(&page).await {
                return script_error(server, req, res, &page, err.into());
            }
            if let Some(err) = server.pipeline().compilation_error().await {
                return script_error(server, req, res, &page, err.into());
            }
        }
    }

    let path = page_bundle(dist, &page, "js");
    let exists = server.gate().is_serveable(&path)
        && fs::metadata(&path).await.is_ok_and(|meta| meta.is_file());
    if !exists {
        return script_error(server, req, res, &page, ScriptError::NotFound);
    }

    server.serve_static(req, res, &path, url).await
}

fn script_error(
    server: &Server,
    req: &Request,
    res: &mut ResponseWriter,
    page: &str,
    err: ScriptError,
) -> Result<(), ServeError> {
    if let ScriptError::Failed(failure) = &err {
        if !server.options().quiet {
            error!(page, error = %failure, "page bundle failed");
        }
    }
    render_script_error(req, res, page, &err, server.options().dev)?;
    Ok(())
}

/// `["blog", "post"]` → `/blog/post`.
fn page_name(segments: &[String]) -> String {
    format!("/{}", segments.join("/"))
}

/// Bundle file for `page` under `<dist>/bundles/pages`.
fn page_bundle(dist: &Path, page: &str, extension: &str) -> PathBuf {
    let file = format!("{}.{extension}", page.trim_start_matches('/'));
    dist.join("bundles").join("pages").join(file)
}

fn join_segments(base: PathBuf, segments: &[String]) -> PathBuf {
    segments.iter().fold(base, |path, segment| path.join(segment))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actions(router: &Router<RouteAction>, method: Method) -> Vec<String> {
        router
            .patterns()
            .filter(|(m, _)| **m == method)
            .map(|(_, p)| p.to_owned())
            .collect()
    }

    #[test]
    fn surface_is_ordered_and_doubled_for_head() {
        let router = build(&ServerOptions::default()).unwrap();
        let get = actions(&router, Method::Get);
        assert_eq!(get, actions(&router, Method::Head));
        assert_eq!(
            get,
            [
                "/_next-prefetcher.js",
                "/_next/webpack/chunks/:name",
                "/_next/webpack/:id",
                "/_next/:buildId/page/:path*.js.map",
                "/_next/:buildId/page/:path*.js",
                "/_next/static/:path*",
                "/_next/:path*",
                "/static/:path*",
                "/:path*",
            ]
        );
    }

    #[test]
    fn specific_routes_shadow_fallbacks() {
        let router = build(&ServerOptions::default()).unwrap();
        let hit = |path: &str| router.dispatch(&Method::Get, path).unwrap().handler.clone();

        assert_eq!(hit("/_next/static"), RouteAction::NextStatic);
        assert_eq!(hit("/_next/b1/page/index.js.map"), RouteAction::PageSourceMap);
        assert_eq!(hit("/_next/b1/page/index.js"), RouteAction::PageScript);
        assert_eq!(hit("/_next/anything/else"), RouteAction::ClientAsset);
        assert_eq!(hit("/about"), RouteAction::Page);
        assert_eq!(hit("/"), RouteAction::Page);
    }

    #[test]
    fn file_system_routes_can_be_disabled() {
        let router = build(&ServerOptions::default().file_system_routes(false)).unwrap();
        assert!(router.dispatch(&Method::Get, "/about").is_none());
        assert_eq!(router.len(), 16);
    }

    #[test]
    fn export_paths_only_in_dev_and_before_page_fallback() {
        let mut query = Query::new();
        query.append("title", "hello");
        let options = ServerOptions::default().export_route("/p/hello", "/post", query.clone());

        let prod = build(&options).unwrap();
        assert_eq!(
            prod.dispatch(&Method::Get, "/p/hello").unwrap().handler,
            &RouteAction::Page
        );

        let dev = build(&options.dev(true)).unwrap();
        assert_eq!(
            dev.dispatch(&Method::Get, "/p/hello").unwrap().handler,
            &RouteAction::ExportPath {
                page: "/post".into(),
                query
            }
        );
    }

    #[test]
    fn bad_export_path_is_rejected() {
        let options = ServerOptions::default()
            .dev(true)
            .export_route("no-slash", "/x", Query::new());
        assert!(build(&options).is_err());
    }

    #[test]
    fn internal_urls() {
        assert!(is_internal_url("/_next/static/x.js"));
        assert!(is_internal_url("/static/logo.png?v=1"));
        assert!(!is_internal_url("/static"));
        assert!(!is_internal_url("/_nextish"));
        assert!(!is_internal_url("/about"));
    }

    #[test]
    fn bundle_paths() {
        let dist = Path::new("/app/.next");
        assert_eq!(page_name(&["blog".into(), "post".into()]), "/blog/post");
        assert_eq!(page_name(&[]), "/");
        assert_eq!(
            page_bundle(dist, "/blog/post", "js"),
            PathBuf::from("/app/.next/bundles/pages/blog/post.js")
        );
        assert_eq!(
            page_bundle(dist, "/index", "js.map"),
            PathBuf::from("/app/.next/bundles/pages/index.js.map")
        );
        assert_eq!(
            join_segments(PathBuf::from("/app/static"), &["img".into(), "a.png".into()]),
            PathBuf::from("/app/static/img/a.png")
        );
    }
}
