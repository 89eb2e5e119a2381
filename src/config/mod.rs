//! Server configuration and the render-time options snapshot.
//!
//! [`ServerOptions`] is what a caller hands the server; it deserializes from
//! any serde source using camelCase keys. [`RenderOptions`] is the read-only
//! snapshot built from it once at construction and passed to the render
//! engine on every call. The one mutable piece, the asset prefix, lives in
//! the shared [`AssetPrefix`] registry.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::Query;

/// Default build output directory, relative to the project directory.
pub const DEFAULT_DIST_DIR: &str = ".next";

/// One dev-mode route taken from the export path map: requests for `path`
/// render `page` with `query`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportPathRoute {
    pub path: String,
    pub page: String,
    #[serde(default)]
    pub query: Query,
}

/// Options the server is constructed from.
///
/// # Examples
///
/// ```
/// use ssrv::config::ServerOptions;
///
/// let opts: ServerOptions = serde_json::from_str(r#"{
///     "dir": "/srv/app",
///     "dev": true,
///     "assetPrefix": "https://cdn.example.com/"
/// }"#).unwrap();
///
/// assert!(opts.dev);
/// assert_eq!(opts.dist_dir, ".next");
/// assert!(opts.generate_etags);
/// assert_eq!(opts.dist_path(), std::path::Path::new("/srv/app/.next"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerOptions {
    /// Project directory.
    pub dir: PathBuf,
    /// Development mode: live compilation, no build-id checks, no-store caching.
    pub dev: bool,
    pub static_markup: bool,
    /// Suppress error logging for failed renders and requests.
    pub quiet: bool,
    /// Build output directory, relative to `dir`.
    pub dist_dir: String,
    pub asset_prefix: String,
    pub generate_etags: bool,
    pub powered_by_header: bool,
    /// Register the `/:path*` page fallback (and dev export-path routes).
    pub use_file_system_public_routes: bool,
    /// Framework client bundle directory served under `/_next/`.
    pub client_dir: Option<PathBuf>,
    pub server_runtime_config: Value,
    pub public_runtime_config: Option<Value>,
    /// Extra page routes registered in development, in order.
    pub export_path_map: Vec<ExportPathRoute>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            dev: false,
            static_markup: false,
            quiet: false,
            dist_dir: DEFAULT_DIST_DIR.to_owned(),
            asset_prefix: String::new(),
            generate_etags: true,
            powered_by_header: true,
            use_file_system_public_routes: true,
            client_dir: None,
            server_runtime_config: Value::Object(Default::default()),
            public_runtime_config: None,
            export_path_map: Vec::new(),
        }
    }
}

impl ServerOptions {
    /// Creates options for the project at `dir`, production mode.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn dev(mut self, dev: bool) -> Self {
        self.dev = dev;
        self
    }

    #[must_use]
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    #[must_use]
    pub fn dist_dir(mut self, dist_dir: impl Into<String>) -> Self {
        self.dist_dir = dist_dir.into();
        self
    }

    #[must_use]
    pub fn asset_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.asset_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn generate_etags(mut self, enabled: bool) -> Self {
        self.generate_etags = enabled;
        self
    }

    #[must_use]
    pub fn powered_by_header(mut self, enabled: bool) -> Self {
        self.powered_by_header = enabled;
        self
    }

    #[must_use]
    pub fn file_system_routes(mut self, enabled: bool) -> Self {
        self.use_file_system_public_routes = enabled;
        self
    }

    #[must_use]
    pub fn client_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.client_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn public_runtime_config(mut self, config: Value) -> Self {
        self.public_runtime_config = Some(config);
        self
    }

    #[must_use]
    pub fn server_runtime_config(mut self, config: Value) -> Self {
        self.server_runtime_config = config;
        self
    }

    #[must_use]
    pub fn export_route(
        mut self,
        path: impl Into<String>,
        page: impl Into<String>,
        query: Query,
    ) -> Self {
        self.export_path_map.push(ExportPathRoute {
            path: path.into(),
            page: page.into(),
            query,
        });
        self
    }

    /// `<dir>/<dist_dir>`.
    pub fn dist_path(&self) -> PathBuf {
        self.dir.join(&self.dist_dir)
    }

    /// `<dir>/static`, the user's static file root.
    pub fn static_path(&self) -> PathBuf {
        self.dir.join("static")
    }
}

/// Shared, single-writer registry for the asset prefix.
///
/// Cloning yields another handle to the same value. Only the server writes
/// it (through `Server::set_asset_prefix`); renderers read it per request.
#[derive(Debug, Clone, Default)]
pub struct AssetPrefix(Arc<RwLock<String>>);

impl AssetPrefix {
    pub fn new(prefix: &str) -> Self {
        let registry = Self::default();
        registry.set(prefix);
        registry
    }

    /// Returns the current prefix (no trailing slash).
    pub fn get(&self) -> String {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Publishes a new prefix, dropping one trailing `/`.
    pub fn set(&self, prefix: &str) {
        let normalized = prefix.strip_suffix('/').unwrap_or(prefix).to_owned();
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = normalized;
    }
}

/// Runtime configuration objects exposed to application code.
///
/// `server` stays on the server; only `public` reaches rendered pages.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub server: Value,
    pub public: Option<Value>,
}

/// The render-time options snapshot.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub dev: bool,
    pub static_markup: bool,
    pub build_id: String,
    pub generate_etags: bool,
    pub runtime_config: Option<Value>,
    /// Production dynamic-import chunks, `name → file`.
    pub available_chunks: BTreeMap<String, String>,
    pub dir: PathBuf,
    pub dist: PathBuf,
    asset_prefix: AssetPrefix,
}

impl RenderOptions {
    pub(crate) fn new(
        options: &ServerOptions,
        build_id: &str,
        available_chunks: BTreeMap<String, String>,
        asset_prefix: AssetPrefix,
    ) -> Self {
        Self {
            dev: options.dev,
            static_markup: options.static_markup,
            build_id: build_id.to_owned(),
            generate_etags: options.generate_etags,
            runtime_config: options.public_runtime_config.clone(),
            available_chunks,
            dir: options.dir.clone(),
            dist: options.dist_path(),
            asset_prefix,
        }
    }

    /// Snapshot for tests and embedders that drive the render pipeline
    /// without a full server.
    pub fn for_mode(dev: bool, build_id: &str, dir: &Path) -> Self {
        let options = ServerOptions::new(dir).dev(dev);
        Self::new(&options, build_id, BTreeMap::new(), AssetPrefix::default())
    }

    /// Current asset prefix, read through the shared registry.
    pub fn asset_prefix(&self) -> String {
        self.asset_prefix.get()
    }

    pub fn asset_prefix_registry(&self) -> &AssetPrefix {
        &self.asset_prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_framework_defaults() {
        let opts = ServerOptions::default();
        assert!(!opts.dev);
        assert!(opts.use_file_system_public_routes);
        assert!(opts.powered_by_header);
        assert_eq!(opts.server_runtime_config, serde_json::json!({}));
        assert!(opts.public_runtime_config.is_none());
    }

    #[test]
    fn export_path_map_deserializes_in_order() {
        let opts: ServerOptions = serde_json::from_str(
            r#"{ "exportPathMap": [
                { "path": "/p/hello", "page": "/post", "query": { "title": "hello" } },
                { "path": "/about", "page": "/about" }
            ] }"#,
        )
        .unwrap();
        assert_eq!(opts.export_path_map.len(), 2);
        assert_eq!(opts.export_path_map[0].page, "/post");
        assert_eq!(opts.export_path_map[0].query.first("title"), Some("hello"));
        assert!(opts.export_path_map[1].query.is_empty());
    }

    #[test]
    fn asset_prefix_strips_one_trailing_slash_and_is_shared() {
        let registry = AssetPrefix::new("https://cdn.example.com/");
        let reader = registry.clone();
        assert_eq!(reader.get(), "https://cdn.example.com");

        registry.set("/assets//");
        assert_eq!(reader.get(), "/assets/");
    }

    #[test]
    fn render_options_read_prefix_through_registry() {
        let registry = AssetPrefix::new("/a");
        let opts = RenderOptions::new(
            &ServerOptions::default(),
            "b1",
            BTreeMap::new(),
            registry.clone(),
        );
        registry.set("/b/");
        assert_eq!(opts.asset_prefix(), "/b");
    }
}
