//! Static file transmission.
//!
//! The server decides *whether* a file may be sent (see
//! [`StaticAssetGate`](crate::security::StaticAssetGate)); a [`StaticFiles`]
//! implementation only sends it. [`FsStaticFiles`] is the default.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tracing::debug;

use crate::engine::BoxFuture;
use crate::http::{AlreadySent, Method, Request, ResponseWriter};

#[derive(Debug, Error)]
pub enum StaticError {
    #[error("no such file: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    AlreadySent(#[from] AlreadySent),
}

/// Sends a file that already passed the asset gate.
pub trait StaticFiles: Send + Sync {
    fn serve<'a>(
        &'a self,
        req: &'a Request,
        res: &'a mut ResponseWriter,
        path: &'a Path,
    ) -> BoxFuture<'a, Result<(), StaticError>>;
}

/// Reads whole files with `tokio::fs`.
///
/// Keeps any `Cache-Control` the caller already set, adds `Content-Type`
/// from the file extension and `Content-Length`, and omits the body for
/// `HEAD`. Directories count as missing.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStaticFiles;

impl StaticFiles for FsStaticFiles {
    fn serve<'a>(
        &'a self,
        req: &'a Request,
        res: &'a mut ResponseWriter,
        path: &'a Path,
    ) -> BoxFuture<'a, Result<(), StaticError>> {
        Box::pin(async move {
            let meta = fs::metadata(path).await.map_err(|e| io_error(path, e))?;
            if !meta.is_file() {
                return Err(StaticError::NotFound {
                    path: path.to_path_buf(),
                });
            }

            let bytes = fs::read(path).await.map_err(|e| io_error(path, e))?;
            let mime = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map_or("application/octet-stream", mime_type_for_extension);

            debug!(path = %path.display(), len = bytes.len(), "serving static file");
            res.set_header("Content-Type", mime);
            res.set_header("Content-Length", bytes.len().to_string());
            if *req.method() == Method::Head {
                res.end_empty()?;
            } else {
                res.end(bytes)?;
            }
            Ok(())
        })
    }
}

fn io_error(path: &Path, source: io::Error) -> StaticError {
    if source.kind() == io::ErrorKind::NotFound {
        StaticError::NotFound {
            path: path.to_path_buf(),
        }
    } else {
        StaticError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// MIME type for a file extension.
pub fn mime_type_for_extension(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "application/javascript; charset=utf-8",
        "map" | "json" => "application/json; charset=utf-8",
        "txt" => "text/plain; charset=utf-8",
        "xml" => "application/xml",

        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "avif" => "image/avif",

        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",

        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "pdf" => "application/pdf",
        "wasm" => "application/wasm",

        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::StatusCode;

    #[test]
    fn mime_lookup_is_case_insensitive() {
        assert_eq!(mime_type_for_extension("PNG"), "image/png");
        assert_eq!(mime_type_for_extension("js"), "application/javascript; charset=utf-8");
        assert_eq!(mime_type_for_extension("unknown"), "application/octet-stream");
    }

    #[tokio::test]
    async fn serves_file_with_length_and_type() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("app.css");
        std::fs::write(&file, "body{}").unwrap();

        let req = Request::new(Method::Get, "/static/app.css");
        let mut res = ResponseWriter::new();
        FsStaticFiles.serve(&req, &mut res, &file).await.unwrap();

        let response = res.into_response().unwrap();
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(response.headers().get("content-type"), Some("text/css; charset=utf-8"));
        assert_eq!(response.headers().get("content-length"), Some("6"));
        assert_eq!(response.body_ref(), b"body{}");
    }

    #[tokio::test]
    async fn head_sends_headers_only() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "hello").unwrap();

        let req = Request::new(Method::Head, "/static/a.txt");
        let mut res = ResponseWriter::new();
        FsStaticFiles.serve(&req, &mut res, &file).await.unwrap();

        let response = res.into_response().unwrap();
        assert_eq!(response.headers().get("content-length"), Some("5"));
        assert!(response.body_ref().is_empty());
    }

    #[tokio::test]
    async fn missing_file_and_directory_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let req = Request::new(Method::Get, "/static/x");

        let mut res = ResponseWriter::new();
        let err = FsStaticFiles
            .serve(&req, &mut res, &dir.path().join("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, StaticError::NotFound { .. }));

        let err = FsStaticFiles.serve(&req, &mut res, dir.path()).await.unwrap_err();
        assert!(matches!(err, StaticError::NotFound { .. }));
        assert!(!res.is_sent());
    }
}
