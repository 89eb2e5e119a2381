//! Sending rendered HTML.

use base64::Engine as _;
use sha1::{Digest, Sha1};

use crate::build::NO_STORE;
use crate::config::RenderOptions;
use crate::http::{AlreadySent, Method, Request, ResponseWriter, StatusCode};

/// Writes `html` as the terminal response.
///
/// Does nothing if the response is already sent. With ETags enabled, a
/// matching `If-None-Match` turns the reply into a bodiless `304`.
pub fn send_html(
    req: &Request,
    res: &mut ResponseWriter,
    html: &str,
    opts: &RenderOptions,
) -> Result<(), AlreadySent> {
    if res.is_sent() {
        return Ok(());
    }

    if opts.dev {
        res.set_header("Cache-Control", NO_STORE);
    }

    if opts.generate_etags {
        let tag = etag(html.as_bytes());
        let fresh = req
            .headers()
            .get("if-none-match")
            .is_some_and(|header| is_fresh(header, &tag));
        res.set_header("ETag", tag);
        if fresh {
            res.set_status(StatusCode::NotModified);
            return res.end_empty();
        }
    }

    res.set_header("Content-Type", "text/html; charset=utf-8");
    res.set_header("Content-Length", html.len().to_string());
    if *req.method() == Method::Head {
        res.end_empty()
    } else {
        res.end(html)
    }
}

/// Strong entity tag: body length in hex and a truncated base64 SHA-1.
pub fn etag(body: &[u8]) -> String {
    let digest = Sha1::digest(body);
    let hash = base64::engine::general_purpose::STANDARD.encode(digest);
    format!("\"{:x}-{}\"", body.len(), &hash[..27])
}

// `If-None-Match` may list several tags, weak or strong, or be `*`.
fn is_fresh(if_none_match: &str, etag: &str) -> bool {
    if if_none_match.trim() == "*" {
        return true;
    }
    if_none_match
        .split(',')
        .map(|candidate| {
            let candidate = candidate.trim();
            candidate.strip_prefix("W/").unwrap_or(candidate)
        })
        .any(|candidate| candidate == etag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn opts(dev: bool) -> RenderOptions {
        RenderOptions::for_mode(dev, "b1", Path::new("/app"))
    }

    #[test]
    fn etag_matches_known_vectors() {
        assert_eq!(etag(b""), "\"0-2jmj7l5rSw0yVb/vlWAYkK/YBwk\"");
        assert!(etag(b"<html></html>").starts_with("\"d-"));
    }

    #[test]
    fn sends_html_with_headers() {
        let req = Request::new(Method::Get, "/");
        let mut res = ResponseWriter::new();
        send_html(&req, &mut res, "<p>hi</p>", &opts(false)).unwrap();

        assert!(res.is_sent());
        assert_eq!(res.header("content-type"), Some("text/html; charset=utf-8"));
        assert_eq!(res.header("content-length"), Some("9"));
        assert!(res.header("etag").is_some());
        assert!(res.header("cache-control").is_none());
        assert_eq!(res.into_response().unwrap().body_ref(), b"<p>hi</p>");
    }

    #[test]
    fn dev_marks_html_uncacheable() {
        let req = Request::new(Method::Get, "/");
        let mut res = ResponseWriter::new();
        send_html(&req, &mut res, "x", &opts(true)).unwrap();
        assert_eq!(res.header("cache-control"), Some(NO_STORE));
    }

    #[test]
    fn matching_if_none_match_is_not_modified() {
        let tag = etag(b"same");
        let req = Request::new(Method::Get, "/").with_header("If-None-Match", format!("W/\"x\", {tag}"));
        let mut res = ResponseWriter::new();
        send_html(&req, &mut res, "same", &opts(false)).unwrap();

        let response = res.into_response().unwrap();
        assert_eq!(response.status(), StatusCode::NotModified);
        assert!(response.body_ref().is_empty());
    }

    #[test]
    fn etags_can_be_disabled() {
        let mut options = opts(false);
        options.generate_etags = false;
        let req = Request::new(Method::Get, "/").with_header("If-None-Match", "*");
        let mut res = ResponseWriter::new();
        send_html(&req, &mut res, "body", &options).unwrap();
        assert_eq!(res.status(), StatusCode::Ok);
        assert!(res.header("etag").is_none());
    }

    #[test]
    fn head_has_length_but_no_body() {
        let req = Request::new(Method::Head, "/");
        let mut res = ResponseWriter::new();
        send_html(&req, &mut res, "abc", &opts(false)).unwrap();
        let response = res.into_response().unwrap();
        assert_eq!(response.headers().get("content-length"), Some("3"));
        assert!(response.body_ref().is_empty());
    }

    #[test]
    fn already_sent_is_left_alone() {
        let req = Request::new(Method::Get, "/");
        let mut res = ResponseWriter::new();
        res.end("first").unwrap();
        send_html(&req, &mut res, "second", &opts(false)).unwrap();
        assert_eq!(res.into_response().unwrap().body_ref(), b"first");
    }
}
