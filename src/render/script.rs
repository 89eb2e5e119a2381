//! Script-error responses for page bundle requests.
//!
//! When a page script cannot be served, the client still receives
//! JavaScript: it registers the page with the client loader and hands back
//! an error object, so the client router can show the right error page
//! instead of choking on an HTML 404.

use serde_json::{Value, json};

use crate::build::{InvalidBuildId, NO_STORE};
use crate::dev::EnsureError;
use crate::engine::PageError;
use crate::http::{AlreadySent, Method, Request, ResponseWriter};

/// Why a page script could not be served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    NotFound,
    InvalidBuildId(InvalidBuildId),
    Failed(PageError),
}

impl From<InvalidBuildId> for ScriptError {
    fn from(err: InvalidBuildId) -> Self {
        Self::InvalidBuildId(err)
    }
}

impl From<EnsureError> for ScriptError {
    fn from(err: EnsureError) -> Self {
        match err {
            EnsureError::PageNotFound { .. } => Self::NotFound,
            EnsureError::Failed(err) => Self::Failed(err),
        }
    }
}

impl From<PageError> for ScriptError {
    fn from(err: PageError) -> Self {
        Self::Failed(err)
    }
}

impl ScriptError {
    // The error object handed to the client. Production hides details.
    fn to_client_error(&self, page: &str, dev: bool) -> Value {
        match self {
            Self::NotFound => json!({
                "message": format!("Page does not exist: {page}"),
                "statusCode": 404,
            }),
            Self::InvalidBuildId(err) => json!({
                "message": err.to_string(),
                "buildIdMismatched": true,
            }),
            Self::Failed(err) if dev => json!({
                "message": err.message,
                "stack": err.stack,
            }),
            Self::Failed(_) => json!({
                "message": "Internal Server Error",
                "statusCode": 500,
            }),
        }
    }
}

/// Finishes `res` with a script that registers `page` as failed.
pub fn render_script_error(
    req: &Request,
    res: &mut ResponseWriter,
    page: &str,
    err: &ScriptError,
    dev: bool,
) -> Result<(), AlreadySent> {
    if res.is_sent() {
        return Ok(());
    }

    let body = format!(
        "window.__NEXT_REGISTER_PAGE({page}, function() {{\n  var error = {error}\n  return {{ error: error }}\n}})\n",
        page = js_literal(&Value::from(page)),
        error = js_literal(&err.to_client_error(page, dev)),
    );

    res.set_header("Cache-Control", NO_STORE);
    res.set_header("Content-Type", "text/javascript");
    res.set_header("Content-Length", body.len().to_string());
    if *req.method() == Method::Head {
        res.end_empty()
    } else {
        res.end(body)
    }
}

// JSON is valid JavaScript; escaping `<` keeps `</script>` out of the output.
fn js_literal(value: &Value) -> String {
    value.to_string().replace('<', "\\u003c")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(page: &str, err: ScriptError, dev: bool) -> (ResponseWriter, String) {
        let req = Request::new(Method::Get, "/_next/b1/page/x.js");
        let mut res = ResponseWriter::new();
        render_script_error(&req, &mut res, page, &err, dev).unwrap();
        let body = String::from_utf8(res.body().to_vec()).unwrap();
        (res, body)
    }

    #[test]
    fn missing_page_reports_404_to_client() {
        let (res, body) = render("/about", ScriptError::NotFound, false);
        assert_eq!(res.header("content-type"), Some("text/javascript"));
        assert_eq!(res.header("cache-control"), Some(NO_STORE));
        assert!(body.starts_with("window.__NEXT_REGISTER_PAGE(\"/about\""));
        assert!(body.contains("\"statusCode\":404"));
        assert!(body.contains("Page does not exist: /about"));
    }

    #[test]
    fn stale_build_id_is_flagged() {
        let err = InvalidBuildId {
            requested: "old".into(),
        };
        let (_, body) = render("/", err.into(), false);
        assert!(body.contains("\"message\":\"INVALID_BUILD_ID\""));
        assert!(body.contains("\"buildIdMismatched\":true"));
    }

    #[test]
    fn failure_details_only_in_dev() {
        let err = PageError::new("secret").with_stack("at x");
        let (_, dev_body) = render("/a", err.clone().into(), true);
        assert!(dev_body.contains("secret"));
        assert!(dev_body.contains("at x"));

        let (_, prod_body) = render("/a", err.into(), false);
        assert!(!prod_body.contains("secret"));
        assert!(prod_body.contains("\"statusCode\":500"));
    }

    #[test]
    fn page_name_cannot_close_a_script_tag() {
        let (_, body) = render("/</script><script>alert(1)", ScriptError::NotFound, false);
        assert!(!body.contains("</script>"));
        assert!(body.contains("\\u003c/script>"));
    }

    #[test]
    fn ensure_errors_map_onto_script_errors() {
        let missing: ScriptError = EnsureError::PageNotFound { page: "/x".into() }.into();
        assert_eq!(missing, ScriptError::NotFound);
        let failed: ScriptError = EnsureError::Failed(PageError::new("e")).into();
        assert_eq!(failed, ScriptError::Failed(PageError::new("e")));
    }
}
