//! Route pattern compilation and matching.
//!
//! | Pattern                           | Example match                 | Captured params                     |
//! |-----------------------------------|-------------------------------|-------------------------------------|
//! | `/_next-prefetcher.js`            | `/_next-prefetcher.js`        | *(none)*                            |
//! | `/_next/webpack/chunks/:name`     | `/_next/webpack/chunks/a.js`  | `name → "a.js"`                     |
//! | `/static/:path*`                  | `/static/img/logo.png`        | `path → ["img", "logo.png"]`        |
//! | `/static/:path*`                  | `/static`                     | `path → []`                         |
//! | `/_next/:buildId/page/:path*.js`  | `/_next/b1/page/blog/post.js` | `buildId → "b1"`, `path → ["blog", "post"]` |
//!
//! A catch-all may carry a literal suffix (`.js`, `.js.map`) which must end
//! the path and is stripped before segments are captured. Captured values
//! are percent-decoded. Matching is a pure string operation.

use percent_encoding::percent_decode_str;
use thiserror::Error;

use crate::context::{ParamValue, Params};

/// Errors raised while compiling a route pattern.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("pattern `{pattern}` must start with `/`")]
    MissingLeadingSlash { pattern: String },

    #[error("pattern `{pattern}` has a parameter without a name")]
    EmptyParameterName { pattern: String },

    #[error("pattern `{pattern}` has invalid parameter segment `{segment}`")]
    InvalidParameter { pattern: String, segment: String },

    #[error("pattern `{pattern}` has a catch-all that is not the final segment")]
    CatchAllNotLast { pattern: String },
}

// A single compiled path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    CatchAll(String),
}

/// A compiled route pattern.
///
/// # Examples
///
/// ```
/// use ssrv::router::PathMatcher;
///
/// let m = PathMatcher::compile("/_next/static/:path*").unwrap();
/// assert_eq!(m.matches("/_next/static/css/app.css").unwrap().many("path"), ["css", "app.css"]);
/// assert!(m.matches("/_next/static").unwrap().many("path").is_empty());
/// assert!(m.matches("/_next/other").is_none());
/// ```
#[derive(Debug, Clone)]
pub struct PathMatcher {
    pattern: String,
    segments: Vec<Segment>,
    // Literal text that must end the path when the final segment is a catch-all.
    suffix: Option<String>,
}

impl PathMatcher {
    /// Compiles `pattern` into a matcher.
    ///
    /// A trailing slash (other than on the root `/`) is ignored, so `/blog/`
    /// and `/blog` compile identically.
    ///
    /// # Errors
    ///
    /// - [`PatternError::MissingLeadingSlash`]: pattern is not absolute.
    /// - [`PatternError::EmptyParameterName`]: a bare `:` or `:*` segment.
    /// - [`PatternError::InvalidParameter`]: a parameter name with characters
    ///   outside `[A-Za-z0-9_]`, or a suffix on a single-segment parameter.
    /// - [`PatternError::CatchAllNotLast`]: a `:name*` segment followed by more segments.
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        if !pattern.starts_with('/') {
            return Err(PatternError::MissingLeadingSlash {
                pattern: pattern.to_owned(),
            });
        }

        let raw: Vec<&str> = trim_trailing_slash(pattern)
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        let mut segments = Vec::with_capacity(raw.len());
        let mut suffix = None;

        for (idx, seg) in raw.iter().enumerate() {
            let Some(spec) = seg.strip_prefix(':') else {
                segments.push(Segment::Literal((*seg).to_owned()));
                continue;
            };

            let name_len = spec
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(spec.len());
            let (name, rest) = spec.split_at(name_len);

            if name.is_empty() {
                return Err(PatternError::EmptyParameterName {
                    pattern: pattern.to_owned(),
                });
            }

            match rest.strip_prefix('*') {
                Some(tail) => {
                    if idx + 1 != raw.len() {
                        return Err(PatternError::CatchAllNotLast {
                            pattern: pattern.to_owned(),
                        });
                    }
                    if !tail.is_empty() {
                        suffix = Some(tail.to_owned());
                    }
                    segments.push(Segment::CatchAll(name.to_owned()));
                }
                None if rest.is_empty() => segments.push(Segment::Param(name.to_owned())),
                None => {
                    return Err(PatternError::InvalidParameter {
                        pattern: pattern.to_owned(),
                        segment: (*seg).to_owned(),
                    });
                }
            }
        }

        Ok(Self {
            pattern: pattern.to_owned(),
            segments,
            suffix,
        })
    }

    /// Returns the source pattern string.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Matches `path`, returning captured parameters or `None`.
    ///
    /// A catch-all with nothing left to absorb captures an empty list rather
    /// than failing, so `/static/:path*` matches `/static`.
    pub fn matches(&self, path: &str) -> Option<Params> {
        let path = trim_trailing_slash(path);
        let path = match &self.suffix {
            Some(suffix) => path.strip_suffix(suffix.as_str())?,
            None => path,
        };

        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = Params::new();

        for (idx, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(lit) => {
                    if parts.get(idx) != Some(&lit.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let value = decode(parts.get(idx)?)?;
                    params.insert(name.clone(), ParamValue::One(value));
                }
                Segment::CatchAll(name) => {
                    let rest = parts
                        .get(idx..)
                        .unwrap_or_default()
                        .iter()
                        .map(|p| decode(p))
                        .collect::<Option<Vec<_>>>()?;
                    params.insert(name.clone(), ParamValue::Many(rest));
                    return Some(params);
                }
            }
        }

        (parts.len() == self.segments.len()).then_some(params)
    }
}

fn trim_trailing_slash(path: &str) -> &str {
    if path != "/" && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    }
}

fn decode(segment: &str) -> Option<String> {
    percent_decode_str(segment)
        .decode_utf8()
        .ok()
        .map(|s| s.into_owned())
}
