//! Per-dispatch route parameters.
//!
//! A [`Params`] map is produced each time a route matches and handed to its
//! handler together with the request, the response writer, and the parsed URL.

use std::collections::HashMap;

/// A captured route parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    /// A `:name` segment.
    One(String),
    /// A `:name*` catch-all; possibly empty.
    Many(Vec<String>),
}

/// Path parameters extracted from the matched route.
///
/// # Examples
///
/// ```
/// use ssrv::context::{ParamValue, Params};
///
/// let mut params = Params::new();
/// params.insert("buildId", ParamValue::One("abc".into()));
/// params.insert("path", ParamValue::Many(vec!["blog".into(), "post".into()]));
///
/// assert_eq!(params.one("buildId"), Some("abc"));
/// assert_eq!(params.many("path"), ["blog", "post"]);
/// assert!(params.many("missing").is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    map: HashMap<String, ParamValue>,
}

impl Params {
    /// Create a new empty parameters map
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: ParamValue) {
        self.map.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.map.get(key)
    }

    /// Returns a single-segment capture. Catch-alls are not returned here.
    pub fn one(&self, key: &str) -> Option<&str> {
        match self.map.get(key)? {
            ParamValue::One(v) => Some(v),
            ParamValue::Many(_) => None,
        }
    }

    /// Returns the segments of a catch-all capture; empty when absent.
    pub fn many(&self, key: &str) -> &[String] {
        match self.map.get(key) {
            Some(ParamValue::Many(vs)) => vs,
            _ => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
