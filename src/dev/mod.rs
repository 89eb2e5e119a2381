//! Development-mode bundler port.
//!
//! In development a hot reloader compiles pages on demand, reports
//! compilation errors, and may take over requests of its own (the HMR event
//! stream, for example). The server drives it through [`HotReloader`] and
//! only ever reads its error set.

use thiserror::Error;

use crate::engine::{BoxFuture, PageError};
use crate::http::{Request, ResponseWriter};

/// Lifecycle or request failure inside the hot reloader.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HotReloadError {
    #[error("failed to start hot reloader: {0}")]
    Start(String),

    #[error("failed to stop hot reloader: {0}")]
    Stop(String),

    #[error("hot reloader failed to handle request: {0}")]
    Request(String),
}

/// Failure from [`HotReloader::ensure_page`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnsureError {
    #[error("page `{page}` not found")]
    PageNotFound { page: String },

    #[error(transparent)]
    Failed(#[from] PageError),
}

/// Outstanding compilation errors, keyed by module, in insertion order.
///
/// # Examples
///
/// ```
/// use ssrv::dev::CompilationErrors;
/// use ssrv::engine::PageError;
///
/// let mut errors = CompilationErrors::new();
/// errors.insert("pages/a.js", vec![PageError::new("E1")]);
/// errors.insert("pages/b.js", vec![PageError::new("E2")]);
///
/// assert_eq!(errors.first().unwrap().message, "E1");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompilationErrors {
    entries: Vec<(String, Vec<PageError>)>,
}

impl CompilationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `errors` for `key`. An existing key keeps its position.
    pub fn insert(&mut self, key: impl Into<String>, errors: Vec<PageError>) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = errors,
            None => self.entries.push((key, errors)),
        }
    }

    /// The first error of the first module that has any.
    pub fn first(&self) -> Option<&PageError> {
        self.entries.iter().find_map(|(_, errors)| errors.first())
    }

    /// Returns `true` when no module has an error.
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|(_, errors)| errors.is_empty())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[PageError])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl<K: Into<String>> FromIterator<(K, Vec<PageError>)> for CompilationErrors {
    fn from_iter<T: IntoIterator<Item = (K, Vec<PageError>)>>(iter: T) -> Self {
        let mut errors = Self::new();
        for (key, list) in iter {
            errors.insert(key, list);
        }
        errors
    }
}

/// The development bundler as seen by the server.
///
/// `stop` may be called more than once and must be a no-op after the first.
pub trait HotReloader: Send + Sync {
    fn start(&self) -> BoxFuture<'_, Result<(), HotReloadError>>;

    fn stop(&self) -> BoxFuture<'_, Result<(), HotReloadError>>;

    /// Sees every request before routing. Finishing `res` claims the request.
    fn run<'a>(
        &'a self,
        _req: &'a Request,
        _res: &'a mut ResponseWriter,
    ) -> BoxFuture<'a, Result<(), HotReloadError>> {
        Box::pin(async { Ok(()) })
    }

    /// Compiles `page` if needed.
    fn ensure_page<'a>(&'a self, page: &'a str) -> BoxFuture<'a, Result<(), EnsureError>>;

    fn compilation_errors(&self) -> BoxFuture<'_, CompilationErrors>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_error_follows_insertion_order() {
        let errors: CompilationErrors = [
            ("b.js", vec![PageError::new("E1"), PageError::new("E1b")]),
            ("a.js", vec![PageError::new("E2")]),
        ]
        .into_iter()
        .collect();
        assert_eq!(errors.first().map(|e| e.message.as_str()), Some("E1"));
    }

    #[test]
    fn reinserting_a_key_keeps_its_slot() {
        let mut errors = CompilationErrors::new();
        errors.insert("a.js", vec![PageError::new("old")]);
        errors.insert("b.js", vec![PageError::new("E2")]);
        errors.insert("a.js", vec![PageError::new("new")]);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors.first().unwrap().message, "new");
    }

    #[test]
    fn empty_entries_are_skipped() {
        let mut errors = CompilationErrors::new();
        errors.insert("fixed.js", Vec::new());
        assert!(errors.is_empty());
        assert!(errors.first().is_none());

        errors.insert("broken.js", vec![PageError::new("E")]);
        assert!(!errors.is_empty());
        assert_eq!(errors.first().unwrap().message, "E");
    }
}
