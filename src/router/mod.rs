//! Request routing: an ordered table of method + pattern bindings.
//!
//! [`Router`] stores routes in registration order and [`dispatch`](Router::dispatch)
//! returns the first route whose method and pattern both match. Order is the
//! priority: specific routes (`/_next/static/:path*`) must be registered
//! before the permissive fallbacks that would also match them (`/_next/:path*`).
//!
//! The router is generic over the handler type so it can hold anything from
//! boxed closures to a plain enum of built-in actions; the server uses the
//! latter.

mod pattern;

pub use pattern::{PathMatcher, PatternError};

use crate::context::Params;
use crate::http::Method;

// A single registered route binding a method + compiled pattern to a handler.
#[derive(Debug)]
struct Route<H> {
    method: Method,
    matcher: PathMatcher,
    handler: H,
}

impl<H> Route<H> {
    // Returns `Some(params)` when both the HTTP method and path pattern match, `None` otherwise.
    fn matches(&self, method: &Method, path: &str) -> Option<Params> {
        if &self.method == method {
            self.matcher.matches(path)
        } else {
            None
        }
    }
}

/// The result of a successful dispatch: the handler plus the parameters it
/// should be invoked with.
#[derive(Debug)]
pub struct RouteMatch<'r, H> {
    pub params: Params,
    pub handler: &'r H,
    pub pattern: &'r str,
}

/// An ordered route table.
///
/// # Examples
///
/// ```
/// use ssrv::http::Method;
/// use ssrv::router::Router;
///
/// let mut router = Router::new();
/// router.add(Method::Get, "/_next/static/:path*", "next-static").unwrap();
/// router.add(Method::Get, "/_next/:path*", "next-any").unwrap();
///
/// let hit = router.dispatch(&Method::Get, "/_next/static/app.css").unwrap();
/// assert_eq!(*hit.handler, "next-static");
/// assert_eq!(hit.params.many("path"), ["app.css"]);
///
/// assert!(router.dispatch(&Method::Post, "/_next/static/app.css").is_none());
/// ```
#[derive(Debug)]
pub struct Router<H> {
    routes: Vec<Route<H>>,
}

impl<H> Default for Router<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> Router<H> {
    /// Create a new, empty `Router` with no registered routes.
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Registers `handler` for `method` requests matching `pattern`, after
    /// every route registered so far.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError`] if `pattern` does not compile; the table is
    /// left unchanged.
    pub fn add(&mut self, method: Method, pattern: &str, handler: H) -> Result<(), PatternError> {
        let matcher = PathMatcher::compile(pattern)?;
        self.routes.push(Route {
            method,
            matcher,
            handler,
        });
        Ok(())
    }

    /// Return the number of routes registered in this router.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Return `true` if no routes have been registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Returns the first route, in registration order, matching `method` and
    /// `path`, or `None` when nothing matches.
    pub fn dispatch(&self, method: &Method, path: &str) -> Option<RouteMatch<'_, H>> {
        self.routes.iter().find_map(|route| {
            route.matches(method, path).map(|params| RouteMatch {
                params,
                handler: &route.handler,
                pattern: route.matcher.pattern(),
            })
        })
    }

    /// Iterates `(method, pattern)` pairs in registration order.
    pub fn patterns(&self) -> impl Iterator<Item = (&Method, &str)> {
        self.routes
            .iter()
            .map(|r| (&r.method, r.matcher.pattern()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_starts_empty() {
        let router: Router<()> = Router::new();
        assert!(router.is_empty());
        assert_eq!(router.len(), 0);
    }

    #[test]
    fn empty_router_dispatches_nothing() {
        let router: Router<u8> = Router::default();
        assert!(router.dispatch(&Method::Get, "/").is_none());
    }

    #[test]
    fn first_registered_route_wins_when_both_match() {
        let mut router = Router::new();
        router.add(Method::Get, "/:path*", 1).unwrap();
        router.add(Method::Get, "/about", 2).unwrap();

        let hit = router.dispatch(&Method::Get, "/about").unwrap();
        assert_eq!(*hit.handler, 1);
        assert_eq!(hit.pattern, "/:path*");
    }

    #[test]
    fn specific_before_general() {
        let mut router = Router::new();
        router.add(Method::Get, "/_next/static/:path*", "static").unwrap();
        router.add(Method::Get, "/_next/:path*", "any").unwrap();

        assert_eq!(
            *router.dispatch(&Method::Get, "/_next/static").unwrap().handler,
            "static"
        );
        assert_eq!(
            *router.dispatch(&Method::Get, "/_next/other/x.js").unwrap().handler,
            "any"
        );
    }

    #[test]
    fn method_must_match() {
        let mut router = Router::new();
        router.add(Method::Head, "/a", "head").unwrap();
        router.add(Method::Get, "/a", "get").unwrap();

        assert_eq!(*router.dispatch(&Method::Get, "/a").unwrap().handler, "get");
        assert_eq!(*router.dispatch(&Method::Head, "/a").unwrap().handler, "head");
        assert!(router.dispatch(&Method::Post, "/a").is_none());
    }

    #[test]
    fn bad_pattern_leaves_table_unchanged() {
        let mut router = Router::new();
        assert!(router.add(Method::Get, "/:a*/b", ()).is_err());
        assert!(router.is_empty());
    }

    #[test]
    fn patterns_lists_registration_order() {
        let mut router = Router::new();
        router.add(Method::Get, "/b", ()).unwrap();
        router.add(Method::Head, "/a", ()).unwrap();
        let listed: Vec<_> = router.patterns().map(|(m, p)| (m.as_str(), p)).collect();
        assert_eq!(listed, vec![("GET", "/b"), ("HEAD", "/a")]);
    }
}
