//! Request routing: map exact paths and methods to handler functions.
//!
//! Routes are matched on the normalized path (a trailing slash is ignored, so
//! `/api/rate/` and `/api/rate` are the same route). When a path is known but
//! registered for a different method the router answers `405 Method Not
//! Allowed` with an `Allow` header; unknown paths get `404 Not Found`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::{Method, Request, Response, StatusCode};

/// Type-erased async handler stored by the router.
pub type Handler =
    Arc<dyn Fn(Context) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Context) -> impl Future<Output = Response> + Send` that is also
/// `Send + Sync + 'static` implements this trait through the blanket impl.
pub trait IntoHandler: Send + Sync + 'static {
    /// Call the handler with the given context, boxing the returned future.
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin((self)(ctx))
    }
}

fn normalize(path: &str) -> &str {
    if path != "/" && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    }
}

struct Route {
    method: Method,
    path: String,
    handler: Handler,
}

/// HTTP request router.
///
/// Routes are evaluated in registration order; the first route whose method
/// and path both match wins.
///
/// # Examples
///
/// ```rust,no_run
/// use relaychat::{Router, Response, StatusCode};
///
/// let mut router = Router::new();
/// router.get("/api/rate", |_ctx| async { Response::new(StatusCode::Ok) });
/// router.post("/api/rate", |_ctx| async { Response::new(StatusCode::Ok) });
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `GET` requests to `path`.
    pub fn get(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Get, path, handler);
    }

    /// Register a handler for `POST` requests to `path`.
    pub fn post(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Post, path, handler);
    }

    fn add_route(&mut self, method: Method, path: &str, handler: impl IntoHandler) {
        let handler: Handler = Arc::new(move |ctx| handler.call(ctx));
        self.routes.push(Route {
            method,
            path: normalize(path).to_owned(),
            handler,
        });
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Dispatch `request` to the matching route.
    pub async fn route(&self, request: Request) -> Response {
        let path = normalize(request.path()).to_owned();

        let mut allowed: Vec<&str> = Vec::new();
        for route in self.routes.iter().filter(|r| r.path == path) {
            if &route.method == request.method() {
                let handler = Arc::clone(&route.handler);
                return handler(Context::new(request)).await;
            }
            allowed.push(route.method.as_str());
        }

        if allowed.is_empty() {
            Response::error(StatusCode::NotFound, format!("No route for {path}"))
        } else {
            Response::error(
                StatusCode::MethodNotAllowed,
                format!("{} not allowed on {path}", request.method()),
            )
            .header("Allow", allowed.join(", "))
        }
    }
}
