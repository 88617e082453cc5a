//! Middleware pipeline: composable before/after logic around the router.
//!
//! ## Core types
//!
//! - [`Middleware`]: trait implemented by all middleware.
//! - [`Next`]: cursor into the remaining chain; call [`Next::run`] to advance.
//!   When the chain is exhausted the request is dispatched to the [`Router`].
//! - [`Pipeline`]: an ordered middleware stack in front of a router, shared
//!   by every connection the server accepts.
//! - [`LoggerMiddleware`]: request/response logger.

use std::{future::Future, pin::Pin, sync::Arc};
use tokio::time::Instant;

use crate::{Request, Response, context::Context, router::Router};

/// A type-erased, reference-counted middleware.
pub type MiddlewareHandler = Arc<dyn Middleware + 'static>;

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed by [`run`](Self::run), so a middleware can forward a
/// request at most once.
///
/// # Examples
///
/// ```rust,no_run
/// use std::pin::Pin;
/// use relaychat::{Response, context::Context, middleware::{Middleware, Next}};
///
/// struct PassThrough;
///
/// impl Middleware for PassThrough {
///     fn handle(
///         &self,
///         ctx: Context,
///         next: Next,
///     ) -> Pin<Box<dyn std::future::Future<Output = Response> + Send>> {
///         Box::pin(async move { next.run(ctx).await })
///     }
/// }
/// ```
pub struct Next {
    middlewares: Arc<[MiddlewareHandler]>,
    router: Arc<Router>,
    index: usize,
}

impl Next {
    /// Invokes the next middleware, or the router once the chain is exhausted.
    pub async fn run(mut self, ctx: Context) -> Response {
        if let Some(middleware) = self.middlewares.get(self.index).cloned() {
            self.index += 1;
            middleware.handle(ctx, self).await
        } else {
            self.router.route(ctx.into_request()).await
        }
    }
}

/// The core middleware trait.
///
/// Implementors may pass the request through (`next.run(ctx).await`),
/// short-circuit with their own [`Response`], or decorate the downstream
/// response. Implementations must be `Send + Sync`; middleware is shared
/// across Tokio tasks.
pub trait Middleware: Send + Sync {
    /// Handle the request and optionally delegate to the next layer.
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

/// An ordered middleware stack terminated by a [`Router`].
///
/// # Examples
///
/// ```rust,no_run
/// use relaychat::{Router, middleware::{LoggerMiddleware, Pipeline}};
///
/// let pipeline = Pipeline::new(Router::new()).with(LoggerMiddleware);
/// ```
#[derive(Clone)]
pub struct Pipeline {
    middlewares: Arc<[MiddlewareHandler]>,
    router: Arc<Router>,
}

impl Pipeline {
    pub fn new(router: Router) -> Self {
        Self {
            middlewares: Arc::from(Vec::new()),
            router: Arc::new(router),
        }
    }

    /// Appends a middleware; earlier middleware runs first.
    #[must_use]
    pub fn with<M>(self, middleware: M) -> Self
    where
        M: Middleware + 'static,
    {
        let mut stack: Vec<MiddlewareHandler> = self.middlewares.iter().cloned().collect();
        stack.push(Arc::new(middleware));
        Self {
            middlewares: Arc::from(stack),
            router: self.router,
        }
    }

    /// Runs `request` through the middleware stack and the router.
    pub async fn handle(&self, request: Request) -> Response {
        let next = Next {
            middlewares: Arc::clone(&self.middlewares),
            router: Arc::clone(&self.router),
            index: 0,
        };
        next.run(Context::new(request)).await
    }
}

/// Logs each request's method, path, status, and duration at `info` level.
///
/// For streamed responses the duration covers time to first byte; the body
/// is still being produced when the line is written.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().as_str().to_string();
            let path = ctx.request().path().to_string();

            let response = next.run(ctx).await;

            tracing::info!(
                %method,
                %path,
                status = response.status().as_u16(),
                streaming = response.is_streaming(),
                elapsed = ?start.elapsed(),
                "request handled"
            );

            response
        })
    }
}
