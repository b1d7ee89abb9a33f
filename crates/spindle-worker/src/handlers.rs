//! Handler registry keyed by HTTP method.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::context::Context;
use crate::error::WorkerError;

pub const METHODS: &[&str] = &["GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "OPTIONS", "CONNECT", "TRACE"];

pub type HandlerResult = Result<(), WorkerError>;

pub type HandlerFn = Arc<dyn Fn(Context) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// What to run for a request method.
pub enum Resolved {
    Handler(HandlerFn),
    /// Nothing registered for the method and no GET to fall back to.
    NotAllowed,
}

#[derive(Default, Clone)]
pub struct Handlers {
    by_method: HashMap<&'static str, HandlerFn>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `method`. Each method takes one handler.
    pub fn on<F, Fut>(&mut self, method: &str, handler: F) -> Result<&mut Self, WorkerError>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let method = METHODS
            .iter()
            .copied()
            .find(|m| m.eq_ignore_ascii_case(method))
            .ok_or_else(|| WorkerError::UnknownMethod(method.to_string()))?;
        if self.by_method.contains_key(method) {
            return Err(WorkerError::DuplicateHandler(method.to_string()));
        }
        let boxed: HandlerFn =
            Arc::new(move |ctx: Context| -> BoxFuture<'static, HandlerResult> { Box::pin(handler(ctx)) });
        self.by_method.insert(method, boxed);
        Ok(self)
    }

    pub fn get<F, Fut>(&mut self, handler: F) -> Result<&mut Self, WorkerError>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.on("GET", handler)
    }

    pub fn post<F, Fut>(&mut self, handler: F) -> Result<&mut Self, WorkerError>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.on("POST", handler)
    }

    /// Pick the handler for `method`, falling back to GET.
    pub fn resolve(&self, method: &str) -> Resolved {
        let exact = self
            .by_method
            .iter()
            .find(|(m, _)| m.eq_ignore_ascii_case(method))
            .map(|(_, h)| h.clone());
        match exact.or_else(|| self.by_method.get("GET").cloned()) {
            Some(handler) => Resolved::Handler(handler),
            None => Resolved::NotAllowed,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_method.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ok(_ctx: Context) -> HandlerResult {
        Ok(())
    }

    #[test]
    fn duplicate_and_unknown_methods_are_rejected() {
        let mut handlers = Handlers::new();
        handlers.get(ok).unwrap();
        assert!(matches!(handlers.on("get", ok), Err(WorkerError::DuplicateHandler(m)) if m == "GET"));
        assert!(matches!(handlers.on("FETCH", ok), Err(WorkerError::UnknownMethod(_))));
    }

    #[test]
    fn unregistered_method_falls_back_to_get() {
        let mut handlers = Handlers::new();
        assert!(matches!(handlers.resolve("GET"), Resolved::NotAllowed));

        handlers.post(ok).unwrap();
        assert!(matches!(handlers.resolve("PUT"), Resolved::NotAllowed));
        assert!(matches!(handlers.resolve("post"), Resolved::Handler(_)));

        handlers.get(ok).unwrap();
        assert!(matches!(handlers.resolve("PUT"), Resolved::Handler(_)));
    }
}
