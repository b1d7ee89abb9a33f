//! Authorization gate for protected routes.
//!
//! The authorizer is an ordinary worker. Its session sees the same request
//! context as the real one; whatever it writes is captured rather than sent.
//! A captured 403 runs the failure handler, anything else lets the request
//! through with the captured body attached as `authorization`. An authorizer
//! that is still loading, broken or unreachable also runs the failure
//! handler; its own answer is never shown.

use std::sync::Arc;

use axum::http::StatusCode;
use bytes::Bytes;
use spindle_runtime::Route;
use tracing::{info, warn};

use crate::dispatcher::{DispatchRequest, Dispatcher, Outcome};
use crate::pages;
use crate::target::{CaptureTarget, ResponseTarget};

pub struct AuthorizationGate {
    authorizer: Option<Route>,
    failure_page: Arc<str>,
}

impl AuthorizationGate {
    pub fn new(authorizer: Option<Route>) -> Self {
        Self {
            authorizer,
            failure_page: pages::unauthorized().into(),
        }
    }

    /// Replace the built-in 401 page.
    pub fn with_failure_page(mut self, html: impl Into<Arc<str>>) -> Self {
        self.failure_page = html.into();
        self
    }

    pub fn authorizer(&self) -> Option<&Route> {
        self.authorizer.as_ref()
    }

    /// Dispatch `request` to `route`, vetting it first when the route asks
    /// for it.
    pub async fn serve<T: ResponseTarget>(
        &self,
        dispatcher: &Dispatcher,
        route: &Route,
        mut request: DispatchRequest,
        target: &mut T,
    ) -> Outcome {
        let authorizer = match &self.authorizer {
            Some(authorizer) if route.requires_authorization(&request.method) => authorizer,
            _ => return dispatcher.dispatch(route, request, target).await,
        };

        let mut capture = CaptureTarget::new();
        let outcome = dispatcher.dispatch(authorizer, request.clone(), &mut capture).await;
        if outcome != Outcome::Completed {
            warn!("Authorizer {} did not complete ({outcome:?}); refusing {}", authorizer.name(), route.name());
            self.fail(target).await;
            return outcome;
        }

        if capture.status() == StatusCode::FORBIDDEN {
            info!("Request to {} refused by authorizer", route.name());
            self.fail(target).await;
            return Outcome::Completed;
        }

        request.authorization = Some(capture.body_text());
        dispatcher.dispatch(route, request, target).await
    }

    async fn fail<T: ResponseTarget>(&self, target: &mut T) {
        target.set_status(StatusCode::UNAUTHORIZED);
        target.set_content_type("text/html; charset=utf-8");
        target.write(Bytes::copy_from_slice(self.failure_page.as_bytes())).await;
    }
}
