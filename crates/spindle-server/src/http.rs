//! HTTP surface: the axum router for configured routes plus the plain-port
//! redirect app.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::extract::{ConnectInfo, Form, FromRequest, Query, RawPathParams, Request};
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{any, get};
use spindle_protocol::FormValues;
use spindle_runtime::Route;
use tower_http::services::ServeDir;
use tracing::{debug, error};

use crate::auth::AuthorizationGate;
use crate::dispatcher::{DispatchRequest, Dispatcher, SERVER_NAME};
use crate::pages;
use crate::target::StreamingTarget;

/// Shared by every route handler.
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub gate: Arc<AuthorizationGate>,
}

/// Router serving `routes`, `/static/*` from `static_dir`, the favicon and a
/// templated 404.
pub fn router(state: Arc<AppState>, routes: &[Route], static_dir: &Path) -> Router {
    let mut app = Router::new();
    for route in routes {
        debug!("Mounting {} at {}", route.name(), route.mount_path());
        let state = state.clone();
        let route_cfg = Arc::new(route.clone());
        app = app.route(
            route.mount_path(),
            any(move |params: RawPathParams, req: Request| {
                let state = state.clone();
                let route = route_cfg.clone();
                async move { serve_route(state, route, params, req).await }
            }),
        );
    }

    app.nest_service("/static", ServeDir::new(static_dir))
        .route("/favicon.ico", get(favicon))
        .fallback(not_found)
}

async fn serve_route(state: Arc<AppState>, route: Arc<Route>, params: RawPathParams, req: Request) -> Response {
    let path_args = params
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let request = match read_request(req).await {
        Ok(mut request) => {
            request.path_args = path_args;
            request
        }
        Err(rejection) => return rejection,
    };

    let (mut target, head_rx) = StreamingTarget::new();
    tokio::spawn(async move {
        state
            .gate
            .serve(&state.dispatcher, &route, request, &mut target)
            .await;
        target.finish();
    });

    match head_rx.await {
        Ok(response) => response,
        Err(_) => {
            error!("Dispatch ended without a response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Pull method, headers, query and urlencoded form fields out of `req`.
async fn read_request(req: Request) -> Result<DispatchRequest, Response> {
    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));
    let method = req.method().clone();

    let query = Query::<Vec<(String, String)>>::try_from_uri(req.uri())
        .map(|Query(pairs)| pairs)
        .unwrap_or_default();

    let mut request = DispatchRequest::new(remote, method.as_str());
    request.headers = flatten_headers(req.headers());
    request.form = group(&query);
    request.query = query;

    if method != Method::GET && method != Method::HEAD && is_form(req.headers()) {
        let Form(fields) = Form::<Vec<(String, String)>>::from_request(req, &())
            .await
            .map_err(IntoResponse::into_response)?;
        for (key, value) in fields {
            request.form.entry(key).or_default().push(value);
        }
    }

    Ok(request)
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"))
}

fn group(pairs: &[(String, String)]) -> FormValues {
    let mut form = FormValues::new();
    for (key, value) in pairs {
        form.entry(key.clone()).or_default().push(value.clone());
    }
    form
}

fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else { continue };
        out.entry(name.as_str().to_string())
            .and_modify(|v| {
                v.push_str(", ");
                v.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    out
}

async fn favicon() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/x-icon")], pages::FAVICON.as_slice())
}

async fn not_found(uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        [(header::SERVER, SERVER_NAME)],
        Html(pages::not_found(uri.path())),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Plain-port redirect
// ─────────────────────────────────────────────────────────────────────────────

const REDIRECT_COMMENT: &str = "Plain HTTP is not served here; use HTTPS";

/// App for the plain port: every request is sent to the secure port.
pub fn redirect_router(secure_port: u16) -> Router {
    Router::new().fallback(move |headers: HeaderMap, uri: Uri| async move { redirect(&headers, &uri, secure_port) })
}

fn redirect(headers: &HeaderMap, uri: &Uri, secure_port: u16) -> Response {
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(strip_port)
        .unwrap_or("localhost");
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let location = format!("https://{host}:{secure_port}{path}");

    (
        StatusCode::TEMPORARY_REDIRECT,
        [
            (header::LOCATION, location),
            (header::SERVER, SERVER_NAME.to_string()),
            (header::HeaderName::from_static("x-comment"), REDIRECT_COMMENT.to_string()),
        ],
    )
        .into_response()
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        // [v6]:port
        return host.split_once(']').map(|(h, _)| &host[..h.len() + 1]).unwrap_or(host);
    }
    host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::WorkerRegistry;
    use crate::sessions::SessionStore;
    use axum::body::{Body, to_bytes};
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(dir: &Path) -> Router {
        let registry = WorkerRegistry::new();
        let dispatcher = Arc::new(Dispatcher::new(registry, Arc::new(SessionStore::new()), Duration::from_secs(1)));
        let state = Arc::new(AppState {
            dispatcher,
            gate: Arc::new(AuthorizationGate::new(None)),
        });
        router(state, &[Route::new("/blog/{slug}", "blog")], dir)
    }

    async fn text(response: Response) -> String {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn unregistered_route_is_still_loading() {
        let dir = tempfile::TempDir::new().unwrap();
        let response = app(dir.path())
            .oneshot(axum::http::Request::builder().uri("/blog/hello").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::SERVER], "spindle");
        assert_eq!(
            text(response).await,
            "Endpoint blog is still loading. Try again for a few seconds"
        );
    }

    #[tokio::test]
    async fn unknown_path_gets_templated_404() {
        let dir = tempfile::TempDir::new().unwrap();
        let response = app(dir.path())
            .oneshot(axum::http::Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(text(response).await.contains("Nothing lives at /nope."));
    }

    #[tokio::test]
    async fn serves_static_files_and_favicon() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("site.css"), "body{}").unwrap();

        let response = app(dir.path())
            .oneshot(axum::http::Request::builder().uri("/static/site.css").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(text(response).await, "body{}");

        let response = app(dir.path())
            .oneshot(axum::http::Request::builder().uri("/favicon.ico").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/x-icon");
    }

    #[tokio::test]
    async fn plain_port_redirects_to_https() {
        let response = redirect_router(8443)
            .oneshot(
                axum::http::Request::builder()
                    .uri("/blog/hello?x=1")
                    .header(header::HOST, "example.com:8080")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://example.com:8443/blog/hello?x=1"
        );
        assert!(response.headers().contains_key("x-comment"));
    }

    #[test]
    fn strips_ports_from_hosts() {
        assert_eq!(strip_port("example.com:8080"), "example.com");
        assert_eq!(strip_port("example.com"), "example.com");
        assert_eq!(strip_port("[::1]:8080"), "[::1]");
    }

    #[test]
    fn repeated_headers_are_joined() {
        let mut headers = HeaderMap::new();
        headers.append("accept", "text/html".parse().unwrap());
        headers.append("accept", "text/plain".parse().unwrap());
        assert_eq!(flatten_headers(&headers)["accept"], "text/html, text/plain");
    }
}
