//! Spindle server: the coordinator between HTTP clients and route workers.
//!
//! Owns the worker registry and session store, implements the transport
//! traits ([`spindle_transport::RegistrationSink`] and
//! [`spindle_transport::RequestHandler`]) and serves the HTTP surface.

pub mod auth;
pub mod bridge;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod http;
pub mod pages;
pub mod registry;
pub mod server;
pub mod sessions;
pub mod target;

pub use auth::AuthorizationGate;
pub use bridge::SessionBridge;
pub use config::{ConfigError, ProjectConfig};
pub use coordinator::Coordinator;
pub use dispatcher::{DispatchRequest, Dispatcher, Outcome};
pub use http::{AppState, redirect_router, router};
pub use registry::{Endpoint, WorkerHandle, WorkerRegistry};
pub use server::{ServerError, ServerOptions, Spindle};
pub use sessions::{Session, SessionError, SessionRequest, SessionStore};
pub use target::{CaptureTarget, ResponseTarget, StreamingTarget};
