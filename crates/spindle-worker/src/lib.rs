//! Spindle worker SDK.
//!
//! A worker is the process behind one route. It registers with the
//! coordinator, receives a session id per request, and answers through the
//! session bridge.
//!
//! ```no_run
//! use spindle_worker::{Context, Handlers, WorkerError};
//!
//! async fn hello(ctx: Context) -> Result<(), WorkerError> {
//!     ctx.set_content_type("text/plain").await?;
//!     ctx.echo("hello").await
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), WorkerError> {
//!     let mut handlers = Handlers::new();
//!     handlers.get(hello)?;
//!     spindle_worker::run(handlers).await
//! }
//! ```

pub mod client;
pub mod context;
pub mod error;
pub mod handlers;
pub mod worker;

pub use client::RpcClient;
pub use context::Context;
pub use error::WorkerError;
pub use handlers::{HandlerResult, Handlers};
pub use worker::{Worker, WorkerConfig, run};
