//! Spindle Transport Layer
//!
//! Two TCP listeners sit between the coordinator and its workers:
//! - the registration listener, which validates the handshake and hands each
//!   worker connection to a [`RegistrationSink`]
//! - the session bridge listener, which frames newline-delimited JSON-RPC and
//!   routes every call to a [`RequestHandler`]
//!
//! Both are decoupled from server state through those traits.

pub mod registration;
pub mod rpc;

pub use registration::{RegistrationConfig, RegistrationListener, RegistrationSink};
pub use rpc::{RequestHandler, RpcConfig, RpcServer};
