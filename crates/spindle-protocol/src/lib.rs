//! Spindle protocol types.
//!
//! Everything that crosses a process boundary between the coordinator and a
//! worker lives here: the registration handshake, session ids, response
//! chunks and the JSON-RPC envelope used by the session bridge.

pub mod chunk;
pub mod env;
pub mod error;
pub mod handshake;
pub mod jsonrpc;
pub mod methods;
pub mod session;

pub use chunk::Chunk;
pub use error::{RpcError, RpcErrorCode};
pub use handshake::{HandshakeError, MAGIC};
pub use jsonrpc::{RpcRequest, RpcResponse, RpcResult, RequestId};
pub use methods::{AcceptParams, AcceptResult, CloseParams, FormValues, Methods, WriteParams};
pub use session::SessionId;
