//! Environment a worker process is started with.

/// Route name the worker registers under.
pub const ROUTE: &str = "ROUTE";
/// Set to `1` for the authorizer worker.
pub const AUTHORIZER: &str = "AUTHORIZER";
/// Registration listener address, `host:port`.
pub const REGISTRY_ADDR: &str = "SPINDLE_REGISTRY_ADDR";
/// Session bridge address, `host:port`.
pub const RPC_ADDR: &str = "SPINDLE_RPC_ADDR";

pub const DEFAULT_REGISTRY_ADDR: &str = "127.0.0.1:11000";
pub const DEFAULT_RPC_ADDR: &str = "127.0.0.1:12000";
