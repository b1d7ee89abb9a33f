//! Spindle runtime: everything that touches a route's source tree or its
//! process.
//!
//! - [`build`] compiles a route with the configured toolchain
//! - [`debug`] turns compiler output into a diagnostic page
//! - [`watch`] reports source changes for live reload
//! - [`supervisor`] launches compiled workers

pub mod build;
pub mod debug;
pub mod route;
pub mod supervisor;
pub mod watch;

pub use build::{BuildError, BuildOutput, Builder};
pub use debug::{Diagnostic, DebugPage};
pub use route::{ProjectLayout, ProtectionConfig, Route, ToolchainConfig};
pub use supervisor::{Supervisor, SupervisorConfig, SupervisorError};
pub use watch::{SourceWatcher, WatchError};
