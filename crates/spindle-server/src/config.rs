//! Project configuration (`spindle.json`).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use spindle_protocol::handshake::MAX_NAME_LEN;
use spindle_runtime::{ProjectLayout, Route, ToolchainConfig};
use thiserror::Error;

/// Paths the HTTP surface serves itself.
const RESERVED_PREFIXES: &[&str] = &["/static", "/favicon.ico"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid project config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("route with path `{0}` has an empty directory")]
    EmptyRouteName(String),
    #[error("route name `{0}` is longer than {MAX_NAME_LEN} bytes")]
    NameTooLong(String),
    #[error("route `{0}` is configured more than once")]
    DuplicateRoute(String),
    #[error("path `{0}` is mounted more than once")]
    DuplicatePath(String),
    #[error("path `{0}` must start with `/`")]
    InvalidPath(String),
    #[error("path `{0}` is reserved")]
    ReservedPath(String),
    #[error("authorizer `{0}` is neither a route nor a directory under src/")]
    UnknownAuthorizer(String),
    #[error("route `{0}` is protected but no authorizer is configured")]
    MissingAuthorizer(String),
}

/// Contents of a project's `spindle.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub name: String,
    /// Route name of the worker that vets protected requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorizer: Option<String>,
    /// HTML served with the 401 when the authorizer refuses, relative to the
    /// project root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unauthorized_page: Option<PathBuf>,
    #[serde(default)]
    pub toolchain: ToolchainConfig,
    #[serde(default)]
    pub routes: Vec<Route>,
}

impl ProjectConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check the route table against itself and the project on disk.
    pub fn validate(&self, layout: &ProjectLayout) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        let mut paths = HashSet::new();

        for route in &self.routes {
            let name = route.name();
            if name.is_empty() {
                return Err(ConfigError::EmptyRouteName(route.path.clone()));
            }
            if name.len() > MAX_NAME_LEN {
                return Err(ConfigError::NameTooLong(name.to_string()));
            }
            if !names.insert(name) {
                return Err(ConfigError::DuplicateRoute(name.to_string()));
            }

            let mount = route.mount_path();
            if !mount.starts_with('/') {
                return Err(ConfigError::InvalidPath(route.path.clone()));
            }
            if RESERVED_PREFIXES.iter().any(|p| mount.starts_with(p)) {
                return Err(ConfigError::ReservedPath(route.path.clone()));
            }
            if !paths.insert(mount) {
                return Err(ConfigError::DuplicatePath(mount.to_string()));
            }

            if route.protection.as_ref().is_some_and(|p| p.protected) && self.authorizer.is_none() {
                return Err(ConfigError::MissingAuthorizer(name.to_string()));
            }
        }

        if let Some(auth) = &self.authorizer {
            if auth.is_empty() || auth.len() > MAX_NAME_LEN {
                return Err(ConfigError::UnknownAuthorizer(auth.clone()));
            }
            let routed = self.routes.iter().any(|r| r.name() == auth);
            if !routed && !layout.source_root().join(auth).is_dir() {
                return Err(ConfigError::UnknownAuthorizer(auth.clone()));
            }
        }

        Ok(())
    }

    /// Read the configured 401 page, if any.
    pub fn load_unauthorized_page(&self, layout: &ProjectLayout) -> Result<Option<String>, ConfigError> {
        let Some(page) = &self.unauthorized_page else {
            return Ok(None);
        };
        let path = layout.root().join(page);
        std::fs::read_to_string(&path)
            .map(Some)
            .map_err(|source| ConfigError::Read { path, source })
    }

    /// The authorizer as a buildable route. An authorizer that is not routed
    /// is never mounted.
    pub fn authorizer_route(&self) -> Option<Route> {
        let name = self.authorizer.as_ref()?;
        Some(
            self.routes
                .iter()
                .find(|r| r.name() == name)
                .cloned()
                .unwrap_or_else(|| Route::new("", name.clone())),
        )
    }

    /// Every route that needs a worker: the route table plus an unrouted
    /// authorizer.
    pub fn workers(&self) -> Vec<(Route, bool)> {
        let auth = self.authorizer.as_deref();
        let mut out: Vec<(Route, bool)> = self
            .routes
            .iter()
            .map(|r| (r.clone(), Some(r.name()) == auth))
            .collect();
        if let Some(route) = self.authorizer_route() {
            if !out.iter().any(|(r, _)| r.name() == route.name()) {
                out.push((route, true));
            }
        }
        out
    }
}
