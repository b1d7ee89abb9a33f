//! Route build pipeline.
//!
//! Each build writes to `bin/build/<route>` first and is only moved to
//! `bin/endpoints/<route>` once the toolchain exits cleanly, so a failed
//! rebuild never clobbers the binary a running worker came from.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::debug::{DebugPage, Diagnostic, parse_diagnostics};
use crate::route::{ProjectLayout, Route, ToolchainConfig};

/// A successful build.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    /// Directory the watcher should observe.
    pub source_dir: PathBuf,
    /// Installed binary.
    pub binary: PathBuf,
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to run toolchain `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("build of {route} failed ({status})")]
    Failed {
        route: String,
        status: String,
        output: String,
        diagnostics: Vec<Diagnostic>,
        page: DebugPage,
    },
    #[error("failed to install binary for {route}: {source}")]
    Install {
        route: String,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    /// The diagnostic page to serve for this failure.
    pub fn page(&self, route: &str) -> DebugPage {
        match self {
            Self::Failed { page, .. } => page.clone(),
            other => DebugPage::render(route, &other.to_string(), None, None),
        }
    }
}

/// Runs the configured toolchain for routes of one project.
#[derive(Debug, Clone)]
pub struct Builder {
    layout: ProjectLayout,
    toolchain: ToolchainConfig,
}

impl Builder {
    pub fn new(layout: ProjectLayout, toolchain: ToolchainConfig) -> Self {
        Self { layout, toolchain }
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    /// Build `route` and install the binary.
    pub async fn build(&self, route: &Route) -> Result<BuildOutput, BuildError> {
        info!("Building {}", route.name());

        let source_dir = self.layout.source_dir(route);
        let entry = source_dir.join(&self.toolchain.entry);
        let out = self.layout.build_path(route.name());
        let args = self.toolchain.expand_args(&out, &entry, &source_dir);

        debug!("{} {}", self.toolchain.program, args.join(" "));

        let output = Command::new(&self.toolchain.program)
            .args(&args)
            .current_dir(self.layout.root())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| BuildError::Spawn {
                program: self.toolchain.program.clone(),
                source,
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !stderr.trim().is_empty() {
            info!("[build {}] {}", route.name(), stderr.trim_end());
        }

        if !output.status.success() {
            let diagnostics = parse_diagnostics(&stderr);
            let source = match diagnostics.first() {
                Some(d) => read_source(&d.path, &source_dir, &entry).await,
                None => None,
            };
            let page = DebugPage::render(route.name(), &stderr, diagnostics.first(), source.as_deref());
            warn!("Build of {} failed: {}", route.name(), output.status);
            return Err(BuildError::Failed {
                route: route.name().to_string(),
                status: output.status.to_string(),
                output: stderr,
                diagnostics,
                page,
            });
        }

        let binary = self.layout.endpoint_path(route.name());
        tokio::fs::rename(&out, &binary)
            .await
            .map_err(|source| BuildError::Install {
                route: route.name().to_string(),
                source,
            })?;

        info!("Built {} → {}", route.name(), binary.display());
        Ok(BuildOutput { source_dir, binary })
    }
}

/// Load the file a diagnostic points at. Relative paths resolve against the
/// route directory; if nothing readable is found, fall back to the entry file.
async fn read_source(path: &str, source_dir: &Path, entry: &Path) -> Option<String> {
    let p = Path::new(path);
    let candidates = if p.is_absolute() {
        vec![p.to_path_buf(), entry.to_path_buf()]
    } else {
        vec![source_dir.join(p), entry.to_path_buf()]
    };
    for candidate in candidates {
        if let Ok(text) = tokio::fs::read_to_string(&candidate).await {
            return Some(text);
        }
    }
    None
}
