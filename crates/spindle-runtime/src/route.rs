//! Routes, toolchain settings and the on-disk project layout.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Name of the route served at `/` whose source is `src/` itself.
pub const ROOT_ROUTE: &str = "root";

/// A configured path mapped to one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Path pattern, e.g. `/blog/{slug}`. Empty for the root route.
    #[serde(default)]
    pub path: String,
    /// Route name; also the directory under `src/` holding its source.
    pub directory: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protection: Option<ProtectionConfig>,
}

/// Authorization settings for a route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionConfig {
    #[serde(default)]
    pub protected: bool,
    /// Session deadline override for this route, in seconds.
    #[serde(default, rename = "timeout")]
    pub timeout_secs: Option<u64>,
    /// HTTP methods the gate applies to. Empty means every method.
    #[serde(default)]
    pub activation: Vec<String>,
}

impl Route {
    pub fn new(path: impl Into<String>, directory: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            directory: directory.into(),
            protection: None,
        }
    }

    pub fn root() -> Self {
        Self::new("", ROOT_ROUTE)
    }

    pub fn name(&self) -> &str {
        &self.directory
    }

    /// The root route builds from `src/` itself.
    pub fn is_root(&self) -> bool {
        self.directory == ROOT_ROUTE
    }

    /// Path the HTTP router mounts this route on.
    pub fn mount_path(&self) -> &str {
        if self.path.is_empty() { "/" } else { &self.path }
    }

    /// Whether the authorization gate runs for `method`.
    pub fn requires_authorization(&self, method: &str) -> bool {
        match &self.protection {
            Some(p) if p.protected => {
                p.activation.is_empty() || p.activation.iter().any(|m| m.eq_ignore_ascii_case(method))
            }
            _ => false,
        }
    }

    pub fn timeout_secs(&self) -> Option<u64> {
        self.protection.as_ref().and_then(|p| p.timeout_secs)
    }
}

/// How a route's source is turned into a binary.
///
/// `{out}`, `{src}` and `{dir}` in `args` expand to the output binary, the
/// entry file and the route's source directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Entry file inside the route directory.
    pub entry: String,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            program: "go".into(),
            args: vec!["build".into(), "-o".into(), "{out}".into(), "{src}".into()],
            entry: "main.go".into(),
        }
    }
}

impl ToolchainConfig {
    pub fn expand_args(&self, out: &Path, src: &Path, dir: &Path) -> Vec<String> {
        self.args
            .iter()
            .map(|a| {
                a.replace("{out}", &out.to_string_lossy())
                    .replace("{src}", &src.to_string_lossy())
                    .replace("{dir}", &dir.to_string_lossy())
            })
            .collect()
    }
}

/// Paths of a project on disk.
///
/// ```text
/// <root>/src/<route>/...        route sources (root route: <root>/src)
/// <root>/static/...             served under /static/
/// <root>/bin/build/<route>      fresh build output
/// <root>/bin/endpoints/<route>  binary the supervisor launches
/// ```
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source_root(&self) -> PathBuf {
        self.root.join("src")
    }

    pub fn static_dir(&self) -> PathBuf {
        self.root.join("static")
    }

    pub fn run_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    pub fn build_dir(&self) -> PathBuf {
        self.run_dir().join("build")
    }

    pub fn endpoints_dir(&self) -> PathBuf {
        self.run_dir().join("endpoints")
    }

    pub fn source_dir(&self, route: &Route) -> PathBuf {
        if route.is_root() {
            self.source_root()
        } else {
            self.source_root().join(&route.directory)
        }
    }

    pub fn build_path(&self, name: &str) -> PathBuf {
        self.build_dir().join(name)
    }

    pub fn endpoint_path(&self, name: &str) -> PathBuf {
        self.endpoints_dir().join(name)
    }

    /// Create the run-scoped directories.
    pub fn prepare(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.build_dir())?;
        std::fs::create_dir_all(self.endpoints_dir())?;
        Ok(())
    }

    /// Remove everything under the run directory.
    pub fn clean(&self) -> std::io::Result<()> {
        match std::fs::remove_dir_all(self.run_dir()) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_route_uses_src_dir() {
        let layout = ProjectLayout::new("/p");
        assert_eq!(layout.source_dir(&Route::root()), PathBuf::from("/p/src"));
        assert_eq!(layout.source_dir(&Route::new("/blog", "blog")), PathBuf::from("/p/src/blog"));
        assert_eq!(Route::root().mount_path(), "/");
    }

    #[test]
    fn activation_filters_methods() {
        let mut route = Route::new("/admin", "admin");
        assert!(!route.requires_authorization("GET"));

        route.protection = Some(ProtectionConfig {
            protected: true,
            timeout_secs: None,
            activation: vec!["post".into()],
        });
        assert!(route.requires_authorization("POST"));
        assert!(!route.requires_authorization("GET"));

        route.protection.as_mut().unwrap().activation.clear();
        assert!(route.requires_authorization("GET"));
    }

    #[test]
    fn toolchain_placeholders_expand() {
        let tc = ToolchainConfig::default();
        let args = tc.expand_args(Path::new("/o/blog"), Path::new("/s/blog/main.go"), Path::new("/s/blog"));
        assert_eq!(args, vec!["build", "-o", "/o/blog", "/s/blog/main.go"]);
    }
}
