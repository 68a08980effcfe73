//! Sandbox configuration with builder pattern.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::error::{Result, SandboxError};

/// Fuel granted to a metered execution unless configured otherwise.
pub const DEFAULT_FUEL_BUDGET: u64 = 400_000_000;

/// Host environment variable naming a package directory to expose to the guest.
pub const PACKAGE_DIR_ENV: &str = "EXECR_PYTHONPATH";

/// Guest path where the package directory is mounted by default.
pub const DEFAULT_PACKAGE_GUEST_PATH: &str = "/__pypackages__";

/// Guest environment variable pointed at the package mount by default.
pub const DEFAULT_PACKAGE_ENV_VAR: &str = "PYTHONPATH";

/// A read-only host directory exposed to the guest at a fixed path.
///
/// The guest also receives `env_var=guest_path` so its runtime can locate
/// importable packages there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageMount {
    /// Host directory holding the packages.
    pub host_dir: PathBuf,
    /// Absolute guest path the directory is mounted at.
    pub guest_path: String,
    /// Guest environment variable set to `guest_path`.
    pub env_var: String,
}

impl PackageMount {
    /// Mount `host_dir` at `/__pypackages__` and export it as `PYTHONPATH`.
    pub fn new(host_dir: impl Into<PathBuf>) -> Self {
        Self {
            host_dir: host_dir.into(),
            guest_path: DEFAULT_PACKAGE_GUEST_PATH.to_string(),
            env_var: DEFAULT_PACKAGE_ENV_VAR.to_string(),
        }
    }

    /// Set the guest mount path.
    pub fn guest_path(mut self, path: impl Into<String>) -> Self {
        self.guest_path = path.into();
        self
    }

    /// Set the guest environment variable name.
    pub fn env_var(mut self, name: impl Into<String>) -> Self {
        self.env_var = name.into();
        self
    }

    /// Build a mount from `EXECR_PYTHONPATH`, if it is set and non-empty.
    pub fn from_env() -> Option<Self> {
        std::env::var_os(PACKAGE_DIR_ENV)
            .filter(|dir| !dir.is_empty())
            .map(Self::new)
    }

    fn validate(&self) -> Result<()> {
        if !self.guest_path.starts_with('/') || self.guest_path.trim_end_matches('/').is_empty() {
            return Err(SandboxError::Config(format!(
                "package mount guest path must be absolute and not the root: {:?}",
                self.guest_path
            )));
        }
        if self.env_var.is_empty() || self.env_var.contains('=') {
            return Err(SandboxError::Config(format!(
                "invalid package environment variable name: {:?}",
                self.env_var
            )));
        }
        if !self.host_dir.is_dir() {
            return Err(SandboxError::Config(format!(
                "package directory does not exist: {}",
                self.host_dir.display()
            )));
        }
        Ok(())
    }
}

/// Validated configuration for one sandboxed execution.
///
/// Constructed through [`RuntimeConfig::builder`]; a value of this type has a
/// positive fuel budget when metered and two existing, writable, disjoint
/// directories.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    use_fuel: bool,
    fuel_budget: u64,
    mount_root: PathBuf,
    stdio_dir: PathBuf,
    package_mount: Option<PackageMount>,
    max_memory: Option<u64>,
    cache_compiled: bool,
}

impl RuntimeConfig {
    /// Create a new builder for the given guest root and stdio directories.
    pub fn builder(
        mount_root: impl Into<PathBuf>,
        stdio_dir: impl Into<PathBuf>,
    ) -> RuntimeConfigBuilder {
        RuntimeConfigBuilder {
            mount_root: mount_root.into(),
            stdio_dir: stdio_dir.into(),
            use_fuel: false,
            fuel_budget: DEFAULT_FUEL_BUDGET,
            package_mount: None,
            max_memory: None,
            cache_compiled: true,
        }
    }

    /// Whether fuel metering is enabled.
    pub fn use_fuel(&self) -> bool {
        self.use_fuel
    }

    /// Fuel granted when metering is enabled.
    pub fn fuel_budget(&self) -> u64 {
        self.fuel_budget
    }

    /// Host directory exposed as the guest's `/`.
    pub fn mount_root(&self) -> &Path {
        &self.mount_root
    }

    /// Host directory holding the stdio capture files.
    pub fn stdio_dir(&self) -> &Path {
        &self.stdio_dir
    }

    /// Optional read-only package mount.
    pub fn package_mount(&self) -> Option<&PackageMount> {
        self.package_mount.as_ref()
    }

    /// Optional cap on guest linear memory, in bytes.
    pub fn max_memory(&self) -> Option<u64> {
        self.max_memory
    }

    /// Whether wasmtime's on-disk compilation cache is enabled.
    pub fn cache_compiled(&self) -> bool {
        self.cache_compiled
    }
}

/// Builder for [`RuntimeConfig`].
#[derive(Debug, Clone)]
pub struct RuntimeConfigBuilder {
    mount_root: PathBuf,
    stdio_dir: PathBuf,
    use_fuel: bool,
    fuel_budget: u64,
    package_mount: Option<PackageMount>,
    max_memory: Option<u64>,
    cache_compiled: bool,
}

impl RuntimeConfigBuilder {
    /// Enable or disable fuel metering.
    pub fn use_fuel(mut self, enabled: bool) -> Self {
        self.use_fuel = enabled;
        self
    }

    /// Set the fuel budget. Ignored when metering is disabled.
    pub fn fuel_budget(mut self, fuel: u64) -> Self {
        self.fuel_budget = fuel;
        self
    }

    /// Set or clear the package mount.
    pub fn package_mount(mut self, mount: Option<PackageMount>) -> Self {
        self.package_mount = mount;
        self
    }

    /// Cap guest linear memory at `bytes`.
    pub fn max_memory(mut self, bytes: u64) -> Self {
        self.max_memory = Some(bytes);
        self
    }

    /// Enable or disable wasmtime's on-disk compilation cache.
    pub fn cache_compiled(mut self, enabled: bool) -> Self {
        self.cache_compiled = enabled;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<RuntimeConfig> {
        if self.use_fuel && self.fuel_budget == 0 {
            return Err(SandboxError::Config(
                "fuel budget must be positive".to_string(),
            ));
        }

        ensure_writable_dir(&self.mount_root, "mount root")?;
        ensure_writable_dir(&self.stdio_dir, "stdio directory")?;
        ensure_disjoint(&self.mount_root, &self.stdio_dir)?;

        if let Some(mount) = &self.package_mount {
            mount.validate()?;
        }

        Ok(RuntimeConfig {
            use_fuel: self.use_fuel,
            fuel_budget: self.fuel_budget,
            mount_root: self.mount_root,
            stdio_dir: self.stdio_dir,
            package_mount: self.package_mount,
            max_memory: self.max_memory,
            cache_compiled: self.cache_compiled,
        })
    }
}

fn ensure_writable_dir(path: &Path, label: &str) -> Result<()> {
    if !path.is_dir() {
        return Err(SandboxError::Config(format!(
            "{label} is not an existing directory: {}",
            path.display()
        )));
    }

    let probe = path.join(format!(".execr-probe-{}", uuid::Uuid::new_v4()));
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&probe)
        .map_err(|e| {
            SandboxError::Config(format!("{label} is not writable: {}: {e}", path.display()))
        })?;
    std::fs::remove_file(&probe)?;
    Ok(())
}

fn ensure_disjoint(mount_root: &Path, stdio_dir: &Path) -> Result<()> {
    let mount_root = mount_root.canonicalize()?;
    let stdio_dir = stdio_dir.canonicalize()?;
    if mount_root.starts_with(&stdio_dir) || stdio_dir.starts_with(&mount_root) {
        return Err(SandboxError::Config(format!(
            "mount root and stdio directory must not overlap: {} / {}",
            mount_root.display(),
            stdio_dir.display()
        )));
    }
    Ok(())
}

/// Caller-facing options for [`execute`](crate::execute).
///
/// Directories left as `None` are provisioned in a private temporary tree
/// that is removed when the call returns.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Text fed to the guest's standard input.
    pub stdin: String,
    /// Extra guest arguments appended after the script name.
    pub args: Vec<String>,
    /// Whether fuel metering is enabled.
    pub use_fuel: bool,
    /// Fuel granted when metering is enabled.
    pub fuel_budget: u64,
    /// Caller-owned guest root directory.
    pub mount_root: Option<PathBuf>,
    /// Caller-owned stdio directory.
    pub stdio_dir: Option<PathBuf>,
    /// Optional cap on guest linear memory, in bytes.
    pub max_memory: Option<u64>,
    /// Package mount; defaults to the one named by `EXECR_PYTHONPATH`.
    pub package_mount: Option<PackageMount>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            stdin: String::new(),
            args: Vec::new(),
            use_fuel: false,
            fuel_budget: DEFAULT_FUEL_BUDGET,
            mount_root: None,
            stdio_dir: None,
            max_memory: None,
            package_mount: PackageMount::from_env(),
        }
    }
}

impl ExecuteOptions {
    /// Options with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the guest's standard input.
    pub fn stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = stdin.into();
        self
    }

    /// Set the extra guest arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Enable metering with the given budget.
    pub fn fuel(mut self, budget: u64) -> Self {
        self.use_fuel = true;
        self.fuel_budget = budget;
        self
    }

    /// Enable or disable metering, keeping the current budget.
    pub fn use_fuel(mut self, enabled: bool) -> Self {
        self.use_fuel = enabled;
        self
    }

    /// Use caller-owned directories instead of a temporary tree.
    pub fn directories(mut self, mount_root: impl Into<PathBuf>, stdio_dir: impl Into<PathBuf>) -> Self {
        self.mount_root = Some(mount_root.into());
        self.stdio_dir = Some(stdio_dir.into());
        self
    }

    /// Cap guest linear memory at `bytes`.
    pub fn max_memory(mut self, bytes: u64) -> Self {
        self.max_memory = Some(bytes);
        self
    }

    /// Set or clear the package mount.
    pub fn package_mount(mut self, mount: Option<PackageMount>) -> Self {
        self.package_mount = mount;
        self
    }
}
