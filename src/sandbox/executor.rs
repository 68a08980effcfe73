//! Top-level execution: workspace lifecycle, pipeline and result assembly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;

use crate::error::{parse_guest_exception, GuestException, Result, SandboxError};
use crate::sandbox::cache::{global_cache, CompiledImage, EngineKey};
use crate::sandbox::config::{ExecuteOptions, RuntimeConfig};
use crate::sandbox::image::{default_image, GuestImage};
use crate::sandbox::layout::{EnvironmentLayout, ExecutionRequest};
use crate::sandbox::runner::{self, RawOutcome, Termination};
use crate::sandbox::session::Session;

/// Result of one guest execution.
///
/// Produced whenever the sandbox itself works, regardless of whether the
/// guest completed, exited non-zero, trapped or ran out of fuel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Captured stdout output.
    pub stdout: String,
    /// Captured stderr output.
    pub stderr: String,
    /// Fuel used, present only when metering was enabled.
    pub fuel_consumed: Option<u64>,
    /// Guest linear memory size in pages at the end of the run.
    pub memory_pages: u64,
    /// Guest linear memory size in bytes at the end of the run.
    pub memory_bytes: u64,
    /// Bytes per guest memory page.
    pub page_size: u64,
    /// Largest memory size granted during the run.
    pub peak_memory_bytes: u64,
    /// How the guest run ended.
    pub termination: Termination,
    /// Time spent inside the guest entry point.
    pub duration: Duration,
}

impl ExecutionResult {
    /// Check if the guest finished with status 0.
    pub fn is_success(&self) -> bool {
        self.termination.is_success()
    }

    /// The guest's exit status, if it exited rather than trapped.
    pub fn exit_code(&self) -> Option<i32> {
        self.termination.exit_code()
    }

    /// Check if the run was cut short by fuel metering.
    pub fn fuel_exhausted(&self) -> bool {
        self.termination == Termination::FuelExhausted
    }

    /// The uncaught exception the guest interpreter printed, if any.
    pub fn guest_exception(&self) -> Option<GuestException> {
        parse_guest_exception(&self.stderr)
    }
}

/// Combine captured stdio with the runner's counters.
pub fn assemble(layout: &EnvironmentLayout, outcome: RawOutcome) -> Result<ExecutionResult> {
    Ok(ExecutionResult {
        stdout: layout.stdio.read_stdout()?,
        stderr: layout.stdio.read_stderr()?,
        fuel_consumed: outcome.fuel_consumed,
        memory_pages: outcome.memory_pages,
        memory_bytes: outcome.memory_bytes,
        page_size: outcome.page_size,
        peak_memory_bytes: outcome.peak_memory_bytes,
        termination: outcome.termination,
        duration: outcome.duration,
    })
}

/// The directories one execution runs in.
///
/// Directories the caller did not supply live in a private temporary tree
/// that is removed when the workspace is dropped, on every exit path.
/// Caller-supplied directories are created if missing and never removed.
#[derive(Debug)]
pub struct Workspace {
    mount_root: PathBuf,
    stdio_dir: PathBuf,
    temp: Option<TempDir>,
}

impl Workspace {
    /// Provision the mount root and stdio directory.
    pub fn provision(mount_root: Option<&Path>, stdio_dir: Option<&Path>) -> Result<Self> {
        let mut temp = None;
        let mount_root = match mount_root {
            Some(path) => path.to_path_buf(),
            None => in_temp(&mut temp, "mount_fs")?,
        };
        let stdio_dir = match stdio_dir {
            Some(path) => path.to_path_buf(),
            None => in_temp(&mut temp, "stdio")?,
        };

        std::fs::create_dir_all(&mount_root)?;
        std::fs::create_dir_all(&stdio_dir)?;

        Ok(Self {
            mount_root,
            stdio_dir,
            temp,
        })
    }

    /// Host directory exposed as the guest root.
    pub fn mount_root(&self) -> &Path {
        &self.mount_root
    }

    /// Host directory holding the stdio files.
    pub fn stdio_dir(&self) -> &Path {
        &self.stdio_dir
    }

    /// Whether any part of the workspace is temporary.
    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }
}

fn in_temp(temp: &mut Option<TempDir>, name: &str) -> Result<PathBuf> {
    let dir = match temp.take() {
        Some(dir) => dir,
        None => TempDir::with_prefix("execr")?,
    };
    let path = dir.path().join(name);
    *temp = Some(dir);
    Ok(path)
}

/// Runs guest code against a guest runtime image.
///
/// The default executor uses the packaged image and the process-wide
/// module cache.
#[derive(Debug, Clone)]
pub struct Executor {
    image: Option<GuestImage>,
    use_cache: bool,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    /// Executor for the default guest runtime image.
    pub fn new() -> Self {
        Self {
            image: None,
            use_cache: true,
        }
    }

    /// Executor for a caller-provided guest runtime image.
    pub fn with_image(image: GuestImage) -> Self {
        Self {
            image: Some(image),
            use_cache: true,
        }
    }

    /// Compile the image afresh for every session instead of using the
    /// process-wide module cache.
    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    /// Whether sessions reuse modules from the process-wide cache.
    pub fn is_using_cache(&self) -> bool {
        self.use_cache
    }

    /// The guest runtime image, loading the default one on first use.
    pub fn image(&self) -> Result<GuestImage> {
        match &self.image {
            Some(image) => Ok(image.clone()),
            None => default_image(),
        }
    }

    /// Run `code` in a fresh sandbox.
    ///
    /// Directories not supplied in `options` are provisioned in a temporary
    /// tree that is removed before this returns.
    pub fn execute(&self, code: &str, options: &ExecuteOptions) -> Result<ExecutionResult> {
        let workspace =
            Workspace::provision(options.mount_root.as_deref(), options.stdio_dir.as_deref())?;

        let mut builder = RuntimeConfig::builder(workspace.mount_root(), workspace.stdio_dir())
            .use_fuel(options.use_fuel)
            .fuel_budget(options.fuel_budget)
            .package_mount(options.package_mount.clone());
        if let Some(max_memory) = options.max_memory {
            builder = builder.max_memory(max_memory);
        }
        let config = builder.build()?;

        let request = ExecutionRequest {
            code: code.to_string(),
            stdin: options.stdin.clone(),
            args: options.args.clone(),
        };

        self.execute_with_config(&config, &request)
    }

    /// Run a request against an already validated configuration.
    ///
    /// The caller owns the configured directories.
    pub fn execute_with_config(
        &self,
        config: &RuntimeConfig,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult> {
        let span = tracing::info_span!(
            "execute",
            use_fuel = config.use_fuel(),
            mount_root = %config.mount_root().display()
        );
        let _enter = span.enter();

        let image = self.image()?;
        let key = EngineKey {
            use_fuel: config.use_fuel(),
            cache_compiled: config.cache_compiled(),
        };
        let compiled = if self.use_cache {
            global_cache().get_or_compile(&image, key)?
        } else {
            CompiledImage::compile(&image, key)?
        };

        let layout = EnvironmentLayout::prepare(config, request)?;
        let session = Session::build(config, &layout, &compiled)?;
        let outcome = runner::run(session);
        assemble(&layout, outcome)
    }

    /// Run `code` on tokio's blocking pool.
    pub async fn execute_async(
        &self,
        code: impl Into<String>,
        options: ExecuteOptions,
    ) -> Result<ExecutionResult> {
        let executor = self.clone();
        let code = code.into();

        tokio::task::spawn_blocking(move || executor.execute(&code, &options))
            .await
            .map_err(|e| SandboxError::TaskFailed(e.to_string()))?
    }
}

/// Run `code` with the default executor.
///
/// ```rust,ignore
/// use execr::{execute, ExecuteOptions};
///
/// let result = execute("print('hello')", &ExecuteOptions::new())?;
/// assert_eq!(result.stdout, "hello\n");
/// ```
pub fn execute(code: &str, options: &ExecuteOptions) -> Result<ExecutionResult> {
    Executor::new().execute(code, options)
}
