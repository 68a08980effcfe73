//! Per-execution file layout inside the isolation directories.

use std::path::PathBuf;

use uuid::Uuid;

use crate::error::Result;
use crate::sandbox::config::RuntimeConfig;
use crate::sandbox::io::StdioFiles;

/// `argv[0]` presented to the guest.
pub const ENTRY_NAME: &str = "python";

/// Extension of the generated source file.
pub const SOURCE_EXTENSION: &str = "py";

/// What the caller asked the guest to run.
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequest {
    /// Guest source text.
    pub code: String,
    /// Text fed to the guest's standard input.
    pub stdin: String,
    /// Extra arguments appended after the source file name.
    pub args: Vec<String>,
}

impl ExecutionRequest {
    /// A request with empty stdin and no extra arguments.
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }
}

/// A host directory bound into the guest filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// Host directory.
    pub host_dir: PathBuf,
    /// Guest path it appears at.
    pub guest_path: String,
    /// Whether the guest may only read it.
    pub read_only: bool,
}

/// The concrete layout a session mounts for one execution.
#[derive(Debug, Clone)]
pub struct EnvironmentLayout {
    /// Host path of the generated source file.
    pub source_file: PathBuf,
    /// Name of the source file as seen from the guest root.
    pub source_name: String,
    /// Stdio capture files.
    pub stdio: StdioFiles,
    /// Guest argv.
    pub argv: Vec<String>,
    /// Guest mounts; the first is always the root mount.
    pub mounts: Vec<Mount>,
    /// Guest environment variables.
    pub env: Vec<(String, String)>,
}

impl EnvironmentLayout {
    /// Write the request's files and compute the guest view.
    ///
    /// The source lands at `<mount_root>/<uuid>.py` so executions sharing a
    /// mount root never clobber each other's script. Stdout and stderr paths
    /// are only reserved here.
    pub fn prepare(config: &RuntimeConfig, request: &ExecutionRequest) -> Result<Self> {
        let source_name = format!("{}.{SOURCE_EXTENSION}", Uuid::new_v4());
        let source_file = config.mount_root().join(&source_name);
        std::fs::write(&source_file, &request.code)?;

        let stdio = StdioFiles::in_dir(config.stdio_dir());
        stdio.write_stdin(&request.stdin)?;

        let mut argv = Vec::with_capacity(2 + request.args.len());
        argv.push(ENTRY_NAME.to_string());
        argv.push(source_name.clone());
        argv.extend(request.args.iter().cloned());

        let mut mounts = vec![Mount {
            host_dir: config.mount_root().to_path_buf(),
            guest_path: "/".to_string(),
            read_only: false,
        }];
        let mut env = Vec::new();

        if let Some(package) = config.package_mount() {
            mounts.push(Mount {
                host_dir: package.host_dir.clone(),
                guest_path: package.guest_path.clone(),
                read_only: true,
            });
            env.push((package.env_var.clone(), package.guest_path.clone()));
        }

        tracing::debug!(
            source = %source_file.display(),
            mounts = mounts.len(),
            "prepared execution layout"
        );

        Ok(Self {
            source_file,
            source_name,
            stdio,
            argv,
            mounts,
            env,
        })
    }
}
