//! File-backed stdin/stdout/stderr for the guest.

use std::fs::File;
use std::path::{Path, PathBuf};

use wasmtime_wasi::pipe::MemoryInputPipe;
use wasmtime_wasi::OutputFile;

use crate::error::Result;

/// Name of the stdin file under the stdio directory.
pub const STDIN_FILE: &str = "stdin.txt";
/// Name of the stdout capture file under the stdio directory.
pub const STDOUT_FILE: &str = "stdout.txt";
/// Name of the stderr capture file under the stdio directory.
pub const STDERR_FILE: &str = "stderr.txt";

/// Host paths bound to the guest's file descriptors 0, 1 and 2.
///
/// The names are fixed, so two executions must not share a stdio directory
/// at the same time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdioFiles {
    /// Guest standard input.
    pub stdin: PathBuf,
    /// Guest standard output.
    pub stdout: PathBuf,
    /// Guest standard error.
    pub stderr: PathBuf,
}

impl StdioFiles {
    /// Reserve the three stdio paths inside `dir` without touching the disk.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            stdin: dir.join(STDIN_FILE),
            stdout: dir.join(STDOUT_FILE),
            stderr: dir.join(STDERR_FILE),
        }
    }

    /// Write the guest's standard input.
    pub fn write_stdin(&self, text: &str) -> Result<()> {
        std::fs::write(&self.stdin, text)?;
        Ok(())
    }

    /// Open the files as WASI streams.
    ///
    /// Stdin is read up front. The output files are created or truncated so
    /// stale output from a previous run in the same directory never leaks
    /// into the next result.
    pub(crate) fn open_streams(&self) -> Result<(MemoryInputPipe, OutputFile, OutputFile)> {
        let stdin = MemoryInputPipe::new(std::fs::read(&self.stdin)?);
        let stdout = OutputFile::new(File::create(&self.stdout)?);
        let stderr = OutputFile::new(File::create(&self.stderr)?);
        Ok((stdin, stdout, stderr))
    }

    /// Captured standard output.
    pub fn read_stdout(&self) -> Result<String> {
        read_capture(&self.stdout)
    }

    /// Captured standard error.
    pub fn read_stderr(&self) -> Result<String> {
        read_capture(&self.stderr)
    }
}

/// Read a capture file as text.
///
/// A missing file reads as empty. Invalid UTF-8 from the guest is replaced
/// with U+FFFD rather than failing the whole execution.
fn read_capture(path: &Path) -> Result<String> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e.into()),
    }
}
