//! Error types for the sandbox orchestrator.
//!
//! Only faults of the sandbox itself are errors. Anything the guest does while
//! running (traps, non-zero exit, fuel exhaustion) is reported through
//! [`ExecutionResult`](crate::ExecutionResult) instead.

use thiserror::Error;

/// Errors that indicate a broken or misconfigured sandbox.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// The guest runtime image could not be located or read.
    #[error("guest runtime image not found at: {0}")]
    ImageMissing(String),

    /// Failed to set up the Wasm engine, linker or store.
    #[error("failed to initialize runtime: {0}")]
    RuntimeInit(#[source] anyhow::Error),

    /// The guest runtime image failed to compile.
    #[error("failed to compile guest runtime image: {0}")]
    ModuleLoad(#[source] anyhow::Error),

    /// The compiled module could not be instantiated against the guest environment.
    #[error("failed to instantiate guest runtime image: {0}")]
    Instantiation(#[source] anyhow::Error),

    /// The compiled module lacks a required export.
    #[error("guest runtime image does not export `{0}`")]
    MissingExport(&'static str),

    /// I/O error while provisioning the isolation directories.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The blocking execution task panicked or was cancelled.
    #[error("execution task failed: {0}")]
    TaskFailed(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SandboxError {
    /// Check if this error means the guest runtime image is unavailable.
    pub fn is_image_missing(&self) -> bool {
        matches!(self, SandboxError::ImageMissing(_))
    }

    /// Check if this error was raised by configuration validation.
    pub fn is_config(&self) -> bool {
        matches!(self, SandboxError::Config(_))
    }

    /// Check if this error comes from the compiled module being unusable.
    pub fn is_incompatible_image(&self) -> bool {
        matches!(
            self,
            SandboxError::ModuleLoad(_)
                | SandboxError::Instantiation(_)
                | SandboxError::MissingExport(_)
        )
    }
}

/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// An uncaught exception reported by the guest interpreter on stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestException {
    /// The exception type (e.g., "ValueError", "TypeError").
    pub exception_type: String,
    /// The exception message, empty if none was printed.
    pub message: String,
    /// The full traceback, if one preceded the exception line.
    pub traceback: Option<String>,
}

/// Parse a Python-style exception from captured stderr.
///
/// Picks the last line that looks like `SomethingError: message` and, when a
/// `Traceback (most recent call last):` header precedes it, keeps the
/// traceback text up to and including that line.
pub fn parse_guest_exception(stderr: &str) -> Option<GuestException> {
    if stderr.trim().is_empty() {
        return None;
    }

    let lines: Vec<&str> = stderr.lines().collect();
    let mut exception_line = None;
    let mut traceback_start = None;

    for (i, line) in lines.iter().enumerate() {
        if line.starts_with("Traceback (most recent call last):") {
            traceback_start = Some(i);
            continue;
        }
        if !line.starts_with(' ') && looks_like_exception(line) {
            exception_line = Some((i, *line));
        }
    }

    let (line_idx, exception_str) = exception_line?;
    let (exception_type, message) = match exception_str.split_once(':') {
        Some((ty, msg)) => (ty.trim().to_string(), msg.trim().to_string()),
        None => (exception_str.trim().to_string(), String::new()),
    };

    let traceback = traceback_start
        .filter(|start| *start < line_idx)
        .map(|start| lines[start..=line_idx].join("\n"));

    Some(GuestException {
        exception_type,
        message,
        traceback,
    })
}

fn looks_like_exception(line: &str) -> bool {
    const SUFFIXES: [&str; 3] = ["Error", "Exception", "Warning"];
    const STANDALONE: [&str; 4] = [
        "KeyboardInterrupt",
        "SystemExit",
        "StopIteration",
        "GeneratorExit",
    ];

    if !line.chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
        return false;
    }

    // Only the leading identifier (possibly dotted) counts as the type name.
    let name_end = line.find(|c: char| c == ':' || c.is_whitespace()).unwrap_or(line.len());
    let name = &line[..name_end];
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') {
        return false;
    }
    let short = name.rsplit('.').next().unwrap_or(name);

    SUFFIXES.iter().any(|s| short.ends_with(s)) || STANDALONE.contains(&short)
}
