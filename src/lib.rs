//! # execr
//!
//! Run untrusted scripts inside a WebAssembly sandbox.
//!
//! The guest runtime image (by default a Python interpreter compiled to WASI)
//! runs in Wasmtime with:
//!
//! - **Filesystem isolation**: the guest sees one host directory as `/`, plus
//!   an optional read-only package directory
//! - **Captured stdio**: stdin, stdout and stderr are host files
//! - **CPU bounding**: optional fuel metering with a fixed budget
//! - **No network or process access**: no sockets and no subprocesses
//!
//! ## Example
//!
//! ```rust,ignore
//! use execr::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let options = ExecuteOptions::new().stdin("abc").fuel(50_000_000);
//!     let result = execute("import sys; print(sys.stdin.read())", &options)?;
//!
//!     assert_eq!(result.stdout, "abc\n");
//!     assert!(result.fuel_consumed.is_some());
//!     Ok(())
//! }
//! ```
//!
//! ## Failure model
//!
//! [`execute`] returns an error only when the sandbox itself is broken: the
//! image is missing or does not compile, required exports are absent, or the
//! isolation directories cannot be provisioned. Whatever the guest does
//! (raise, exit non-zero, trap, run out of fuel) ends up in the returned
//! [`ExecutionResult`].

pub mod error;
pub mod prelude;
pub mod sandbox;

// Re-export main types at crate root for convenience
pub use error::{GuestException, Result, SandboxError};
pub use sandbox::cache::{global_cache, ModuleCache};
pub use sandbox::config::{ExecuteOptions, PackageMount, RuntimeConfig, RuntimeConfigBuilder};
pub use sandbox::executor::{execute, ExecutionResult, Executor, Workspace};
pub use sandbox::image::{image_bytes, GuestImage};
pub use sandbox::layout::ExecutionRequest;
pub use sandbox::runner::Termination;
