//! Prelude module for convenient imports.

pub use crate::error::{Result, SandboxError};
pub use crate::sandbox::{
    config::{ExecuteOptions, PackageMount, RuntimeConfig},
    executor::{execute, ExecutionResult, Executor},
    image::GuestImage,
    runner::Termination,
};
