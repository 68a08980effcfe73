//! Sandbox module containing all execution-related components.

pub mod cache;
pub mod config;
pub mod executor;
pub mod image;
pub mod io;
pub mod layout;
pub mod limits;
pub mod runner;
pub mod session;
