//! Engine construction and compiled-module caching.
//!
//! Compiling the guest runtime image is by far the most expensive step of a
//! session. Two layers avoid repeating it:
//!
//! - wasmtime's on-disk compilation cache, enabled in the engine config, which
//!   survives across processes;
//! - [`ModuleCache`], an in-process map from engine flavour and image
//!   fingerprint to an already compiled module.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use wasmtime::{Engine, Module};

use crate::error::{Result, SandboxError};
use crate::sandbox::image::GuestImage;

/// Engine settings that change compiled code, and therefore the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineKey {
    /// Fuel metering instrumentation.
    pub use_fuel: bool,
    /// On-disk compilation cache.
    pub cache_compiled: bool,
}

/// Build the wasmtime configuration for an engine flavour.
///
/// A failure to load the on-disk cache configuration only disables that
/// cache; it never prevents the engine from being built.
pub fn engine_config(key: EngineKey) -> wasmtime::Config {
    let mut config = wasmtime::Config::new();
    config.consume_fuel(key.use_fuel);

    if key.cache_compiled {
        if let Err(e) = config.cache_config_load_default() {
            tracing::warn!(error = %e, "compilation cache unavailable, continuing without it");
        }
    }

    config
}

/// A guest image compiled for one engine.
#[derive(Clone)]
pub struct CompiledImage {
    engine: Engine,
    module: Module,
}

impl std::fmt::Debug for CompiledImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledImage")
            .field("engine", &"<wasmtime::Engine>")
            .field("module", &self.module.name())
            .finish()
    }
}

impl CompiledImage {
    /// Create an engine for `key` and compile `image` with it.
    pub fn compile(image: &GuestImage, key: EngineKey) -> Result<Self> {
        let engine = Engine::new(&engine_config(key)).map_err(|e| {
            SandboxError::RuntimeInit(anyhow::anyhow!("failed to create engine: {}", e))
        })?;

        let module = Module::new(&engine, image.bytes()).map_err(|e| {
            SandboxError::ModuleLoad(anyhow::anyhow!("failed to compile module: {}", e))
        })?;

        tracing::debug!(
            fingerprint = image.fingerprint(),
            use_fuel = key.use_fuel,
            "compiled guest runtime image"
        );

        Ok(Self { engine, module })
    }

    /// The engine the module was compiled for.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// The compiled module.
    pub fn module(&self) -> &Module {
        &self.module
    }
}

type CacheKey = (EngineKey, u64);

/// A thread-safe cache of compiled guest images.
///
/// Entries are keyed by engine flavour and image fingerprint, so sessions
/// with and without fuel metering never share machine code.
#[derive(Debug, Default)]
pub struct ModuleCache {
    entries: RwLock<HashMap<CacheKey, CompiledImage>>,
}

impl ModuleCache {
    /// Create a new empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a cached compilation or compile the image if not present.
    pub fn get_or_compile(&self, image: &GuestImage, key: EngineKey) -> Result<CompiledImage> {
        let cache_key = (key, image.fingerprint());

        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(compiled) = entries.get(&cache_key) {
                return Ok(compiled.clone());
            }
        }

        // Compile outside any lock.
        let compiled = CompiledImage::compile(image, key)?;

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // Another thread may have finished first; keep its module.
        Ok(entries.entry(cache_key).or_insert(compiled).clone())
    }

    /// Check if an image is cached for the given engine flavour.
    pub fn contains(&self, image: &GuestImage, key: EngineKey) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.contains_key(&(key, image.fingerprint()))
    }

    /// Clear all cached modules.
    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.clear();
    }

    /// Get the number of cached modules.
    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static GLOBAL_CACHE: std::sync::LazyLock<ModuleCache> = std::sync::LazyLock::new(ModuleCache::new);

/// Get the process-wide module cache used by default executors.
pub fn global_cache() -> &'static ModuleCache {
    &GLOBAL_CACHE
}
