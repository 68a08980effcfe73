//! Guest session construction: WASI context, store and instance.

use wasmtime::{Linker, Memory, Store, TypedFunc};
use wasmtime_wasi::preview1;
use wasmtime_wasi::{DirPerms, FilePerms, WasiCtxBuilder};

use crate::error::{Result, SandboxError};
use crate::sandbox::cache::CompiledImage;
use crate::sandbox::config::RuntimeConfig;
use crate::sandbox::layout::EnvironmentLayout;
use crate::sandbox::limits::{StoreData, StoreLimiterExt};

/// WASI command entry point.
pub const ENTRY_EXPORT: &str = "_start";

/// Linear memory export read back after the run.
pub const MEMORY_EXPORT: &str = "memory";

/// An instantiated guest, ready to run.
pub struct Session {
    pub(crate) store: Store<StoreData>,
    pub(crate) start: TypedFunc<(), ()>,
    pub(crate) memory: Memory,
    pub(crate) fuel_budget: Option<u64>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("fuel_budget", &self.fuel_budget)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Wire `layout` into a WASI context and instantiate `compiled` against it.
    ///
    /// The guest gets exactly the mounts, environment, argv and stdio listed
    /// in the layout. Nothing from the host process environment is inherited
    /// and no sockets are granted.
    pub fn build(
        config: &RuntimeConfig,
        layout: &EnvironmentLayout,
        compiled: &CompiledImage,
    ) -> Result<Self> {
        let mut builder = WasiCtxBuilder::new();

        for mount in &layout.mounts {
            let (dir_perms, file_perms) = if mount.read_only {
                (DirPerms::READ, FilePerms::READ)
            } else {
                (DirPerms::all(), FilePerms::all())
            };
            builder
                .preopened_dir(&mount.host_dir, &mount.guest_path, dir_perms, file_perms)
                .map_err(|e| {
                    SandboxError::RuntimeInit(anyhow::anyhow!(
                        "failed to mount {} at {}: {}",
                        mount.host_dir.display(),
                        mount.guest_path,
                        e
                    ))
                })?;
        }

        for (key, value) in &layout.env {
            builder.env(key, value);
        }

        let (stdin, stdout, stderr) = layout.stdio.open_streams()?;
        let wasi = builder
            .args(layout.argv.as_slice())
            .stdin(stdin)
            .stdout(stdout)
            .stderr(stderr)
            .allow_tcp(false)
            .allow_udp(false)
            .build_p1();

        let mut store = Store::new(compiled.engine(), StoreData::new(config.max_memory(), wasi));
        store.configure_limiter();

        // Granted before instantiation so a start section is metered too.
        let fuel_budget = if config.use_fuel() {
            store.set_fuel(config.fuel_budget()).map_err(|e| {
                SandboxError::RuntimeInit(anyhow::anyhow!("failed to set fuel: {}", e))
            })?;
            Some(config.fuel_budget())
        } else {
            None
        };

        let mut linker = Linker::new(compiled.engine());
        preview1::add_to_linker_sync(&mut linker, |data: &mut StoreData| &mut data.wasi)
            .map_err(|e| SandboxError::RuntimeInit(anyhow::anyhow!("failed to link WASI: {}", e)))?;

        let instance = linker
            .instantiate(&mut store, compiled.module())
            .map_err(SandboxError::Instantiation)?;

        let start = instance
            .get_typed_func::<(), ()>(&mut store, ENTRY_EXPORT)
            .map_err(|_| SandboxError::MissingExport(ENTRY_EXPORT))?;
        let memory = instance
            .get_memory(&mut store, MEMORY_EXPORT)
            .ok_or(SandboxError::MissingExport(MEMORY_EXPORT))?;

        tracing::debug!(
            argv = ?layout.argv,
            fuel_budget = ?fuel_budget,
            max_memory = ?config.max_memory(),
            "guest session instantiated"
        );

        Ok(Self {
            store,
            start,
            memory,
            fuel_budget,
        })
    }

    /// Fuel granted to this session, if metering is enabled.
    pub fn fuel_budget(&self) -> Option<u64> {
        self.fuel_budget
    }
}
