//! Running the guest entry point and collecting its counters.

use std::time::{Duration, Instant};

use wasmtime::Trap;
use wasmtime_wasi::I32Exit;

use crate::sandbox::session::Session;

/// How the guest run ended.
///
/// Every variant is a normal outcome from the orchestrator's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The entry point returned, or the guest called `proc_exit(0)`.
    Completed,
    /// The guest called `proc_exit` with a non-zero status.
    Exited(i32),
    /// The guest trapped; carries the engine's description.
    Trapped(String),
    /// Fuel metering ran out.
    FuelExhausted,
}

impl Termination {
    /// Whether the guest finished with status 0.
    pub fn is_success(&self) -> bool {
        matches!(self, Termination::Completed)
    }

    /// The guest's exit status, if it exited rather than trapped.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Termination::Completed => Some(0),
            Termination::Exited(code) => Some(*code),
            Termination::Trapped(_) | Termination::FuelExhausted => None,
        }
    }
}

/// Counters and termination state read back after a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOutcome {
    /// How the run ended.
    pub termination: Termination,
    /// Budget minus remaining fuel, if metering was enabled.
    pub fuel_consumed: Option<u64>,
    /// Linear memory size in pages.
    pub memory_pages: u64,
    /// Linear memory size in bytes.
    pub memory_bytes: u64,
    /// Size of one page of the guest memory, in bytes.
    pub page_size: u64,
    /// Largest memory size granted during the session.
    pub peak_memory_bytes: u64,
    /// Wall-clock time spent in the entry point.
    pub duration: Duration,
}

/// Invoke the guest entry point and read back fuel and memory.
///
/// Any error raised by the call is guest behavior and is folded into
/// [`Termination`]; this function cannot fail.
pub fn run(mut session: Session) -> RawOutcome {
    let started = Instant::now();
    let call = session.start.call(&mut session.store, ());
    let duration = started.elapsed();

    let termination = match call {
        Ok(()) => Termination::Completed,
        Err(e) => classify(&e),
    };

    let fuel_consumed = session.fuel_budget.map(|budget| {
        let remaining = session.store.get_fuel().unwrap_or(0);
        budget.saturating_sub(remaining)
    });

    let memory_pages = session.memory.size(&session.store);
    let memory_bytes = session.memory.data_size(&session.store) as u64;
    let page_size = session.memory.page_size(&session.store);
    let peak_memory_bytes = session
        .store
        .data()
        .limiter
        .peak_memory()
        .max(memory_bytes);

    match &termination {
        Termination::Trapped(reason) => {
            tracing::warn!(%reason, "guest trapped");
        }
        Termination::FuelExhausted => {
            tracing::warn!(fuel_budget = ?session.fuel_budget, "guest ran out of fuel");
        }
        Termination::Completed | Termination::Exited(_) => {}
    }
    tracing::info!(
        termination = ?termination,
        fuel_consumed = ?fuel_consumed,
        memory_pages,
        elapsed_ms = duration.as_millis() as u64,
        "guest run finished"
    );

    RawOutcome {
        termination,
        fuel_consumed,
        memory_pages,
        memory_bytes,
        page_size,
        peak_memory_bytes,
        duration,
    }
}

fn classify(error: &anyhow::Error) -> Termination {
    if let Some(exit) = error.downcast_ref::<I32Exit>() {
        return match exit.0 {
            0 => Termination::Completed,
            code => Termination::Exited(code),
        };
    }

    match error.downcast_ref::<Trap>() {
        Some(Trap::OutOfFuel) => Termination::FuelExhausted,
        Some(trap) => Termination::Trapped(trap.to_string()),
        None => Termination::Trapped(error.root_cause().to_string()),
    }
}
