//! IdGenerator port
//!
//! ULID ids for long-lived entities come from an `IdGenerator`; job ids come
//! from a `JobIdSource` shared by everything that carves jobs for one
//! processor.

use std::sync::atomic::{AtomicU64, Ordering};

use ulid::Ulid;

use crate::domain::ids::{CycleId, JobId, ViewClientId, ViewProcessId};
use crate::ports::Clock;

/// Generates ULID based ids.
///
/// # Thread Safety
/// - `Send + Sync`: shared by the processor, its processes and clients
pub trait IdGenerator: Send + Sync {
    fn generate_cycle_id(&self) -> CycleId;

    fn generate_view_process_id(&self) -> ViewProcessId;

    fn generate_view_client_id(&self) -> ViewClientId;
}

/// ULID generator whose timestamp part comes from a `Clock`.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_cycle_id(&self) -> CycleId {
        CycleId::from(self.next())
    }

    fn generate_view_process_id(&self) -> ViewProcessId {
        ViewProcessId::from(self.next())
    }

    fn generate_view_client_id(&self) -> ViewClientId {
        ViewClientId::from(self.next())
    }
}

/// Monotonic job id allocator.
///
/// Every retry fragment that replaces part of a job gets its id from here, so
/// one source must be shared by the compiler and the dispatcher.
#[derive(Debug)]
pub struct JobIdSource {
    next: AtomicU64,
}

impl JobIdSource {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn next_id(&self) -> JobId {
        JobId::new(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for JobIdSource {
    fn default() -> Self {
        Self::new()
    }
}
