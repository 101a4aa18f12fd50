//! Domain identifiers (strongly-typed IDs).
//!
//! Long-lived entities (cycles, view processes, view clients) use ULID based
//! ids with a phantom marker so they cannot be mixed up. Job ids are plain
//! monotonic counters allocated by a [`JobIdSource`](crate::ports::JobIdSource)
//! because a retried fragment must be able to carry the exact id of the job it
//! replaces.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait providing the display prefix of an id type.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic ULID backed id.
///
/// `T` only exists at compile time; `Id<T>` is the same size as a `Ulid`.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// Fresh id from the system clock and thread rng.
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Cycle {}

impl IdMarker for Cycle {
    fn prefix() -> &'static str {
        "cycle-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ViewProcess {}

impl IdMarker for ViewProcess {
    fn prefix() -> &'static str {
        "viewprocess-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ViewClient {}

impl IdMarker for ViewClient {
    fn prefix() -> &'static str {
        "viewclient-"
    }
}

/// Identifier of one computation cycle.
pub type CycleId = Id<Cycle>;

/// Identifier of a view process (one per running view definition).
pub type ViewProcessId = Id<ViewProcess>;

/// Identifier of a view client (one per subscriber).
pub type ViewClientId = Id<ViewClient>;

/// Identifier of a calculation job.
///
/// Unique and increasing within a [`JobIdSource`](crate::ports::JobIdSource).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(u64);

impl JobId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let cycle = CycleId::generate();
        let process = ViewProcessId::generate();
        let client = ViewClientId::generate();

        assert!(cycle.to_string().starts_with("cycle-"));
        assert!(process.to_string().starts_with("viewprocess-"));
        assert!(client.to_string().starts_with("viewclient-"));

        // let _: CycleId = client; // <- does not compile
    }

    #[test]
    fn ulid_ids_can_be_serialized() {
        let id = ViewClientId::generate();
        let serialized = serde_json::to_string(&id).unwrap();
        let back: ViewClientId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;
        assert_eq!(size_of::<CycleId>(), size_of::<Ulid>());
    }

    #[test]
    fn job_ids_order_by_value() {
        assert!(JobId::new(1) < JobId::new(2));
        assert_eq!(JobId::new(7).to_string(), "job-7");
        assert_eq!(serde_json::to_string(&JobId::new(7)).unwrap(), "7");
    }
}
