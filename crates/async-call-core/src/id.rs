//! Correlation ID generation.

use crate::protocol::Id;
use std::sync::atomic::{AtomicI64, Ordering};

/// Produces correlation IDs for outgoing requests and iterator handles.
///
/// IDs must be unique among the calls still pending on one engine.
pub trait IdGenerator: Send + Sync + 'static {
    fn next_id(&self) -> Id;
}

impl<F> IdGenerator for F
where
    F: Fn() -> Id + Send + Sync + 'static,
{
    fn next_id(&self) -> Id {
        self()
    }
}

/// Random UUID v4 strings in simple form. The default generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn next_id(&self) -> Id {
        Id::String(uuid::Uuid::new_v4().simple().to_string())
    }
}

/// Monotonic numeric IDs starting at 1.
#[derive(Debug)]
pub struct CounterIdGenerator {
    next: AtomicI64,
}

impl CounterIdGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: i64) -> Self {
        Self {
            next: AtomicI64::new(first),
        }
    }
}

impl Default for CounterIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for CounterIdGenerator {
    fn next_id(&self) -> Id {
        Id::from(self.next.fetch_add(1, Ordering::Relaxed))
    }
}
