//! Structured observability events.
//!
//! Per the core's design notes: the store emits typed events to an
//! injected sink and knows nothing about request IDs, log formats, or HTTP
//! — those are a concern of whatever external service wraps this crate.

/// A single callback invoked synchronously from the thread performing the
/// operation. Must not block for long: it runs with the store's locks
/// already released but on the caller's own call stack.
pub type EventSink = std::sync::Arc<dyn Fn(Event) + Send + Sync>;

#[derive(Debug, Clone)]
pub enum Event {
    /// Covers both `put` and `delete` — a delete is a tombstone written
    /// through the same append path, per the core's data-flow model.
    StorePut { key: String, tombstone: bool, segment_id: u64, offset: u64 },
    StoreGet { key: String, hit: bool },
    SegmentRotate { sealed_id: u64, new_active_id: u64 },
    RecoveryComplete { live_keys: usize },
    RecoveryFallbackScan { segment_id: u64, reason: String },
}
