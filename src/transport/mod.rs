//! Boundary transports: extract readers and outbound message sinks.

/// Filesystem extract reader.
pub mod fs;
/// Outbound message sinks.
pub mod outbox;

pub use fs::open_location;
pub use outbox::{JsonLinesOutbox, MessageOutbox, MessageSink, read_outbox};
