#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Command-line runners behind the `regsync` binary.
pub mod apps;
/// Synchronizer configuration.
pub mod config;
/// Centralized constants for parsing, storage, and configuration.
pub mod constants;
/// Derived-fact recomputation.
pub mod derived;
mod errors;
mod hash;
/// Block ingestion pipeline.
pub mod ingestion;
/// Structured item types.
pub mod item_type;
/// Lookup item envelope and bodies.
pub mod items;
/// Change-event driven key listings.
pub mod iterator;
/// Wire messages.
pub mod messages;
/// Pipe-delimited field parsing.
pub mod parsing;
/// Change events and trigger fan-out.
pub mod publisher;
/// Line group to item mapping.
pub mod records;
/// Extract segmentation into line groups and blocks.
pub mod source;
/// Lookup store trait and backends.
pub mod store;
/// Extract readers and message sinks.
pub mod transport;
/// Shared type aliases.
pub mod types;
/// Hash-guarded idempotent upserts.
pub mod upsert;
/// Value normalization helpers.
pub mod utils;

pub use config::SyncConfig;
pub use derived::DerivedFactRecomputer;
pub use errors::{ErrorDisposition, SyncError};
pub use hash::content_hash;
pub use ingestion::{BlockReport, SyncPipeline};
pub use item_type::{BaseItemType, ItemType};
pub use items::{ItemBody, ItemKey, LookupItem};
pub use iterator::{InMemoryIteratorIndex, IteratorEntry};
pub use messages::{BlockMessage, ChangeEvent, ChangeEventName, DerivedFactTrigger, OutboundMessage};
pub use publisher::{ChangeEventPublisher, PublishSummary};
pub use source::{Block, LineGroup, LineSegmenter, RecordType};
pub use store::{
    FeedEntry, GuardedWrite, InMemoryLookupStore, LookupStore, MutationKind, SqliteLookupStore,
    StoreMutation, WriteGuard,
};
pub use transport::{JsonLinesOutbox, MessageOutbox, MessageSink};
pub use types::{ContentHash, FileLocation, FirmReference, GroupKey, RawLine};
pub use upsert::{ConflictPolicy, UpsertEngine, UpsertReport};
