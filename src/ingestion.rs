//! Block ingestion pipeline.
//!
//! `SyncPipeline` wires the pieces together for one extract block:
//! read lines, group them, build items, upsert in bounded transactions, and
//! publish the store's pending change feed after each commit. A run starts by
//! publishing whatever an earlier failed run left pending, so redelivering a
//! block after a sink failure still sends its events. Derived-fact triggers
//! are processed separately by [`SyncPipeline::process_triggers`], matching
//! the queue hop between the two stages in a deployed system.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::derived::DerivedFactRecomputer;
use crate::errors::SyncError;
use crate::items::LookupItem;
use crate::iterator::InMemoryIteratorIndex;
use crate::messages::{BlockMessage, ChangeEvent, DerivedFactTrigger};
use crate::publisher::{ChangeEventPublisher, PublishSummary};
use crate::records::build_items;
use crate::source::{Block, LineGroup, LineSegmenter, RecordType, split_blocks};
use crate::store::LookupStore;
use crate::transport::{MessageSink, open_location};
use crate::upsert::{UpsertEngine, UpsertReport};

/// Outcome of processing one block or one trigger batch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockReport {
    /// Line groups read inside the block.
    pub groups: usize,
    /// Items built from those groups.
    pub items: usize,
    /// Combined upsert outcome.
    pub upsert: UpsertReport,
    /// Change events published.
    pub events: Vec<ChangeEvent>,
    /// Derived-fact triggers published.
    pub triggers: Vec<DerivedFactTrigger>,
}

impl BlockReport {
    fn absorb(&mut self, published: PublishSummary) {
        self.events.extend(published.events);
        self.triggers.extend(published.triggers);
    }
}

/// Orchestrates block processing and derived-fact recomputation.
pub struct SyncPipeline {
    engine: UpsertEngine,
    publisher: ChangeEventPublisher,
    recomputer: DerivedFactRecomputer,
    transaction_limit: usize,
    block_size: usize,
    iterator_index: Option<Arc<InMemoryIteratorIndex>>,
}

impl SyncPipeline {
    /// Pipeline over `store`, publishing to `sink`, configured by `config`.
    pub fn new(
        store: Arc<dyn LookupStore>,
        sink: Arc<dyn MessageSink>,
        config: &SyncConfig,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let engine = UpsertEngine::new(store.clone())
            .with_transaction_limit(config.transaction_limit)
            .with_conflict_policy(config.conflict_policy);
        Ok(Self {
            publisher: ChangeEventPublisher::new(store, sink),
            recomputer: DerivedFactRecomputer::new(engine.clone()),
            engine,
            transaction_limit: config.transaction_limit,
            block_size: config.block_size,
            iterator_index: None,
        })
    }

    /// Feed every published change event into `index`.
    pub fn with_iterator_index(mut self, index: Arc<InMemoryIteratorIndex>) -> Self {
        self.iterator_index = Some(index);
        self
    }

    /// Scan the extract at `location` and cut it into block messages.
    pub fn plan_blocks(&self, location: &str) -> Result<Vec<BlockMessage>, SyncError> {
        let (record_type, blocks) = split_blocks(open_location(location)?, self.block_size)?;
        info!(location, record_type = %record_type, blocks = blocks.len(), "blocks planned");
        Ok(blocks
            .into_iter()
            .map(|block| BlockMessage::new(location, record_type, block))
            .collect())
    }

    /// Process the key range named by `message`.
    ///
    /// The message's record type must match the extract header.
    pub fn process_block(&self, message: &BlockMessage) -> Result<BlockReport, SyncError> {
        self.run(&message.file_location, &message.block(), Some(message.record_type))
    }

    /// Process a whole extract in one pass.
    pub fn ingest_file(&self, location: &str) -> Result<BlockReport, SyncError> {
        self.run(location, &Block::unbounded(), None)
    }

    /// Recompute derived facts for `triggers` and publish the resulting changes.
    pub fn process_triggers(
        &self,
        triggers: &[DerivedFactTrigger],
    ) -> Result<BlockReport, SyncError> {
        let mut report = BlockReport::default();
        self.publish_pending(&mut report)?;
        report.upsert = self.recomputer.process_triggers(triggers)?;
        self.publish_pending(&mut report)?;
        Ok(report)
    }

    fn run(
        &self,
        location: &str,
        block: &Block,
        expected: Option<RecordType>,
    ) -> Result<BlockReport, SyncError> {
        let reader = open_location(location)?;
        let mut segmenter = LineSegmenter::bounded(block);
        let mut report = BlockReport::default();
        self.publish_pending(&mut report)?;
        let mut buffer: Vec<LookupItem> = Vec::new();
        let mut emit = |group: LineGroup| {
            report.groups += 1;
            buffer.extend(build_items(&group)?);
            if buffer.len() >= self.transaction_limit {
                self.commit(std::mem::take(&mut buffer), &mut report)?;
            }
            Ok(())
        };

        let mut header_checked = expected.is_none();
        for line in std::io::BufRead::lines(reader) {
            segmenter.push_line(&line?, &mut emit)?;
            if !header_checked && let Some(found) = segmenter.record_type() {
                check_record_type(expected, found)?;
                header_checked = true;
            }
            if segmenter.is_exhausted() {
                break;
            }
        }
        segmenter.finish(&mut emit)?;
        if segmenter.record_type().is_none() {
            return Err(SyncError::MissingHeader {
                line: String::new(),
            });
        }
        if !buffer.is_empty() {
            self.commit(buffer, &mut report)?;
        }
        info!(
            location,
            start_key = ?block.start_key,
            end_key = ?block.end_key,
            groups = report.groups,
            items = report.items,
            inserted = report.upsert.inserted,
            updated = report.upsert.updated,
            unchanged = report.upsert.unchanged,
            "block processed"
        );
        Ok(report)
    }

    fn commit(&self, items: Vec<LookupItem>, report: &mut BlockReport) -> Result<(), SyncError> {
        report.items += items.len();
        report.upsert.merge(self.engine.upsert(items)?);
        self.publish_pending(report)
    }

    fn publish_pending(&self, report: &mut BlockReport) -> Result<(), SyncError> {
        let published = self.publisher.publish_pending()?;
        self.index_events(&published.events)?;
        report.absorb(published);
        Ok(())
    }

    fn index_events(&self, events: &[ChangeEvent]) -> Result<(), SyncError> {
        let Some(index) = &self.iterator_index else {
            return Ok(());
        };
        for event in events {
            if index.apply(event)? {
                debug!(
                    firm_reference = %event.firm_reference,
                    item_type = %event.item_type,
                    "iterator entry added"
                );
            }
        }
        Ok(())
    }
}

fn check_record_type(expected: Option<RecordType>, found: RecordType) -> Result<(), SyncError> {
    match expected {
        Some(expected) if expected != found => Err(SyncError::Message(format!(
            "block message names record type {expected} but the extract header says {found}"
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::OutboundMessage;
    use crate::store::InMemoryLookupStore;
    use crate::transport::MessageOutbox;
    use std::fs;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;

    const APPOINTMENTS: &str = "Header|Appointment|20240301\n\
100014|117659|Withdrawn|20011201|||||\n\
100015|117659|Registered|20050101|||||\n\
100016|117700|Registered|20060101|||||\n\
Footer|3\n";

    fn setup(
        transaction_limit: usize,
    ) -> (Arc<InMemoryLookupStore>, Arc<MessageOutbox>, SyncPipeline) {
        let store = Arc::new(InMemoryLookupStore::new());
        let outbox = Arc::new(MessageOutbox::new());
        let config = SyncConfig {
            transaction_limit,
            block_size: 2,
            ..SyncConfig::default()
        };
        let pipeline = SyncPipeline::new(store.clone(), outbox.clone(), &config).unwrap();
        (store, outbox, pipeline)
    }

    fn write_extract(dir: &std::path::Path, body: &str) -> String {
        let path = dir.join("appointments.txt");
        fs::write(&path, body).unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn planned_blocks_cover_the_file_once() {
        let dir = tempdir().unwrap();
        let location = write_extract(dir.path(), APPOINTMENTS);
        let (store, _, pipeline) = setup(3);

        let messages = pipeline.plan_blocks(&location).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].start_key.as_deref(), Some("100014|117659"));
        assert_eq!(messages[0].end_key.as_deref(), Some("100015|117659"));
        assert_eq!(messages[1].end_key, None);

        let mut groups = 0;
        for message in &messages {
            groups += pipeline.process_block(message).unwrap().groups;
        }
        assert_eq!(groups, 3);
        assert_eq!(store.len(), 6);
    }

    #[test]
    fn replayed_block_is_silent() {
        let dir = tempdir().unwrap();
        let location = write_extract(dir.path(), APPOINTMENTS);
        let (_, outbox, pipeline) = setup(10);

        let first = pipeline.ingest_file(&location).unwrap();
        assert_eq!(first.upsert.inserted, 6);
        assert_eq!(first.events.len(), 6);
        assert!(!outbox.drain().unwrap().is_empty());

        let second = pipeline.ingest_file(&location).unwrap();
        assert_eq!(second.upsert.unchanged, 6);
        assert!(second.events.is_empty());
        assert!(outbox.drain().unwrap().is_empty());
    }

    #[test]
    fn principal_writes_trigger_representatives() {
        let dir = tempdir().unwrap();
        let location = write_extract(dir.path(), APPOINTMENTS);
        let (_, outbox, pipeline) = setup(10);
        let report = pipeline.ingest_file(&location).unwrap();

        let triggered: Vec<&str> = report
            .triggers
            .iter()
            .map(|trigger| trigger.firm_reference.as_str())
            .collect();
        assert!(triggered.contains(&"117659"));
        assert!(triggered.contains(&"100014"));
        assert!(triggered.contains(&"100015"));

        let derived = pipeline.process_triggers(&report.triggers).unwrap();
        assert!(derived.triggers.is_empty());
        assert!(
            derived
                .events
                .iter()
                .all(|event| event.item_type == "IsActiveMortgageFirm")
        );
        assert!(
            outbox
                .drain()
                .unwrap()
                .iter()
                .any(|message| matches!(message, OutboundMessage::Trigger(_)))
        );
    }

    #[test]
    fn record_type_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        let location = write_extract(dir.path(), APPOINTMENTS);
        let (store, _, pipeline) = setup(10);
        let message = BlockMessage::new(
            location,
            RecordType::FirmsMasterList,
            Block::unbounded(),
        );
        let err = pipeline.process_block(&message).unwrap_err();
        assert_eq!(err.disposition(), crate::errors::ErrorDisposition::Reject);
        assert!(store.is_empty());
    }

    #[test]
    fn iterator_index_sees_new_keys() {
        let dir = tempdir().unwrap();
        let location = write_extract(dir.path(), APPOINTMENTS);
        let (_, _, pipeline) = setup(10);
        let index = Arc::new(InMemoryIteratorIndex::new());
        let pipeline = pipeline.with_iterator_index(index.clone());
        pipeline.ingest_file(&location).unwrap();
        assert_eq!(
            index
                .list(crate::item_type::BaseItemType::FirmPrincipal)
                .unwrap(),
            vec!["117659-100014", "117659-100015", "117700-100016"]
        );
    }

    struct FlakySink {
        inner: MessageOutbox,
        down: AtomicBool,
    }

    impl MessageSink for FlakySink {
        fn publish_change(&self, event: &ChangeEvent) -> Result<(), SyncError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(SyncError::Io(std::io::Error::other("topic unreachable")));
            }
            self.inner.publish_change(event)
        }

        fn publish_trigger(&self, trigger: &DerivedFactTrigger) -> Result<(), SyncError> {
            self.inner.publish_trigger(trigger)
        }
    }

    #[test]
    fn redelivery_after_sink_failure_sends_committed_events() {
        let dir = tempdir().unwrap();
        let location = write_extract(dir.path(), APPOINTMENTS);
        let store = Arc::new(InMemoryLookupStore::new());
        let sink = Arc::new(FlakySink {
            inner: MessageOutbox::new(),
            down: AtomicBool::new(true),
        });
        let pipeline = SyncPipeline::new(store.clone(), sink.clone(), &SyncConfig::default())
            .unwrap();

        let err = pipeline.ingest_file(&location).unwrap_err();
        assert_eq!(err.disposition(), crate::errors::ErrorDisposition::Retry);
        assert_eq!(store.len(), 6);
        assert!(sink.inner.snapshot().unwrap().is_empty());

        sink.down.store(false, Ordering::SeqCst);
        let retry = pipeline.ingest_file(&location).unwrap();
        assert_eq!(retry.upsert.unchanged, 6);
        assert!(retry.upsert.is_noop());
        assert_eq!(retry.events.len(), 6);
        assert!(retry.triggers.iter().any(|trigger| trigger.firm_reference == "117659"));

        let changes = sink
            .inner
            .drain()
            .unwrap()
            .iter()
            .filter(|message| matches!(message, OutboundMessage::Change(_)))
            .count();
        assert_eq!(changes, 6);
        assert!(pipeline.ingest_file(&location).unwrap().events.is_empty());
    }
}
