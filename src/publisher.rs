//! Change-feed consumer: announces committed mutations and fans out
//! derived-fact triggers.
//!
//! The publisher reads the store's durable change feed rather than the
//! mutations a caller just committed. An entry is acknowledged only after
//! every message it produces has been accepted by the sink, so a sink failure
//! leaves it pending for the next round. Delivery is at least once.

use std::sync::Arc;

use indexmap::IndexSet;
use tracing::{debug, trace};

use crate::constants::store::FEED_BATCH_SIZE;
use crate::errors::SyncError;
use crate::item_type::BaseItemType;
use crate::items::LookupItem;
use crate::messages::{ChangeEvent, DerivedFactTrigger};
use crate::store::{LookupStore, MutationKind, StoreMutation};
use crate::transport::MessageSink;
use crate::types::FirmReference;

/// Messages produced for one mutation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Change event, absent for removals.
    pub event: Option<ChangeEvent>,
    /// Triggers enqueued, deduplicated.
    pub triggers: Vec<DerivedFactTrigger>,
}

/// Totals over the feed entries published in one round.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishSummary {
    /// Change events emitted.
    pub events: Vec<ChangeEvent>,
    /// Triggers enqueued.
    pub triggers: Vec<DerivedFactTrigger>,
}

/// Turns committed mutations into change events and derived-fact triggers.
#[derive(Clone)]
pub struct ChangeEventPublisher {
    store: Arc<dyn LookupStore>,
    sink: Arc<dyn MessageSink>,
}

impl ChangeEventPublisher {
    /// Publisher reading relationships from `store` and writing to `sink`.
    pub fn new(store: Arc<dyn LookupStore>, sink: Arc<dyn MessageSink>) -> Self {
        Self { store, sink }
    }

    /// Publish messages for one committed mutation.
    pub fn publish(&self, mutation: &StoreMutation) -> Result<PublishOutcome, SyncError> {
        let Some(event) = ChangeEvent::from_mutation(mutation) else {
            trace!(key = ?mutation.key, "remove ignored");
            return Ok(PublishOutcome::default());
        };
        self.sink.publish_change(&event)?;

        let mut triggers = Vec::new();
        if affects_permissions(mutation) {
            let firm = &mutation.key.firm_reference;
            let mut targets: IndexSet<FirmReference> = IndexSet::new();
            targets.insert(firm.clone());
            targets.extend(self.store.appointed_representatives(firm)?);
            for target in targets {
                let trigger = DerivedFactTrigger::new(target);
                self.sink.publish_trigger(&trigger)?;
                triggers.push(trigger);
            }
            debug!(
                firm_reference = %firm,
                item_type = %mutation.key.item_type,
                triggers = triggers.len(),
                "derived facts queued"
            );
        }
        Ok(PublishOutcome {
            event: Some(event),
            triggers,
        })
    }

    /// Publish every pending change-feed entry, oldest first.
    ///
    /// Stops at the first sink or store failure; entries not yet acknowledged
    /// are published again by the next call.
    pub fn publish_pending(&self) -> Result<PublishSummary, SyncError> {
        let mut summary = PublishSummary::default();
        loop {
            let entries = self.store.pending_feed(FEED_BATCH_SIZE)?;
            if entries.is_empty() {
                break;
            }
            for entry in entries {
                let outcome = self.publish(&entry.mutation)?;
                self.store.ack_feed(entry.sequence)?;
                summary.events.extend(outcome.event);
                summary.triggers.extend(outcome.triggers);
            }
        }
        if !summary.events.is_empty() {
            debug!(
                events = summary.events.len(),
                triggers = summary.triggers.len(),
                "change feed published"
            );
        }
        Ok(summary)
    }
}

/// Whether a mutation can change some firm's derived facts.
///
/// Authorisation records matter only when the status code moved; principal and
/// permission records matter on any change.
pub fn affects_permissions(mutation: &StoreMutation) -> bool {
    if mutation.kind == MutationKind::Remove {
        return false;
    }
    let Some(new_image) = &mutation.new_image else {
        return false;
    };
    match new_image.body().base_type() {
        BaseItemType::FirmAuthorisation => {
            authorisation_status(mutation.old_image.as_ref()) != authorisation_status(Some(new_image))
        }
        BaseItemType::FirmPrincipal | BaseItemType::FirmPermissions => true,
        BaseItemType::AlternativeFirmNames
        | BaseItemType::FirmAppointedRepresentative
        | BaseItemType::IsActiveMortgageFirm => false,
    }
}

fn authorisation_status(item: Option<&LookupItem>) -> Option<&str> {
    item.and_then(LookupItem::as_firm_authorisation)
        .map(|body| body.current_authorisation_status_code.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::{
        AlternativeFirmName, AlternativeFirmNames, FirmAuthorisation, FirmPrincipal, ItemBody,
    };
    use crate::messages::{ChangeEventName, OutboundMessage};
    use crate::store::{GuardedWrite, InMemoryLookupStore};
    use crate::transport::MessageOutbox;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn authorisation(firm: &str, status: &str, name: &str) -> LookupItem {
        LookupItem::new(
            firm,
            ItemBody::FirmAuthorisation(FirmAuthorisation {
                registered_firm_name: name.into(),
                address_line1: None,
                address_line2: None,
                address_line3: None,
                address_line4: None,
                address_line5: None,
                address_line6: None,
                postcode_in: None,
                postcode_out: None,
                current_authorisation_status_code: status.into(),
                date_status_last_changed: "2020-01-15".into(),
            }),
        )
        .unwrap()
    }

    fn principal(principal: &str, representative: &str) -> LookupItem {
        LookupItem::new(
            principal,
            ItemBody::FirmPrincipal(FirmPrincipal {
                appointed_representative_firm_ref: representative.into(),
                status_code: "Registered".into(),
                status_effective_date: "2020-01-01".into(),
            }),
        )
        .unwrap()
    }

    fn setup() -> (Arc<InMemoryLookupStore>, Arc<MessageOutbox>, ChangeEventPublisher) {
        let store = Arc::new(InMemoryLookupStore::new());
        let outbox = Arc::new(MessageOutbox::new());
        let publisher = ChangeEventPublisher::new(store.clone(), outbox.clone());
        (store, outbox, publisher)
    }

    fn triggers(messages: &[OutboundMessage]) -> Vec<&str> {
        messages
            .iter()
            .filter_map(|message| match message {
                OutboundMessage::Trigger(trigger) => Some(trigger.firm_reference.as_str()),
                OutboundMessage::Change(_) => None,
            })
            .collect()
    }

    #[test]
    fn status_change_fans_out_to_representatives() {
        let (store, outbox, publisher) = setup();
        store
            .transact(&[
                GuardedWrite::insert(principal("P", "Y")),
                GuardedWrite::insert(principal("P", "Z")),
            ])
            .unwrap();
        let old = authorisation("P", "Authorised", "Acme");
        let new = authorisation("P", "Cancelled", "Acme");
        let mutation = StoreMutation {
            kind: MutationKind::Modify,
            key: new.key(),
            old_image: Some(old),
            new_image: Some(new),
        };
        let outcome = publisher.publish(&mutation).unwrap();
        assert_eq!(
            outcome.event.map(|event| event.event_name),
            Some(ChangeEventName::Updated)
        );
        assert_eq!(triggers(&outbox.drain().unwrap()), vec!["P", "Y", "Z"]);
    }

    #[test]
    fn cosmetic_authorisation_change_emits_event_only() {
        let (_, outbox, publisher) = setup();
        let old = authorisation("P", "Authorised", "Acme");
        let new = authorisation("P", "Authorised", "Acme Renamed");
        let mutation = StoreMutation {
            kind: MutationKind::Modify,
            key: new.key(),
            old_image: Some(old),
            new_image: Some(new),
        };
        let outcome = publisher.publish(&mutation).unwrap();
        assert!(outcome.event.is_some());
        assert!(outcome.triggers.is_empty());
        assert_eq!(outbox.drain().unwrap().len(), 1);
    }

    #[test]
    fn new_authorisation_counts_as_status_change() {
        let (_, _, publisher) = setup();
        let item = authorisation("P", "Authorised", "Acme");
        let mutation = StoreMutation {
            kind: MutationKind::Insert,
            key: item.key(),
            old_image: None,
            new_image: Some(item),
        };
        let outcome = publisher.publish(&mutation).unwrap();
        assert_eq!(outcome.triggers, vec![DerivedFactTrigger::new("P")]);
    }

    #[test]
    fn removals_and_names_do_not_trigger() {
        let (_, outbox, publisher) = setup();
        let item = principal("P", "Y");
        let removal = StoreMutation {
            kind: MutationKind::Remove,
            key: item.key(),
            old_image: Some(item),
            new_image: None,
        };
        assert_eq!(publisher.publish(&removal).unwrap(), PublishOutcome::default());

        let names = LookupItem::new(
            "P",
            ItemBody::AlternativeFirmNames(AlternativeFirmNames {
                names: vec![AlternativeFirmName {
                    name: "Old".into(),
                    effective_date: "2001-01-01".into(),
                    end_date: None,
                }],
            }),
        )
        .unwrap();
        let outcome = publisher
            .publish(&StoreMutation {
                kind: MutationKind::Insert,
                key: names.key(),
                old_image: None,
                new_image: Some(names),
            })
            .unwrap();
        assert!(outcome.event.is_some());
        assert!(outcome.triggers.is_empty());
        assert_eq!(outbox.drain().unwrap().len(), 1);
    }

    /// Refuses change events until `fail_next` is cleared.
    struct FlakySink {
        inner: MessageOutbox,
        fail_next: AtomicBool,
    }

    impl MessageSink for FlakySink {
        fn publish_change(&self, event: &ChangeEvent) -> Result<(), SyncError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(SyncError::Io(std::io::Error::other("topic unreachable")));
            }
            self.inner.publish_change(event)
        }

        fn publish_trigger(&self, trigger: &DerivedFactTrigger) -> Result<(), SyncError> {
            self.inner.publish_trigger(trigger)
        }
    }

    #[test]
    fn pending_feed_survives_sink_failure() {
        let store = Arc::new(InMemoryLookupStore::new());
        let sink = Arc::new(FlakySink {
            inner: MessageOutbox::new(),
            fail_next: AtomicBool::new(false),
        });
        let publisher = ChangeEventPublisher::new(store.clone(), sink.clone());
        store
            .transact(&[GuardedWrite::insert(principal("P", "Y"))])
            .unwrap();
        store
            .transact(&[GuardedWrite::insert(authorisation("P", "Authorised", "Acme"))])
            .unwrap();

        sink.fail_next.store(true, Ordering::SeqCst);
        let err = publisher.publish_pending().unwrap_err();
        assert_eq!(err.disposition(), crate::errors::ErrorDisposition::Retry);
        assert_eq!(store.pending_feed(10).unwrap().len(), 2);

        let summary = publisher.publish_pending().unwrap();
        let items: Vec<&str> = summary
            .events
            .iter()
            .map(|event| event.item_type.as_str())
            .collect();
        assert_eq!(items, vec!["FirmPrincipal-Y", "FirmAuthorisation"]);
        assert!(store.pending_feed(10).unwrap().is_empty());
        assert!(publisher.publish_pending().unwrap().events.is_empty());
        assert_eq!(
            sink.inner.drain().unwrap().len(),
            summary.events.len() + summary.triggers.len()
        );
    }
}
