//! Derived facts recomputed from stored register data.

use std::sync::Arc;

use indexmap::IndexSet;
use tracing::{debug, warn};

use crate::constants::derived::{AUTHORISED_STATUS_CODES, REGISTERED_STATUS_CODE};
use crate::errors::SyncError;
use crate::items::{IsActiveMortgageFirm, ItemBody, LookupItem};
use crate::messages::DerivedFactTrigger;
use crate::store::LookupStore;
use crate::upsert::{UpsertEngine, UpsertReport};
use crate::types::FirmReference;

fn is_authorised_status(status: &str) -> bool {
    AUTHORISED_STATUS_CODES.contains(&status)
}

/// Recomputes `IsActiveMortgageFirm` and writes it through the upsert engine.
#[derive(Clone, Debug)]
pub struct DerivedFactRecomputer {
    engine: UpsertEngine,
}

impl DerivedFactRecomputer {
    /// Recomputer writing through `engine`.
    pub fn new(engine: UpsertEngine) -> Self {
        Self { engine }
    }

    fn store(&self) -> &Arc<dyn LookupStore> {
        self.engine.store()
    }

    /// Whether `firm_reference` is an active mortgage firm.
    ///
    /// A directly authorised firm is active. A registered representative is
    /// active when its registered principal is authorised. A firm with no
    /// authorisation record is not active.
    pub fn is_active_mortgage_firm(&self, firm_reference: &str) -> Result<bool, SyncError> {
        let Some(authorisation) = self.store().firm_authorisation(firm_reference)? else {
            warn!(firm_reference, "no FirmAuthorisation record; treating as inactive");
            return Ok(false);
        };
        let status = authorisation.current_authorisation_status_code.as_str();
        if is_authorised_status(status) {
            return Ok(true);
        }
        if status != REGISTERED_STATUS_CODE {
            return Ok(false);
        }
        let Some(principal) = self.store().registered_principal(firm_reference)? else {
            debug!(firm_reference, "registered firm has no registered principal");
            return Ok(false);
        };
        Ok(self
            .store()
            .firm_authorisation(&principal)?
            .is_some_and(|body| is_authorised_status(&body.current_authorisation_status_code)))
    }

    fn derived_item(&self, firm_reference: &str) -> Result<LookupItem, SyncError> {
        let value = self.is_active_mortgage_firm(firm_reference)?;
        LookupItem::new(
            firm_reference,
            ItemBody::IsActiveMortgageFirm(IsActiveMortgageFirm {
                is_active_mortgage_firm: value,
            }),
        )
    }

    /// Recompute and store the flag for one firm, returning its value.
    pub fn recompute(&self, firm_reference: &str) -> Result<bool, SyncError> {
        let item = self.derived_item(firm_reference)?;
        let value = item.as_active_mortgage_firm().unwrap_or(false);
        self.engine.upsert(vec![item])?;
        Ok(value)
    }

    /// Recompute every firm named by `triggers`, once each in first-seen order,
    /// and upsert the results as one batch.
    pub fn process_triggers(
        &self,
        triggers: &[DerivedFactTrigger],
    ) -> Result<UpsertReport, SyncError> {
        let firms: IndexSet<&FirmReference> =
            triggers.iter().map(|trigger| &trigger.firm_reference).collect();
        let items = firms
            .iter()
            .map(|firm| self.derived_item(firm))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            triggers = triggers.len(),
            firms = items.len(),
            "recomputing derived facts"
        );
        self.engine.upsert(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::{FirmAppointedRepresentative, FirmAuthorisation, ItemKey};
    use crate::store::InMemoryLookupStore;

    fn authorisation(firm: &str, status: &str) -> LookupItem {
        LookupItem::new(
            firm,
            ItemBody::FirmAuthorisation(FirmAuthorisation {
                registered_firm_name: format!("Firm {firm}"),
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

    fn representative_of(firm: &str, principal: &str, status: &str) -> LookupItem {
        LookupItem::new(
            firm,
            ItemBody::FirmAppointedRepresentative(FirmAppointedRepresentative {
                principal_firm_ref: principal.into(),
                status_code: status.into(),
                status_effective_date: "2020-01-01".into(),
            }),
        )
        .unwrap()
    }

    fn setup(items: Vec<LookupItem>) -> (Arc<InMemoryLookupStore>, DerivedFactRecomputer) {
        let store = Arc::new(InMemoryLookupStore::new());
        let engine = UpsertEngine::new(store.clone());
        engine.upsert(items).unwrap();
        (store, DerivedFactRecomputer::new(engine))
    }

    fn stored_flag(store: &InMemoryLookupStore, firm: &str) -> Option<bool> {
        store
            .get(&ItemKey::new(firm, "IsActiveMortgageFirm"))
            .unwrap()
            .and_then(|item| item.as_active_mortgage_firm())
    }

    #[test]
    fn authorised_firm_is_active() {
        let (store, recomputer) = setup(vec![authorisation("X", "Authorised")]);
        assert!(recomputer.recompute("X").unwrap());
        assert_eq!(stored_flag(&store, "X"), Some(true));
    }

    #[test]
    fn eea_authorised_firm_is_active() {
        let (_, recomputer) = setup(vec![authorisation("X", "EEA Authorised")]);
        assert!(recomputer.is_active_mortgage_firm("X").unwrap());
    }

    #[test]
    fn registered_firm_follows_its_principal() {
        let (_, recomputer) = setup(vec![
            authorisation("Y", "Registered"),
            representative_of("Y", "P", "Registered"),
            authorisation("P", "Authorised"),
        ]);
        assert!(recomputer.is_active_mortgage_firm("Y").unwrap());

        let (_, recomputer) = setup(vec![
            authorisation("Y", "Registered"),
            representative_of("Y", "P", "Registered"),
            authorisation("P", "Cancelled"),
        ]);
        assert!(!recomputer.is_active_mortgage_firm("Y").unwrap());
    }

    #[test]
    fn withdrawn_appointment_does_not_count() {
        let (_, recomputer) = setup(vec![
            authorisation("Y", "Registered"),
            representative_of("Y", "P", "Withdrawn"),
            authorisation("P", "Authorised"),
        ]);
        assert!(!recomputer.is_active_mortgage_firm("Y").unwrap());
    }

    #[test]
    fn missing_authorisation_is_inactive_not_an_error() {
        let (store, recomputer) = setup(Vec::new());
        assert!(!recomputer.recompute("Z").unwrap());
        assert_eq!(stored_flag(&store, "Z"), Some(false));
    }

    #[test]
    fn trigger_batches_are_deduplicated() {
        let (store, recomputer) = setup(vec![
            authorisation("A", "Authorised"),
            authorisation("B", "Cancelled"),
        ]);
        let report = recomputer
            .process_triggers(&[
                DerivedFactTrigger::new("A"),
                DerivedFactTrigger::new("B"),
                DerivedFactTrigger::new("A"),
            ])
            .unwrap();
        assert_eq!(report.inserted, 2);
        let firms: Vec<&str> = report
            .mutations
            .iter()
            .map(|mutation| mutation.key.firm_reference.as_str())
            .collect();
        assert_eq!(firms, vec!["A", "B"]);
        assert_eq!(stored_flag(&store, "B"), Some(false));

        let replay = recomputer
            .process_triggers(&[DerivedFactTrigger::new("A")])
            .unwrap();
        assert!(replay.is_noop());
    }
}
