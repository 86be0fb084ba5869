use std::fs;
use std::path::Path;
use std::sync::Arc;

use regsync::{
    ChangeEventName, InMemoryLookupStore, ItemKey, LookupStore, MessageOutbox, SyncConfig,
    SyncPipeline,
};
use tempfile::tempdir;

fn write_extract(dir: &Path, name: &str, header: &str, lines: &[String]) -> String {
    let mut body = format!("Header|{header}|20240301\n");
    for line in lines {
        body.push_str(line);
        body.push('\n');
    }
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    path.to_string_lossy().to_string()
}

fn master_line(firm: &str, status: &str) -> String {
    let mut fields = vec![String::new(); 29];
    fields[0] = firm.to_string();
    fields[1] = format!("Firm {firm}");
    fields[19] = status.to_string();
    fields[20] = "20200115".to_string();
    fields.join("|")
}

fn flag(store: &InMemoryLookupStore, firm: &str) -> Option<bool> {
    store
        .get(&ItemKey::new(firm, "IsActiveMortgageFirm"))
        .unwrap()
        .and_then(|item| item.as_active_mortgage_firm())
}

#[test]
fn principal_status_change_reaches_representative() {
    let dir = tempdir().unwrap();
    let store = Arc::new(InMemoryLookupStore::new());
    let outbox = Arc::new(MessageOutbox::new());
    let pipeline = SyncPipeline::new(store.clone(), outbox, &SyncConfig::default()).unwrap();

    let firms = write_extract(
        dir.path(),
        "firms.txt",
        "FirmsMasterList",
        &[
            master_line("P", "Authorised"),
            master_line("X", "Authorised"),
            master_line("Y", "Registered"),
            master_line("Z", "Registered"),
        ],
    );
    let appointments = write_extract(
        dir.path(),
        "appointments.txt",
        "Appointment",
        &["Y|P|Registered|20050101|||||".to_string()],
    );

    let mut triggers = pipeline.ingest_file(&firms).unwrap().triggers;
    triggers.extend(pipeline.ingest_file(&appointments).unwrap().triggers);
    pipeline.process_triggers(&triggers).unwrap();

    assert_eq!(flag(&store, "X"), Some(true));
    assert_eq!(flag(&store, "Y"), Some(true));
    assert_eq!(flag(&store, "Z"), Some(false));
    assert_eq!(flag(&store, "P"), Some(true));

    let firms = write_extract(
        dir.path(),
        "firms.txt",
        "FirmsMasterList",
        &[
            master_line("P", "Cancelled"),
            master_line("X", "Authorised"),
            master_line("Y", "Registered"),
            master_line("Z", "Registered"),
        ],
    );
    let report = pipeline.ingest_file(&firms).unwrap();
    assert_eq!(report.upsert.updated, 1);
    let targets: Vec<&str> = report
        .triggers
        .iter()
        .map(|trigger| trigger.firm_reference.as_str())
        .collect();
    assert_eq!(targets, vec!["P", "Y"]);

    let derived = pipeline.process_triggers(&report.triggers).unwrap();
    assert_eq!(derived.upsert.updated, 2);
    assert!(
        derived
            .events
            .iter()
            .all(|event| event.event_name == ChangeEventName::Updated)
    );
    assert_eq!(flag(&store, "P"), Some(false));
    assert_eq!(flag(&store, "Y"), Some(false));
    assert_eq!(flag(&store, "X"), Some(true));
}

#[test]
fn appointment_pairs_mirror_status() {
    let dir = tempdir().unwrap();
    let store = Arc::new(InMemoryLookupStore::new());
    let pipeline = SyncPipeline::new(
        store.clone(),
        Arc::new(MessageOutbox::new()),
        &SyncConfig::default(),
    )
    .unwrap();
    let appointments = write_extract(
        dir.path(),
        "appointments.txt",
        "Appointment",
        &["100014|117659|Withdrawn|20011201|||||".to_string()],
    );
    pipeline.ingest_file(&appointments).unwrap();

    let principal = store
        .get(&ItemKey::new("117659", "FirmPrincipal-100014"))
        .unwrap()
        .unwrap();
    let representative = store
        .get(&ItemKey::new("100014", "FirmAppointedRepresentative-117659"))
        .unwrap()
        .unwrap();
    let principal = principal.as_firm_principal().unwrap();
    let representative = representative.as_appointed_representative().unwrap();
    assert_eq!(principal.status_code, representative.status_code);
    assert_eq!(
        principal.status_effective_date,
        representative.status_effective_date
    );
    assert_eq!(principal.status_effective_date, "2001-12-01");
}
