//! End-to-end signal emission through commit, undo and redo.

use kindred::{
    json_payload, Handle, RecordClass, SignalKey, SignalMethod, Store, TransactionOptions,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

type Emitted = Arc<Mutex<Vec<(String, Vec<Handle>)>>>;

/// Record every signal the store emits, in order.
fn record_all(store: &Store) -> Emitted {
    let emitted: Emitted = Arc::new(Mutex::new(Vec::new()));
    for class in RecordClass::ALL {
        for method in SignalMethod::ALL {
            let key = SignalKey::new(class, method);
            let sink = Arc::clone(&emitted);
            store.bus().connect(
                key,
                Arc::new(move |handles: &[Handle]| {
                    sink.lock().push((key.to_string(), handles.to_vec()));
                }),
            );
        }
    }
    emitted
}

fn take(emitted: &Emitted) -> Vec<(String, Vec<Handle>)> {
    std::mem::take(&mut *emitted.lock())
}

fn names(signals: &[(String, Vec<Handle>)]) -> Vec<&str> {
    signals.iter().map(|(name, _)| name.as_str()).collect()
}

fn h(s: &str) -> Handle {
    Handle::from(s)
}

fn person(name: &str, family: Option<&str>) -> Vec<u8> {
    json_payload(&json!({"surname": name, "family": family})).unwrap()
}

fn family(father: &str, mother: &str) -> Vec<u8> {
    json_payload(&json!({"father": father, "mother": mother})).unwrap()
}

#[test]
fn test_add_persons_families_then_link() {
    let store = Store::in_memory().unwrap();
    let emitted = record_all(&store);
    let persons = [h("p1"), h("p2"), h("p3"), h("p4")];
    let families = [h("f1"), h("f2")];

    store
        .transaction("Add families", |s| {
            for p in &persons {
                s.add_record(RecordClass::Person, p, &person(p.as_str(), None))?;
            }
            s.add_record(RecordClass::Family, &families[0], &family("p1", "p2"))?;
            s.add_record(RecordClass::Family, &families[1], &family("p3", "p4"))?;
            for (i, p) in persons.iter().enumerate() {
                let f = families[i / 2].as_str();
                s.update_record(RecordClass::Person, p, &person(p.as_str(), Some(f)))?;
            }
            Ok(())
        })
        .unwrap();

    let signals = take(&emitted);
    assert_eq!(names(&signals), vec!["person-add", "family-add", "person-update"]);
    assert_eq!(signals[0].1, persons.to_vec());
    assert_eq!(signals[1].1, families.to_vec());
    assert_eq!(signals[2].1, persons.to_vec());
}

/// Four persons in two families.
fn merge_fixture(store: &Store) {
    store
        .transaction("Setup", |s| {
            for p in ["p1", "p2", "p3", "p4"] {
                s.add_record(RecordClass::Person, &h(p), &person(p, None))?;
            }
            s.add_record(RecordClass::Family, &h("f1"), &family("p1", "p2"))?;
            s.add_record(RecordClass::Family, &h("f2"), &family("p3", "p4"))
        })
        .unwrap();
}

/// Delete p3, p4 and f2 while rewriting p1, p2 and f1 twice each.
fn merge(store: &Store) {
    store
        .transaction("Merge People", |s| {
            s.remove_record(RecordClass::Person, &h("p3"))?;
            s.remove_record(RecordClass::Person, &h("p4"))?;
            s.remove_record(RecordClass::Family, &h("f2"))?;
            s.update_record(RecordClass::Person, &h("p1"), &person("p1", Some("f1")))?;
            s.update_record(RecordClass::Family, &h("f1"), &family("p1", "p3"))?;
            s.update_record(RecordClass::Person, &h("p2"), &person("p2", Some("f1")))?;
            s.update_record(RecordClass::Person, &h("p1"), &person("p1+p3", Some("f1")))?;
            s.update_record(RecordClass::Person, &h("p2"), &person("p2+p4", Some("f1")))?;
            s.update_record(RecordClass::Family, &h("f1"), &family("p2", "p1"))
        })
        .unwrap();
}

#[test]
fn test_merge_signals_undo_redo() {
    let store = Store::in_memory().unwrap();
    merge_fixture(&store);
    let before = store.digest().unwrap();
    let before_records: Vec<_> = [RecordClass::Person, RecordClass::Family]
        .into_iter()
        .map(|class| store.records(class).unwrap())
        .collect();

    let emitted = record_all(&store);
    merge(&store);
    let after = store.digest().unwrap();

    let commit_signals = take(&emitted);
    assert_eq!(
        names(&commit_signals),
        vec!["person-delete", "family-delete", "person-update", "family-update"]
    );
    assert_eq!(commit_signals[0].1, vec![h("p3"), h("p4")]);
    assert_eq!(commit_signals[1].1, vec![h("f2")]);
    // Repeated updates coalesce to one appearance per handle.
    assert_eq!(commit_signals[2].1, vec![h("p1"), h("p2")]);
    assert_eq!(commit_signals[3].1, vec![h("f1")]);

    assert!(store.undo().unwrap());
    assert_eq!(store.digest().unwrap(), before);
    let restored: Vec<_> = [RecordClass::Person, RecordClass::Family]
        .into_iter()
        .map(|class| store.records(class).unwrap())
        .collect();
    assert_eq!(restored, before_records);

    let undo_signals = take(&emitted);
    assert_eq!(
        names(&undo_signals),
        vec!["family-update", "person-update", "family-add", "person-add"]
    );
    assert_eq!(undo_signals[2].1, vec![h("f2")]);
    assert_eq!(undo_signals[3].1, vec![h("p4"), h("p3")]);

    assert!(store.redo().unwrap());
    assert_eq!(store.digest().unwrap(), after);
    assert_eq!(take(&emitted), commit_signals);
}

#[test]
fn test_add_then_remove_is_silent() {
    let store = Store::in_memory().unwrap();
    let emitted = record_all(&store);

    store
        .transaction("Scratch", |s| {
            s.add_record(RecordClass::Event, &h("e1"), b"{}")?;
            s.add_record(RecordClass::Event, &h("e2"), b"{}")?;
            s.update_record(RecordClass::Event, &h("e1"), br#"{"x":1}"#)?;
            s.remove_record(RecordClass::Event, &h("e1"))
        })
        .unwrap();

    let signals = take(&emitted);
    assert_eq!(names(&signals), vec!["event-add"]);
    assert_eq!(signals[0].1, vec![h("e2")]);
}

#[test]
fn test_repeated_updates_coalesce() {
    let store = Store::in_memory().unwrap();
    store
        .transaction("seed", |s| s.add_record(RecordClass::Place, &h("pl"), b"0"))
        .unwrap();
    let emitted = record_all(&store);

    store
        .transaction("Edit place", |s| {
            s.update_record(RecordClass::Place, &h("pl"), b"1")?;
            s.update_record(RecordClass::Place, &h("pl"), b"2")
        })
        .unwrap();

    assert_eq!(take(&emitted), vec![("place-update".to_string(), vec![h("pl")])]);
}

#[test]
fn test_batch_commit_emits_rebuild() {
    let store = Store::in_memory().unwrap();
    let emitted = record_all(&store);

    store
        .transaction_with("Import", TransactionOptions::batch(), |s| {
            s.add_record(RecordClass::Source, &h("s1"), b"{}")?;
            s.add_record(RecordClass::Citation, &h("c1"), b"{}")?;
            s.add_record(RecordClass::Source, &h("s2"), b"{}")
        })
        .unwrap();

    let signals = take(&emitted);
    assert_eq!(names(&signals), vec!["source-rebuild", "citation-rebuild"]);
    assert!(signals.iter().all(|(_, handles)| handles.is_empty()));
}

#[test]
fn test_abort_emits_nothing() {
    let store = Store::in_memory().unwrap();
    let emitted = record_all(&store);

    store.begin("Abandoned").unwrap();
    store.add_record(RecordClass::Repository, &h("r"), b"{}").unwrap();
    store.abort().unwrap();

    assert!(take(&emitted).is_empty());
    assert!(!store.has_handle(RecordClass::Repository, &h("r")).unwrap());
}

#[test]
fn test_callbacks_can_read_the_store() {
    let store = Arc::new(Store::in_memory().unwrap());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let reader = Arc::downgrade(&store);
    let sink = Arc::clone(&seen);
    store.bus().connect(
        SignalKey::add(RecordClass::Note),
        Arc::new(move |handles: &[Handle]| {
            if let Some(store) = reader.upgrade() {
                for handle in handles {
                    sink.lock().push(store.get(RecordClass::Note, handle).unwrap());
                }
            }
        }),
    );

    store
        .transaction("Add note", |s| s.add_record(RecordClass::Note, &h("n"), b"hello"))
        .unwrap();
    assert_eq!(*seen.lock(), vec![b"hello".to_vec()]);
}
