//! End-to-end sync scenarios across several replicas.

use settledb_core::{KeepLast, ReplicaId, ValueData, ValueType};
use settledb_sync::{
    ConflictSession, RememberOutcome, ResolutionChoice, Resolutions, SessionState, SyncEngine,
    SyncOptions, SyncReport,
};
use settledb_testkit::prelude::*;
use std::path::Path;

fn sync(engine: &SyncEngine, a: &TestReplica, b: &TestReplica) -> SyncReport {
    engine
        .sync(a, b, &SyncOptions::new())
        .expect("sync pass failed")
}

fn marked_blob() -> Vec<u8> {
    let mut blob = vec![0u8; 40];
    blob[10] = 0x11;
    blob[20] = 0x12;
    blob
}

#[test]
fn identical_blobs_from_three_replicas_collapse() {
    let (clock, replicas) = replica_set(3);
    let engine = SyncEngine::new();
    for replica in &replicas {
        replica
            .set_blob(&test_product(), "Blob", marked_blob())
            .unwrap();
        clock.advance(10);
    }

    let [a, b, c] = &replicas[..] else {
        unreachable!()
    };
    for (x, y) in [(a, b), (b, c), (a, c), (a, b)] {
        let report = sync(&engine, x, y);
        assert!(report.is_clean());
    }

    for replica in &replicas {
        let history = replica
            .enumerate_past_values(&test_product(), "Blob")
            .unwrap();
        assert_eq!(history.len(), 1, "replica {}", replica.replica_id());
        assert_eq!(history[0].data, ValueData::Blob(marked_blob()));
        assert_eq!(history[0].origin, c.replica_id());
    }
}

#[test]
fn distinct_history_survives_matching() {
    let (clock, replicas) = replica_set(3);
    let engine = SyncEngine::new();
    let [a, b, c] = &replicas[..] else {
        unreachable!()
    };
    for n in 1..=3u32 {
        a.set_dword(&test_product(), "Value", n).unwrap();
        clock.advance(1);
    }
    sync(&engine, a, b);
    sync(&engine, a, c);

    for replica in &replicas {
        replica
            .set_blob(&test_product(), "Value", marked_blob())
            .unwrap();
        clock.advance(10);
    }
    for (x, y) in [(a, b), (b, c), (a, c), (a, b)] {
        sync(&engine, x, y);
    }

    for replica in &replicas {
        let history = replica
            .enumerate_past_values(&test_product(), "Value")
            .unwrap();
        let types: Vec<ValueType> = history.iter().map(|e| e.value_type()).collect();
        assert_eq!(
            types,
            vec![ValueType::Dword, ValueType::Dword, ValueType::Dword, ValueType::Blob]
        );
        assert_histories_well_formed(replica, &test_product());
    }
}

#[test]
fn edit_after_relayed_match_fast_forwards() {
    let (clock, replicas) = replica_set(3);
    let engine = SyncEngine::new();
    let [a, b, c] = &replicas[..] else {
        unreachable!()
    };
    a.set_blob(&test_product(), "Blob", marked_blob()).unwrap();
    clock.advance(10);
    b.set_blob(&test_product(), "Blob", marked_blob()).unwrap();
    clock.advance(10);

    assert!(sync(&engine, a, c).is_clean());
    assert!(sync(&engine, a, b).is_clean());

    c.set_blob(&test_product(), "Blob", vec![9]).unwrap();
    let report = sync(&engine, a, c);
    assert!(report.is_clean());
    assert_eq!(report.applied_count, 1);
    assert!(sync(&engine, a, b).is_clean());

    for replica in &replicas {
        assert_eq!(replica.get_blob(&test_product(), "Blob").unwrap(), vec![9]);
        assert_histories_well_formed(replica, &test_product());
    }
}

#[test]
fn trimmed_history_does_not_block_a_later_edit() {
    let (clock, replicas) = replica_set(2);
    let engine = SyncEngine::new();
    let (a, b) = (&replicas[0], &replicas[1]);
    a.set_dword(&test_product(), "Width", 1).unwrap();
    sync(&engine, a, b);

    clock.advance(10);
    b.set_dword(&test_product(), "Width", 2).unwrap();
    clock.advance(10);
    b.set_dword(&test_product(), "Width", 3).unwrap();
    assert_eq!(b.apply_retention(&KeepLast(1)).unwrap(), 2);

    let report = sync(&engine, a, b);
    assert!(report.is_clean());
    assert_eq!(a.get_dword(&test_product(), "Width").unwrap(), 3);
}

#[test]
fn conflicting_strings_resolve_both_ways() {
    let (clock, replicas) = replica_set(2);
    let engine = SyncEngine::new();
    let (local, remote) = (&replicas[0], &replicas[1]);

    local
        .set_string(&test_product(), "String1", "StringValueLocal")
        .unwrap();
    clock.advance(5);
    remote
        .set_string(&test_product(), "String1", "StringValueRemote2")
        .unwrap();

    let report = sync(&engine, local, remote);
    assert_eq!(report.conflict_count(), 1);
    assert_eq!(report.conflicts[0].conflicts[0].name, "String1");

    let choices = Resolutions::choose_all(&report.conflicts, ResolutionChoice::Local);
    engine
        .resolve(local, remote, &report.conflicts, &choices)
        .unwrap();
    for db in [local, remote] {
        assert_eq!(
            db.get_string(&test_product(), "String1").unwrap(),
            "StringValueLocal"
        );
    }
    assert!(sync(&engine, local, remote).is_clean());

    clock.advance(5);
    local
        .set_string(&test_product(), "String1", "StringValueLocal3")
        .unwrap();
    clock.advance(5);
    remote
        .set_string(&test_product(), "String1", "StringValueRemote3")
        .unwrap();

    let mut session = ConflictSession::new();
    session.record(&sync(&engine, local, remote));
    assert_eq!(session.state(), SessionState::ConflictsPending);
    session.choose_all(ResolutionChoice::Remote).unwrap();
    session.resolve(&engine, local, remote).unwrap();
    session.finish().unwrap();

    for db in [local, remote] {
        assert_eq!(
            db.get_string(&test_product(), "String1").unwrap(),
            "StringValueRemote3"
        );
        let current = db.get_value(&test_product(), "String1").unwrap();
        assert_eq!(current.origin, ReplicaId::SYNC_RESOLVER);
    }
    assert!(sync(&engine, local, remote).is_clean());
}

#[test]
fn tombstone_keeps_its_place_in_history() {
    let (_clock, replicas) = replica_set(2);
    let replica = &replicas[0];
    let product = test_product();

    replica.set_string(&product, "Value", "text").unwrap();
    replica.delete_value(&product, "Value").unwrap();
    replica.set_blob(&product, "Value", vec![1, 2, 3]).unwrap();
    replica.set_bool(&product, "Value", true).unwrap();

    sync(&SyncEngine::new(), replica, &replicas[1]);

    for db in &replicas {
        let history = db.enumerate_past_values(&product, "Value").unwrap();
        let types: Vec<ValueType> = history.iter().map(|e| e.value_type()).collect();
        assert_eq!(
            types,
            vec![
                ValueType::String,
                ValueType::Deleted,
                ValueType::Blob,
                ValueType::Bool
            ]
        );
        for pair in history.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
        assert!(history.iter().all(|e| !e.by.is_empty()));
    }
}

#[test]
fn deletion_propagates() {
    let (clock, replicas) = replica_set(2);
    let engine = SyncEngine::new();
    let (a, b) = (&replicas[0], &replicas[1]);
    a.set_dword(&test_product(), "Count", 4).unwrap();
    sync(&engine, a, b);

    clock.advance(1);
    a.delete_value(&test_product(), "Count").unwrap();
    sync(&engine, b, a);
    assert!(b
        .get_dword(&test_product(), "Count")
        .unwrap_err()
        .is_not_found());
    assert_converged(a, b, &test_product());
}

#[test]
fn changes_relay_through_a_middle_replica() {
    let (clock, replicas) = replica_set(3);
    let engine = SyncEngine::new();
    let [a, b, c] = &replicas[..] else {
        unreachable!()
    };
    a.set_string(&test_product(), "Theme", "dark").unwrap();
    sync(&engine, a, b);
    sync(&engine, b, c);

    clock.advance(1);
    c.set_string(&test_product(), "Theme", "light").unwrap();
    sync(&engine, b, c);
    let report = sync(&engine, a, b);
    assert!(report.is_clean());
    assert_eq!(a.get_string(&test_product(), "Theme").unwrap(), "light");
    assert_converged(a, c, &test_product());
}

#[test]
fn names_differing_in_case_are_one_value() {
    let (clock, replicas) = replica_set(2);
    let engine = SyncEngine::new();
    let (a, b) = (&replicas[0], &replicas[1]);
    a.set_dword(&test_product(), "WindowWidth", 1).unwrap();
    sync(&engine, a, b);

    clock.advance(1);
    b.set_dword(&test_product(), "WINDOWWIDTH", 2).unwrap();
    sync(&engine, a, b);
    assert_eq!(a.get_dword(&test_product(), "windowwidth").unwrap(), 2);
    let names: Vec<String> = a
        .enumerate_values(&test_product(), settledb_core::TypeFilter::Any)
        .unwrap()
        .into_iter()
        .map(|v| v.name)
        .collect();
    assert_eq!(names, vec!["WindowWidth".to_string()]);
}

#[test]
fn remembered_remote_syncs_until_forgotten() {
    let settings = TestSettings::new();
    let product = test_product();
    settings.register_product(&product).unwrap();
    settings
        .set_value(&product, "Colour", ValueData::String("red".into()))
        .unwrap();

    let remote = settings
        .create_remote_database(Path::new("remote1"))
        .unwrap();
    let outcome = settings.remember_database(&remote, "office", true).unwrap();
    assert_eq!(outcome, RememberOutcome::Added);
    assert_eq!(remote.get_string(&product, "Colour").unwrap(), "red");
    assert_eq!(settings.engine().stats().passes_completed, 1);

    let list = settings.enumerate_database_list().unwrap();
    assert_eq!(list.count, 1);
    assert_eq!(list.entries[0].friendly_name, "office");
    assert_eq!(list.entries[0].replica, remote.replica_id());

    let forgotten = settings.forget_database("OFFICE").unwrap();
    assert_eq!(forgotten.path, remote.path().unwrap());
    assert_eq!(settings.enumerate_database_list().unwrap().count, 0);
    assert!(settings
        .open_known_remote_database("office")
        .unwrap_err()
        .is_not_found());

    settings.clock.advance(1);
    settings
        .set_value(&product, "Colour", ValueData::String("blue".into()))
        .unwrap();
    assert_eq!(remote.get_string(&product, "Colour").unwrap(), "red");

    let applied_before = settings.engine().stats().entries_applied;
    let outcome = settings.remember_database(&remote, "office", true).unwrap();
    assert_eq!(outcome, RememberOutcome::Added);
    assert_eq!(remote.get_string(&product, "Colour").unwrap(), "blue");
    assert_eq!(settings.engine().stats().entries_applied - applied_before, 1);
}

#[test]
fn updating_a_remembered_remote_does_not_sync() {
    let settings = TestSettings::new();
    let product = test_product();
    settings.register_product(&product).unwrap();
    let remote = settings
        .create_remote_database(Path::new("remote1"))
        .unwrap();
    settings.remember_database(&remote, "office", false).unwrap();
    settings
        .set_value(&product, "Colour", ValueData::Dword(1))
        .unwrap();

    let outcome = settings.remember_database(&remote, "Office", true).unwrap();
    assert_eq!(outcome, RememberOutcome::Updated);
    assert!(remote.get_value(&product, "Colour").is_err());
    assert!(settings.enumerate_database_list().unwrap().entries[0].sync_by_default);

    let by_name = settings.open_known_remote_database("office").unwrap();
    assert_eq!(by_name.replica_id(), remote.replica_id());
}
