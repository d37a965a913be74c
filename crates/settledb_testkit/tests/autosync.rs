//! The autosync scheduler driven through `Settings`.

use settledb_core::{ProductKey, Registration, ValueData};
use settledb_sync::{
    DetectedProduct, DetectionStatus, ResolutionChoice, Resolutions, SchedulerConfig,
    SourceLocation, StatusEvent, SyncError, ValueBinding,
};
use settledb_testkit::prelude::*;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);

fn quiet_scheduler() -> SchedulerConfig {
    SchedulerConfig::new(Duration::from_secs(3600))
        .with_run_on_start(false)
        .with_sync_admin(false)
        .with_redetect(false)
}

fn started(sink: &Arc<RecordingSink>, config: SchedulerConfig) -> TestSettings {
    let sink = sink.clone();
    TestSettings::with_options(move |options| options.with_autosync(config).with_sink(sink))
}

fn retry_busy<T>(mut f: impl FnMut() -> Result<T, SyncError>) -> T {
    loop {
        match f() {
            Err(SyncError::Busy) => std::thread::sleep(Duration::from_millis(10)),
            other => return other.expect("Failed outside a busy wait"),
        }
    }
}

#[test]
fn redetection_registers_products_and_writes_bindings() {
    let sink = Arc::new(RecordingSink::new());
    let monitor = Arc::new(ManualChangeMonitor::new());
    let product = ProductKey::new("Editor", "2.1", "cafef00d");
    let ini = std::env::temp_dir().join("editor.ini");
    let locator = Arc::new(StaticLocator::new(vec![DetectedProduct {
        product: product.clone(),
        status: DetectionStatus::Registered,
        bindings: vec![ValueBinding {
            name: "FontSize".into(),
            location: SourceLocation::IniKey {
                file: ini.clone(),
                section: "View".into(),
                key: "FontSize".into(),
            },
            value: Some(ValueData::Dword(12)),
        }],
    }]));

    let config = SchedulerConfig::new(Duration::from_secs(3600)).with_sync_admin(false);
    let (s, m, l) = (sink.clone(), monitor.clone(), locator.clone());
    let settings = TestSettings::with_options(move |options| {
        options
            .with_autosync(config)
            .with_sink(s)
            .with_monitor(m)
            .with_locator(l)
    });

    assert!(sink.wait_for(1, WAIT, |e| matches!(
        e,
        StatusEvent::RedetectProductsFinished { detected: 1, .. }
    )));
    assert!(settings
        .local()
        .is_registered(&product, Registration::User));
    assert_eq!(settings.local().get_dword(&product, "FontSize").unwrap(), 12);
    assert!(monitor.watched().contains(&ini));
    assert!(locator.calls() >= 1);

    locator.set(vec![DetectedProduct {
        product: product.clone(),
        status: DetectionStatus::Unregistered,
        bindings: Vec::new(),
    }]);
    assert_eq!(monitor.trigger(&ini), 1);
    assert!(eventually(WAIT, || !settings
        .local()
        .is_registered(&product, Registration::User)));
}

#[test]
fn local_writes_reach_remembered_remotes() {
    let sink = Arc::new(RecordingSink::new());
    let settings = started(&sink, quiet_scheduler());
    let product = test_product();
    settings.register_product(&product).unwrap();

    let remote = settings
        .create_remote_database(Path::new("usb"))
        .unwrap();
    retry_busy(|| settings.remember_database(&remote, "usb", true));
    assert!(eventually(WAIT, || remote
        .is_registered(&product, Registration::User)));

    settings.clock.advance(1);
    retry_busy(|| settings.set_value(&product, "Theme", ValueData::String("dark".into())));
    assert!(eventually(WAIT, || remote
        .get_string(&product, "Theme")
        .is_ok_and(|v| v == "dark")));
    assert!(sink.count(|e| matches!(e, StatusEvent::RemoteGood { remote: name } if name == "usb")) >= 1);
}

#[test]
fn unreachable_remote_is_kept_and_reported() {
    let sink = Arc::new(RecordingSink::new());
    let settings = started(&sink, quiet_scheduler());
    settings.register_product(&test_product()).unwrap();

    let remote = settings
        .create_remote_database(Path::new("share"))
        .unwrap();
    let path = remote.path().unwrap().to_path_buf();
    retry_busy(|| settings.remember_database(&remote, "share", true));
    assert!(eventually(WAIT, || remote
        .is_registered(&test_product(), Registration::User)));
    settings.disconnect(remote);
    std::fs::remove_dir_all(&path).unwrap();

    assert!(settings.sync_now());
    assert!(sink.wait_for(1, WAIT, |e| matches!(
        e,
        StatusEvent::GeneralError { message } if message.contains("unreachable")
    )));
    let list = settings.enumerate_database_list().unwrap();
    assert_eq!(list.count, 1);
    assert_eq!(list.entries[0].friendly_name, "share");
}

#[test]
fn conflicts_block_the_product_until_resolved() {
    let sink = Arc::new(RecordingSink::new());
    let settings = started(&sink, quiet_scheduler());
    let product = test_product();
    settings.register_product(&product).unwrap();
    retry_busy(|| settings.set_value(&product, "Mode", ValueData::String("local".into())));

    let remote = settings
        .create_remote_database(Path::new("laptop"))
        .unwrap();
    remote.register_product(&product, Registration::User).unwrap();
    settings.clock.advance(1);
    remote.set_string(&product, "Mode", "remote").unwrap();

    // Remembered without a pass, then switched on so only autosync syncs it.
    retry_busy(|| settings.remember_database(&remote, "laptop", false));
    retry_busy(|| settings.remember_database(&remote, "laptop", true));
    settings.sync_now();

    assert!(sink.wait_for(1, WAIT, |e| matches!(
        e,
        StatusEvent::SyncRemoteFinished { conflicts: 1, .. }
    )));
    assert!(settings.blocked_products(&remote).contains(&product));
    let (name, conflicts) = sink.conflicts().remove(0);
    assert_eq!(name, "laptop");
    assert_eq!(conflicts[0].conflicts[0].name, "Mode");

    let choices = Resolutions::choose_all(&conflicts, ResolutionChoice::Remote);
    let report = retry_busy(|| settings.resolve(&remote, &conflicts, &choices));
    assert!(report.is_complete());
    assert!(settings.blocked_products(&remote).is_empty());
    for db in [settings.local().as_ref(), remote.as_ref()] {
        assert_eq!(db.get_string(&product, "Mode").unwrap(), "remote");
    }
}

#[test]
fn monitor_wakes_on_remote_changes() {
    let sink = Arc::new(RecordingSink::new());
    let monitor = Arc::new(ManualChangeMonitor::new());
    let m = monitor.clone();
    let s = sink.clone();
    let settings = TestSettings::with_options(move |options| {
        options
            .with_autosync(quiet_scheduler())
            .with_sink(s)
            .with_monitor(m)
    });
    settings.register_product(&test_product()).unwrap();
    let remote = settings
        .create_remote_database(Path::new("nas"))
        .unwrap();
    retry_busy(|| settings.remember_database(&remote, "nas", true));

    let path = remote.path().unwrap().to_path_buf();
    assert!(eventually(WAIT, || monitor.watched().contains(&path)));

    settings.clock.advance(1);
    retry_busy(|| remote.set_dword(&test_product(), "Volume", 7).map_err(SyncError::from));
    assert!(monitor.trigger(&path.join("settings.journal")) >= 1);
    assert!(eventually(WAIT, || settings
        .local()
        .get_dword(&test_product(), "Volume")
        .is_ok_and(|v| v == 7)));
}

#[test]
fn autosync_stops_with_settings() {
    let sink = Arc::new(RecordingSink::new());
    let settings = started(&sink, quiet_scheduler().with_run_on_start(true));
    assert!(settings.is_autosync_running());
    assert!(sink.wait_for(1, WAIT, |e| matches!(e, StatusEvent::AutoSyncRunning)));

    settings.uninitialize().unwrap();
}
