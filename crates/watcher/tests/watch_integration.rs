//! End-to-end tests for watcher handles
//!
//! Most tests drive the engine with hand-made native events over a real
//! temporary directory so ordering is deterministic. The `native_*` tests
//! use the platform watcher and wait for real events.

use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{Event, EventKind};
use osb_core::WatchConfig;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use watcher::{
    Action, ChangeEvent, Engine, NullBackend, WatchError, WatchOptions, Watcher, WatcherEvent,
};

fn manual_engine() -> Engine {
    Engine::with_backend(WatchConfig::default(), Box::new(NullBackend))
}

fn canonical_temp() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let dir = fs::canonicalize(temp_dir.path()).unwrap();
    (temp_dir, dir)
}

fn created(path: &Path) -> Event {
    Event::new(EventKind::Create(CreateKind::Any)).add_path(path.to_path_buf())
}

fn modified(path: &Path) -> Event {
    Event::new(EventKind::Modify(ModifyKind::Any)).add_path(path.to_path_buf())
}

fn removed(path: &Path) -> Event {
    Event::new(EventKind::Remove(RemoveKind::Any)).add_path(path.to_path_buf())
}

fn drain(rx: &crossbeam_channel::Receiver<WatcherEvent>) -> Vec<(Action, PathBuf)> {
    rx.try_iter()
        .filter_map(|event| match event {
            WatcherEvent::Change(change) => Some((change.action, change.file)),
            WatcherEvent::Error { .. } => None,
        })
        .collect()
}

#[test]
fn test_listener_receives_changes_in_order() {
    let (_temp, dir) = canonical_temp();
    let engine = manual_engine();
    let handle = Watcher::new(&engine, &dir, WatchOptions::default()).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    handle.on_change(move |event: &ChangeEvent| {
        sink.lock().unwrap().push((event.action, event.filename.clone()));
        Ok(())
    });

    let file = dir.join("notes.txt");
    fs::write(&file, b"a").unwrap();
    engine.process_event(created(&file));
    fs::remove_file(&file).unwrap();
    engine.process_event(removed(&file));

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (Action::Add, "notes.txt".to_string()),
            (Action::Delete, "notes.txt".to_string())
        ]
    );
}

#[test]
fn test_two_handles_one_path() {
    let (_temp, dir) = canonical_temp();
    let engine = manual_engine();
    let first = Watcher::new(&engine, &dir, WatchOptions::default()).unwrap();
    let second = Watcher::new(&engine, &dir, WatchOptions::default()).unwrap();
    let rx1 = first.events();
    let rx2 = second.events();

    let status = engine.status();
    assert_eq!(status.watchers, 2);
    let fswatchers = status.fswatchers;

    let file = dir.join("x");
    fs::write(&file, b"").unwrap();
    engine.process_event(created(&file));

    assert_eq!(drain(&rx1), vec![(Action::Add, file.clone())]);
    assert_eq!(drain(&rx2), vec![(Action::Add, file.clone())]);

    // The first handle going away leaves the second intact
    assert!(!first.close());
    assert_eq!(engine.status().fswatchers, fswatchers);

    fs::write(&file, b"changed").unwrap();
    std::thread::sleep(Duration::from_millis(30));
    engine.process_event(modified(&file));
    assert!(drain(&rx1).is_empty());
    assert_eq!(drain(&rx2), vec![(Action::Change, file)]);

    assert!(second.close());
    let status = engine.status();
    assert_eq!((status.nodes, status.fswatchers, status.watchers), (0, 0, 0));
}

#[test]
fn test_close_is_idempotent_and_reopen_works() {
    let (_temp, dir) = canonical_temp();
    let engine = manual_engine();
    let handle = Watcher::new(&engine, &dir, WatchOptions::default()).unwrap();

    assert!(matches!(handle.open(), Err(WatchError::AlreadyOpen)));
    assert!(handle.close());
    assert!(!handle.close());
    assert!(!handle.is_open());

    handle.open().unwrap();
    assert!(handle.is_open());
    assert_eq!(engine.status().watchers, 1);
}

#[test]
fn test_dropping_handle_releases_tree() {
    let (_temp, dir) = canonical_temp();
    let engine = manual_engine();
    {
        let _handle = Watcher::new(&engine, &dir, WatchOptions::recursive()).unwrap();
        assert!(engine.status().nodes > 0);
    }
    assert_eq!(engine.status().nodes, 0);
}

#[test]
fn test_invalid_arguments() {
    let engine = manual_engine();

    assert!(matches!(
        Watcher::new(&engine, "", WatchOptions::default()),
        Err(WatchError::InvalidPath)
    ));
    assert!(matches!(
        Watcher::new(
            &engine,
            "/tmp",
            WatchOptions {
                recursive: false,
                depth: Some(1)
            }
        ),
        Err(WatchError::InvalidOptions { .. })
    ));
    assert!(matches!(
        Watcher::new(&engine, "/", WatchOptions::recursive()),
        Err(WatchError::RecursiveRoot { .. })
    ));
    assert_eq!(engine.status().nodes, 0);
}

#[test]
fn test_foreign_watcher_rejected() {
    let (_temp, dir) = canonical_temp();
    let engine = manual_engine();
    let other = manual_engine();
    let handle = Watcher::new(&engine, &dir, WatchOptions::default()).unwrap();

    assert!(matches!(
        other.register(&dir, Some(&handle)),
        Err(WatchError::ForeignWatcher)
    ));
}

#[test]
fn test_failing_listener_is_isolated() {
    let (_temp, dir) = canonical_temp();
    let engine = manual_engine();
    let broken = Watcher::new(&engine, &dir, WatchOptions::default()).unwrap();
    let healthy = Watcher::new(&engine, &dir, WatchOptions::default()).unwrap();

    broken.on_change(|_: &ChangeEvent| anyhow::bail!("listener failed"));
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    broken.on_error(move |error, event| {
        sink.lock()
            .unwrap()
            .push((error.to_string(), event.map(|e| e.action)));
    });
    let rx = healthy.events();

    let file = dir.join("f");
    fs::write(&file, b"").unwrap();
    engine.process_event(created(&file));

    assert_eq!(drain(&rx), vec![(Action::Add, file)]);
    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].0.contains("listener failed"));
    assert_eq!(errors[0].1, Some(Action::Add));
}

#[test]
fn test_listener_can_open_watchers() {
    let (_temp, dir) = canonical_temp();
    let engine = manual_engine();
    let handle = Watcher::new(&engine, &dir, WatchOptions::default()).unwrap();

    let spawned = Arc::new(Mutex::new(Vec::new()));
    let inner_engine = engine.clone();
    let keep = spawned.clone();
    handle.on_change(move |event: &ChangeEvent| {
        let child = Watcher::new(&inner_engine, &event.file, WatchOptions::default())?;
        keep.lock().unwrap().push(child);
        Ok(())
    });

    let sub = dir.join("sub");
    fs::create_dir(&sub).unwrap();
    engine.process_event(created(&sub));

    assert_eq!(spawned.lock().unwrap().len(), 1);
    assert_eq!(engine.status().watchers, 2);
}

#[test]
fn test_recursive_handle_sees_new_subtrees() {
    let (_temp, dir) = canonical_temp();
    let engine = manual_engine();
    let handle = Watcher::new(&engine, &dir, WatchOptions::recursive()).unwrap();
    let rx = handle.events();

    fs::create_dir(dir.join("a")).unwrap();
    engine.process_event(created(&dir.join("a")));
    fs::create_dir(dir.join("a/b")).unwrap();
    engine.process_event(created(&dir.join("a/b")));
    fs::write(dir.join("a/b/c.txt"), b"").unwrap();
    engine.process_event(created(&dir.join("a/b/c.txt")));

    assert_eq!(
        drain(&rx),
        vec![
            (Action::Add, dir.join("a")),
            (Action::Add, dir.join("a/b")),
            (Action::Add, dir.join("a/b/c.txt")),
        ]
    );

    let node = engine.lookup(dir.join("a/b")).unwrap().unwrap();
    let info = engine.node_info(node).unwrap();
    assert!(info.native);
    assert_eq!(info.recursive, 1);
}

#[test]
fn test_directory_appearing_with_content() {
    let (_temp, dir) = canonical_temp();
    let engine = manual_engine();
    let handle = Watcher::new(&engine, &dir, WatchOptions::recursive()).unwrap();
    let rx = handle.events();

    // Moved in as a whole: only the top entry gets a native event
    let staging = TempDir::new().unwrap();
    fs::create_dir_all(staging.path().join("pkg/src")).unwrap();
    fs::write(staging.path().join("pkg/readme"), b"").unwrap();
    fs::rename(staging.path().join("pkg"), dir.join("pkg")).unwrap();
    engine.process_event(created(&dir.join("pkg")));

    assert_eq!(
        drain(&rx),
        vec![
            (Action::Add, dir.join("pkg")),
            (Action::Add, dir.join("pkg/readme")),
            (Action::Add, dir.join("pkg/src")),
        ]
    );
}

#[test]
fn test_access_events_are_ignored() {
    let (_temp, dir) = canonical_temp();
    let engine = manual_engine();
    let handle = Watcher::new(&engine, &dir, WatchOptions::default()).unwrap();
    let rx = handle.events();

    let file = dir.join("read-me");
    fs::write(&file, b"").unwrap();
    engine.process_event(
        Event::new(EventKind::Access(notify::event::AccessKind::Any)).add_path(file),
    );
    assert!(drain(&rx).is_empty());
}

#[cfg(unix)]
#[test]
fn test_symlinked_directory_relays_changes() {
    let (_temp, dir) = canonical_temp();
    fs::create_dir(dir.join("real")).unwrap();
    std::os::unix::fs::symlink(dir.join("real"), dir.join("alias")).unwrap();

    let engine = manual_engine();
    let handle = Watcher::new(&engine, dir.join("alias"), WatchOptions::default()).unwrap();
    let rx = handle.events();

    let file = dir.join("real/inside");
    fs::write(&file, b"").unwrap();
    engine.process_event(created(&file));

    assert_eq!(drain(&rx), vec![(Action::Add, dir.join("alias/inside"))]);
}

#[test]
fn test_subscribe_all_and_reset() {
    let (_temp, dir) = canonical_temp();
    let engine = manual_engine();
    let bus = engine.subscribe_all();
    let handle = Watcher::new(&engine, &dir, WatchOptions::default()).unwrap();

    let file = dir.join("bus");
    fs::write(&file, b"").unwrap();
    engine.process_event(created(&file));
    assert_eq!(bus.try_recv().unwrap().file, file);

    engine.reset();
    assert_eq!(engine.status().nodes, 0);
    // Already detached by the reset
    assert!(!handle.close());
}

fn wait_for(
    rx: &crossbeam_channel::Receiver<WatcherEvent>,
    wanted: (Action, PathBuf),
) -> Vec<(Action, PathBuf)> {
    let mut seen = Vec::new();
    while let Ok(event) = rx.recv_timeout(Duration::from_secs(5)) {
        if let WatcherEvent::Change(change) = event {
            let entry = (change.action, change.file);
            let done = entry == wanted;
            seen.push(entry);
            if done {
                break;
            }
        }
    }
    seen
}

#[test]
fn native_add_change_delete() {
    let (_temp, dir) = canonical_temp();
    let engine = Engine::new(WatchConfig::default()).unwrap();
    let handle = Watcher::new(&engine, &dir, WatchOptions::default()).unwrap();
    let rx = handle.events();

    let file = dir.join("native.txt");
    fs::write(&file, b"1").unwrap();
    let seen = wait_for(&rx, (Action::Add, file.clone()));
    assert_eq!(seen.last(), Some(&(Action::Add, file.clone())));

    std::thread::sleep(Duration::from_millis(50));
    fs::remove_file(&file).unwrap();
    let seen = wait_for(&rx, (Action::Delete, file.clone()));
    assert_eq!(seen.last(), Some(&(Action::Delete, file)));
}

#[test]
fn native_watch_before_creation() {
    let (_temp, dir) = canonical_temp();
    let target = dir.join("later");
    let engine = Engine::new(WatchConfig::default()).unwrap();
    let handle = Watcher::new(&engine, &target, WatchOptions::default()).unwrap();
    let rx = handle.events();

    fs::create_dir(&target).unwrap();
    let seen = wait_for(&rx, (Action::Add, target.clone()));
    assert_eq!(seen.last(), Some(&(Action::Add, target.clone())));

    // Give the new native watch a moment before writing inside
    std::thread::sleep(Duration::from_millis(100));
    let inner = target.join("x.txt");
    fs::write(&inner, b"").unwrap();
    let seen = wait_for(&rx, (Action::Add, inner.clone()));
    assert_eq!(seen.last(), Some(&(Action::Add, inner)));
}

#[test]
fn test_prepared_handle_listens_from_open() {
    let (_temp, dir) = canonical_temp();
    let engine = manual_engine();

    let handle = Watcher::prepare(&engine, &dir, WatchOptions::default()).unwrap();
    assert!(!handle.is_open());
    assert_eq!(engine.status().watchers, 0);
    assert_eq!(engine.status().nodes, 0);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    handle.on_change(move |event: &ChangeEvent| {
        sink.lock().unwrap().push(event.file.clone());
        Ok(())
    });
    handle.open().unwrap();
    assert_eq!(engine.status().watchers, 1);

    let file = dir.join("first");
    fs::write(&file, b"").unwrap();
    engine.process_event(created(&file));
    assert_eq!(*seen.lock().unwrap(), vec![file]);

    // Validation still happens up front
    assert!(matches!(
        Watcher::prepare(&engine, "/", WatchOptions::recursive()),
        Err(WatchError::RecursiveRoot { .. })
    ));
}
