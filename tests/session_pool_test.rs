mod common;

use common::{FakeEngine, pool_for};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sqlmcp::SqlMcpError;
use sqlmcp::client::{ClientError, ClientErrorKind};

#[test]
fn test_session_never_shared_between_holders() {
    let engine = FakeEngine::new();
    let pool = pool_for(&engine);
    let in_use = Arc::new(Mutex::new(HashSet::new()));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let pool = pool.clone();
            let in_use = in_use.clone();
            thread::spawn(move || {
                for _ in 0..20 {
                    let session = pool.acquire().unwrap();
                    assert!(in_use.lock().insert(session.id()), "session handed out twice");
                    thread::sleep(Duration::from_micros(200));
                    assert!(in_use.lock().remove(&session.id()));
                    session.release();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = pool.stats();
    assert!(stats.created as usize <= 16);
    assert_eq!(stats.idle, stats.registered);
    assert_eq!(engine.sessions_opened() as u64, stats.created);
}

#[test]
fn test_lost_sessions_are_replaced() {
    let engine = FakeEngine::new();
    let pool = pool_for(&engine);
    let a = pool.acquire().unwrap();
    let b = pool.acquire().unwrap();
    a.release();
    b.release();
    assert_eq!(pool.stats().idle, 2);

    engine.kill_sessions();
    let fresh = pool.acquire().unwrap();
    assert!(fresh.is_alive());

    let stats = pool.stats();
    assert_eq!(stats.discarded, 2);
    assert_eq!(stats.registered, 1);
    assert_eq!(engine.sessions_opened(), 3);
}

#[test]
fn test_open_failure_surfaces_as_connection_error() {
    let engine = FakeEngine::new();
    let pool = pool_for(&engine);
    let _held = pool.acquire().unwrap();

    engine.fail_connect(Some(ClientError::new(ClientErrorKind::Io, "network down")));
    let err = pool.acquire().unwrap_err();
    assert!(matches!(err, SqlMcpError::Connection(_)));
}

#[test]
fn test_shutdown_tears_down_everything() {
    let engine = FakeEngine::new();
    let pool = pool_for(&engine);
    let held = pool.acquire().unwrap();
    let idle = pool.acquire().unwrap();
    idle.release();

    pool.shutdown();
    assert_eq!(engine.sessions_closed(), 2);
    assert!(!held.is_alive());
    assert_eq!(pool.stats().registered, 0);

    drop(held);
    assert_eq!(pool.stats().idle, 0);
}

#[test]
fn test_drop_shuts_down() {
    let engine = FakeEngine::new();
    let pool = pool_for(&engine);
    pool.acquire().unwrap().release();
    drop(pool);
    assert_eq!(engine.sessions_closed(), 1);
}

#[test]
fn test_acquire_after_shutdown_opens_new_session() {
    let engine = FakeEngine::new();
    let pool = pool_for(&engine);
    let before = pool.acquire().unwrap();
    let old_id = before.id();
    before.release();

    pool.shutdown();
    let after = pool.acquire().unwrap();
    assert_ne!(after.id(), old_id);
    assert!(after.is_alive());
    assert_eq!(engine.sessions_opened(), 2);
    assert_eq!(pool.stats().registered, 1);
}
