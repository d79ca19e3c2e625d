use std::sync::{Arc, Barrier};
use std::thread;

use carblock_db::{Config, Database, SendError};
use uuid::Uuid;

fn open(dir: &tempfile::TempDir, max_messages: u32, max_size: usize) -> Arc<Database> {
    let mut config = Config::default();
    config.database.path = dir.path().join("carblock.db");
    config.pool.max_size = max_size;
    config.rate_limiting.max_messages = max_messages;
    Arc::new(Database::open(&config).unwrap())
}

/// Fire `attempts` sends from `sender` at the same instant and collect the
/// outcomes.
fn race(db: &Arc<Database>, sender: Uuid, attempts: usize) -> Vec<Result<(), SendError>> {
    let barrier = Arc::new(Barrier::new(attempts));
    let handles: Vec<_> = (0..attempts)
        .map(|i| {
            let db = Arc::clone(db);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                db.send(sender, "ABC123", &format!("attempt {i}")).map(|_| ())
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn simultaneous_sends_never_exceed_the_limit() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir, 3, 8);
    let sender = db.ensure_user(1, "sender").unwrap();
    let owner = db.ensure_user(2, "owner").unwrap();
    db.register_plate(owner.id, "ABC123").unwrap();

    let outcomes = race(&db, sender.id, 8);

    let admitted = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(admitted, 3);
    for outcome in &outcomes {
        assert!(
            matches!(outcome, Ok(()) | Err(SendError::RateLimited { .. })),
            "unexpected outcome {outcome:?}"
        );
    }
    assert_eq!(db.recent_sent(sender.id, 100).unwrap().len(), 3);
    assert_eq!(db.inbox(owner.id, 100).unwrap().len(), 3);
    assert_eq!(db.remaining_messages(sender.id).unwrap(), 0);
}

#[test]
fn two_sends_at_the_boundary_admit_exactly_one() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir, 3, 4);
    let sender = db.ensure_user(1, "sender").unwrap();
    let owner = db.ensure_user(2, "owner").unwrap();
    db.register_plate(owner.id, "ABC123").unwrap();

    db.send(sender.id, "ABC123", "one").unwrap();
    db.send(sender.id, "ABC123", "two").unwrap();

    let outcomes = race(&db, sender.id, 2);
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(db.recent_sent(sender.id, 100).unwrap().len(), 3);
}

#[test]
fn connections_are_shared_when_workers_outnumber_the_pool() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir, 3, 2);
    let sender = db.ensure_user(1, "sender").unwrap();
    let owner = db.ensure_user(2, "owner").unwrap();
    db.register_plate(owner.id, "ABC123").unwrap();

    let outcomes = race(&db, sender.id, 6);
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 3);

    let status = db.pool_status();
    assert!(status.open <= 2);
    assert_eq!(status.in_use, 0);
}
