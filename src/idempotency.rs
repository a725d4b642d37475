//! Idempotency cache: webhook retries of an
//! already-processed `event_id` must be absorbed with no side effects. Built
//! on the same `INSERT ... then check rowcount` idiom the existing code uses
//! elsewhere for "claim-once" semantics, backed by the `idempotency` table.

use crate::db::Db;
use rusqlite::params;

const RETENTION_MS: i64 = 24 * 60 * 60 * 1000;

/// Atomically record `event_id` as seen. Returns `true` if this is the first
/// time it's been observed (caller should process it), `false` if it was
/// already present (caller should skip processing and still return 200).
pub fn claim(db: &Db, event_id: &str) -> bool {
    let conn = db.conn.lock().unwrap();
    let now = crate::db::now_ms();
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO idempotency (event_id, created_at_ms) VALUES (?1, ?2)",
            params![event_id, now],
        )
        .expect("idempotency insert");
    inserted == 1
}

/// Reverse a `claim`: used when a handler blew its event budget
/// and must NOT be considered processed, so a platform retry is handled again.
pub fn unclaim(db: &Db, event_id: &str) {
    let conn = db.conn.lock().unwrap();
    conn.execute("DELETE FROM idempotency WHERE event_id = ?1", params![event_id])
        .ok();
}

/// Delete entries older than 24h. Intended to run on a periodic background
/// task.
pub fn reap(db: &Db) -> usize {
    let conn = db.conn.lock().unwrap();
    let now = crate::db::now_ms();
    let cutoff = now - RETENTION_MS;
    conn.execute(
        "DELETE FROM idempotency WHERE created_at_ms < ?1",
        params![cutoff],
    )
    .unwrap_or(0)
}
