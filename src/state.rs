//! Conversation State Store: per-`(tenant_id, sender_id)`
//! single-slot state with a sliding expiry. Backed by the
//! `conversation_states` table via the shared `Db` connection, the same way
//! `otp.rs` and `idempotency.rs` use it.

use crate::db::Db;
use crate::models::{ConversationState, ConversationStep};
use rusqlite::params;

pub struct StateStore<'a> {
    db: &'a Db,
}

/// Outcome of a load, distinguishing "never had state" from "had state that
/// just expired" so the dispatcher can emit a distinct "session expired"
/// reply rather than folding both into `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Active(ConversationState),
    Expired,
    None,
}

impl<'a> StateStore<'a> {
    pub fn new(db: &'a Db) -> Self {
        Self { db }
    }

    /// Load the current state, treating an expired row as absent.
    pub fn load(&self, tenant_id: &str, sender_id: &str) -> Option<ConversationState> {
        match self.load_outcome(tenant_id, sender_id) {
            LoadOutcome::Active(state) => Some(state),
            LoadOutcome::Expired | LoadOutcome::None => None,
        }
    }

    /// Same as `load`, but reports whether an absent result is due to
    /// expiry (clearing the row either way).
    pub fn load_outcome(&self, tenant_id: &str, sender_id: &str) -> LoadOutcome {
        let conn = self.db.conn.lock().unwrap();
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT step_json, deadline_ms FROM conversation_states
                 WHERE tenant_id = ?1 AND sender_id = ?2",
                params![tenant_id, sender_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .ok();

        let Some((step_json, deadline_ms)) = row else {
            return LoadOutcome::None;
        };
        let now = crate::db::now_ms();
        if now >= deadline_ms {
            conn.execute(
                "DELETE FROM conversation_states WHERE tenant_id = ?1 AND sender_id = ?2",
                params![tenant_id, sender_id],
            )
            .ok();
            return LoadOutcome::Expired;
        }

        match serde_json::from_str(&step_json) {
            Ok(step) => LoadOutcome::Active(ConversationState { step, deadline_ms }),
            Err(_) => LoadOutcome::None,
        }
    }

    /// Store `step` with a fresh deadline `ttl_seconds` from now.
    pub fn save(&self, tenant_id: &str, sender_id: &str, step: &ConversationStep, ttl_seconds: u64) {
        let now = crate::db::now_ms();
        let deadline_ms = now + (ttl_seconds as i64) * 1000;
        let step_json = serde_json::to_string(step).expect("ConversationStep serializes");

        let conn = self.db.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO conversation_states (tenant_id, sender_id, step_json, deadline_ms)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(tenant_id, sender_id) DO UPDATE SET
                step_json = excluded.step_json,
                deadline_ms = excluded.deadline_ms",
            params![tenant_id, sender_id, step_json, deadline_ms],
        )
        .expect("conversation_states upsert");
    }

    /// Explicitly clear state, e.g. on `CancelFlow` intent or flow completion.
    pub fn clear(&self, tenant_id: &str, sender_id: &str) {
        let conn = self.db.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM conversation_states WHERE tenant_id = ?1 AND sender_id = ?2",
            params![tenant_id, sender_id],
        )
        .ok();
    }

    /// Delete all rows past their deadline. Run periodically by the reaper
    /// fairing; `load` already self-heals per-row, this just bounds table size
    /// for senders who never send a follow-up message.
    pub fn reap_expired(&self) -> usize {
        let conn = self.db.conn.lock().unwrap();
        let now = crate::db::now_ms();
        conn.execute(
            "DELETE FROM conversation_states WHERE deadline_ms <= ?1",
            params![now],
        )
        .unwrap_or(0)
    }
}
