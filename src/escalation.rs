//! Escalation Detector & Approval Queue: monetary/flag triggers
//! that pause an order, a single-writer resolution path via compare-and-swap
//! on status, and a periodic 24h expiry sweep. The CAS-on-status idiom
//! mirrors the channel-binding atomic-swap used elsewhere and reuses the
//! same `Mutex<Connection>` access pattern as the rest of the storage layer.

use crate::config::GatewayConfig;
use crate::db::Db;
use crate::models::{EscalationDecision, EscalationReason, EscalationStatus, OrderStatus};
use rusqlite::params;

const EXPIRY_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    Resolved { order_id: String },
    AlreadyResolved,
    NotFound,
}

pub struct EscalationQueue<'a> {
    db: &'a Db,
    config: &'a GatewayConfig,
}

#[derive(Debug, Clone, Copy)]
pub struct OrderVerificationInput {
    pub total_amount_minor: i64,
    pub vendor_flagged: bool,
    pub ocr_confidence: Option<f64>,
}

const OCR_LOW_CONFIDENCE_THRESHOLD: f64 = 0.6;

impl<'a> EscalationQueue<'a> {
    pub fn new(db: &'a Db, config: &'a GatewayConfig) -> Self {
        Self { db, config }
    }

    /// Evaluate detection thresholds for an order about to become VERIFIED.
    /// Returns the triggering reason, if any, in priority order: HIGH_VALUE,
    /// VENDOR_FLAGGED, OCR_LOW_CONFIDENCE.
    pub fn detect(&self, input: OrderVerificationInput) -> Option<EscalationReason> {
        if input.total_amount_minor >= self.config.high_value_threshold {
            return Some(EscalationReason::HighValue);
        }
        if input.vendor_flagged {
            return Some(EscalationReason::VendorFlagged);
        }
        if let Some(confidence) = input.ocr_confidence {
            if confidence < OCR_LOW_CONFIDENCE_THRESHOLD {
                return Some(EscalationReason::OcrLowConfidence);
            }
        }
        None
    }

    /// Transition the order to ESCALATED and create the Escalation record
    /// atomically (condition: no other PENDING escalation for this order).
    /// Returns `None` if a PENDING escalation already exists for the order.
    pub fn escalate(&self, tenant_id: &str, order_id: &str, reason: EscalationReason) -> Option<String> {
        let conn = self.db.conn.lock().unwrap();
        let existing: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM escalations WHERE order_id = ?1 AND status = 'PENDING'",
                params![order_id],
                |row| row.get(0),
            )
            .unwrap_or(0);
        if existing > 0 {
            return None;
        }

        let escalation_id = uuid::Uuid::new_v4().to_string();
        let now = crate::db::now_ms();
        conn.execute(
            "INSERT INTO escalations
                (escalation_id, order_id, tenant_id, reason, status, created_at_ms, expires_at_ms)
             VALUES (?1, ?2, ?3, ?4, 'PENDING', ?5, ?6)",
            params![
                escalation_id,
                order_id,
                tenant_id,
                reason_str(reason),
                now,
                now + EXPIRY_MS,
            ],
        )
        .expect("escalations insert");

        conn.execute(
            "UPDATE orders SET status = 'ESCALATED', updated_at = ?1 WHERE order_id = ?2",
            params![crate::db::now_rfc3339(), order_id],
        )
        .ok();

        Some(escalation_id)
    }

    /// Compare-and-swap resolution: PENDING → APPROVED|REJECTED. This is the
    /// low-level primitive only; it performs no OTP authentication of its
    /// own. `Dispatcher::resolve_escalation` wraps this with the OTP check
    /// that must pass before a CAS is attempted at all.
    pub fn resolve(&self, escalation_id: &str, decision: EscalationDecision) -> ResolveOutcome {
        let conn = self.db.conn.lock().unwrap();
        let order_id: Option<String> = conn
            .query_row(
                "SELECT order_id FROM escalations WHERE escalation_id = ?1",
                params![escalation_id],
                |row| row.get(0),
            )
            .ok();
        let Some(order_id) = order_id else {
            return ResolveOutcome::NotFound;
        };

        let new_status = match decision {
            EscalationDecision::Approve => "APPROVED",
            EscalationDecision::Reject => "REJECTED",
        };

        let rows = conn
            .execute(
                "UPDATE escalations SET status = ?1
                 WHERE escalation_id = ?2 AND status = 'PENDING'",
                params![new_status, escalation_id],
            )
            .unwrap_or(0);

        if rows == 0 {
            return ResolveOutcome::AlreadyResolved;
        }

        let order_status = match decision {
            EscalationDecision::Approve => OrderStatus::Approved,
            EscalationDecision::Reject => OrderStatus::Rejected,
        };
        conn.execute(
            "UPDATE orders SET status = ?1, updated_at = ?2 WHERE order_id = ?3",
            params![order_status.as_str(), crate::db::now_rfc3339(), order_id],
        )
        .ok();

        ResolveOutcome::Resolved { order_id }
    }

    /// Tenant an escalation belongs to, for callers that only have a tenant
    /// id from the request path and need to reject a cross-tenant lookup
    /// before doing anything else with the escalation.
    pub fn tenant_of(&self, escalation_id: &str) -> Option<String> {
        let conn = self.db.conn.lock().unwrap();
        conn.query_row(
            "SELECT tenant_id FROM escalations WHERE escalation_id = ?1",
            params![escalation_id],
            |row| row.get(0),
        )
        .ok()
    }

    /// Periodic sweep (every 5 min): PENDING escalations past their 24h
    /// expiry become EXPIRED, and their orders become REJECTED.
    pub fn sweep_expired(&self) -> usize {
        let conn = self.db.conn.lock().unwrap();
        let now = crate::db::now_ms();

        let expired_ids: Vec<(String, String)> = {
            let mut stmt = conn
                .prepare(
                    "SELECT escalation_id, order_id FROM escalations
                     WHERE status = 'PENDING' AND expires_at_ms <= ?1",
                )
                .expect("prepare sweep query");
            stmt.query_map(params![now], |row| Ok((row.get(0)?, row.get(1)?)))
                .expect("query expired escalations")
                .filter_map(|r| r.ok())
                .collect()
        };

        for (escalation_id, order_id) in &expired_ids {
            conn.execute(
                "UPDATE escalations SET status = 'EXPIRED' WHERE escalation_id = ?1",
                params![escalation_id],
            )
            .ok();
            conn.execute(
                "UPDATE orders SET status = 'REJECTED', updated_at = ?1 WHERE order_id = ?2",
                params![crate::db::now_rfc3339(), order_id],
            )
            .ok();
        }

        expired_ids.len()
    }
}

fn reason_str(reason: EscalationReason) -> &'static str {
    match reason {
        EscalationReason::HighValue => "HIGH_VALUE",
        EscalationReason::VendorFlagged => "VENDOR_FLAGGED",
        EscalationReason::OcrLowConfidence => "OCR_LOW_CONFIDENCE",
    }
}
