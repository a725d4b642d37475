//! Receipt-driven escalation. A webhook-level media upload can only reach
//! the Media Ingestor once tenant credentials are on file (see
//! `webhook_routes::ingest_receipt_and_interleave`); the harness never
//! registers any, so an uploaded receipt here is accepted and logged but
//! never tied to an order — deterministic, no outbound network attempt.
//! The low-level escalate → CAS-resolve lifecycle is exercised directly
//! against `EscalationQueue`; the OTP-gated `resolve_escalation` entry point
//! principals actually reach is exercised at the HTTP layer, through the
//! admin routes.

use crate::common::{assert_ok, now_ms, TestHarness};
use commerce_gateway::config::GatewayConfig;
use commerce_gateway::escalation::{EscalationDecision, EscalationQueue, OrderVerificationInput, ResolveOutcome};
use commerce_gateway::models::{EscalationReason, Platform};
use rocket::http::Status;
use rusqlite::params;
use serde_json::json;

#[test]
fn receipt_upload_with_no_pending_order_is_stored_but_not_escalated() {
    let h = TestHarness::new();
    h.bind_and_credential(Platform::Wa, "phone-4", "tenant-esc");
    let sender = "2348030000030";

    let body = json!({
        "object": "whatsapp_business_account",
        "entry": [{ "changes": [{ "value": {
            "metadata": { "phone_number_id": "phone-4" },
            "messages": [{
                "id": "m1",
                "from": sender,
                "timestamp": (now_ms() / 1000).to_string(),
                "type": "image",
                "image": { "id": "media_1", "mime_type": "image/jpeg" }
            }]
        }}]}]
    });
    assert_ok(&h.post_wa(&body));

    let actions: Vec<String> = h.audit_for("tenant-esc").into_iter().map(|r| r.action).collect();
    assert!(actions.contains(&"RECEIPT_UPLOADED".to_string()));
    assert!(!actions.contains(&"RECEIPT_UPLOAD_FAIL".to_string()));
    assert!(!actions.contains(&"ORDER_ESCALATED".to_string()));
}

#[test]
fn high_value_order_escalates_then_resolves_via_cas() {
    let h = TestHarness::new();
    let db = h.db();
    let cfg = GatewayConfig::default();

    {
        let conn = db.conn.lock().unwrap();
        let now = commerce_gateway::db::now_rfc3339();
        conn.execute(
            "INSERT INTO orders (order_id, tenant_id, vendor_id, buyer_sender_id,
                total_amount_minor, status, delivery_address, created_at, updated_at)
             VALUES ('ord_escalation_1', 'tenant-esc2', 'vendor-1', 'wa:1',
                2000000, 'RECEIPT_UPLOADED', NULL, ?1, ?1)",
            params![now],
        )
        .unwrap();
    }

    let queue = EscalationQueue::new(&db, &cfg);
    let reason = queue
        .detect(OrderVerificationInput {
            total_amount_minor: 2_000_000,
            vendor_flagged: false,
            ocr_confidence: None,
        })
        .expect("amount above high_value_threshold triggers escalation");
    assert_eq!(reason, EscalationReason::HighValue);

    let escalation_id = queue
        .escalate("tenant-esc2", "ord_escalation_1", reason)
        .expect("no existing pending escalation");

    {
        let conn = db.conn.lock().unwrap();
        let status: String = conn
            .query_row("SELECT status FROM orders WHERE order_id = 'ord_escalation_1'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(status, "ESCALATED");
    }

    let resolved = queue.resolve(&escalation_id, EscalationDecision::Approve);
    assert_eq!(resolved, ResolveOutcome::Resolved { order_id: "ord_escalation_1".to_string() });

    let conn = db.conn.lock().unwrap();
    let status: String = conn
        .query_row("SELECT status FROM orders WHERE order_id = 'ord_escalation_1'", [], |row| row.get(0))
        .unwrap();
    assert_eq!(status, "APPROVED");

    // A second resolution attempt on the same escalation loses the CAS.
    drop(conn);
    let second = queue.resolve(&escalation_id, EscalationDecision::Reject);
    assert_eq!(second, ResolveOutcome::AlreadyResolved);
}

#[test]
fn resolve_escalation_route_requires_otp_and_is_tenant_scoped() {
    let h = TestHarness::new();
    let db = h.db();
    let cfg = GatewayConfig::default();

    {
        let conn = db.conn.lock().unwrap();
        let now = commerce_gateway::db::now_rfc3339();
        conn.execute(
            "INSERT INTO orders (order_id, tenant_id, vendor_id, buyer_sender_id,
                total_amount_minor, status, delivery_address, created_at, updated_at)
             VALUES ('ord_escalation_2', 'tenant-esc3', 'vendor-1', 'wa:2348030000031',
                2000000, 'RECEIPT_UPLOADED', NULL, ?1, ?1)",
            params![now],
        )
        .unwrap();
    }
    let queue = EscalationQueue::new(&db, &cfg);
    let escalation_id = queue
        .escalate("tenant-esc3", "ord_escalation_2", EscalationReason::HighValue)
        .expect("no existing pending escalation");

    // Wrong tenant in the path: not found, even with a correct admin key.
    let wrong_tenant = h.post_admin(
        &format!("/admin/tenants/other-tenant/escalations/{escalation_id}/resolve"),
        &json!({ "decision": "APPROVE", "otp_request_id": "x", "otp_code": "000000" }),
    );
    assert_eq!(wrong_tenant.status(), Status::NotFound);

    // No admin key at all: forbidden, OTP never even consulted.
    let no_key = h.post_admin_no_key(
        &format!("/admin/tenants/tenant-esc3/escalations/{escalation_id}/resolve"),
        &json!({ "decision": "APPROVE", "otp_request_id": "x", "otp_code": "000000" }),
    );
    assert_eq!(no_key.status(), Status::Forbidden);

    // Made-up OTP: forbidden, the CAS never runs.
    let bad_otp = h.post_admin(
        &format!("/admin/tenants/tenant-esc3/escalations/{escalation_id}/resolve"),
        &json!({ "decision": "APPROVE", "otp_request_id": "not-real", "otp_code": "000000" }),
    );
    assert_eq!(bad_otp.status(), Status::Forbidden);
    {
        let conn = db.conn.lock().unwrap();
        let status: String = conn
            .query_row("SELECT status FROM escalations WHERE escalation_id = ?1", params![escalation_id], |row| row.get(0))
            .unwrap();
        assert_eq!(status, "PENDING");
    }

    // Request a real OTP, then resolve with it.
    let otp_resp = h.post_admin(&format!("/admin/tenants/tenant-esc3/escalations/{escalation_id}/otp"), &json!({}));
    assert_ok(&otp_resp);
    let otp_body: serde_json::Value = otp_resp.into_json().expect("json body");
    let request_id = otp_body["request_id"].as_str().unwrap().to_string();
    let code = otp_body["plaintext"].as_str().unwrap().to_string();

    let approved = h.post_admin(
        &format!("/admin/tenants/tenant-esc3/escalations/{escalation_id}/resolve"),
        &json!({ "decision": "APPROVE", "otp_request_id": request_id, "otp_code": code }),
    );
    assert_ok(&approved);

    let conn = db.conn.lock().unwrap();
    let status: String = conn
        .query_row("SELECT status FROM orders WHERE order_id = 'ord_escalation_2'", [], |row| row.get(0))
        .unwrap();
    assert_eq!(status, "APPROVED");
    drop(conn);

    let actions: Vec<String> = h.audit_for("tenant-esc3").into_iter().map(|r| r.action).collect();
    assert!(actions.contains(&"ESCALATION_RESOLVED".to_string()));

    // Replaying the same OTP against a fresh resolve attempt is rejected:
    // it was single-use and the escalation is already resolved either way.
    let replay = h.post_admin(
        &format!("/admin/tenants/tenant-esc3/escalations/{escalation_id}/resolve"),
        &json!({ "decision": "REJECT", "otp_request_id": request_id, "otp_code": code }),
    );
    assert_eq!(replay.status(), Status::Forbidden);
}
