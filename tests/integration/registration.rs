//! Happy-path registration through the full webhook pipeline. The reply
//! text itself is never observable here (it only reaches the outbound
//! delivery engine, which short-circuits to `PermanentError` since the test
//! harness never registers tenant credentials) — assertions instead track
//! the conversation-state transitions and audit trail the route layer
//! leaves behind.

use crate::common::{assert_ok, now_ms, wa_text_envelope, TestHarness};
use commerce_gateway::models::Platform;

#[test]
fn happy_path_reaches_await_otp_with_audit_trail() {
    let h = TestHarness::new();
    h.bind_and_credential(Platform::Wa, "phone-1", "tenant-reg");
    let sender = "2348030000010";

    let r1 = h.post_wa(&wa_text_envelope("phone-1", sender, "m1", "register", now_ms()));
    assert_ok(&r1);

    let r2 = h.post_wa(&wa_text_envelope("phone-1", sender, "m2", "Chinedu", now_ms()));
    assert_ok(&r2);

    let r3 = h.post_wa(&wa_text_envelope("phone-1", sender, "m3", "123 Ikeja Road, Lagos", now_ms()));
    assert_ok(&r3);

    let db = h.db();
    let conn = db.conn.lock().unwrap();
    let step_json: String = conn
        .query_row(
            "SELECT step_json FROM conversation_states WHERE tenant_id = 'tenant-reg' AND sender_id = 'wa:2348030000010'",
            [],
            |row| row.get(0),
        )
        .expect("conversation state row present");
    assert!(step_json.contains("AWAIT_OTP"));
    drop(conn);

    let actions: Vec<String> = h
        .audit_for("tenant-reg")
        .into_iter()
        .map(|r| r.action)
        .collect();
    assert!(actions.contains(&"REGISTER_STARTED".to_string()));
    assert!(actions.contains(&"OTP_ISSUED".to_string()));
    // Each inbound webhook event is recorded before dispatch runs.
    assert_eq!(actions.iter().filter(|a| *a == "INBOUND_ACCEPTED").count(), 3);
}

#[test]
fn blank_name_is_rejected_and_state_stays_await_name() {
    let h = TestHarness::new();
    h.bind_and_credential(Platform::Wa, "phone-2", "tenant-reg2");
    let sender = "2348030000011";

    h.post_wa(&wa_text_envelope("phone-2", sender, "m1", "register", now_ms()));
    h.post_wa(&wa_text_envelope("phone-2", sender, "m2", "   ", now_ms()));

    let db = h.db();
    let conn = db.conn.lock().unwrap();
    let step_json: String = conn
        .query_row(
            "SELECT step_json FROM conversation_states WHERE tenant_id = 'tenant-reg2' AND sender_id = 'wa:2348030000011'",
            [],
            |row| row.get(0),
        )
        .expect("conversation state row present");
    assert!(step_json.contains("AWAIT_NAME"));
}
