//! Two tenants bound to distinct channels must never see each other's
//! conversation state or audit trail, even when the same underlying buyer
//! phone number messages both.

use crate::common::{assert_ok, now_ms, wa_text_envelope, TestHarness};
use commerce_gateway::models::Platform;

#[test]
fn same_buyer_across_two_tenants_stays_isolated() {
    let h = TestHarness::new();
    h.bind_and_credential(Platform::Wa, "phone-a", "tenant-iso-a");
    h.bind_and_credential(Platform::Wa, "phone-b", "tenant-iso-b");
    let buyer = "2348030000040";

    assert_ok(&h.post_wa(&wa_text_envelope("phone-a", buyer, "a1", "register", now_ms())));
    assert_ok(&h.post_wa(&wa_text_envelope("phone-b", buyer, "b1", "register", now_ms())));
    assert_ok(&h.post_wa(&wa_text_envelope("phone-a", buyer, "a2", "Ada", now_ms())));

    let db = h.db();
    let conn = db.conn.lock().unwrap();
    let step_a: String = conn
        .query_row(
            "SELECT step_json FROM conversation_states WHERE tenant_id = 'tenant-iso-a' AND sender_id = 'wa:2348030000040'",
            [],
            |row| row.get(0),
        )
        .expect("tenant-a state present");
    assert!(step_a.contains("AWAIT_ADDRESS"));

    let step_b: String = conn
        .query_row(
            "SELECT step_json FROM conversation_states WHERE tenant_id = 'tenant-iso-b' AND sender_id = 'wa:2348030000040'",
            [],
            |row| row.get(0),
        )
        .expect("tenant-b state present, unaffected by tenant-a's progress");
    assert!(step_b.contains("AWAIT_NAME"));
    drop(conn);

    let actions_a: Vec<String> = h.audit_for("tenant-iso-a").into_iter().map(|r| r.action).collect();
    let actions_b: Vec<String> = h.audit_for("tenant-iso-b").into_iter().map(|r| r.action).collect();
    assert_eq!(actions_a.iter().filter(|a| *a == "REGISTER_STARTED").count(), 1);
    assert_eq!(actions_b.iter().filter(|a| *a == "REGISTER_STARTED").count(), 1);
}

#[test]
fn unbound_channel_is_logged_under_unresolved_bucket() {
    let h = TestHarness::new();
    // No bind_and_credential call: "phone-unknown" has no channel binding.
    let resp = h.post_wa(&wa_text_envelope("phone-unknown", "2348030000041", "u1", "register", now_ms()));
    assert_ok(&resp);

    let actions: Vec<String> = h.audit_for("unresolved").into_iter().map(|r| r.action).collect();
    assert!(actions.contains(&"TENANT_UNRESOLVED".to_string()));
}
