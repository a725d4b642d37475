//! A webhook retry of an already-processed `event_id` must be absorbed
//! silently: no duplicate dispatch, no duplicate audit trail.

use crate::common::{assert_ok, now_ms, wa_text_envelope, TestHarness};
use commerce_gateway::models::Platform;

#[test]
fn replayed_event_id_is_processed_once() {
    let h = TestHarness::new();
    h.bind_and_credential(Platform::Wa, "phone-5", "tenant-idem");
    let sender = "2348030000050";
    let envelope = wa_text_envelope("phone-5", sender, "dup-event-1", "register", now_ms());

    assert_ok(&h.post_wa(&envelope));
    // Exact same body (including event_id) dispatched again, as a platform
    // retry would send it.
    assert_ok(&h.post_wa(&envelope));

    let actions: Vec<String> = h.audit_for("tenant-idem").into_iter().map(|r| r.action).collect();
    assert_eq!(actions.iter().filter(|a| *a == "INBOUND_ACCEPTED").count(), 1);
    assert_eq!(actions.iter().filter(|a| *a == "REGISTER_STARTED").count(), 1);

    let db = h.db();
    let conn = db.conn.lock().unwrap();
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM idempotency WHERE event_id = 'dup-event-1'", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}
