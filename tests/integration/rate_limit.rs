//! The webhook-surface sliding window allows 60 distinct events per sender
//! per 60s; the 61st within the window is throttled rather than dispatched.

use crate::common::{assert_ok, now_ms, wa_text_envelope, TestHarness};
use commerce_gateway::models::Platform;

#[test]
fn sixty_first_message_in_window_is_throttled() {
    let h = TestHarness::new();
    h.bind_and_credential(Platform::Wa, "phone-9", "tenant-rl");
    let sender = "2348030000070";

    for i in 0..60 {
        let event_id = format!("rl-{i}");
        let resp = h.post_wa(&wa_text_envelope("phone-9", sender, &event_id, "help", now_ms()));
        assert_ok(&resp);
    }

    let resp = h.post_wa(&wa_text_envelope("phone-9", sender, "rl-60", "help", now_ms()));
    assert_ok(&resp); // still 200: throttling fails the dispatch silently, not the HTTP response

    let actions: Vec<String> = h.audit_for("tenant-rl").into_iter().map(|r| r.action).collect();
    assert_eq!(actions.iter().filter(|a| *a == "THROTTLED").count(), 1);
    assert_eq!(actions.iter().filter(|a| *a == "INBOUND_ACCEPTED").count(), 60);
}
