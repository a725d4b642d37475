//! OTP verification exhaustion driven through the webhook pipeline: three
//! wrong codes in a row permanently invalidate the pending OTP record.

use crate::common::{assert_ok, now_ms, wa_text_envelope, TestHarness};
use commerce_gateway::models::Platform;

#[test]
fn three_wrong_codes_emit_fail_then_terminal() {
    let h = TestHarness::new();
    h.bind_and_credential(Platform::Wa, "phone-3", "tenant-otp");
    let sender = "2348030000020";

    assert_ok(&h.post_wa(&wa_text_envelope("phone-3", sender, "m1", "register", now_ms())));
    assert_ok(&h.post_wa(&wa_text_envelope("phone-3", sender, "m2", "Ada", now_ms())));
    assert_ok(&h.post_wa(&wa_text_envelope("phone-3", sender, "m3", "1 Main St", now_ms())));

    for (i, msg_id) in ["m4", "m5", "m6"].into_iter().enumerate() {
        // 6-char digit string: valid OTP-token shape, astronomically unlikely
        // to collide with the randomly generated code.
        assert_ok(&h.post_wa(&wa_text_envelope("phone-3", sender, msg_id, "000000", now_ms() + i as i64)));
    }

    let actions: Vec<String> = h
        .audit_for("tenant-otp")
        .into_iter()
        .map(|r| r.action)
        .collect();
    assert_eq!(actions.iter().filter(|a| *a == "OTP_FAIL").count(), 3);
    assert_eq!(actions.iter().filter(|a| *a == "OTP_FAIL_TERMINAL").count(), 1);

    // A follow-up message after exhaustion still reads as an invalid code,
    // not a fresh registration prompt, since the conversation state is
    // untouched by a failed verification.
    assert_ok(&h.post_wa(&wa_text_envelope("phone-3", sender, "m7", "ANYCODE1", now_ms() + 10)));
    let actions: Vec<String> = h.audit_for("tenant-otp").into_iter().map(|r| r.action).collect();
    assert_eq!(actions.iter().filter(|a| *a == "OTP_FAIL").count(), 4);
}
