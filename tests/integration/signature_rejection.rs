//! Signature verification happens before idempotency claiming, so a bad
//! signature must neither process the event nor burn its `event_id` —
//! a corrected retry of the same body with a valid signature still lands.

use crate::common::{now_ms, wa_text_envelope, TestHarness};
use commerce_gateway::models::Platform;
use rocket::http::Status;

#[test]
fn missing_signature_header_is_forbidden() {
    let h = TestHarness::new();
    h.bind_and_credential(Platform::Wa, "phone-6", "tenant-sig");
    let body = wa_text_envelope("phone-6", "2348030000060", "sig-1", "register", now_ms());

    let resp = h.post_wa_unsigned(&body);
    assert_eq!(resp.status(), Status::Forbidden);

    let actions: Vec<String> = h.audit_for("unresolved").into_iter().map(|r| r.action).collect();
    assert!(actions.contains(&"AUTH_SIGNATURE_FAIL".to_string()));
}

#[test]
fn wrong_secret_signature_is_forbidden() {
    let h = TestHarness::new();
    h.bind_and_credential(Platform::Wa, "phone-7", "tenant-sig2");
    let body = wa_text_envelope("phone-7", "2348030000061", "sig-2", "register", now_ms());
    let bad_sig = commerce_gateway::signature::sign(body.to_string().as_bytes(), "not-the-real-secret");

    let resp = h.post_wa_with_signature(&body, &bad_sig);
    assert_eq!(resp.status(), Status::Forbidden);
}

#[test]
fn rejected_request_does_not_claim_idempotency_so_a_corrected_retry_still_lands() {
    let h = TestHarness::new();
    h.bind_and_credential(Platform::Wa, "phone-8", "tenant-sig3");
    let body = wa_text_envelope("phone-8", "2348030000062", "sig-3", "register", now_ms());

    let rejected = h.post_wa_unsigned(&body);
    assert_eq!(rejected.status(), Status::Forbidden);

    let accepted = h.post_wa(&body);
    assert_eq!(accepted.status(), Status::Ok);

    let actions: Vec<String> = h.audit_for("tenant-sig3").into_iter().map(|r| r.action).collect();
    assert!(actions.contains(&"REGISTER_STARTED".to_string()));
}
