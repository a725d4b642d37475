use crate::common::{TestHarness, VERIFY_TOKEN};
use rocket::http::Status;

#[test]
fn whatsapp_challenge_echoes_on_matching_token() {
    let h = TestHarness::new();
    let resp = h
        .client
        .get(format!(
            "/webhooks/whatsapp?mode=subscribe&challenge=12345&verify_token={VERIFY_TOKEN}"
        ))
        .dispatch();
    assert_eq!(resp.status(), Status::Ok);
    assert_eq!(resp.into_string().unwrap(), "12345");
}

#[test]
fn whatsapp_challenge_rejects_wrong_token() {
    let h = TestHarness::new();
    let resp = h
        .client
        .get("/webhooks/whatsapp?mode=subscribe&challenge=12345&verify_token=wrong")
        .dispatch();
    assert_eq!(resp.status(), Status::Forbidden);
}

#[test]
fn instagram_challenge_echoes_on_matching_token() {
    let h = TestHarness::new();
    let resp = h
        .client
        .get(format!(
            "/webhooks/instagram?mode=subscribe&challenge=hello&verify_token={VERIFY_TOKEN}"
        ))
        .dispatch();
    assert_eq!(resp.status(), Status::Ok);
    assert_eq!(resp.into_string().unwrap(), "hello");
}

#[test]
fn challenge_rejects_when_mode_is_not_subscribe() {
    let h = TestHarness::new();
    let resp = h
        .client
        .get(format!(
            "/webhooks/whatsapp?mode=unsubscribe&challenge=12345&verify_token={VERIFY_TOKEN}"
        ))
        .dispatch();
    assert_eq!(resp.status(), Status::Forbidden);
}
