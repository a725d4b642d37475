//! Inbound webhook intake: the GET verification challenge and
//! POST event intake for each platform. `admin_routes.rs` extracts `Json<T>`
//! bodies like any other Rocket handler; this module is the one place that
//! needs the raw, signature-checked byte stream a webhook demands, so it
//! introduces one extra idiom — reading `Data` directly — while keeping the
//! `&State<_>` guard and the `FromRequest` header guard (`SignatureHeader`
//! here, `AdminKey` in `admin_routes.rs`) the same shape.
//!
//! Per-event pipeline: Signature Verifier ->
//! Idempotency Cache -> Envelope Parser -> Tenant Registry -> (Media Ingestor
//! if attachment) -> Conversation State Store -> Intent Classifier ->
//! Dispatcher -> Outbound Delivery Engine -> Audit Journal throughout, all
//! inside one `(tenant_id, sender_id)` keyed-lock critical section bounded by
//! `EVENT_BUDGET_SECONDS`.

use crate::audit::{mask_sender_id, AuditJournal};
use crate::dispatcher::Dispatcher;
use crate::envelope::ParseOutcome;
use crate::escalation::{EscalationQueue, OrderVerificationInput};
use crate::gateway::Shared;
use crate::media::MediaIngestor;
use crate::models::{CanonicalInboundEvent, InboundBody, Platform};
use crate::outbound::OutboundEngine;
use crate::tenant::TenantRegistry;
use rocket::data::{Data, ToByteUnit};
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use rocket::{get, post, State};
use rusqlite::params;
use std::time::Duration;

/// Envelope bodies are small JSON notifications, not file uploads; 2 MB is
/// generous headroom over anything a real platform sends here.
const MAX_WEBHOOK_BODY_BYTES: u64 = 2 * 1024 * 1024;

pub struct SignatureHeader(pub Option<String>);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for SignatureHeader {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        Outcome::Success(SignatureHeader(
            req.headers().get_one("X-Hub-Signature-256").map(|s| s.to_string()),
        ))
    }
}

fn challenge_response(
    configured_token: &Option<String>,
    mode: Option<String>,
    challenge: Option<String>,
    verify_token: Option<String>,
) -> (Status, String) {
    let Some(expected) = configured_token else {
        return (Status::Forbidden, String::new());
    };
    match (mode.as_deref(), challenge, verify_token) {
        (Some("subscribe"), Some(challenge), Some(token)) if &token == expected => {
            (Status::Ok, challenge)
        }
        _ => (Status::Forbidden, String::new()),
    }
}

#[get("/webhooks/whatsapp?<mode>&<challenge>&<verify_token>")]
pub fn wa_challenge(
    mode: Option<String>,
    challenge: Option<String>,
    verify_token: Option<String>,
    state: &State<Shared>,
) -> (Status, String) {
    challenge_response(&state.config.webhook_verify_token, mode, challenge, verify_token)
}

#[get("/webhooks/instagram?<mode>&<challenge>&<verify_token>")]
pub fn ig_challenge(
    mode: Option<String>,
    challenge: Option<String>,
    verify_token: Option<String>,
    state: &State<Shared>,
) -> (Status, String) {
    challenge_response(&state.config.webhook_verify_token, mode, challenge, verify_token)
}

#[post("/webhooks/whatsapp", data = "<body>")]
pub async fn wa_webhook(
    signature: SignatureHeader,
    body: Data<'_>,
    state: &State<Shared>,
) -> Status {
    handle_post(state, Platform::Wa, &state.config.wa_app_secret, crate::envelope::whatsapp::parse, signature, body).await
}

#[post("/webhooks/instagram", data = "<body>")]
pub async fn ig_webhook(
    signature: SignatureHeader,
    body: Data<'_>,
    state: &State<Shared>,
) -> Status {
    handle_post(state, Platform::Ig, &state.config.ig_app_secret, crate::envelope::instagram::parse, signature, body).await
}

type ParseFn = fn(&[u8], i64) -> ParseOutcome;

async fn handle_post(
    state: &State<Shared>,
    platform: Platform,
    app_secret: &str,
    parse: ParseFn,
    signature: SignatureHeader,
    body: Data<'_>,
) -> Status {
    let Ok(capped) = body.open(MAX_WEBHOOK_BODY_BYTES.bytes()).into_bytes().await else {
        return Status::Ok;
    };
    if !capped.is_complete() {
        return Status::Ok;
    }
    let raw_body = capped.into_inner();

    let Some(header) = signature.0 else {
        return Status::Forbidden;
    };
    if !crate::signature::verify(&raw_body, &header, app_secret) {
        let audit = AuditJournal::new(&state.db);
        let digest = crate::signature::masked_digest_prefix(&raw_body, app_secret);
        audit.append(
            "unresolved",
            "AUTH_SIGNATURE_FAIL",
            "webhook",
            platform.as_str(),
            serde_json::json!({ "digest_prefix": digest }),
        );
        return Status::Forbidden;
    }

    let now_ms = crate::db::now_ms();
    let ParseOutcome::Events(events) = parse(&raw_body, now_ms) else {
        return Status::Ok;
    };

    for event in events {
        process_one_event(state, platform, event).await;
    }

    Status::Ok
}

async fn process_one_event(state: &State<Shared>, platform: Platform, event: CanonicalInboundEvent) {
    let tenants = TenantRegistry::new(&state.db, &state.config);
    let masked_sender = mask_sender_id(&event.sender_id);
    let audit = AuditJournal::new(&state.db);

    let Some(tenant_id) = tenants.resolve_tenant(platform, &event.channel_id) else {
        audit.append(
            "unresolved",
            "TENANT_UNRESOLVED",
            &masked_sender,
            &event.event_id,
            serde_json::json!({ "channel_id": event.channel_id }),
        );
        return;
    };

    if !crate::idempotency::claim(&state.db, &event.event_id) {
        return;
    }

    let throttle_key = format!("webhook_msg:{}", event.sender_id);
    if !state.rate_limiter.check(
        &throttle_key,
        crate::rate_limit::windows::WEBHOOK_MESSAGE_MAX,
        crate::rate_limit::windows::WEBHOOK_MESSAGE_WINDOW_SECS,
    ) {
        audit.append(&tenant_id, "THROTTLED", &masked_sender, &event.event_id, serde_json::json!({ "surface": "webhook" }));
        return;
    }

    let budget = Duration::from_secs(state.config.event_budget_seconds);
    let outcome = tokio::time::timeout(
        budget,
        dispatch_and_send(state, platform, &tenant_id, &event, &masked_sender),
    )
    .await;

    if outcome.is_err() {
        crate::idempotency::unclaim(&state.db, &event.event_id);
        audit.append(&tenant_id, "EVENT_TIMEOUT", &masked_sender, &event.event_id, serde_json::json!({}));
    }
}

/// The serialized, budget-bounded critical section for one event: acquire
/// the per-conversation lock, dispatch, ingest media if needed, and send the
/// reply. Runs entirely inside the `tokio::time::timeout` in the caller.
async fn dispatch_and_send(
    state: &State<Shared>,
    platform: Platform,
    tenant_id: &str,
    event: &CanonicalInboundEvent,
    masked_sender: &str,
) {
    let _lock = state.keyed_lock.acquire(tenant_id, &event.sender_id).await;

    let audit = AuditJournal::new(&state.db);
    audit.append(tenant_id, "INBOUND_ACCEPTED", masked_sender, &event.event_id, serde_json::json!({}));

    let escalations = EscalationQueue::new(&state.db, &state.config);
    let dispatcher = Dispatcher::new(&state.db, &state.config, &state.rate_limiter, &escalations);
    let mut reply = dispatcher.dispatch(tenant_id, &event.sender_id, &event.body);

    if let InboundBody::Media { media_id, mime, .. } = &event.body {
        if reply.text == "received, under review" {
            reply = ingest_receipt_and_interleave(state, platform, tenant_id, event, media_id, mime, &dispatcher, &audit, masked_sender)
                .await
                .unwrap_or(reply);
        }
    }

    let tenants = TenantRegistry::new(&state.db, &state.config);
    let outbound = OutboundEngine::new(state.http.clone(), &tenants);
    let send_outcome = outbound.send_text(tenant_id, platform, &event.sender_id, &reply.text).await;
    if send_outcome != crate::outbound::SendOutcome::Delivered {
        audit.append(
            tenant_id,
            "SEND_FAIL",
            masked_sender,
            &event.event_id,
            serde_json::json!({ "outcome": format!("{send_outcome:?}") }),
        );
    }
}

/// Downloads and stores the receipt, then runs the escalation-or-verify
/// interleave for whichever order it resolves to. Returns `None`
/// (leaving the dispatcher's original reply in place) if no pending order
/// can be resolved for this buyer — the upload is still stored, just not
/// tied to an order yet.
async fn ingest_receipt_and_interleave(
    state: &State<Shared>,
    platform: Platform,
    tenant_id: &str,
    event: &CanonicalInboundEvent,
    media_id: &str,
    mime: &str,
    dispatcher: &Dispatcher<'_>,
    audit: &AuditJournal<'_>,
    masked_sender: &str,
) -> Option<crate::dispatcher::DispatchReply> {
    let tenants = TenantRegistry::new(&state.db, &state.config);
    let credentials = tenants.get_credentials(tenant_id, platform)?;
    let order_id = resolve_pending_order_for_buyer(&state.db, tenant_id, &event.sender_id)?;

    let ingestor = MediaIngestor::new(&state.db, &state.object_store, &state.http);
    let media_url = media_download_url(platform, media_id);
    match ingestor.ingest(tenant_id, &order_id, &media_url, mime, &credentials).await {
        Ok(_) => {
            mark_receipt_uploaded(&state.db, &order_id);
            let verification = load_order_verification_input(&state.db, &order_id);
            Some(dispatcher.on_receipt_verified(tenant_id, &order_id, &event.sender_id, verification))
        }
        Err(_) => {
            audit.append(tenant_id, "RECEIPT_UPLOAD_FAIL", masked_sender, &event.event_id, serde_json::json!({ "order_id": order_id }));
            Some(crate::dispatcher::DispatchReply {
                text: "upload failed, please retry".to_string(),
            })
        }
    }
}

fn media_download_url(platform: Platform, media_id: &str) -> String {
    match platform {
        Platform::Wa => format!("https://graph.example-wa.test/v1/media/{media_id}"),
        Platform::Ig => format!("https://graph.example-ig.test/v1/media/{media_id}"),
    }
}

/// "A receipt upload resolves to an order" by taking the buyer's most
/// recently created order still awaiting payment — see DESIGN.md.
fn resolve_pending_order_for_buyer(db: &crate::db::Db, tenant_id: &str, buyer_sender_id: &str) -> Option<String> {
    let conn = db.conn.lock().unwrap();
    conn.query_row(
        "SELECT order_id FROM orders
         WHERE tenant_id = ?1 AND buyer_sender_id = ?2 AND status = 'AWAITING_PAYMENT'
         ORDER BY created_at DESC LIMIT 1",
        params![tenant_id, buyer_sender_id],
        |row| row.get(0),
    )
    .ok()
}

fn mark_receipt_uploaded(db: &crate::db::Db, order_id: &str) {
    let conn = db.conn.lock().unwrap();
    conn.execute(
        "UPDATE orders SET status = 'RECEIPT_UPLOADED', updated_at = ?1 WHERE order_id = ?2",
        params![crate::db::now_rfc3339(), order_id],
    )
    .ok();
}

fn load_order_verification_input(db: &crate::db::Db, order_id: &str) -> OrderVerificationInput {
    let conn = db.conn.lock().unwrap();
    let row: Option<(i64, String)> = conn
        .query_row(
            "SELECT total_amount_minor, vendor_id FROM orders WHERE order_id = ?1",
            params![order_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .ok();
    let Some((total_amount_minor, vendor_id)) = row else {
        return OrderVerificationInput { total_amount_minor: 0, vendor_flagged: false, ocr_confidence: None };
    };
    let vendor_flagged: bool = conn
        .query_row(
            "SELECT flagged FROM vendors WHERE vendor_id = ?1",
            params![vendor_id],
            |row| row.get::<_, i64>(0),
        )
        .map(|v| v != 0)
        .unwrap_or(false);
    OrderVerificationInput { total_amount_minor, vendor_flagged, ocr_confidence: None }
}
