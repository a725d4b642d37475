//! Principal-facing escalation resolution: the one surface where a human
//! other than the buyer reaches into the conversation state machine. Shares
//! the `FromRequest` header-guard idiom `SignatureHeader` uses in
//! `webhook_routes.rs`, but the comparison is a plain shared-secret check
//! rather than an HMAC, since there's no signed body here to verify.

use crate::dispatcher::{Dispatcher, ResolveEscalationOutcome, ResolveEscalationRequest, RequestApprovalOtpOutcome};
use crate::escalation::EscalationQueue;
use crate::gateway::Shared;
use crate::models::{platform_from_sender_id, EscalationDecision};
use crate::outbound::OutboundEngine;
use crate::tenant::TenantRegistry;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use rocket::serde::json::Json;
use rocket::{post, State};
use serde::{Deserialize, Serialize};

pub struct AdminKey;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminKey {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let state = req.rocket().state::<Shared>().expect("GatewayState managed");
        if state.config.admin_api_key.is_empty() {
            return Outcome::Error((Status::Forbidden, ()));
        }
        match req.headers().get_one("X-Admin-Key") {
            Some(key) if key == state.config.admin_api_key => Outcome::Success(AdminKey),
            _ => Outcome::Error((Status::Forbidden, ())),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RequestOtpResponse {
    request_id: String,
    /// Only populated under `debug_expose_otp`; in production this is
    /// delivered to the principal over the merchant notification channel.
    plaintext: Option<String>,
}

#[post("/admin/tenants/<tenant_id>/escalations/<escalation_id>/otp")]
pub fn request_escalation_otp(
    _key: AdminKey,
    tenant_id: &str,
    escalation_id: &str,
    state: &State<Shared>,
) -> Result<Json<RequestOtpResponse>, Status> {
    let escalations = EscalationQueue::new(&state.db, &state.config);
    if escalations.tenant_of(escalation_id).as_deref() != Some(tenant_id) {
        return Err(Status::NotFound);
    }
    let dispatcher = Dispatcher::new(&state.db, &state.config, &state.rate_limiter, &escalations);
    match dispatcher.request_escalation_otp(escalation_id) {
        RequestApprovalOtpOutcome::Generated { plaintext, request_id } => Ok(Json(RequestOtpResponse {
            request_id,
            plaintext: state.config.debug_expose_otp.then_some(plaintext),
        })),
        RequestApprovalOtpOutcome::Throttled => Err(Status::TooManyRequests),
    }
}

#[derive(Debug, Deserialize)]
pub struct ResolveEscalationBody {
    decision: ApiDecision,
    otp_request_id: String,
    otp_code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum ApiDecision {
    Approve,
    Reject,
}

impl From<ApiDecision> for EscalationDecision {
    fn from(d: ApiDecision) -> Self {
        match d {
            ApiDecision::Approve => EscalationDecision::Approve,
            ApiDecision::Reject => EscalationDecision::Reject,
        }
    }
}

#[post(
    "/admin/tenants/<tenant_id>/escalations/<escalation_id>/resolve",
    data = "<body>"
)]
pub async fn resolve_escalation(
    _key: AdminKey,
    tenant_id: &str,
    escalation_id: &str,
    body: Json<ResolveEscalationBody>,
    state: &State<Shared>,
) -> Status {
    let escalations = EscalationQueue::new(&state.db, &state.config);
    if escalations.tenant_of(escalation_id).as_deref() != Some(tenant_id) {
        return Status::NotFound;
    }
    let dispatcher = Dispatcher::new(&state.db, &state.config, &state.rate_limiter, &escalations);
    let body = body.into_inner();

    let outcome = dispatcher.resolve_escalation(
        tenant_id,
        ResolveEscalationRequest {
            escalation_id,
            decision: body.decision.into(),
            otp_request_id: &body.otp_request_id,
            otp_code: &body.otp_code,
        },
    );

    match outcome {
        ResolveEscalationOutcome::Resolved { buyer_sender_id, reply_text, .. } => {
            if let Some(buyer_sender_id) = buyer_sender_id {
                notify_buyer(state, tenant_id, &buyer_sender_id, &reply_text).await;
            }
            Status::Ok
        }
        ResolveEscalationOutcome::OtpInvalid => Status::Forbidden,
        ResolveEscalationOutcome::OtpThrottled => Status::TooManyRequests,
        ResolveEscalationOutcome::AlreadyResolved => Status::Conflict,
        ResolveEscalationOutcome::NotFound => Status::NotFound,
    }
}

/// Best-effort: a failed notification doesn't unwind the resolution that
/// already landed. The buyer can still ask for order status on their own.
async fn notify_buyer(state: &State<Shared>, tenant_id: &str, buyer_sender_id: &str, text: &str) {
    let Some(platform) = platform_from_sender_id(buyer_sender_id) else {
        return;
    };
    let tenants = TenantRegistry::new(&state.db, &state.config);
    let outbound = OutboundEngine::new(state.http.clone(), &tenants);
    outbound.send_text(tenant_id, platform, buyer_sender_id, text).await;
}
