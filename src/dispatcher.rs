//! Conversation Dispatcher: the state machine tying together
//! intent classification, OTP challenges, order/escalation writes, and reply
//! composition. Collaborators are passed in as explicit constructor
//! arguments rather than reached for as process-global handles — routes
//! already take `&State<Db>` etc. per-handler, this just extends the same
//! discipline to a non-Rocket-specific type.
//!
//! `dispatch` never sends the outbound reply itself; it returns the composed
//! text and lets the caller (the webhook route) hand it to the Outbound
//! Delivery Engine. This keeps the state machine's core logic exercisable
//! without a live HTTP client, matching "Dispatcher composes
//! reply -> Outbound Delivery Engine" as two distinct steps.

use crate::audit::{mask_sender_id, AuditJournal};
use crate::error::GatewayError;
use crate::escalation::{EscalationQueue, ResolveOutcome};
use crate::intent;
use crate::media::{validate_mime_and_size, MediaError};
use crate::models::{
    ConversationState, ConversationStep, CounterDecision, EscalationDecision, InboundBody, Intent,
    OtpOutcome, OtpProfile, OtpPurpose,
};
use crate::otp::{GenerateOutcome, OtpSubsystem};
use crate::rate_limit::RateLimiter;
use crate::state::{LoadOutcome, StateStore};
use crate::{config::GatewayConfig, db::Db};
use rusqlite::params;

pub struct Dispatcher<'a> {
    db: &'a Db,
    config: &'a GatewayConfig,
    rate_limiter: &'a RateLimiter,
    escalations: &'a EscalationQueue<'a>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReply {
    pub text: String,
}

impl DispatchReply {
    fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Keys an approval OTP in `otp_records` under a per-escalation identity
/// rather than a buyer's `sender_id`, so it never collides with the
/// end-user OTP namespace.
fn escalation_otp_key(escalation_id: &str) -> String {
    format!("escalation:{escalation_id}")
}

pub enum RequestApprovalOtpOutcome {
    Generated { plaintext: String, request_id: String },
    Throttled,
}

pub struct ResolveEscalationRequest<'a> {
    pub escalation_id: &'a str,
    pub decision: EscalationDecision,
    pub otp_request_id: &'a str,
    pub otp_code: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveEscalationOutcome {
    Resolved {
        order_id: String,
        buyer_sender_id: Option<String>,
        reply_text: String,
    },
    OtpInvalid,
    OtpThrottled,
    AlreadyResolved,
    NotFound,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        db: &'a Db,
        config: &'a GatewayConfig,
        rate_limiter: &'a RateLimiter,
        escalations: &'a EscalationQueue<'a>,
    ) -> Self {
        Self {
            db,
            config,
            rate_limiter,
            escalations,
        }
    }

    /// Top-level entry point: one call per canonical inbound event, already
    /// tenant-resolved and past idempotency/signature checks.
    pub fn dispatch(&self, tenant_id: &str, sender_id: &str, body: &InboundBody) -> DispatchReply {
        let states = StateStore::new(self.db);
        let audit = AuditJournal::new(self.db);
        let masked_sender = mask_sender_id(sender_id);

        if let InboundBody::Media { kind, media_id, mime } = body {
            return self.handle_media_receipt(tenant_id, sender_id, kind, media_id, mime, &audit, &masked_sender);
        }
        if let InboundBody::Postback { payload } = body {
            audit.append(tenant_id, "POSTBACK_RECEIVED", &masked_sender, &masked_sender, serde_json::json!({ "payload": payload }));
            return self.handle_postback(tenant_id, sender_id, payload, &states, &audit, &masked_sender);
        }

        let InboundBody::Text { text } = body else {
            return DispatchReply::new(GatewayError::Internal("unreachable body kind".into()).user_message());
        };

        let intent = intent::classify(text);

        if matches!(intent, Intent::CancelFlow) {
            states.clear(tenant_id, sender_id);
            audit.append(tenant_id, "CANCEL_FLOW", &masked_sender, &masked_sender, serde_json::json!({}));
            return DispatchReply::new("ok, cancelled");
        }

        match states.load_outcome(tenant_id, sender_id) {
            LoadOutcome::Active(state) => {
                self.dispatch_in_state(tenant_id, sender_id, &state, &intent, text, &states, &audit, &masked_sender)
            }
            LoadOutcome::Expired => {
                audit.append(tenant_id, "STATE_EXPIRED", &masked_sender, &masked_sender, serde_json::json!({}));
                DispatchReply::new(GatewayError::StateExpired.user_message())
            }
            LoadOutcome::None => self.dispatch_idle(tenant_id, sender_id, &intent, &states, &audit, &masked_sender),
        }
    }

    fn dispatch_idle(
        &self,
        tenant_id: &str,
        sender_id: &str,
        intent: &Intent,
        states: &StateStore,
        audit: &AuditJournal,
        masked_sender: &str,
    ) -> DispatchReply {
        match intent {
            Intent::Register => {
                states.save(tenant_id, sender_id, &ConversationStep::AwaitName, self.config.session_ttl_seconds);
                audit.append(tenant_id, "REGISTER_STARTED", masked_sender, masked_sender, serde_json::json!({}));
                DispatchReply::new("what's your name?")
            }
            Intent::Help => DispatchReply::new(HELP_TEXT),
            Intent::ConfirmOrder(Some(order_id)) => {
                states.save(
                    tenant_id,
                    sender_id,
                    &ConversationStep::AwaitAddrConfirm { order_id: order_id.clone() },
                    self.config.session_ttl_seconds,
                );
                DispatchReply::new(format!("confirm delivery address for order {order_id}? reply yes or send a new address"))
            }
            Intent::ConfirmOrder(None) => DispatchReply::new("which order would you like to confirm? reply \"confirm <order_id>\""),
            Intent::Negotiate { order_id, amount_minor } => {
                states.save(
                    tenant_id,
                    sender_id,
                    &ConversationStep::AwaitVendorCounter { order_id: order_id.clone() },
                    self.config.session_ttl_seconds,
                );
                audit.append(
                    tenant_id,
                    "NEGOTIATE_STARTED",
                    masked_sender,
                    sender_id,
                    serde_json::json!({ "order_id": order_id, "amount_minor": amount_minor }),
                );
                DispatchReply::new("your offer has been sent to the vendor, please wait for a response")
            }
            Intent::OrderStatus(order_id) => self.read_order_status(tenant_id, order_id),
            Intent::AddressView => self.read_delivery_address(tenant_id, sender_id),
            Intent::AddressSet(value) => {
                self.set_delivery_address(tenant_id, sender_id, value);
                DispatchReply::new("address updated")
            }
            Intent::UploadHelp => DispatchReply::new("send a photo or PDF of your payment receipt"),
            Intent::VerifyOtp(_) => DispatchReply::new("there's no pending verification. Send \"register\" to start"),
            Intent::CounterResponse(_) => DispatchReply::new("there's no pending offer to respond to"),
            Intent::CancelFlow | Intent::MediaReceipt | Intent::Postback(_) => {
                DispatchReply::new(GatewayError::Unknown.user_message())
            }
            Intent::Unknown => DispatchReply::new(GatewayError::Unknown.user_message()),
        }
    }

    fn dispatch_in_state(
        &self,
        tenant_id: &str,
        sender_id: &str,
        state: &ConversationState,
        intent: &Intent,
        raw_text: &str,
        states: &StateStore,
        audit: &AuditJournal,
        masked_sender: &str,
    ) -> DispatchReply {
        match &state.step {
            ConversationStep::AwaitName => {
                let name = raw_text.trim();
                if name.is_empty() {
                    return DispatchReply::new("please send your name");
                }
                states.save(
                    tenant_id,
                    sender_id,
                    &ConversationStep::AwaitAddress { name: name.to_string() },
                    self.config.session_ttl_seconds,
                );
                DispatchReply::new("what's your delivery address?")
            }
            ConversationStep::AwaitAddress { name } => {
                let address = raw_text.trim();
                if address.is_empty() {
                    return DispatchReply::new("please send your delivery address");
                }
                let otp = OtpSubsystem::new(self.db, self.rate_limiter, self.config);
                match otp.generate(sender_id, OtpPurpose::Register, OtpProfile::Sender, None) {
                    GenerateOutcome::Generated { plaintext, request_id } => {
                        states.save(
                            tenant_id,
                            sender_id,
                            &ConversationStep::AwaitOtp {
                                name: name.clone(),
                                address: address.to_string(),
                                request_id,
                            },
                            self.config.session_ttl_seconds,
                        );
                        audit.append(tenant_id, "OTP_ISSUED", masked_sender, masked_sender, serde_json::json!({ "purpose": "REGISTER" }));
                        let debug_suffix = if self.config.debug_expose_otp {
                            format!(" ({plaintext})")
                        } else {
                            String::new()
                        };
                        DispatchReply::new(format!("your verification code is: {plaintext}{debug_suffix}"))
                    }
                    GenerateOutcome::Throttled => DispatchReply::new(GatewayError::Throttled("otp generation").user_message()),
                }
            }
            ConversationStep::AwaitOtp { name, address, request_id } => {
                let Intent::VerifyOtp(code) = intent else {
                    return DispatchReply::new("please send the verification code you received");
                };
                let otp = OtpSubsystem::new(self.db, self.rate_limiter, self.config);
                match otp.verify(sender_id, request_id, code, OtpPurpose::Register) {
                    OtpOutcome::Valid(_) => {
                        self.upsert_verified_end_user(tenant_id, sender_id, name, address);
                        states.clear(tenant_id, sender_id);
                        audit.append(tenant_id, "OTP_VERIFIED", masked_sender, masked_sender, serde_json::json!({ "purpose": "REGISTER" }));
                        DispatchReply::new("verification successful")
                    }
                    OtpOutcome::Invalid { terminal } => {
                        audit.append(tenant_id, "OTP_FAIL", masked_sender, masked_sender, serde_json::json!({ "purpose": "REGISTER" }));
                        if terminal {
                            audit.append(tenant_id, "OTP_FAIL_TERMINAL", masked_sender, masked_sender, serde_json::json!({ "purpose": "REGISTER" }));
                        }
                        DispatchReply::new(GatewayError::OtpInvalid.user_message())
                    }
                    OtpOutcome::Throttled => DispatchReply::new(GatewayError::Throttled("otp verification").user_message()),
                }
            }
            ConversationStep::AwaitAddrConfirm { order_id } => match intent {
                Intent::AddressSet(value) => {
                    self.set_delivery_address(tenant_id, sender_id, value);
                    states.clear(tenant_id, sender_id);
                    DispatchReply::new(format!("address updated for order {order_id}"))
                }
                Intent::Unknown if raw_text.trim().eq_ignore_ascii_case("yes") => {
                    states.clear(tenant_id, sender_id);
                    audit.append(tenant_id, "ORDER_ADDRESS_CONFIRMED", masked_sender, order_id, serde_json::json!({ "order_id": order_id }));
                    DispatchReply::new("thanks, your order is confirmed")
                }
                _ => DispatchReply::new("reply yes or send a new delivery address"),
            },
            ConversationStep::AwaitVendorCounter { .. } => {
                DispatchReply::new("still waiting for the vendor's response, we'll notify you")
            }
            ConversationStep::AwaitCounterDecision { order_id, counter_amount_minor } => match intent {
                Intent::CounterResponse(decision) => {
                    states.clear(tenant_id, sender_id);
                    match decision {
                        CounterDecision::Accept => {
                            audit.append(
                                tenant_id,
                                "COUNTER_ACCEPTED",
                                masked_sender,
                                order_id,
                                serde_json::json!({ "order_id": order_id, "amount_minor": counter_amount_minor }),
                            );
                            DispatchReply::new("counter-offer accepted, proceeding with your order")
                        }
                        CounterDecision::Reject => {
                            audit.append(tenant_id, "COUNTER_REJECTED", masked_sender, order_id, serde_json::json!({ "order_id": order_id }));
                            DispatchReply::new("counter-offer rejected")
                        }
                    }
                }
                _ => DispatchReply::new("reply \"accept offer\" or \"reject offer\""),
            },
        }
    }

    fn handle_postback(
        &self,
        _tenant_id: &str,
        _sender_id: &str,
        payload: &str,
        _states: &StateStore,
        _audit: &AuditJournal,
        _masked_sender: &str,
    ) -> DispatchReply {
        DispatchReply::new(format!("got it: {payload}"))
    }

    fn handle_media_receipt(
        &self,
        tenant_id: &str,
        _sender_id: &str,
        _kind: &str,
        _media_id: &str,
        mime: &str,
        audit: &AuditJournal,
        masked_sender: &str,
    ) -> DispatchReply {
        if let Err(err) = validate_mime_and_size(mime, None) {
            let gw_err = match err {
                MediaError::Unsupported => GatewayError::MediaUnsupported,
                MediaError::TooLarge => GatewayError::MediaTooLarge,
                MediaError::Transient(msg) => GatewayError::UpstreamTransient(msg),
            };
            audit.append(tenant_id, "RECEIPT_UPLOAD_FAIL", masked_sender, masked_sender, serde_json::json!({ "reason": gw_err.to_string() }));
            return DispatchReply::new(gw_err.user_message());
        }
        // Actual download/digest/store is performed by the route layer via
        // `MediaIngestor::ingest`, which needs the tenant's live credentials
        // and an async HTTP client — both out of this sync dispatcher's reach.
        audit.append(tenant_id, "RECEIPT_UPLOADED", masked_sender, masked_sender, serde_json::json!({}));
        DispatchReply::new("received, under review")
    }

    /// Escalation interleave: called once an order's receipt has
    /// been vendor-verified, before it would become VERIFIED.
    pub fn on_receipt_verified(
        &self,
        tenant_id: &str,
        order_id: &str,
        buyer_sender_id: &str,
        verification: crate::escalation::OrderVerificationInput,
    ) -> DispatchReply {
        let audit = AuditJournal::new(self.db);
        let masked_sender = mask_sender_id(buyer_sender_id);

        if let Some(reason) = self.escalations.detect(verification) {
            if let Some(escalation_id) = self.escalations.escalate(tenant_id, order_id, reason) {
                audit.append(
                    tenant_id,
                    "ORDER_ESCALATED",
                    &masked_sender,
                    order_id,
                    serde_json::json!({ "escalation_id": escalation_id, "reason": format!("{reason:?}") }),
                );
            }
            return DispatchReply::new("your order is under review, this can take up to 24 hours");
        }

        let conn = self.db.conn.lock().unwrap();
        conn.execute(
            "UPDATE orders SET status = 'VERIFIED', updated_at = ?1 WHERE order_id = ?2",
            params![crate::db::now_rfc3339(), order_id],
        )
        .ok();
        drop(conn);
        audit.append(tenant_id, "ORDER_VERIFIED", &masked_sender, order_id, serde_json::json!({}));
        DispatchReply::new("your payment has been verified")
    }

    /// Issue a fresh approval OTP for a pending escalation. Delivery to the
    /// principal happens over the merchant notification channel, which is
    /// this component's caller's responsibility, not this one's.
    pub fn request_escalation_otp(&self, escalation_id: &str) -> RequestApprovalOtpOutcome {
        let otp = OtpSubsystem::new(self.db, self.rate_limiter, self.config);
        let key = escalation_otp_key(escalation_id);
        match otp.generate(&key, OtpPurpose::Approve, OtpProfile::Principal, Some(key.as_str())) {
            GenerateOutcome::Generated { plaintext, request_id } => {
                RequestApprovalOtpOutcome::Generated { plaintext, request_id }
            }
            GenerateOutcome::Throttled => RequestApprovalOtpOutcome::Throttled,
        }
    }

    /// `resolve_escalation(escalation_id, decision, otp_verification_token)`:
    /// authenticates the presented OTP before attempting the compare-and-swap
    /// resolution. Nothing in this crate reaches `EscalationQueue::resolve`
    /// without first passing through here.
    pub fn resolve_escalation(&self, tenant_id: &str, req: ResolveEscalationRequest) -> ResolveEscalationOutcome {
        let otp = OtpSubsystem::new(self.db, self.rate_limiter, self.config);
        let key = escalation_otp_key(req.escalation_id);
        match otp.verify(&key, req.otp_request_id, req.otp_code, OtpPurpose::Approve) {
            OtpOutcome::Valid(_) => {}
            OtpOutcome::Throttled => return ResolveEscalationOutcome::OtpThrottled,
            OtpOutcome::Invalid { .. } => return ResolveEscalationOutcome::OtpInvalid,
        }

        match self.escalations.resolve(req.escalation_id, req.decision) {
            ResolveOutcome::Resolved { order_id } => {
                let audit = AuditJournal::new(self.db);
                audit.append(
                    tenant_id,
                    "ESCALATION_RESOLVED",
                    "principal",
                    &order_id,
                    serde_json::json!({ "escalation_id": req.escalation_id, "decision": format!("{:?}", req.decision) }),
                );
                let buyer_sender_id = self.load_buyer_sender_id(&order_id);
                let reply_text = match req.decision {
                    EscalationDecision::Approve => "your order has been approved and is moving to fulfillment".to_string(),
                    EscalationDecision::Reject => "your order could not be approved, please contact support".to_string(),
                };
                ResolveEscalationOutcome::Resolved { order_id, buyer_sender_id, reply_text }
            }
            ResolveOutcome::AlreadyResolved => ResolveEscalationOutcome::AlreadyResolved,
            ResolveOutcome::NotFound => ResolveEscalationOutcome::NotFound,
        }
    }

    fn load_buyer_sender_id(&self, order_id: &str) -> Option<String> {
        let conn = self.db.conn.lock().unwrap();
        conn.query_row(
            "SELECT buyer_sender_id FROM orders WHERE order_id = ?1",
            params![order_id],
            |row| row.get(0),
        )
        .ok()
    }

    fn upsert_verified_end_user(&self, tenant_id: &str, sender_id: &str, name: &str, address: &str) {
        let conn = self.db.conn.lock().unwrap();
        let now = crate::db::now_rfc3339();
        conn.execute(
            "INSERT INTO end_users (tenant_id, sender_id, display_name, delivery_address, verified, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)
             ON CONFLICT(tenant_id, sender_id) DO UPDATE SET
                display_name = excluded.display_name,
                delivery_address = excluded.delivery_address,
                verified = 1",
            params![tenant_id, sender_id, name, address, now],
        )
        .expect("end_users upsert");
    }

    fn set_delivery_address(&self, tenant_id: &str, sender_id: &str, address: &str) {
        let conn = self.db.conn.lock().unwrap();
        let now = crate::db::now_rfc3339();
        conn.execute(
            "INSERT INTO end_users (tenant_id, sender_id, display_name, delivery_address, verified, created_at)
             VALUES (?1, ?2, NULL, ?3, 0, ?4)
             ON CONFLICT(tenant_id, sender_id) DO UPDATE SET delivery_address = excluded.delivery_address",
            params![tenant_id, sender_id, address, now],
        )
        .expect("end_users address upsert");
    }

    fn read_delivery_address(&self, tenant_id: &str, sender_id: &str) -> DispatchReply {
        let conn = self.db.conn.lock().unwrap();
        let address: Option<String> = conn
            .query_row(
                "SELECT delivery_address FROM end_users WHERE tenant_id = ?1 AND sender_id = ?2",
                params![tenant_id, sender_id],
                |row| row.get(0),
            )
            .ok()
            .flatten();
        match address {
            Some(addr) => DispatchReply::new(format!("your delivery address: {addr}")),
            None => DispatchReply::new("no delivery address on file yet. send \"update address to <address>\""),
        }
    }

    fn read_order_status(&self, tenant_id: &str, order_id: &str) -> DispatchReply {
        let conn = self.db.conn.lock().unwrap();
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM orders WHERE tenant_id = ?1 AND order_id = ?2",
                params![tenant_id, order_id],
                |row| row.get(0),
            )
            .ok();
        match status {
            Some(status) => DispatchReply::new(format!("order {order_id}: {status}")),
            None => DispatchReply::new(format!("no order found with id {order_id}")),
        }
    }
}

const HELP_TEXT: &str = "commands: register, confirm <order_id>, order <order_id>, address, update address to <address>, upload, cancel";
