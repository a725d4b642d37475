//! Canonical data types shared across the gateway. String-tagged dynamic
//! payloads at the edges become exhaustive tagged sums here instead.

use serde::{Deserialize, Serialize};

// --- Platform & identifiers ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Platform {
    Wa,
    Ig,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Wa => "WA",
            Platform::Ig => "IG",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type TenantId = String;

/// `"<platform>:<platform_sender_id>"`.
pub fn make_sender_id(platform: Platform, platform_sender_id: &str) -> String {
    format!("{}:{}", platform.as_str().to_lowercase(), platform_sender_id)
}

/// Inverse of `make_sender_id`'s prefix: recover the platform a canonical
/// sender id was minted under, for callers (e.g. escalation resolution) that
/// only have the stored `buyer_sender_id` and need to route a reply.
pub fn platform_from_sender_id(sender_id: &str) -> Option<Platform> {
    match sender_id.split_once(':') {
        Some(("wa", _)) => Some(Platform::Wa),
        Some(("ig", _)) => Some(Platform::Ig),
        _ => None,
    }
}

// --- Canonical Inbound Event ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundBody {
    Text { text: String },
    Media { kind: String, media_id: String, mime: String },
    Postback { payload: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalInboundEvent {
    pub platform: Platform,
    pub channel_id: String,
    pub event_id: String,
    pub sender_id: String,
    pub timestamp_ms: i64,
    pub body: InboundBody,
}

// --- Intent ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    CancelFlow,
    Help,
    Register,
    VerifyOtp(String),
    ConfirmOrder(Option<String>),
    Negotiate { order_id: String, amount_minor: i64 },
    CounterResponse(CounterDecision),
    OrderStatus(String),
    AddressView,
    AddressSet(String),
    UploadHelp,
    MediaReceipt,
    Postback(String),
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterDecision {
    Accept,
    Reject,
}

// --- OTP ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OtpPurpose {
    Register,
    Approve,
    MutateProfile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpProfile {
    /// Merchant-facing: 6 chars, digits + symbols.
    Principal,
    /// End-user-facing: 8 chars, alnum + symbols.
    Sender,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtpOutcome {
    Valid(OtpPurpose),
    /// `terminal` is set when this verification was the one that destroyed
    /// the record (attempts just reached `max_attempts`), so the caller can
    /// raise a distinct `OTP_FAIL_TERMINAL` audit alongside the usual
    /// `OTP_FAIL`.
    Invalid { terminal: bool },
    Throttled,
}

// --- Conversation State ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationStep {
    AwaitName,
    AwaitAddress { name: String },
    AwaitOtp { name: String, address: String, request_id: String },
    AwaitAddrConfirm { order_id: String },
    AwaitVendorCounter { order_id: String },
    AwaitCounterDecision { order_id: String, counter_amount_minor: i64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub step: ConversationStep,
    /// Absolute unix-ms deadline; the dispatcher resets to IDLE past this point.
    pub deadline_ms: i64,
}

// --- Order ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    AwaitingPayment,
    ReceiptUploaded,
    Verified,
    Escalated,
    Approved,
    Rejected,
    Cancelled,
    Completed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::AwaitingPayment => "AWAITING_PAYMENT",
            OrderStatus::ReceiptUploaded => "RECEIPT_UPLOADED",
            OrderStatus::Verified => "VERIFIED",
            OrderStatus::Escalated => "ESCALATED",
            OrderStatus::Approved => "APPROVED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Completed => "COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "PENDING" => OrderStatus::Pending,
            "AWAITING_PAYMENT" => OrderStatus::AwaitingPayment,
            "RECEIPT_UPLOADED" => OrderStatus::ReceiptUploaded,
            "VERIFIED" => OrderStatus::Verified,
            "ESCALATED" => OrderStatus::Escalated,
            "APPROVED" => OrderStatus::Approved,
            "REJECTED" => OrderStatus::Rejected,
            "CANCELLED" => OrderStatus::Cancelled,
            "COMPLETED" => OrderStatus::Completed,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub tenant_id: String,
    pub vendor_id: String,
    pub buyer_sender_id: String,
    pub total_amount_minor: i64,
    pub status: OrderStatus,
    pub delivery_address: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

// --- Escalation ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscalationReason {
    HighValue,
    VendorFlagged,
    OcrLowConfidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscalationStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl EscalationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationStatus::Pending => "PENDING",
            EscalationStatus::Approved => "APPROVED",
            EscalationStatus::Rejected => "REJECTED",
            EscalationStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "PENDING" => EscalationStatus::Pending,
            "APPROVED" => EscalationStatus::Approved,
            "REJECTED" => EscalationStatus::Rejected,
            "EXPIRED" => EscalationStatus::Expired,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    pub escalation_id: String,
    pub order_id: String,
    pub tenant_id: String,
    pub reason: EscalationReason,
    pub status: EscalationStatus,
    pub created_at_ms: i64,
    pub expires_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationDecision {
    Approve,
    Reject,
}

// --- Receipt Object ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptObject {
    pub tenant_id: String,
    pub order_id: String,
    pub digest: String,
    pub byte_len: u64,
    pub content_type: String,
    pub upload_time: String,
    pub ocr_amount_minor: Option<i64>,
    pub ocr_counterparty: Option<String>,
    pub ocr_confidence: Option<f64>,
    pub ocr_flagged: bool,
}

// --- Audit Record ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub ts: String,
    pub tenant_id: String,
    pub seq: i64,
    pub action: String,
    pub actor_id: String,
    pub subject_id: String,
    pub details: serde_json::Value,
}

// --- Credentials ---

#[derive(Debug, Clone)]
pub struct CredentialBundle {
    pub tenant_id: String,
    pub platform: Platform,
    pub access_token: String,
    pub expires_at_ms: i64,
}
