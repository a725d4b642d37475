//! Stable error taxonomy for the gateway, modeled on the
//! `ErrorCode` + `thiserror` pairing used for `abp-error` in the wider agent
//! tooling ecosystem: a small `Copy` code plus a message, with a `Responder`
//! impl that maps each kind to the right HTTP behavior.

use rocket::http::Status;
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use rocket::Request;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SignatureInvalid,
    ParseSkip,
    Stale,
    Duplicate,
    TenantUnresolved,
    Throttled,
    OtpInvalid,
    MediaUnsupported,
    MediaTooLarge,
    UpstreamTransient,
    UpstreamPermanent,
    StateExpired,
    Unknown,
    Internal,
}

impl ErrorCode {
    /// Only SignatureInvalid (403) and Internal (500) are surfaced as
    /// non-200; everything else is a 200 with an in-conversation reply, or —
    /// for webhook-path errors that never reach a reply — a bare 200.
    fn http_status(self) -> Status {
        match self {
            ErrorCode::SignatureInvalid => Status::Forbidden,
            ErrorCode::Internal => Status::InternalServerError,
            _ => Status::Ok,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("signature verification failed")]
    SignatureInvalid,
    #[error("envelope not recognized, skipping")]
    ParseSkip,
    #[error("event timestamp out of acceptable window")]
    Stale,
    #[error("duplicate event, already processed")]
    Duplicate,
    #[error("no tenant bound to this channel")]
    TenantUnresolved,
    #[error("rate limit exceeded: {0}")]
    Throttled(&'static str),
    #[error("otp invalid or expired")]
    OtpInvalid,
    #[error("media type unsupported")]
    MediaUnsupported,
    #[error("media exceeds size limit")]
    MediaTooLarge,
    #[error("upstream transient failure: {0}")]
    UpstreamTransient(String),
    #[error("upstream permanent failure: {0}")]
    UpstreamPermanent(String),
    #[error("conversation state expired")]
    StateExpired,
    #[error("unrecognized intent")]
    Unknown,
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            GatewayError::SignatureInvalid => ErrorCode::SignatureInvalid,
            GatewayError::ParseSkip => ErrorCode::ParseSkip,
            GatewayError::Stale => ErrorCode::Stale,
            GatewayError::Duplicate => ErrorCode::Duplicate,
            GatewayError::TenantUnresolved => ErrorCode::TenantUnresolved,
            GatewayError::Throttled(_) => ErrorCode::Throttled,
            GatewayError::OtpInvalid => ErrorCode::OtpInvalid,
            GatewayError::MediaUnsupported => ErrorCode::MediaUnsupported,
            GatewayError::MediaTooLarge => ErrorCode::MediaTooLarge,
            GatewayError::UpstreamTransient(_) => ErrorCode::UpstreamTransient,
            GatewayError::UpstreamPermanent(_) => ErrorCode::UpstreamPermanent,
            GatewayError::StateExpired => ErrorCode::StateExpired,
            GatewayError::Unknown => ErrorCode::Unknown,
            GatewayError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// User-visible conversational reply text for this error, never leaking
    /// internal identifiers "never include internal identifiers"
    /// rule.
    pub fn user_message(&self) -> &'static str {
        match self {
            GatewayError::Throttled(_) => "too many requests, please slow down",
            GatewayError::OtpInvalid => "invalid or expired code",
            GatewayError::MediaUnsupported => "unsupported receipt format",
            GatewayError::MediaTooLarge => "file too large",
            GatewayError::StateExpired => "session expired, please start again",
            GatewayError::Unknown => "sorry, I didn't understand that. Send \"help\" for options.",
            GatewayError::Internal(_) => "temporary issue, please try again shortly",
            _ => "something went wrong",
        }
    }
}

impl<'r> Responder<'r, 'static> for GatewayError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        #[derive(Serialize)]
        struct Body {
            error: String,
            code: ErrorCode,
        }
        let status = self.code().http_status();
        let body = Body {
            error: self.to_string(),
            code: self.code(),
        };
        Response::build_from(Json(body).respond_to(req)?)
            .status(status)
            .ok()
    }
}
