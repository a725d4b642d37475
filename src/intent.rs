//! Deterministic first-match-wins intent classifier. Pure function over
//! trimmed text; no I/O, so it's tested directly against literal strings
//! rather than through the dispatcher. Keyword matching is case-folded, but
//! a captured OTP code keeps its original case — see `match_verify`.

use crate::models::{CounterDecision, Intent};

/// Classify free-text body. Media bodies never reach this function — the
/// dispatcher maps `InboundBody::Media` straight to `Intent::MediaReceipt`,
/// and `InboundBody::Postback` straight to `Intent::Postback`.
pub fn classify(text: &str) -> Intent {
    let raw = text.trim();
    let folded = raw.to_lowercase();

    if folded == "cancel" {
        return Intent::CancelFlow;
    }
    if folded == "help" || folded == "?" {
        return Intent::Help;
    }
    if matches!(
        folded.as_str(),
        "register" | "start" | "hi" | "hello" | "hey" | "begin"
    ) {
        return Intent::Register;
    }
    if let Some(code) = match_verify(raw) {
        return Intent::VerifyOtp(code);
    }
    if let Some(intent) = match_confirm(&folded) {
        return intent;
    }
    if let Some(intent) = match_negotiate(&folded) {
        return intent;
    }
    if let Some(intent) = match_counter_response(&folded) {
        return intent;
    }
    if let Some(order_id) = match_order_status(&folded) {
        return Intent::OrderStatus(order_id);
    }
    if folded == "address" {
        return Intent::AddressView;
    }
    if let Some(value) = folded.strip_prefix("update address to ") {
        let value = value.trim();
        if !value.is_empty() {
            return Intent::AddressSet(value.to_string());
        }
    }
    if folded == "upload" {
        return Intent::UploadHelp;
    }

    Intent::Unknown
}

fn is_otp_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!@#$%^&*".contains(c)
}

/// `^verify\s+(code)$` or a bare 6/8-char code with no other higher-priority
/// match. The bare-code form is checked last among the two so an explicit
/// `verify <code>` always wins if both would apply syntactically. Only the
/// `verify` keyword itself is matched case-insensitively — the captured code
/// keeps its original case, since `SENDER_ALPHABET` (otp.rs) draws from both
/// cases and verification hashes the presented code verbatim.
fn match_verify(raw: &str) -> Option<String> {
    let folded = raw.to_lowercase();
    if folded.strip_prefix("verify").is_some() {
        let rest_raw = &raw[6.min(raw.len())..];
        let code_raw = rest_raw.trim_start();
        if rest_raw.len() != code_raw.len() && is_valid_otp_token(code_raw) {
            return Some(code_raw.to_string());
        }
        return None;
    }
    if is_valid_otp_token(raw) {
        return Some(raw.to_string());
    }
    None
}

fn is_valid_otp_token(s: &str) -> bool {
    (s.len() == 6 || s.len() == 8) && s.chars().all(is_otp_char)
}

/// `^(confirm)(?:\s+(\S+))?$`
fn match_confirm(folded: &str) -> Option<Intent> {
    if folded == "confirm" {
        return Some(Intent::ConfirmOrder(None));
    }
    folded
        .strip_prefix("confirm ")
        .map(|rest| rest.trim())
        .filter(|rest| !rest.is_empty() && !rest.contains(char::is_whitespace))
        .map(|order_id| Intent::ConfirmOrder(Some(order_id.to_string())))
}

/// `^negotiate\s+(\S+)\s+(\d+)$`
fn match_negotiate(folded: &str) -> Option<Intent> {
    let rest = folded.strip_prefix("negotiate ")?;
    let mut parts = rest.split_whitespace();
    let order_id = parts.next()?;
    let amount_str = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    let amount_minor = amount_str.parse::<i64>().ok()?;
    Some(Intent::Negotiate {
        order_id: order_id.to_string(),
        amount_minor,
    })
}

/// `^(accept|reject)\s+(counter|offer)$`
fn match_counter_response(folded: &str) -> Option<Intent> {
    let mut parts = folded.split_whitespace();
    let verb = parts.next()?;
    let noun = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    if noun != "counter" && noun != "offer" {
        return None;
    }
    let decision = match verb {
        "accept" => CounterDecision::Accept,
        "reject" => CounterDecision::Reject,
        _ => return None,
    };
    Some(Intent::CounterResponse(decision))
}

/// `^(order|status)\s+(\S+)$`
fn match_order_status(folded: &str) -> Option<String> {
    let mut parts = folded.split_whitespace();
    let verb = parts.next()?;
    if verb != "order" && verb != "status" {
        return None;
    }
    let order_id = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some(order_id.to_string())
}
