//! Envelope parsers: normalize platform-specific webhook
//! payloads into the canonical inbound event. Per-platform modules mirror
//! the `routes/` split — one file per concern, re-exported flat from here.

pub mod instagram;
pub mod whatsapp;

use crate::models::CanonicalInboundEvent;

const STALE_FUTURE_SKEW_MS: i64 = 5 * 60 * 1000;
const STALE_PAST_WINDOW_MS: i64 = 7 * 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    Events(Vec<CanonicalInboundEvent>),
    Skip,
}

/// Shared staleness check. Returns `true` when the event should be
/// dropped as stale.
pub fn is_stale(timestamp_ms: i64, now_ms: i64) -> bool {
    timestamp_ms > now_ms + STALE_FUTURE_SKEW_MS || timestamp_ms < now_ms - STALE_PAST_WINDOW_MS
}
