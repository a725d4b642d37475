//! Instagram-class envelope parser.

use super::{is_stale, ParseOutcome};
use crate::models::{make_sender_id, CanonicalInboundEvent, InboundBody, Platform};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Envelope {
    object: Option<String>,
    entry: Option<Vec<Entry>>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    id: Option<String>,
    messaging: Option<Vec<Messaging>>,
}

#[derive(Debug, Deserialize)]
struct Messaging {
    sender: Option<Sender>,
    timestamp: Option<i64>,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Sender {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Message {
    mid: Option<String>,
    text: Option<String>,
    attachments: Option<Vec<Attachment>>,
}

#[derive(Debug, Deserialize)]
struct Attachment {
    #[serde(rename = "type")]
    kind: Option<String>,
    payload: Option<AttachmentPayload>,
}

#[derive(Debug, Deserialize)]
struct AttachmentPayload {
    url: Option<String>,
}

pub fn parse(raw_body: &[u8], now_ms: i64) -> ParseOutcome {
    let Ok(envelope) = serde_json::from_slice::<Envelope>(raw_body) else {
        return ParseOutcome::Skip;
    };
    if envelope.object.as_deref() != Some("instagram") {
        return ParseOutcome::Skip;
    }
    let Some(entries) = envelope.entry else {
        return ParseOutcome::Skip;
    };

    let mut events = Vec::new();
    for entry in entries {
        let Some(page_id) = entry.id else { continue };
        let Some(messaging) = entry.messaging else { continue };

        for item in messaging {
            let (Some(sender_psid), Some(timestamp_ms), Some(message)) = (
                item.sender.and_then(|s| s.id),
                item.timestamp,
                item.message,
            ) else {
                continue;
            };
            let Some(event_id) = message.mid.clone() else { continue };

            if is_stale(timestamp_ms, now_ms) {
                continue;
            }

            let Some(body) = body_from_message(&message) else {
                continue;
            };

            events.push(CanonicalInboundEvent {
                platform: Platform::Ig,
                channel_id: page_id.clone(),
                event_id,
                sender_id: make_sender_id(Platform::Ig, &sender_psid),
                timestamp_ms,
                body,
            });
        }
    }

    if events.is_empty() {
        ParseOutcome::Skip
    } else {
        ParseOutcome::Events(events)
    }
}

fn body_from_message(message: &Message) -> Option<InboundBody> {
    if let Some(text) = &message.text {
        return Some(InboundBody::Text { text: text.clone() });
    }
    let attachment = message.attachments.as_ref()?.first()?;
    let kind = attachment.kind.clone()?;
    let url = attachment.payload.as_ref()?.url.clone()?;
    Some(InboundBody::Media {
        kind,
        media_id: url.clone(),
        mime: guess_mime_from_url(&url).to_string(),
    })
}

fn guess_mime_from_url(url: &str) -> &'static str {
    let lower = url.to_lowercase();
    if lower.contains(".png") {
        "image/png"
    } else if lower.contains(".heic") {
        "image/heic"
    } else if lower.contains(".pdf") {
        "application/pdf"
    } else {
        "image/jpeg"
    }
}
