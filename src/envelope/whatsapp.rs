//! WhatsApp-class envelope parser.

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
    changes: Option<Vec<Change>>,
}

#[derive(Debug, Deserialize)]
struct Change {
    value: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Value {
    metadata: Option<Metadata>,
    messages: Option<Vec<Message>>,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    phone_number_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Message {
    id: Option<String>,
    from: Option<String>,
    timestamp: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    text: Option<TextBody>,
    image: Option<MediaBody>,
    document: Option<MediaBody>,
}

#[derive(Debug, Deserialize)]
struct TextBody {
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaBody {
    id: Option<String>,
    mime_type: Option<String>,
}

/// Parse one raw webhook POST body. `now_ms` is injected so the staleness
/// check is testable without real wall-clock time.
pub fn parse(raw_body: &[u8], now_ms: i64) -> ParseOutcome {
    let Ok(envelope) = serde_json::from_slice::<Envelope>(raw_body) else {
        return ParseOutcome::Skip;
    };
    if envelope.object.as_deref() != Some("whatsapp_business_account") {
        return ParseOutcome::Skip;
    }
    let Some(entries) = envelope.entry else {
        return ParseOutcome::Skip;
    };

    let mut events = Vec::new();
    for entry in entries {
        let Some(changes) = entry.changes else { continue };
        for change in changes {
            let Some(value) = change.value else { continue };
            let Some(phone_number_id) = value.metadata.and_then(|m| m.phone_number_id) else {
                continue;
            };
            let Some(messages) = value.messages else { continue };

            for message in messages {
                let (Some(event_id), Some(from), Some(timestamp_str)) =
                    (message.id.clone(), message.from.clone(), message.timestamp.clone())
                else {
                    continue;
                };
                let Ok(timestamp_secs) = timestamp_str.parse::<i64>() else {
                    continue;
                };
                let timestamp_ms = timestamp_secs * 1000;
                if is_stale(timestamp_ms, now_ms) {
                    continue;
                }

                let Some(body) = body_from_message(&message) else {
                    continue;
                };

                events.push(CanonicalInboundEvent {
                    platform: Platform::Wa,
                    channel_id: phone_number_id.clone(),
                    event_id,
                    sender_id: make_sender_id(Platform::Wa, &from),
                    timestamp_ms,
                    body,
                });
            }
        }
    }

    if events.is_empty() {
        ParseOutcome::Skip
    } else {
        ParseOutcome::Events(events)
    }
}

fn body_from_message(message: &Message) -> Option<InboundBody> {
    match message.kind.as_deref() {
        Some("text") => {
            let text = message.text.as_ref()?.body.clone()?;
            Some(InboundBody::Text { text })
        }
        Some("image") => {
            let media = message.image.as_ref()?;
            Some(InboundBody::Media {
                kind: "image".to_string(),
                media_id: media.id.clone()?,
                mime: media.mime_type.clone()?,
            })
        }
        Some("document") => {
            let media = message.document.as_ref()?;
            Some(InboundBody::Media {
                kind: "document".to_string(),
                media_id: media.id.clone()?,
                mime: media.mime_type.clone()?,
            })
        }
        _ => None,
    }
}
