//! Media Ingestor: validates, streams, digests, and persists
//! inbound receipt attachments. The streamed-download-with-running-digest
//! shape follows `reqwest`'s `bytes_stream()` the way the outbound engine
//! (`outbound.rs`) uses `reqwest` for sends — same client, opposite direction.

use crate::db::Db;
use crate::models::{CredentialBundle, ReceiptObject};
use crate::objectstore::ObjectStore;
use futures_util::StreamExt;
use rusqlite::params;
use sha2::{Digest, Sha256};

const MAX_MEDIA_BYTES: u64 = 10 * 1024 * 1024;
const ALLOWED_MIME: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/heic",
    "application/pdf",
];

#[derive(Debug)]
pub enum MediaError {
    Unsupported,
    TooLarge,
    Transient(String),
}

fn ext_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/heic" => "heic",
        "application/pdf" => "pdf",
        _ => "bin",
    }
}

pub fn validate_mime_and_size(mime: &str, declared_size: Option<u64>) -> Result<(), MediaError> {
    if !ALLOWED_MIME.contains(&mime) {
        return Err(MediaError::Unsupported);
    }
    if let Some(size) = declared_size {
        if size > MAX_MEDIA_BYTES {
            return Err(MediaError::TooLarge);
        }
    }
    Ok(())
}

pub struct MediaIngestor<'a> {
    db: &'a Db,
    store: &'a ObjectStore,
    http: &'a reqwest::Client,
}

pub struct IngestResult {
    pub receipt: ReceiptObject,
}

impl<'a> MediaIngestor<'a> {
    pub fn new(db: &'a Db, store: &'a ObjectStore, http: &'a reqwest::Client) -> Self {
        Self { db, store, http }
    }

    /// Downloads from `media_url` using the tenant's platform credentials,
    /// validating MIME/size, streaming the digest, and persisting the
    /// resulting Receipt Object. Never full-buffers beyond tracking the
    /// running digest and final bytes needed for the content-addressed put.
    pub async fn ingest(
        &self,
        tenant_id: &str,
        order_id: &str,
        media_url: &str,
        mime: &str,
        credentials: &CredentialBundle,
    ) -> Result<IngestResult, MediaError> {
        validate_mime_and_size(mime, None)?;

        let response = self
            .http
            .get(media_url)
            .bearer_auth(&credentials.access_token)
            .send()
            .await
            .map_err(|e| MediaError::Transient(e.to_string()))?;

        if let Some(len) = response.content_length() {
            if len > MAX_MEDIA_BYTES {
                return Err(MediaError::TooLarge);
            }
        }

        let mut hasher = Sha256::new();
        let mut buf: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| MediaError::Transient(e.to_string()))?;
            if buf.len() as u64 + chunk.len() as u64 > MAX_MEDIA_BYTES {
                return Err(MediaError::TooLarge);
            }
            hasher.update(&chunk);
            buf.extend_from_slice(&chunk);
        }

        let digest = hex::encode(hasher.finalize());
        let ext = ext_for_mime(mime);

        self.store
            .put(tenant_id, order_id, &digest, ext, &buf)
            .map_err(|_| MediaError::Transient("object store write failed".to_string()))?;

        let upload_time = crate::db::now_rfc3339();
        let receipt = ReceiptObject {
            tenant_id: tenant_id.to_string(),
            order_id: order_id.to_string(),
            digest: digest.clone(),
            byte_len: buf.len() as u64,
            content_type: mime.to_string(),
            upload_time: upload_time.clone(),
            ocr_amount_minor: None,
            ocr_counterparty: None,
            ocr_confidence: None,
            ocr_flagged: false,
        };

        let conn = self.db.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO receipts
                (tenant_id, order_id, digest, byte_len, content_type, upload_time,
                 ocr_amount_minor, ocr_counterparty, ocr_confidence, ocr_flagged)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, NULL, NULL, 0)",
            params![
                tenant_id,
                order_id,
                digest,
                receipt.byte_len as i64,
                mime,
                upload_time,
            ],
        )
        .expect("receipts insert");

        Ok(IngestResult { receipt })
    }

    /// Apply an OCR result to a previously-stored receipt. Called by the
    /// fire-and-forget OCR collaborator (out of scope here) when it finishes.
    pub fn apply_ocr_result(
        &self,
        tenant_id: &str,
        order_id: &str,
        digest: &str,
        amount_minor: Option<i64>,
        counterparty: Option<&str>,
        confidence: f64,
        flagged: bool,
    ) {
        let conn = self.db.conn.lock().unwrap();
        conn.execute(
            "UPDATE receipts SET ocr_amount_minor = ?1, ocr_counterparty = ?2,
                ocr_confidence = ?3, ocr_flagged = ?4
             WHERE tenant_id = ?5 AND order_id = ?6 AND digest = ?7",
            params![
                amount_minor,
                counterparty,
                confidence,
                flagged as i64,
                tenant_id,
                order_id,
                digest,
            ],
        )
        .ok();
    }
}
