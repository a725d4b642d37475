//! Audit Journal: append-only, PII-masked structured record.
//! `seq` assignment follows the same "read max, increment, insert" idiom
//! used elsewhere for message sequencing, scoped per tenant since the
//! table's primary key is `(tenant_id, seq)`.

use crate::db::Db;
use crate::models::AuditRecord;
use rusqlite::params;

pub struct AuditJournal<'a> {
    db: &'a Db,
}

impl<'a> AuditJournal<'a> {
    pub fn new(db: &'a Db) -> Self {
        Self { db }
    }

    /// Append a new record, assigning the next `seq` for this tenant.
    /// `details` must already be PII-masked by the caller using the helpers
    /// below — this module does not inspect or mask `details` itself.
    pub fn append(&self, tenant_id: &str, action: &str, actor_id: &str, subject_id: &str, details: serde_json::Value) -> AuditRecord {
        let conn = self.db.conn.lock().unwrap();
        let next_seq: i64 = conn
            .query_row(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM audit_log WHERE tenant_id = ?1",
                params![tenant_id],
                |row| row.get(0),
            )
            .unwrap_or(1);

        let ts = crate::db::now_rfc3339();
        let details_json = details.to_string();
        conn.execute(
            "INSERT INTO audit_log (tenant_id, seq, ts, action, actor_id, subject_id, details)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![tenant_id, next_seq, ts, action, actor_id, subject_id, details_json],
        )
        .expect("audit_log insert");

        AuditRecord {
            ts,
            tenant_id: tenant_id.to_string(),
            seq: next_seq,
            action: action.to_string(),
            actor_id: actor_id.to_string(),
            subject_id: subject_id.to_string(),
            details,
        }
    }

    pub fn list_for_tenant(&self, tenant_id: &str, limit: i64) -> Vec<AuditRecord> {
        let conn = self.db.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT ts, tenant_id, seq, action, actor_id, subject_id, details
                 FROM audit_log WHERE tenant_id = ?1 ORDER BY seq DESC LIMIT ?2",
            )
            .expect("prepare audit query");
        stmt.query_map(params![tenant_id, limit], |row| {
            let details_raw: String = row.get(6)?;
            let details = serde_json::from_str(&details_raw).unwrap_or(serde_json::Value::Null);
            Ok(AuditRecord {
                ts: row.get(0)?,
                tenant_id: row.get(1)?,
                seq: row.get(2)?,
                action: row.get(3)?,
                actor_id: row.get(4)?,
                subject_id: row.get(5)?,
                details,
            })
        })
        .expect("query audit log")
        .filter_map(|r| r.ok())
        .collect()
    }
}

/// Mask a phone number to `+CC***DDDD` (country code + last 4 digits). Input
/// is expected in `+<digits>` form; non-conforming input is fully masked.
pub fn mask_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 5 {
        return "***".to_string();
    }
    // Assume a 1-3 digit country code; conservatively take the first 2.
    let country_code = &digits[..2.min(digits.len())];
    let last4 = &digits[digits.len() - 4..];
    format!("+{country_code}***{last4}")
}

/// Mask an email to `a***@domain`.
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() => {
            let first = local.chars().next().unwrap();
            format!("{first}***@{domain}")
        }
        _ => "***".to_string(),
    }
}

/// Derive a sender_id's display form for audit details, masking the embedded
/// platform id using `mask_phone` since platform sender ids are phone-shaped
/// for the WA channel (IG PSIDs pass through opaque-id masking instead).
pub fn mask_sender_id(sender_id: &str) -> String {
    match sender_id.split_once(':') {
        Some((platform, id)) if platform == "wa" => {
            format!("wa:{}", mask_phone(id))
        }
        Some((platform, id)) => {
            let tail = if id.len() > 4 { &id[id.len() - 4..] } else { id };
            format!("{platform}:***{tail}")
        }
        None => "***".to_string(),
    }
}
