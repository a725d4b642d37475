//! Shared HTTP-level test harness: one temp SQLite file and one temp
//! receipt directory per `TestHarness`, cleaned up on `Drop`.

use commerce_gateway::config::GatewayConfig;
use commerce_gateway::db::Db;
use rocket::http::{Header, Status};
use rocket::local::blocking::{Client, LocalResponse};
use std::sync::atomic::{AtomicU64, Ordering};

pub const WA_SECRET: &str = "wa-test-secret";
pub const IG_SECRET: &str = "ig-test-secret";
pub const VERIFY_TOKEN: &str = "verify-me";
pub const ADMIN_KEY: &str = "admin-test-key";

static SEQ: AtomicU64 = AtomicU64::new(0);

pub struct TestHarness {
    pub client: Client,
    db_path: std::path::PathBuf,
    receipt_dir: std::path::PathBuf,
}

impl TestHarness {
    pub fn new() -> Self {
        let n = SEQ.fetch_add(1, Ordering::SeqCst);
        let db_path = std::env::temp_dir().join(format!("gw_test_{}_{n}.db", std::process::id()));
        let receipt_dir = std::env::temp_dir().join(format!("gw_test_receipts_{}_{n}", std::process::id()));
        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_dir_all(&receipt_dir);

        let config = GatewayConfig {
            wa_app_secret: WA_SECRET.to_string(),
            ig_app_secret: IG_SECRET.to_string(),
            webhook_verify_token: Some(VERIFY_TOKEN.to_string()),
            admin_api_key: ADMIN_KEY.to_string(),
            debug_expose_otp: true,
            event_budget_seconds: 5,
            database_path: db_path.to_string_lossy().to_string(),
            receipt_store_dir: receipt_dir.to_string_lossy().to_string(),
            ..GatewayConfig::default()
        };

        let rocket = commerce_gateway::rocket_with_config(config);
        let client = Client::tracked(rocket).expect("a valid rocket instance");
        Self { client, db_path, receipt_dir }
    }

    /// A second connection onto the same on-disk database, for assertions
    /// the route layer doesn't expose through an HTTP response.
    pub fn db(&self) -> Db {
        Db::new(&self.db_path.to_string_lossy())
    }

    pub fn bind_and_credential(&self, platform: commerce_gateway::models::Platform, channel_id: &str, tenant_id: &str) {
        let db = self.db();
        let cfg = GatewayConfig::default();
        let registry = commerce_gateway::tenant::TenantRegistry::new(&db, &cfg);
        registry.bind_channel(platform, channel_id, tenant_id);
    }

    pub fn post_wa(&self, body: &serde_json::Value) -> LocalResponse<'_> {
        self.post_signed("/webhooks/whatsapp", body, WA_SECRET)
    }

    pub fn post_wa_with_signature(&self, body: &serde_json::Value, signature: &str) -> LocalResponse<'_> {
        let raw = body.to_string();
        self.client
            .post("/webhooks/whatsapp")
            .header(Header::new("X-Hub-Signature-256", signature.to_string()))
            .header(Header::new("Content-Type", "application/json"))
            .body(raw)
            .dispatch()
    }

    pub fn post_wa_unsigned(&self, body: &serde_json::Value) -> LocalResponse<'_> {
        let raw = body.to_string();
        self.client
            .post("/webhooks/whatsapp")
            .header(Header::new("Content-Type", "application/json"))
            .body(raw)
            .dispatch()
    }

    fn post_signed(&self, path: &str, body: &serde_json::Value, secret: &str) -> LocalResponse<'_> {
        let raw = body.to_string();
        let sig = commerce_gateway::signature::sign(raw.as_bytes(), secret);
        self.client
            .post(path)
            .header(Header::new("X-Hub-Signature-256", sig))
            .header(Header::new("Content-Type", "application/json"))
            .body(raw)
            .dispatch()
    }

    pub fn audit_for(&self, tenant_id: &str) -> Vec<commerce_gateway::models::AuditRecord> {
        let db = self.db();
        commerce_gateway::audit::AuditJournal::new(&db).list_for_tenant(tenant_id, 200)
    }

    pub fn post_admin(&self, path: &str, body: &serde_json::Value) -> LocalResponse<'_> {
        self.client
            .post(path)
            .header(Header::new("X-Admin-Key", ADMIN_KEY))
            .header(Header::new("Content-Type", "application/json"))
            .body(body.to_string())
            .dispatch()
    }

    pub fn post_admin_no_key(&self, path: &str, body: &serde_json::Value) -> LocalResponse<'_> {
        self.client
            .post(path)
            .header(Header::new("Content-Type", "application/json"))
            .body(body.to_string())
            .dispatch()
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.db_path);
        let _ = std::fs::remove_file(format!("{}-wal", self.db_path.display()));
        let _ = std::fs::remove_file(format!("{}-shm", self.db_path.display()));
        let _ = std::fs::remove_dir_all(&self.receipt_dir);
    }
}

pub fn wa_text_envelope(phone_number_id: &str, from: &str, msg_id: &str, text: &str, now_ms: i64) -> serde_json::Value {
    serde_json::json!({
        "object": "whatsapp_business_account",
        "entry": [{ "changes": [{ "value": {
            "metadata": { "phone_number_id": phone_number_id },
            "messages": [{
                "id": msg_id,
                "from": from,
                "timestamp": (now_ms / 1000).to_string(),
                "type": "text",
                "text": { "body": text }
            }]
        }}]}]
    })
}

pub fn now_ms() -> i64 {
    commerce_gateway::db::now_ms()
}

pub fn assert_ok(resp: &LocalResponse) {
    assert_eq!(resp.status(), Status::Ok);
}
