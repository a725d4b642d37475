use rusqlite::Connection;
use std::sync::Mutex;

pub struct Db {
    pub conn: Mutex<Connection>,
}

impl Db {
    pub fn new(path: &str) -> Self {
        let conn = Connection::open(path).expect("Failed to open database");
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .expect("Failed to set pragmas");
        let db = Db {
            conn: Mutex::new(conn),
        };
        db.migrate();
        db
    }

    fn migrate(&self) {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tenants (
                tenant_id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                disabled INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS channel_bindings (
                platform TEXT NOT NULL,
                channel_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (platform, channel_id)
            );

            CREATE TABLE IF NOT EXISTS credentials (
                tenant_id TEXT NOT NULL,
                platform TEXT NOT NULL,
                access_token_enc TEXT NOT NULL,
                expires_at_ms INTEGER NOT NULL,
                PRIMARY KEY (tenant_id, platform)
            );

            CREATE TABLE IF NOT EXISTS vendors (
                vendor_id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                display_name TEXT NOT NULL,
                flagged INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS end_users (
                tenant_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                display_name TEXT,
                delivery_address TEXT,
                verified INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                PRIMARY KEY (tenant_id, sender_id)
            );

            CREATE TABLE IF NOT EXISTS otp_records (
                sender_id TEXT NOT NULL,
                request_id TEXT NOT NULL,
                purpose TEXT NOT NULL,
                salt BLOB NOT NULL,
                code_hash BLOB NOT NULL,
                created_at_ms INTEGER NOT NULL,
                expires_at_ms INTEGER NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 3,
                PRIMARY KEY (sender_id, request_id)
            );

            CREATE TABLE IF NOT EXISTS conversation_states (
                tenant_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                step_json TEXT NOT NULL,
                deadline_ms INTEGER NOT NULL,
                PRIMARY KEY (tenant_id, sender_id)
            );

            CREATE TABLE IF NOT EXISTS orders (
                order_id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                vendor_id TEXT NOT NULL,
                buyer_sender_id TEXT NOT NULL,
                total_amount_minor INTEGER NOT NULL,
                status TEXT NOT NULL,
                delivery_address TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_orders_tenant ON orders(tenant_id);

            CREATE TABLE IF NOT EXISTS escalations (
                escalation_id TEXT PRIMARY KEY,
                order_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                reason TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL,
                expires_at_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_escalations_order ON escalations(order_id);
            CREATE INDEX IF NOT EXISTS idx_escalations_status ON escalations(status, expires_at_ms);

            CREATE TABLE IF NOT EXISTS receipts (
                tenant_id TEXT NOT NULL,
                order_id TEXT NOT NULL,
                digest TEXT NOT NULL,
                byte_len INTEGER NOT NULL,
                content_type TEXT NOT NULL,
                upload_time TEXT NOT NULL,
                ocr_amount_minor INTEGER,
                ocr_counterparty TEXT,
                ocr_confidence REAL,
                ocr_flagged INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (tenant_id, order_id, digest)
            );

            CREATE TABLE IF NOT EXISTS audit_log (
                tenant_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                ts TEXT NOT NULL,
                action TEXT NOT NULL,
                actor_id TEXT NOT NULL,
                subject_id TEXT NOT NULL,
                details TEXT NOT NULL,
                PRIMARY KEY (tenant_id, seq)
            );

            CREATE TABLE IF NOT EXISTS idempotency (
                event_id TEXT PRIMARY KEY,
                created_at_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_idempotency_created ON idempotency(created_at_ms);
            ",
        )
        .expect("Failed to run migrations");
    }
}

/// Current unix time in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
