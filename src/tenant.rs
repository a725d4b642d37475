//! Credential & Tenant Registry: resolves a platform channel id
//! to its owning tenant and caches per-tenant credential bundles. Grounded on
//! the background-task shape used for periodic cache cleanup elsewhere, and
//! on `db.rs`'s `Mutex<Connection>` access pattern for the store reads/writes.

use crate::config::GatewayConfig;
use crate::db::Db;
use crate::models::{CredentialBundle, Platform, TenantId};
use rusqlite::params;
use std::collections::HashMap;
use std::sync::Mutex;

const CREDENTIAL_CACHE_TTL_MS: i64 = 5 * 60 * 1000;

struct CachedCredential {
    bundle: CredentialBundle,
    cached_at_ms: i64,
}

/// Per-tenant channel resolution plus a short-lived credential cache.
/// `obfuscate`/`deobfuscate` model the encrypted-secret-store boundary —
/// an HMAC-derived keystream stands in here for a real KMS client (see
/// DESIGN.md).
pub struct TenantRegistry<'a> {
    db: &'a Db,
    config: &'a GatewayConfig,
    cache: Mutex<HashMap<(TenantId, Platform), CachedCredential>>,
}

impl<'a> TenantRegistry<'a> {
    pub fn new(db: &'a Db, config: &'a GatewayConfig) -> Self {
        Self {
            db,
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// `resolve_tenant(platform, channel_id) -> tenant_id | NOT_FOUND`, with
    /// the development-only default-tenant fallback gated behind config.
    pub fn resolve_tenant(&self, platform: Platform, channel_id: &str) -> Option<TenantId> {
        let conn = self.db.conn.lock().unwrap();
        let found: Option<String> = conn
            .query_row(
                "SELECT tenant_id FROM channel_bindings WHERE platform = ?1 AND channel_id = ?2",
                params![platform.as_str(), channel_id],
                |row| row.get(0),
            )
            .ok();

        found.or_else(|| self.config.default_tenant_id.clone())
    }

    /// Atomic rebinding: replace any existing binding for `(platform, channel_id)`.
    pub fn bind_channel(&self, platform: Platform, channel_id: &str, tenant_id: &str) {
        let conn = self.db.conn.lock().unwrap();
        let now = crate::db::now_rfc3339();
        conn.execute(
            "INSERT INTO channel_bindings (platform, channel_id, tenant_id, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(platform, channel_id) DO UPDATE SET tenant_id = excluded.tenant_id",
            params![platform.as_str(), channel_id, tenant_id, now],
        )
        .expect("channel_bindings upsert");
    }

    /// `get_credentials(tenant_id, platform) -> CredentialBundle | UNAVAILABLE`,
    /// cached for ≤5 min. Never falls back across tenants.
    pub fn get_credentials(&self, tenant_id: &str, platform: Platform) -> Option<CredentialBundle> {
        let key = (tenant_id.to_string(), platform);
        let now = crate::db::now_ms();

        {
            let cache = self.cache.lock().unwrap();
            if let Some(entry) = cache.get(&key) {
                if now - entry.cached_at_ms < CREDENTIAL_CACHE_TTL_MS
                    && entry.bundle.expires_at_ms > now
                {
                    return Some(entry.bundle.clone());
                }
            }
        }

        let bundle = self.fetch_credentials(tenant_id, platform)?;
        self.cache.lock().unwrap().insert(
            key,
            CachedCredential {
                bundle: bundle.clone(),
                cached_at_ms: now,
            },
        );
        Some(bundle)
    }

    /// Force a cache miss for `(tenant_id, platform)` so the next
    /// `get_credentials` call re-reads the store.
    pub fn refresh_credentials(&self, tenant_id: &str, platform: Platform) {
        self.cache
            .lock()
            .unwrap()
            .remove(&(tenant_id.to_string(), platform));
    }

    fn fetch_credentials(&self, tenant_id: &str, platform: Platform) -> Option<CredentialBundle> {
        let conn = self.db.conn.lock().unwrap();
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT access_token_enc, expires_at_ms FROM credentials
                 WHERE tenant_id = ?1 AND platform = ?2",
                params![tenant_id, platform.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .ok();
        let (access_token_enc, expires_at_ms) = row?;
        if expires_at_ms <= crate::db::now_ms() {
            return None;
        }
        let access_token = deobfuscate(&access_token_enc, &self.config.credential_encryption_key);
        Some(CredentialBundle {
            tenant_id: tenant_id.to_string(),
            platform,
            access_token,
            expires_at_ms,
        })
    }

    /// Persist a freshly-issued credential bundle (out-of-scope onboarding
    /// flow calls this; kept here so the registry owns the one write path).
    pub fn store_credentials(&self, tenant_id: &str, platform: Platform, access_token: &str, expires_at_ms: i64) {
        let enc = obfuscate(access_token, &self.config.credential_encryption_key);
        let conn = self.db.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO credentials (tenant_id, platform, access_token_enc, expires_at_ms)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(tenant_id, platform) DO UPDATE SET
                access_token_enc = excluded.access_token_enc,
                expires_at_ms = excluded.expires_at_ms",
            params![tenant_id, platform.as_str(), enc, expires_at_ms],
        )
        .expect("credentials upsert");
        self.refresh_credentials(tenant_id, platform);
    }
}

/// HMAC-SHA256-derived keystream XOR, base64-encoded. Not a substitute for a
/// real KMS-backed envelope, but keeps "never store plaintext at rest" true
/// for the on-disk SQLite file without adding a crate the corpus never uses.
fn obfuscate(plaintext: &str, key: &str) -> String {
    let keystream = derive_keystream(key, plaintext.len());
    let xored: Vec<u8> = plaintext
        .as_bytes()
        .iter()
        .zip(keystream.iter())
        .map(|(a, b)| a ^ b)
        .collect();
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, xored)
}

fn deobfuscate(encoded: &str, key: &str) -> String {
    let Ok(bytes) = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded)
    else {
        return String::new();
    };
    let keystream = derive_keystream(key, bytes.len());
    let xored: Vec<u8> = bytes
        .iter()
        .zip(keystream.iter())
        .map(|(a, b)| a ^ b)
        .collect();
    String::from_utf8(xored).unwrap_or_default()
}

fn derive_keystream(key: &str, len: usize) -> Vec<u8> {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    type HmacSha256 = Hmac<Sha256>;

    let mut out = Vec::with_capacity(len);
    let mut counter: u32 = 0;
    while out.len() < len {
        let mut mac = HmacSha256::new_from_slice(key.as_bytes()).expect("any key length");
        mac.update(&counter.to_be_bytes());
        out.extend_from_slice(&mac.finalize().into_bytes());
        counter += 1;
    }
    out.truncate(len);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GatewayConfig {
        GatewayConfig::default()
    }

    #[test]
    fn resolve_tenant_uses_binding() {
        let db = Db::new(":memory:");
        let cfg = config();
        let registry = TenantRegistry::new(&db, &cfg);
        registry.bind_channel(Platform::Wa, "111", "tenant-a");

        assert_eq!(
            registry.resolve_tenant(Platform::Wa, "111"),
            Some("tenant-a".to_string())
        );
        assert_eq!(registry.resolve_tenant(Platform::Wa, "222"), None);
    }

    #[test]
    fn rebinding_is_atomic_swap() {
        let db = Db::new(":memory:");
        let cfg = config();
        let registry = TenantRegistry::new(&db, &cfg);
        registry.bind_channel(Platform::Wa, "111", "tenant-a");
        registry.bind_channel(Platform::Wa, "111", "tenant-b");

        assert_eq!(
            registry.resolve_tenant(Platform::Wa, "111"),
            Some("tenant-b".to_string())
        );
    }

    #[test]
    fn default_tenant_fallback_only_when_configured() {
        let db = Db::new(":memory:");
        let mut cfg = config();
        cfg.default_tenant_id = Some("dev-tenant".to_string());
        let registry = TenantRegistry::new(&db, &cfg);

        assert_eq!(
            registry.resolve_tenant(Platform::Wa, "unbound"),
            Some("dev-tenant".to_string())
        );
    }

    #[test]
    fn credentials_round_trip_through_obfuscation() {
        let db = Db::new(":memory:");
        let cfg = config();
        let registry = TenantRegistry::new(&db, &cfg);
        registry.store_credentials("tenant-a", Platform::Wa, "secret-token", i64::MAX);

        let bundle = registry
            .get_credentials("tenant-a", Platform::Wa)
            .expect("credentials present");
        assert_eq!(bundle.access_token, "secret-token");
        assert_eq!(bundle.tenant_id, "tenant-a");
    }

    #[test]
    fn cross_tenant_lookup_returns_none() {
        let db = Db::new(":memory:");
        let cfg = config();
        let registry = TenantRegistry::new(&db, &cfg);
        registry.store_credentials("tenant-a", Platform::Wa, "secret-token", i64::MAX);

        assert!(registry.get_credentials("tenant-b", Platform::Wa).is_none());
    }

    #[test]
    fn refresh_forces_cache_miss_and_expired_token_is_refetched() {
        let db = Db::new(":memory:");
        let cfg = config();
        let registry = TenantRegistry::new(&db, &cfg);
        registry.store_credentials("tenant-a", Platform::Wa, "v1", crate::db::now_ms() - 1);

        // expires_at_ms already in the past, so the cache never serves it.
        assert!(registry.get_credentials("tenant-a", Platform::Wa).is_none());
    }
}
