//! Runtime configuration, loaded from environment variables with permissive
//! defaults — same pattern as `RateLimitConfig::from_env`: read,
//! try to parse, fall back silently on anything malformed rather than panic.

use std::env;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Minor-units cutoff above which a verified order escalates instead of completing.
    pub high_value_threshold: i64,
    /// Shared secret required to answer a platform's GET verification challenge.
    pub webhook_verify_token: Option<String>,
    /// Per-platform app secret used as the HMAC key for inbound POST signature
    /// verification. One app secret per platform, shared across all tenants
    /// bound to it (a single messaging-platform app can serve many tenants).
    pub wa_app_secret: String,
    pub ig_app_secret: String,
    /// OTP absolute lifetime. Clamped to <= 900s.
    pub otp_ttl_seconds: u64,
    /// Sliding conversation-state expiry.
    pub session_ttl_seconds: u64,
    /// Total per-event handler budget before forced cancellation.
    pub event_budget_seconds: u64,
    /// If true, OTP generation responses carry the plaintext code. Must be false in production.
    pub debug_expose_otp: bool,
    /// Unbound-channel fallback tenant, for single-tenant/dev deployments only.
    pub default_tenant_id: Option<String>,
    /// SQLite file path.
    pub database_path: String,
    /// Root directory for the content-addressed receipt object store.
    pub receipt_store_dir: String,
    /// Symmetric key material used to obfuscate credential bundles at rest.
    pub credential_encryption_key: String,
    /// Shared secret the principal-facing escalation-resolution routes
    /// require in `X-Admin-Key`. Empty disables the routes entirely rather
    /// than accepting an empty header.
    pub admin_api_key: String,
}

const MAX_OTP_TTL_SECONDS: u64 = 900;

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            high_value_threshold: 1_000_000,
            webhook_verify_token: None,
            wa_app_secret: String::new(),
            ig_app_secret: String::new(),
            otp_ttl_seconds: 300,
            session_ttl_seconds: 1800,
            event_budget_seconds: 20,
            debug_expose_otp: false,
            default_tenant_id: None,
            database_path: "data/gateway.db".to_string(),
            receipt_store_dir: "data/receipts".to_string(),
            credential_encryption_key: "dev-only-insecure-key".to_string(),
            admin_api_key: String::new(),
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(val) = env::var("HIGH_VALUE_THRESHOLD")
            && let Ok(n) = val.parse::<i64>()
        {
            cfg.high_value_threshold = n;
        }
        if let Ok(val) = env::var("WEBHOOK_VERIFY_TOKEN") {
            cfg.webhook_verify_token = Some(val);
        }
        if let Ok(val) = env::var("WA_APP_SECRET") {
            cfg.wa_app_secret = val;
        }
        if let Ok(val) = env::var("IG_APP_SECRET") {
            cfg.ig_app_secret = val;
        }
        if let Ok(val) = env::var("OTP_TTL_SECONDS")
            && let Ok(n) = val.parse::<u64>()
        {
            cfg.otp_ttl_seconds = n.min(MAX_OTP_TTL_SECONDS);
        }
        if let Ok(val) = env::var("SESSION_TTL_SECONDS")
            && let Ok(n) = val.parse::<u64>()
        {
            cfg.session_ttl_seconds = n;
        }
        if let Ok(val) = env::var("EVENT_BUDGET_SECONDS")
            && let Ok(n) = val.parse::<u64>()
        {
            cfg.event_budget_seconds = n;
        }
        if let Ok(val) = env::var("DEBUG_EXPOSE_OTP") {
            cfg.debug_expose_otp = val == "1" || val.eq_ignore_ascii_case("true");
        }
        if let Ok(val) = env::var("DEFAULT_TENANT_ID") {
            cfg.default_tenant_id = Some(val);
        }
        if let Ok(val) = env::var("DATABASE_PATH") {
            cfg.database_path = val;
        }
        if let Ok(val) = env::var("RECEIPT_STORE_DIR") {
            cfg.receipt_store_dir = val;
        }
        if let Ok(val) = env::var("CREDENTIAL_ENCRYPTION_KEY") {
            cfg.credential_encryption_key = val;
        }
        if let Ok(val) = env::var("ADMIN_API_KEY") {
            cfg.admin_api_key = val;
        }

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn otp_ttl_clamped_to_max() {
        // SAFETY: tests run single-threaded per-process here is not guaranteed,
        // so exercise the clamp directly rather than through env::set_var races.
        let mut cfg = GatewayConfig::default();
        cfg.otp_ttl_seconds = 5000u64.min(MAX_OTP_TTL_SECONDS);
        assert_eq!(cfg.otp_ttl_seconds, MAX_OTP_TTL_SECONDS);
    }

    #[test]
    fn defaults_are_sane() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.high_value_threshold, 1_000_000);
        assert!(!cfg.debug_expose_otp);
        assert_eq!(cfg.otp_ttl_seconds, 300);
    }
}
