//! Managed application state: the collaborators a webhook
//! route needs over the lifetime of the process, assembled once at startup
//! and handed to Rocket via `.manage()` — the same shape other Rocket
//! services use for `Db`/`EventBus`/`RateLimiter` managed state.

use crate::config::GatewayConfig;
use crate::db::Db;
use crate::keyed_lock::KeyedLock;
use crate::objectstore::ObjectStore;
use crate::rate_limit::RateLimiter;
use std::sync::Arc;

/// Rocket manages this behind an `Arc` so the same handle can be cloned into
/// the background reaper tasks spawned from `AdHoc::on_liftoff` — a plain
/// `&'static GatewayState` isn't obtainable safely from `rocket.state()`.
pub type Shared = Arc<GatewayState>;

pub struct GatewayState {
    pub db: Db,
    pub config: GatewayConfig,
    pub rate_limiter: RateLimiter,
    pub keyed_lock: KeyedLock,
    pub object_store: ObjectStore,
    pub http: reqwest::Client,
}

impl GatewayState {
    pub fn new(config: GatewayConfig) -> Self {
        if let Some(parent) = std::path::Path::new(&config.database_path).parent() {
            std::fs::create_dir_all(parent).ok();
        }
        std::fs::create_dir_all(&config.receipt_store_dir).ok();

        let db = Db::new(&config.database_path);
        let object_store = ObjectStore::new(config.receipt_store_dir.clone());
        let http = reqwest::Client::builder()
            .build()
            .expect("reqwest client builds with the default TLS backend");

        Self {
            db,
            config,
            rate_limiter: RateLimiter::new(),
            keyed_lock: KeyedLock::new(),
            object_store,
            http,
        }
    }
}
