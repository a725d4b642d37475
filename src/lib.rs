pub mod admin_routes;
pub mod audit;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod escalation;
pub mod gateway;
pub mod idempotency;
pub mod intent;
pub mod keyed_lock;
pub mod media;
pub mod models;
pub mod objectstore;
pub mod otp;
pub mod outbound;
pub mod rate_limit;
pub mod signature;
pub mod state;
pub mod tenant;
pub mod webhook_routes;

use config::GatewayConfig;
use gateway::{GatewayState, Shared};
use std::sync::Arc;
use std::time::Duration;

pub fn rocket() -> rocket::Rocket<rocket::Build> {
    rocket_with_config(GatewayConfig::from_env())
}

pub fn rocket_with_config(config: GatewayConfig) -> rocket::Rocket<rocket::Build> {
    build_rocket(Arc::new(GatewayState::new(config)))
}

fn build_rocket(state: Shared) -> rocket::Rocket<rocket::Build> {
    let reaper_state = state.clone();

    rocket::build()
        .manage(state)
        .mount(
            "/",
            rocket::routes![
                webhook_routes::wa_challenge,
                webhook_routes::ig_challenge,
                webhook_routes::wa_webhook,
                webhook_routes::ig_webhook,
                admin_routes::request_escalation_otp,
                admin_routes::resolve_escalation,
            ],
        )
        .attach(rocket::fairing::AdHoc::on_liftoff(
            "Background Reapers",
            move |_rocket| {
                Box::pin(async move {
                    spawn_reapers(reaper_state);
                    println!("gateway background reapers started");
                })
            },
        ))
}

/// Idempotency-cache and conversation-state reapers, keyed-lock idle
/// eviction, and the escalation expiry sweep, all cloning the one `Arc`
/// Rocket also manages — same `tokio::spawn` + periodic `sleep` shape used for
/// retention/cleanup tasks elsewhere, just four independent loops sharing one
/// handle instead of one loop owning a private connection.
fn spawn_reapers(state: Shared) {
    let s = state.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            let removed = idempotency::reap(&s.db);
            if removed > 0 {
                println!("idempotency reaper: removed {removed} stale entries");
            }
        }
    });

    let s = state.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(300)).await;
            let removed = state::StateStore::new(&s.db).reap_expired();
            if removed > 0 {
                println!("conversation-state reaper: cleared {removed} expired sessions");
            }
        }
    });

    let s = state.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(600)).await;
            let removed = s.keyed_lock.evict_idle();
            if removed > 0 {
                println!("keyed-lock reaper: evicted {removed} idle conversation locks");
            }
        }
    });

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(300)).await;
            let queue = escalation::EscalationQueue::new(&state.db, &state.config);
            let swept = queue.sweep_expired();
            if swept > 0 {
                println!("escalation sweep: expired {swept} pending escalations");
            }
        }
    });
}
