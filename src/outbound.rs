//! Outbound Delivery Engine: platform sends with retry/backoff,
//! credential refresh-and-retry-once on UNAUTHORIZED, and a per-tenant
//! concurrency cap. Built on `reqwest`, the same crate other HTTP clients in
//! this ecosystem reach for; retry/backoff shape mirrors `rate_limit.rs`'s
//! own window math in spirit (bounded, capped, deterministic).

use crate::models::Platform;
use crate::tenant::TenantRegistry;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_MS: u64 = 8_000;
const PER_ATTEMPT_TIMEOUT_SECS: u64 = 10;
const PER_TENANT_CONCURRENCY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    RetryableError,
    PermanentError,
}

fn send_endpoint(platform: Platform) -> &'static str {
    match platform {
        Platform::Wa => "https://graph.example-wa.test/v1/messages",
        Platform::Ig => "https://graph.example-ig.test/v1/messages",
    }
}

pub struct OutboundEngine<'a> {
    http: reqwest::Client,
    tenants: &'a TenantRegistry<'a>,
    semaphores: Mutex<HashMap<String, std::sync::Arc<Semaphore>>>,
}

impl<'a> OutboundEngine<'a> {
    pub fn new(http: reqwest::Client, tenants: &'a TenantRegistry<'a>) -> Self {
        Self {
            http,
            tenants,
            semaphores: Mutex::new(HashMap::new()),
        }
    }

    fn semaphore_for(&self, tenant_id: &str) -> std::sync::Arc<Semaphore> {
        let mut map = self.semaphores.lock().unwrap();
        map.entry(tenant_id.to_string())
            .or_insert_with(|| std::sync::Arc::new(Semaphore::new(PER_TENANT_CONCURRENCY)))
            .clone()
    }

    pub async fn send_text(
        &self,
        tenant_id: &str,
        platform: Platform,
        sender_id: &str,
        body: &str,
    ) -> SendOutcome {
        let semaphore = self.semaphore_for(tenant_id);
        // Suspend rather than drop when at the concurrency cap.
        let _permit: SemaphorePermit = match semaphore.acquire().await {
            Ok(p) => p,
            Err(_) => return SendOutcome::PermanentError,
        };

        let Some(mut credentials) = self.tenants.get_credentials(tenant_id, platform) else {
            return SendOutcome::PermanentError;
        };

        let mut unauthorized_retried = false;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let payload = serde_json::json!({
                "recipient": { "id": sender_id },
                "message": { "text": body },
            });

            let result = self
                .http
                .post(send_endpoint(platform))
                .bearer_auth(&credentials.access_token)
                .timeout(Duration::from_secs(PER_ATTEMPT_TIMEOUT_SECS))
                .json(&payload)
                .send()
                .await;

            match result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return SendOutcome::Delivered;
                    }
                    if status.as_u16() == 401 && !unauthorized_retried {
                        unauthorized_retried = true;
                        self.tenants.refresh_credentials(tenant_id, platform);
                        match self.tenants.get_credentials(tenant_id, platform) {
                            Some(fresh) => {
                                credentials = fresh;
                                continue;
                            }
                            None => return SendOutcome::PermanentError,
                        }
                    }
                    if status.as_u16() == 429 || status.is_server_error() {
                        let retry_after = resp
                            .headers()
                            .get("Retry-After")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok());
                        if attempt >= MAX_ATTEMPTS {
                            return SendOutcome::RetryableError;
                        }
                        let backoff = retry_after
                            .map(Duration::from_secs)
                            .unwrap_or_else(|| backoff_for_attempt(attempt));
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    // Any other 4xx is permanent.
                    return SendOutcome::PermanentError;
                }
                Err(_) => {
                    if attempt >= MAX_ATTEMPTS {
                        return SendOutcome::RetryableError;
                    }
                    tokio::time::sleep(backoff_for_attempt(attempt)).await;
                }
            }
        }
    }
}

fn backoff_for_attempt(attempt: u32) -> Duration {
    let ms = BASE_BACKOFF_MS.saturating_mul(1u64 << (attempt.saturating_sub(1)));
    Duration::from_millis(ms.min(MAX_BACKOFF_MS))
}
