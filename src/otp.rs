//! OTP subsystem: generation, hashed+TTL storage, single-use
//! attempt-throttled verification, and rate limiting. Storage CRUD follows
//! the `rusqlite` idiom used throughout (`conn.execute`/`query_row` behind
//! the shared `Mutex<Connection>`) — the mutex itself is what gives the
//! "atomic attempt increment" and "atomic destroy on verify" invariants
//! here, the same way it gives monotonic `seq` assignment elsewhere.

use crate::config::GatewayConfig;
use crate::db::Db;
use crate::models::{OtpOutcome, OtpProfile, OtpPurpose};
use crate::rate_limit::{windows, RateLimiter};
use pbkdf2::pbkdf2_hmac;
use rand::Rng;
use rusqlite::params;
use sha2::Sha512;
use subtle::ConstantTimeEq;

const PBKDF2_ROUNDS: u32 = 10_000;
const HASH_LEN: usize = 64;
const SALT_LEN: usize = 16;

const PRINCIPAL_ALPHABET: &[u8] = b"0123456789!@#$%^&*";
const SENDER_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*";

fn alphabet_and_len(profile: OtpProfile) -> (&'static [u8], usize) {
    match profile {
        OtpProfile::Principal => (PRINCIPAL_ALPHABET, 6),
        OtpProfile::Sender => (SENDER_ALPHABET, 8),
    }
}

/// Draw a uniformly random code from the profile's alphabet.
pub fn generate_code(profile: OtpProfile) -> String {
    let (alphabet, len) = alphabet_and_len(profile);
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..alphabet.len());
            alphabet[idx] as char
        })
        .collect()
}

fn hash_code(code: &str, salt: &[u8]) -> [u8; HASH_LEN] {
    let mut out = [0u8; HASH_LEN];
    pbkdf2_hmac::<Sha512>(code.as_bytes(), salt, PBKDF2_ROUNDS, &mut out);
    out
}

fn purpose_str(purpose: OtpPurpose) -> &'static str {
    match purpose {
        OtpPurpose::Register => "REGISTER",
        OtpPurpose::Approve => "APPROVE",
        OtpPurpose::MutateProfile => "MUTATE_PROFILE",
    }
}

fn purpose_from_str(s: &str) -> Option<OtpPurpose> {
    Some(match s {
        "REGISTER" => OtpPurpose::Register,
        "APPROVE" => OtpPurpose::Approve,
        "MUTATE_PROFILE" => OtpPurpose::MutateProfile,
        _ => return None,
    })
}

pub struct OtpSubsystem<'a> {
    db: &'a Db,
    rate_limiter: &'a RateLimiter,
    config: &'a GatewayConfig,
}

/// Outcome of a generation attempt. The plaintext code is returned exactly
/// once, to be handed to the delivery path and then dropped — callers must
/// not persist or log it.
pub enum GenerateOutcome {
    Generated { plaintext: String, request_id: String },
    Throttled,
}

impl<'a> OtpSubsystem<'a> {
    pub fn new(db: &'a Db, rate_limiter: &'a RateLimiter, config: &'a GatewayConfig) -> Self {
        Self {
            db,
            rate_limiter,
            config,
        }
    }

    /// Generate and store a new OTP record. `throttle_actor`, when set, is
    /// checked against the principal generation window (10/60min); sender-side
    /// registration flows pass `None` and rely on upstream webhook-level
    /// throttling instead.
    pub fn generate(
        &self,
        sender_id: &str,
        purpose: OtpPurpose,
        profile: OtpProfile,
        throttle_actor: Option<&str>,
    ) -> GenerateOutcome {
        if let Some(actor) = throttle_actor {
            let key = format!("otp_gen:{actor}");
            if !self.rate_limiter.check(
                &key,
                windows::OTP_GENERATION_PRINCIPAL_MAX,
                windows::OTP_GENERATION_PRINCIPAL_WINDOW_SECS,
            ) {
                return GenerateOutcome::Throttled;
            }
        }

        let code = generate_code(profile);
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill(&mut salt);
        let hash = hash_code(&code, &salt);

        let request_id = uuid::Uuid::new_v4().to_string();
        let now = crate::db::now_ms();
        let expires_at = now + (self.config.otp_ttl_seconds as i64) * 1000;

        let conn = self.db.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO otp_records
                (sender_id, request_id, purpose, salt, code_hash, created_at_ms, expires_at_ms, attempts, max_attempts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, 3)",
            params![
                sender_id,
                &request_id,
                purpose_str(purpose),
                &salt[..],
                &hash[..],
                now,
                expires_at,
            ],
        )
        .expect("otp insert");

        GenerateOutcome::Generated {
            plaintext: code,
            request_id,
        }
    }

    /// Verification entry point.
    pub fn verify(&self, sender_id: &str, request_id: &str, presented_code: &str, expected_purpose: OtpPurpose) -> OtpOutcome {
        let throttle_key = format!("otp_verify:{sender_id}:{}", purpose_str(expected_purpose));
        if !self.rate_limiter.check(
            &throttle_key,
            windows::OTP_VERIFY_MAX,
            windows::OTP_VERIFY_WINDOW_SECS,
        ) {
            return OtpOutcome::Throttled;
        }

        let conn = self.db.conn.lock().unwrap();
        let now = crate::db::now_ms();

        let row: Option<(String, Vec<u8>, Vec<u8>, i64, i64, i64)> = conn
            .query_row(
                "SELECT purpose, salt, code_hash, expires_at_ms, attempts, max_attempts
                 FROM otp_records WHERE sender_id = ?1 AND request_id = ?2",
                params![sender_id, request_id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .ok();

        let Some((purpose_raw, salt, stored_hash, expires_at, attempts, max_attempts)) = row else {
            return OtpOutcome::Invalid { terminal: false };
        };

        // Step 1: absent-or-expired is unobservable.
        if now >= expires_at {
            conn.execute(
                "DELETE FROM otp_records WHERE sender_id = ?1 AND request_id = ?2",
                params![sender_id, request_id],
            )
            .ok();
            return OtpOutcome::Invalid { terminal: false };
        }

        // Step 2: attempts exhausted invalidates permanently.
        if attempts >= max_attempts {
            conn.execute(
                "DELETE FROM otp_records WHERE sender_id = ?1 AND request_id = ?2",
                params![sender_id, request_id],
            )
            .ok();
            return OtpOutcome::Invalid { terminal: false };
        }

        let Some(purpose) = purpose_from_str(&purpose_raw) else {
            return OtpOutcome::Invalid { terminal: false };
        };
        if purpose != expected_purpose {
            return OtpOutcome::Invalid { terminal: false };
        }

        // Step 3: increment attempts atomically (the connection mutex is the
        // atomicity boundary here, same as seq-assignment pattern).
        conn.execute(
            "UPDATE otp_records SET attempts = attempts + 1 WHERE sender_id = ?1 AND request_id = ?2",
            params![sender_id, request_id],
        )
        .ok();

        // Step 4: constant-time compare.
        let computed = hash_code(presented_code, &salt);
        let matches: bool = computed.ct_eq(stored_hash.as_slice()).into();

        if matches {
            // Step 5: destroy atomically and return VALID.
            conn.execute(
                "DELETE FROM otp_records WHERE sender_id = ?1 AND request_id = ?2",
                params![sender_id, request_id],
            )
            .ok();
            OtpOutcome::Valid(purpose)
        } else {
            // Step 6: mismatch, record remains with incremented attempts.
            // If this mismatch was the final allowed attempt, destroy now so
            // a subsequent correct-code submission cannot slip through.
            let terminal = attempts + 1 >= max_attempts;
            if terminal {
                conn.execute(
                    "DELETE FROM otp_records WHERE sender_id = ?1 AND request_id = ?2",
                    params![sender_id, request_id],
                )
                .ok();
            }
            OtpOutcome::Invalid { terminal }
        }
    }
}
