//! Brute-force mitigation in front of the connection-upgrade endpoint.
//!
//! Tracks credential failures per source address and locks an address
//! out with a doubling window once it crosses the failure threshold.
//! The map is in-memory only; a restart clears all blocks.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::info;

/// Failures beyond this count trigger the lockout.
const MAX_FAILURE_ATTEMPTS: u32 = 5;

/// First lockout window.
const INITIAL_LOCKOUT: Duration = Duration::from_secs(10);

/// Expired records older than their release time by this much are
/// swept, bounding map growth under sustained scanning.
const SWEEP_GRACE: Duration = Duration::from_secs(3600);

/// Outcome of an access check, mapped by the caller onto HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Credentials accepted
    Granted,
    /// Credentials rejected (401)
    Unauthorized,
    /// Address is currently locked out; credentials were not evaluated (403)
    Blocked,
}

struct FailureRecord {
    fail_count: u32,
    last_fail: Instant,
    lockout: Duration,
}

/// Per-address failure counter with exponential lockout.
pub struct AccessGuard {
    /// Acceptable `Authorization` header values, precomputed.
    accepted: Vec<String>,
    records: Mutex<HashMap<IpAddr, FailureRecord>>,
}

impl AccessGuard {
    /// Build a guard accepting the given user/password pairs as HTTP
    /// Basic credentials.
    pub fn new<'a>(credentials: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let accepted = credentials
            .into_iter()
            .map(|(user, pass)| format!("Basic {}", BASE64.encode(format!("{user}:{pass}"))))
            .collect();
        Self {
            accepted,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Check one upgrade attempt from `addr` carrying the given
    /// `Authorization` header value (or `None` when absent).
    pub fn check(&self, addr: IpAddr, authorization: Option<&str>) -> Decision {
        self.check_at(addr, authorization, Instant::now())
    }

    // Time-parameterized core, so lockout windows are testable.
    fn check_at(&self, addr: IpAddr, authorization: Option<&str>, now: Instant) -> Decision {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());

        records.retain(|_, r| now < r.last_fail + r.lockout + SWEEP_GRACE);

        if let Some(record) = records.get_mut(&addr) {
            if record.fail_count > MAX_FAILURE_ATTEMPTS {
                let release = record.last_fail + record.lockout;
                if now < release {
                    info!(
                        "blocked address {addr}, lockout {:?} not yet elapsed",
                        record.lockout
                    );
                    return Decision::Blocked;
                }

                // The window elapsed: clear the count but double the
                // next window, so repeat offenders face growing
                // lockouts even across expired windows.
                record.fail_count = 0;
                record.lockout *= 2;
            }
        }

        let ok = authorization
            .map(|header| self.accepted.iter().any(|want| want == header))
            .unwrap_or(false);

        if !ok {
            let record = records.entry(addr).or_insert(FailureRecord {
                fail_count: 0,
                last_fail: now,
                lockout: INITIAL_LOCKOUT,
            });
            record.fail_count += 1;
            record.last_fail = now;
            return Decision::Unauthorized;
        }

        // A success never resets the failure count; only an elapsed
        // lockout window does.
        Decision::Granted
    }
}
