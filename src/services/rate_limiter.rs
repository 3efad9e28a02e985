//! Login rate limiting
//!
//! Two sliding windows: failed logins per identifier (email or username)
//! and raw requests per client IP.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::net::IpAddr;
use tokio::sync::RwLock;
use tracing::warn;

use crate::config::SecurityConfig;

const IP_WINDOW_MINUTES: i64 = 1;
const IP_MAX_REQUESTS: usize = 10;

pub struct LoginRateLimiter {
    max_attempts: usize,
    lockout: Duration,
    identifier_attempts: RwLock<HashMap<String, Vec<DateTime<Utc>>>>,
    ip_requests: RwLock<HashMap<IpAddr, Vec<DateTime<Utc>>>>,
}

impl LoginRateLimiter {
    pub fn new(max_attempts: usize, lockout_minutes: i64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            lockout: Duration::minutes(lockout_minutes.max(1)),
            identifier_attempts: RwLock::new(HashMap::new()),
            ip_requests: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &SecurityConfig) -> Self {
        Self::new(config.max_login_attempts, config.lockout_minutes)
    }

    /// True once `identifier` has used up its failures inside the lockout window
    pub async fn is_identifier_limited(&self, identifier: &str) -> bool {
        let cutoff = Utc::now() - self.lockout;
        let mut attempts = self.identifier_attempts.write().await;
        let entry = attempts.entry(identifier.to_lowercase()).or_default();
        entry.retain(|t| *t > cutoff);
        let limited = entry.len() >= self.max_attempts;
        if limited {
            warn!("Login locked out for '{}'", identifier);
        }
        limited
    }

    pub async fn record_failed_attempt(&self, identifier: &str) {
        self.identifier_attempts
            .write()
            .await
            .entry(identifier.to_lowercase())
            .or_default()
            .push(Utc::now());
    }

    /// Forget failures after a successful login
    pub async fn clear_identifier(&self, identifier: &str) {
        self.identifier_attempts
            .write()
            .await
            .remove(&identifier.to_lowercase());
    }

    pub async fn is_ip_limited(&self, ip: IpAddr) -> bool {
        let cutoff = Utc::now() - Duration::minutes(IP_WINDOW_MINUTES);
        let mut requests = self.ip_requests.write().await;
        let entry = requests.entry(ip).or_default();
        entry.retain(|t| *t > cutoff);
        let limited = entry.len() >= IP_MAX_REQUESTS;
        if limited {
            warn!("Rate limit hit for {}", ip);
        }
        limited
    }

    pub async fn record_ip_request(&self, ip: IpAddr) {
        self.ip_requests
            .write()
            .await
            .entry(ip)
            .or_default()
            .push(Utc::now());
    }

    /// Drop expired entries; run from the task loop
    pub async fn cleanup(&self) {
        let now = Utc::now();
        let identifier_cutoff = now - self.lockout;
        let ip_cutoff = now - Duration::minutes(IP_WINDOW_MINUTES);

        self.identifier_attempts.write().await.retain(|_, times| {
            times.retain(|t| *t > identifier_cutoff);
            !times.is_empty()
        });
        self.ip_requests.write().await.retain(|_, times| {
            times.retain(|t| *t > ip_cutoff);
            !times.is_empty()
        });
    }

    #[cfg(test)]
    async fn tracked(&self) -> (usize, usize) {
        (
            self.identifier_attempts.read().await.len(),
            self.ip_requests.read().await.len(),
        )
    }
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        Self::new(5, 15)
    }
}
