use std::{env, time::Duration};

/// Runtime configuration, collected from the environment once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub bind_port: u16,
    pub database_url: String,
    /// Period between due-date scans.
    pub scan_interval: Duration,
    /// Upper bound on a single scan pass.
    pub scan_timeout: Duration,
    /// Lifetime of a session token, measured from creation; access does
    /// not extend it.
    pub session_ttl: Duration,
    /// When set, an installment is reminded at most once per due date
    /// instead of on every scan inside the 3-day window.
    pub remind_once: bool,
    pub admin_username: String,
    pub admin_password: String,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn secs_or(key: &str, default: u64) -> Duration {
    let secs = env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default);
    Duration::from_secs(secs)
}

impl Config {
    pub fn from_env() -> Config {
        Config {
            bind_addr: env_or("BIND_ADDR", "0.0.0.0"),
            bind_port: env::var("BIND_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            database_url: env_or("DATABASE_URL", "sqlite://finledger.db"),
            scan_interval: secs_or("SCAN_INTERVAL_SECS", 24 * 60 * 60),
            scan_timeout: secs_or("SCAN_TIMEOUT_SECS", 10 * 60),
            session_ttl: secs_or("SESSION_TTL_SECS", 24 * 60 * 60),
            remind_once: env::var("REMIND_ONCE")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            admin_username: env_or("ADMIN_USERNAME", "admin"),
            admin_password: env_or("ADMIN_PASSWORD", "change-me-on-first-login"),
        }
    }
}
