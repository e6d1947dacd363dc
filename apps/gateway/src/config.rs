use std::str::FromStr;
use std::time::Duration;

/// Gateway configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string. In-memory stores are used when unset.
    pub database_url: Option<String>,
    /// Maximum pooled Postgres connections.
    pub db_pool_size: usize,
    /// HMAC secret used to verify access tokens.
    pub jwt_secret: String,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// How often clients are expected to heartbeat.
    pub heartbeat_interval: Duration,
    /// Missed intervals tolerated before a connection is reclaimed.
    pub heartbeat_grace_multiplier: u32,
    /// Bounded outbound queue size per connection.
    pub send_queue_capacity: usize,
    /// Bound on a single socket write before the peer counts as stalled.
    pub write_timeout: Duration,
    /// How long shutdown waits for connections to drain.
    pub shutdown_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        let mut config = Self::with_secret(required_var("JWT_SECRET"));
        config.database_url = std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty());
        config.db_pool_size = parsed_var("DB_POOL_SIZE", config.db_pool_size);
        config.port = parsed_var("PORT", config.port);
        // Zero would make the liveness ticker panic.
        config.heartbeat_interval =
            Duration::from_secs(parsed_var::<u64>("HEARTBEAT_INTERVAL_SECS", 30).max(1));
        config.heartbeat_grace_multiplier =
            parsed_var("HEARTBEAT_GRACE_MULTIPLIER", config.heartbeat_grace_multiplier).max(1);
        config.send_queue_capacity =
            parsed_var("SEND_QUEUE_CAPACITY", config.send_queue_capacity).max(1);
        config.write_timeout =
            Duration::from_secs(parsed_var::<u64>("WS_WRITE_TIMEOUT_SECS", 10).max(1));
        config.shutdown_timeout = Duration::from_secs(parsed_var("SHUTDOWN_TIMEOUT_SECS", 10));
        config
    }

    /// Defaults for everything except the token secret.
    pub fn with_secret(jwt_secret: impl Into<String>) -> Self {
        Self {
            database_url: None,
            db_pool_size: 20,
            jwt_secret: jwt_secret.into(),
            port: 4002,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_grace_multiplier: 3,
            send_queue_capacity: 256,
            write_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn parsed_var<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    // The only test in this crate that touches the process environment.
    #[test]
    fn from_env_rejects_zero_durations_and_sizes() {
        std::env::set_var("JWT_SECRET", "s");
        std::env::set_var("HEARTBEAT_INTERVAL_SECS", "0");
        std::env::set_var("HEARTBEAT_GRACE_MULTIPLIER", "0");
        std::env::set_var("SEND_QUEUE_CAPACITY", "0");
        std::env::set_var("WS_WRITE_TIMEOUT_SECS", "0");

        let config = Config::from_env();

        assert_eq!(config.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(config.heartbeat_grace_multiplier, 1);
        assert_eq!(config.send_queue_capacity, 1);
        assert_eq!(config.write_timeout, Duration::from_secs(1));

        for var in [
            "HEARTBEAT_INTERVAL_SECS",
            "HEARTBEAT_GRACE_MULTIPLIER",
            "SEND_QUEUE_CAPACITY",
            "WS_WRITE_TIMEOUT_SECS",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn defaults() {
        let config = Config::with_secret("s");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.heartbeat_grace_multiplier, 3);
        assert_eq!(config.write_timeout, Duration::from_secs(10));
        assert!(config.database_url.is_none());
    }
}
