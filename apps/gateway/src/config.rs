use std::time::Duration;

/// Gateway configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string. When unset the gateway runs on the
    /// in-memory store.
    pub database_url: Option<String>,
    /// HS256 secret shared with the identity service that issues access tokens.
    pub jwt_secret: String,
    /// Expected `iss` claim, if the identity service sets one.
    pub jwt_issuer: Option<String>,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Heartbeat interval advertised in READY (ms). Connections silent for
    /// 1.5× this are closed.
    pub heartbeat_interval_ms: u64,
    /// Chat events admitted per connection per window.
    pub rate_limit_max_events: usize,
    pub rate_limit_window_secs: u64,
    /// How long ended calls stay queryable before the sweeper drops them.
    pub call_retention_secs: u64,
    /// Push gateway endpoint. Push is disabled when unset.
    pub push_gateway_url: Option<String>,
    /// Snowflake worker ID for this process.
    pub worker_id: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            database_url: optional_var("DATABASE_URL"),
            jwt_secret: required_var("JWT_SECRET"),
            jwt_issuer: optional_var("JWT_ISSUER"),
            port: parsed_var("PORT").unwrap_or(4010),
            heartbeat_interval_ms: parsed_var("HEARTBEAT_INTERVAL_MS").unwrap_or(41250),
            rate_limit_max_events: parsed_var("RATE_LIMIT_MAX_EVENTS").unwrap_or(30),
            rate_limit_window_secs: parsed_var("RATE_LIMIT_WINDOW_SECS").unwrap_or(60),
            call_retention_secs: parsed_var("CALL_RETENTION_SECS").unwrap_or(600),
            push_gateway_url: optional_var("PUSH_GATEWAY_URL"),
            worker_id: parsed_var("WORKER_ID").unwrap_or(0),
        }
    }

    /// Defaults for tests and local tooling; everything but the secret.
    pub fn with_secret(jwt_secret: impl Into<String>) -> Self {
        Self {
            database_url: None,
            jwt_secret: jwt_secret.into(),
            jwt_issuer: None,
            port: 4010,
            heartbeat_interval_ms: 41250,
            rate_limit_max_events: 30,
            rate_limit_window_secs: 60,
            call_retention_secs: 600,
            push_gateway_url: None,
            worker_id: 0,
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn call_retention(&self) -> Duration {
        Duration::from_secs(self.call_retention_secs)
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
