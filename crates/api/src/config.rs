//! Server configuration loaded from environment variables

use anyhow::Context;

/// API server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string
    pub database_url: String,
    /// Address the HTTP server binds to
    pub bind_address: String,
    /// Secret for signing access tokens
    pub jwt_secret: String,
    /// Access token lifetime in hours
    pub jwt_expiry_hours: i64,
    /// Deployment environment name ("development", "staging", "production")
    pub environment: String,
    /// Skip plan limit enforcement (ignored in production)
    pub bypass_limits: bool,
    /// Shared secret for verifying billing webhook signatures
    pub webhook_secret: String,
    /// Apply pending database migrations at startup
    pub run_migrations: bool,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(value) => value == "1" || value.eq_ignore_ascii_case("true"),
        Err(_) => default,
    }
}

impl Config {
    /// Load configuration from the environment
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let jwt_secret = std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?;

        let jwt_expiry_hours = env_or("JWT_EXPIRY_HOURS", "24")
            .parse::<i64>()
            .context("JWT_EXPIRY_HOURS must be an integer")?;

        Ok(Self {
            database_url,
            bind_address: env_or("BIND_ADDRESS", "0.0.0.0:8080"),
            jwt_secret,
            jwt_expiry_hours,
            environment: env_or("APP_ENV", "development"),
            bypass_limits: env_flag("PAGESMITH_BYPASS_LIMITS", false),
            webhook_secret: env_or("BILLING_WEBHOOK_SECRET", ""),
            run_migrations: env_flag("RUN_MIGRATIONS", true),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
