//! Application state

use sqlx::PgPool;

use crate::{
    auth::{AuthState, JwtManager},
    config::Config,
};
use pagesmith_metering::{MeteringConfig, MeteringService};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub jwt_manager: JwtManager,
    /// Plan, credit, and rate limit services
    pub metering: MeteringService,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let jwt_manager = JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours);

        let metering = MeteringService::new(
            MeteringConfig {
                environment: config.environment.clone(),
                bypass_limits: config.bypass_limits,
                webhook_secret: config.webhook_secret.clone(),
            },
            pool.clone(),
        );
        tracing::info!(environment = %config.environment, "Metering service initialized");

        Self {
            pool,
            config,
            jwt_manager,
            metering,
        }
    }

    /// Get auth state for middleware
    pub fn auth_state(&self) -> AuthState {
        AuthState {
            jwt_manager: self.jwt_manager.clone(),
        }
    }
}
