//! Pagesmith Background Worker
//!
//! Handles scheduled jobs including:
//! - Monthly credit reset at the start of each billing cycle (00:05 UTC on the 1st)
//! - Trial expiry sweep (hourly)
//! - Health check heartbeat (every 5 minutes)

use std::time::Duration;

use pagesmith_metering::MeteringService;
use sqlx::postgres::PgPoolOptions;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// Create a database connection pool
async fn create_db_pool() -> anyhow::Result<sqlx::PgPool> {
    #[allow(clippy::expect_used)] // Fail-fast on startup if required config is missing
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    info!("Database pool created");
    Ok(pool)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting Pagesmith Worker");

    // Create database pool
    let pool = create_db_pool().await?;

    // Metering service shared by all jobs
    let metering = MeteringService::from_env(pool);

    // Create scheduler
    let scheduler = JobScheduler::new().await?;

    // Job 1: Monthly credit reset (00:05 UTC on the 1st)
    // Re-seeds every plan holder's current period record to their plan's limit.
    // Runs shortly after midnight so the new period already exists for
    // requests arriving at the boundary.
    let reset_metering = metering.clone();
    scheduler
        .add(Job::new_async("0 5 0 1 * *", move |_uuid, _l| {
            let metering = reset_metering.clone();
            Box::pin(async move {
                info!("Running monthly credit reset");

                let users = match metering.plans.plan_user_ids().await {
                    Ok(users) => users,
                    Err(e) => {
                        error!(error = %e, "Failed to list plan holders for credit reset");
                        return;
                    }
                };

                let total = users.len();
                let mut reset = 0;
                let mut errors = 0;

                for user_id in users {
                    match metering.usage.reset_credits(user_id).await {
                        Ok(_) => reset += 1,
                        Err(e) => {
                            error!(user_id = %user_id, error = %e, "Failed to reset credits");
                            errors += 1;
                        }
                    }
                }

                info!(
                    total = total,
                    reset = reset,
                    errors = errors,
                    "Monthly credit reset complete"
                );
            })
        })?)
        .await?;
    info!("Scheduled: Monthly credit reset (00:05 UTC on the 1st)");

    // Job 2: Trial expiry sweep (hourly)
    // Trials past their end date revert to Free unless billing already
    // converted them.
    let trial_metering = metering.clone();
    scheduler
        .add(Job::new_async("0 0 * * * *", move |_uuid, _l| {
            let metering = trial_metering.clone();
            Box::pin(async move {
                info!("Running trial expiry sweep");

                let expired = match metering.plans.find_expired_trials().await {
                    Ok(expired) => expired,
                    Err(e) => {
                        error!(error = %e, "Failed to find expired trials");
                        return;
                    }
                };

                let total = expired.len();
                let mut reverted = 0;
                let mut errors = 0;

                for user_id in expired {
                    match metering.end_trial(user_id, false).await {
                        Ok(()) => {
                            info!(user_id = %user_id, "Trial expired, reverted to free tier");
                            reverted += 1;
                        }
                        Err(e) => {
                            error!(user_id = %user_id, error = %e, "Failed to end expired trial");
                            errors += 1;
                        }
                    }
                }

                if total > 0 {
                    info!(
                        total = total,
                        reverted = reverted,
                        errors = errors,
                        "Trial expiry sweep complete"
                    );
                }
            })
        })?)
        .await?;
    info!("Scheduled: Trial expiry sweep (hourly)");

    // Job 3: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    // Start the scheduler
    info!("Starting job scheduler");
    scheduler.start().await?;

    info!(
        "Pagesmith Worker started successfully with {} scheduled jobs",
        3
    );

    // Keep the main task running
    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
