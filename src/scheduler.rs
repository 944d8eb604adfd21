use crate::error::SessionError;
use crate::manager::SessionManager;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Background task that keeps the broker token fresh.
///
/// Calls [`SessionManager::acquire_token`] on startup and then every
/// `interval_seconds`. A valid token makes each tick a read-only no-op; a
/// failed renewal is retried on the next tick.
pub async fn run_scheduler(manager: SessionManager, interval_seconds: u64) {
    let mut ticker = interval(Duration::from_secs(interval_seconds.max(1)));

    // A slow login should not cause a burst of catch-up renewals
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(interval_seconds, "Renewal scheduler started");

    loop {
        ticker.tick().await;
        renew_once(&manager).await;
    }
}

/// Runs one scheduler tick. Returns whether a valid token is now available.
pub async fn renew_once(manager: &SessionManager) -> bool {
    match manager.acquire_token().await {
        Ok(_) => {
            debug!("Broker token is valid");
            true
        }
        Err(SessionError::RenewalInProgress) => {
            debug!("Renewal owned by another process, skipping tick");
            false
        }
        Err(e @ SessionError::ConfigMissing(_)) => {
            warn!(error = %e, "Cannot renew broker token until configured");
            false
        }
        Err(e) => {
            error!(error = %e, "Scheduled broker renewal failed");
            false
        }
    }
}
