//! Periodic removal of expired token artifacts.
//!
//! Clears expired refresh, password reset and email verification tokens from every account and
//! deletes expired blacklist entries. Every step is idempotent, so overlapping or repeated runs
//! are harmless.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::db::models::users::SweepReport;
use crate::db::store::CredentialStore;

/// Run one sweep now
#[instrument(skip_all, err)]
pub async fn sweep_once(store: &dyn CredentialStore) -> anyhow::Result<SweepReport> {
    let report = store.cleanup_expired_tokens(Utc::now()).await?;

    counter!("hackmatch_auth_swept_tokens_total", "kind" => "refresh").increment(report.refresh_tokens);
    counter!("hackmatch_auth_swept_tokens_total", "kind" => "password_reset").increment(report.password_reset_tokens);
    counter!("hackmatch_auth_swept_tokens_total", "kind" => "email_verification").increment(report.email_verification_tokens);
    counter!("hackmatch_auth_swept_tokens_total", "kind" => "blacklist").increment(report.blacklisted_tokens);

    if report.total() > 0 {
        info!(
            refresh = report.refresh_tokens,
            password_reset = report.password_reset_tokens,
            email_verification = report.email_verification_tokens,
            blacklist = report.blacklisted_tokens,
            "Swept expired tokens"
        );
    } else {
        debug!("Token sweep found nothing to remove");
    }
    Ok(report)
}

/// Sweep every `interval` until `shutdown` is cancelled. The first sweep runs immediately.
pub async fn run_token_sweep(store: Arc<dyn CredentialStore>, interval: Duration, shutdown: CancellationToken) -> anyhow::Result<()> {
    anyhow::ensure!(!interval.is_zero(), "token sweep interval must be greater than zero");
    info!("Starting token sweep with {:?} interval", interval);

    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Token sweep shutting down");
                break;
            }
            _ = timer.tick() => {
                // A failed sweep is retried on the next tick
                if let Err(e) = sweep_once(store.as_ref()).await {
                    tracing::error!("Token sweep failed: {:#}", e);
                }
            }
        }
    }

    Ok(())
}
