//! Broadcast fan-out to every known, non-blocked user.
//!
//! Runs as a background task: sends are paced to respect transport rate
//! limits, a cancellation token is checked between sends, and one
//! recipient's failure never aborts delivery to the rest.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::BROADCAST_PACE_MS;
use crate::transport::{DeliveryOutcome, Transport};
use crate::user_directory::UserDirectory;

/// Per-recipient accounting of one broadcast run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub sent: u32,
    /// Recipients newly marked blocked by a permanent delivery failure.
    pub blocked: u32,
    /// Transient failures; recipient state left unchanged, no retry.
    pub failed: u32,
    pub cancelled: bool,
}

impl fmt::Display for BroadcastReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Broadcast finished: {} sent, {} blocked, {} failed{}.",
            self.sent,
            self.blocked,
            self.failed,
            if self.cancelled { " (cancelled)" } else { "" }
        )
    }
}

/// Result of a blocked-user sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub probed: u32,
    pub newly_blocked: u32,
    pub total_blocked: u64,
    pub cancelled: bool,
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Checked {} users: {} newly blocked, {} blocked in total{}.",
            self.probed,
            self.newly_blocked,
            self.total_blocked,
            if self.cancelled { " (cancelled)" } else { "" }
        )
    }
}

#[derive(Clone)]
pub struct BroadcastDispatcher {
    users: UserDirectory,
    transport: Arc<dyn Transport>,
    pace: Duration,
}

impl BroadcastDispatcher {
    pub fn new(users: UserDirectory, transport: Arc<dyn Transport>) -> Self {
        BroadcastDispatcher {
            users,
            transport,
            pace: Duration::from_millis(BROADCAST_PACE_MS),
        }
    }

    /// Override the inter-send delay (tests run unpaced).
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    /// Deliver `payload` to every active user. Storage failures abort the
    /// run; delivery failures never do.
    pub async fn broadcast(
        &self,
        payload: &str,
        cancel: &CancellationToken,
    ) -> crate::storage::StoreResult<BroadcastReport> {
        let recipients = self.users.active_user_ids().await?;
        log::info!("broadcast starting to {} recipients", recipients.len());
        let mut report = BroadcastReport::default();
        for user in recipients {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            match self.transport.broadcast_send(user, payload).await {
                DeliveryOutcome::Delivered => report.sent += 1,
                DeliveryOutcome::PermanentFailure => {
                    self.users.mark_blocked(user).await?;
                    report.blocked += 1;
                    log::info!("broadcast: user {} blocked the bot", user.0);
                }
                DeliveryOutcome::TransientFailure => {
                    report.failed += 1;
                    log::warn!("broadcast: transient delivery failure for user {}", user.0);
                }
            }
            if !self.pace.is_zero() {
                sleep(self.pace).await;
            }
        }
        log::info!("{report}");
        Ok(report)
    }

    /// Probe every active user with a zero-content delivery and mark the
    /// permanently unreachable ones blocked.
    pub async fn check_blocked(
        &self,
        cancel: &CancellationToken,
    ) -> crate::storage::StoreResult<SweepReport> {
        let recipients = self.users.active_user_ids().await?;
        let mut report = SweepReport::default();
        for user in recipients {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            report.probed += 1;
            if self.transport.probe(user).await == DeliveryOutcome::PermanentFailure {
                self.users.mark_blocked(user).await?;
                report.newly_blocked += 1;
            }
            if !self.pace.is_zero() {
                sleep(self.pace).await;
            }
        }
        report.total_blocked = self.users.blocked_count().await?;
        Ok(report)
    }
}
