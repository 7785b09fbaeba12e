//! Engine status and per-attempt results.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use d4k_cart_core::LineKey;

use super::error::SyncError;

/// What the engine is doing right now.
///
/// `Idle` is both the initial and every terminal state. A failed attempt
/// leaves `IdleWithError`, which never blocks the next attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Syncing,
    IdleWithError(SyncError),
}

impl SyncStatus {
    /// Whether a reconciliation is in flight.
    #[must_use]
    pub const fn is_syncing(&self) -> bool {
        matches!(self, Self::Syncing)
    }

    /// The error left by the last attempt, if it failed.
    #[must_use]
    pub const fn error(&self) -> Option<&SyncError> {
        match self {
            Self::IdleWithError(e) => Some(e),
            Self::Idle | Self::Syncing => None,
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Syncing => f.write_str("syncing"),
            Self::IdleWithError(e) => write!(f, "idle (last sync failed: {e})"),
        }
    }
}

/// Why an attempt did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No credentials for the remote cart. Expected for guests.
    NotAuthenticated,
    /// Another reconciliation holds the in-flight guard.
    AlreadyRunning,
}

/// Result of one reconciliation attempt.
///
/// Failures are values, not errors: the engine absorbs them and keeps the
/// local cart as it was.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Skipped(SkipReason),
    Completed(SyncReport),
    Failed(SyncError),
}

impl SyncOutcome {
    /// The report, if the attempt completed.
    #[must_use]
    pub const fn report(&self) -> Option<&SyncReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Skipped(_) | Self::Failed(_) => None,
        }
    }

    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// A pushed line the remote accepted fewer units of than were sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClampedPush {
    pub key: LineKey,
    pub requested: u32,
    /// 0 means the line was removed again.
    pub accepted: u32,
}

/// A local line the remote refused to take (for example insufficient stock).
///
/// The rest of the cart still reconciles; the refused line ends up wherever
/// the remote cart has it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedPush {
    pub key: LineKey,
    pub requested: u32,
    /// The remote's explanation.
    pub reason: String,
}

/// A local line whose quantity was replaced by the remote's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overwrite {
    pub key: LineKey,
    pub local: u32,
    pub remote: u32,
}

/// What a completed reconciliation did to the cart.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    /// Correlates the report with the attempt's log span.
    pub attempt_id: Uuid,
    /// Local-only lines pushed to the remote, in cart order.
    pub pushed: Vec<LineKey>,
    /// Pushes trimmed to the remote's declared stock.
    pub clamped: Vec<ClampedPush>,
    /// Local lines the remote refused.
    pub rejected: Vec<RejectedPush>,
    /// Local lines whose quantity the remote snapshot replaced.
    pub overwritten: Vec<Overwrite>,
    /// Local lines absent from the remote snapshot.
    pub dropped: Vec<LineKey>,
    pub completed_at: DateTime<Utc>,
}

impl SyncReport {
    /// Whether the remote took every local edit and adopting its snapshot
    /// discarded none.
    #[must_use]
    pub fn is_lossless(&self) -> bool {
        self.rejected.is_empty() && self.overwritten.is_empty() && self.dropped.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use d4k_cart_core::ProductId;

    use super::*;

    #[test]
    fn test_status_accessors() {
        assert!(SyncStatus::Syncing.is_syncing());
        assert!(SyncStatus::Idle.error().is_none());

        let status = SyncStatus::IdleWithError(SyncError::Timeout(Duration::from_secs(3)));
        assert!(!status.is_syncing());
        assert_eq!(status.error(), Some(&SyncError::Timeout(Duration::from_secs(3))));
        assert_eq!(
            status.to_string(),
            "idle (last sync failed: sync timed out after 3s)"
        );
    }

    #[test]
    fn test_report_lossless() {
        let mut report = SyncReport {
            attempt_id: Uuid::new_v4(),
            pushed: vec![],
            clamped: vec![],
            rejected: vec![],
            overwritten: vec![],
            dropped: vec![],
            completed_at: Utc::now(),
        };
        assert!(report.is_lossless());

        report.rejected.push(RejectedPush {
            key: LineKey::without_size(ProductId::new(2)),
            requested: 3,
            reason: "Insufficient stock".to_string(),
        });
        assert!(!report.is_lossless());
        report.rejected.clear();

        report.dropped.push(LineKey::without_size(ProductId::new(1)));
        assert!(!report.is_lossless());

        let outcome = SyncOutcome::Completed(report);
        assert!(outcome.is_completed());
        assert_eq!(outcome.report().map(|r| r.dropped.len()), Some(1));
        assert!(SyncOutcome::Skipped(SkipReason::AlreadyRunning).report().is_none());
    }
}
