//! Sync error types.

use std::time::Duration;

use thiserror::Error;

use crate::gateway::GatewayError;

/// Step of a reconciliation at which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStep {
    /// Applying a single local change to the remote cart.
    Propagate,
    /// Initial fetch of the remote cart.
    FetchRemote,
    /// Pushing a local-only line.
    PushLocal,
    /// Trimming a pushed line down to the remote's declared stock.
    ClampPush,
    /// Final fetch whose result replaces the local cart.
    Refetch,
}

impl std::fmt::Display for SyncStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Propagate => "propagate",
            Self::FetchRemote => "fetch",
            Self::PushLocal => "push",
            Self::ClampPush => "clamp",
            Self::Refetch => "refetch",
        };
        f.write_str(name)
    }
}

/// A recoverable reconciliation failure.
///
/// Stored as the engine's sync-error marker, so it carries rendered messages
/// rather than the (non-cloneable) transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The remote could not be reached or refused a request.
    #[error("remote cart unavailable during {step}: {message}")]
    Gateway {
        /// Step that failed.
        step: SyncStep,
        /// Rendered gateway error.
        message: String,
    },

    /// The remote answered with something that could not be understood.
    #[error("malformed remote cart during {step}: {message}")]
    Malformed {
        /// Step that failed.
        step: SyncStep,
        /// Rendered gateway error.
        message: String,
    },

    /// The whole reconciliation did not finish within its deadline.
    #[error("sync timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

impl SyncError {
    /// Classify a gateway error raised at `step`.
    #[must_use]
    pub fn from_gateway(step: SyncStep, error: &GatewayError) -> Self {
        let message = error.to_string();
        if error.is_malformed() {
            Self::Malformed { step, message }
        } else {
            Self::Gateway { step, message }
        }
    }

    /// Step that failed, if the failure is tied to one.
    #[must_use]
    pub const fn step(&self) -> Option<SyncStep> {
        match self {
            Self::Gateway { step, .. } | Self::Malformed { step, .. } => Some(*step),
            Self::Timeout(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_gateway_classifies() {
        let malformed = GatewayError::Malformed("x".to_string());
        let err = SyncError::from_gateway(SyncStep::Refetch, &malformed);
        assert!(matches!(
            err,
            SyncError::Malformed {
                step: SyncStep::Refetch,
                ..
            }
        ));

        let err = SyncError::from_gateway(SyncStep::FetchRemote, &GatewayError::RateLimited(5));
        assert!(matches!(err, SyncError::Gateway { step: SyncStep::FetchRemote, .. }));
        assert_eq!(err.step(), Some(SyncStep::FetchRemote));
    }

    #[test]
    fn test_display() {
        let err = SyncError::from_gateway(
            SyncStep::PushLocal,
            &GatewayError::Rejected("Insufficient stock".to_string()),
        );
        assert_eq!(
            err.to_string(),
            "remote cart unavailable during push: Rejected by remote: Insufficient stock"
        );
        assert_eq!(
            SyncError::Timeout(Duration::from_secs(10)).to_string(),
            "sync timed out after 10s"
        );
    }
}
