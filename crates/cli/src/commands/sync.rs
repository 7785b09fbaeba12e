//! Sync and status commands.

use serde_json::{Value, json};

use d4k_cart::sync::SkipReason;
use d4k_cart::{CartService, SyncOutcome};

use super::CliError;

/// Reconcile with the remote cart and print what happened.
///
/// A failed sync is reported, not returned: the local cart is intact and the
/// command itself succeeded.
///
/// # Errors
///
/// Returns an error if JSON output cannot be rendered.
#[allow(clippy::print_stdout)]
pub async fn sync(service: &CartService, json: bool) -> Result<(), CliError> {
    let outcome = service.sync_cart().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome_json(&outcome))?);
    } else {
        print_outcome(&outcome);
    }
    Ok(())
}

/// Print the engine status and local edits the remote has not confirmed.
///
/// # Errors
///
/// Returns an error if JSON output cannot be rendered.
#[allow(clippy::print_stdout)]
pub fn status(service: &CartService, json: bool) -> Result<(), CliError> {
    let divergence = service.divergence();

    if json {
        let value = json!({
            "status": service.sync_status().to_string(),
            "pending": service.is_pending(),
            "lastSyncedAt": service.engine().last_synced_at(),
            "divergence": divergence
                .iter()
                .map(|d| json!({ "key": d.key, "local": d.local, "confirmed": d.confirmed }))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Sync: {}", service.sync_status());
    println!(
        "Local edits: {}",
        if service.is_pending() { "unconfirmed" } else { "none" }
    );
    for d in &divergence {
        println!("  {}: local {} / remote {}", d.key, d.local, d.confirmed);
    }
    Ok(())
}

#[allow(clippy::print_stdout)]
pub fn print_outcome(outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Skipped(SkipReason::NotAuthenticated) => {
            println!("Guest session, cart kept locally");
        }
        SyncOutcome::Skipped(SkipReason::AlreadyRunning) => {
            println!("Sync already in progress");
        }
        SyncOutcome::Failed(e) => println!("Sync failed, local cart kept: {e}"),
        SyncOutcome::Completed(report) => {
            println!(
                "Synced: {} pushed, {} trimmed to stock, {} refused",
                report.pushed.len(),
                report.clamped.len(),
                report.rejected.len()
            );
            for c in &report.clamped {
                println!("  {}: {} requested, {} available", c.key, c.requested, c.accepted);
            }
            for r in &report.rejected {
                println!("  {}: {} refused by remote ({})", r.key, r.requested, r.reason);
            }
            for o in &report.overwritten {
                println!("  {}: remote quantity {} replaced local {}", o.key, o.remote, o.local);
            }
            for key in &report.dropped {
                println!("  {key}: not in remote cart, removed");
            }
        }
    }
}

/// JSON rendering of a sync outcome.
#[must_use]
pub fn outcome_json(outcome: &SyncOutcome) -> Value {
    match outcome {
        SyncOutcome::Skipped(reason) => json!({
            "result": "skipped",
            "reason": match reason {
                SkipReason::NotAuthenticated => "notAuthenticated",
                SkipReason::AlreadyRunning => "alreadyRunning",
            },
        }),
        SyncOutcome::Failed(e) => json!({
            "result": "failed",
            "error": e.to_string(),
            "step": e.step().map(|s| s.to_string()),
        }),
        SyncOutcome::Completed(report) => json!({
            "result": "completed",
            "attemptId": report.attempt_id,
            "pushed": report.pushed,
            "clamped": report
                .clamped
                .iter()
                .map(|c| json!({ "key": c.key, "requested": c.requested, "accepted": c.accepted }))
                .collect::<Vec<_>>(),
            "rejected": report
                .rejected
                .iter()
                .map(|r| json!({ "key": r.key, "requested": r.requested, "reason": r.reason }))
                .collect::<Vec<_>>(),
            "overwritten": report
                .overwritten
                .iter()
                .map(|o| json!({ "key": o.key, "local": o.local, "remote": o.remote }))
                .collect::<Vec<_>>(),
            "dropped": report.dropped,
            "completedAt": report.completed_at,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use d4k_cart::sync::RejectedPush;
    use d4k_cart::{SyncError, SyncReport};
    use d4k_cart_core::{LineKey, ProductId};
    use uuid::Uuid;

    use super::*;

    #[test]
    fn test_outcome_json_shapes() {
        let skipped = outcome_json(&SyncOutcome::Skipped(SkipReason::NotAuthenticated));
        assert_eq!(skipped["result"], "skipped");
        assert_eq!(skipped["reason"], "notAuthenticated");

        let timeout = SyncError::Timeout(Duration::from_secs(10));
        let failed = outcome_json(&SyncOutcome::Failed(timeout));
        assert_eq!(failed["result"], "failed");
        assert_eq!(failed["error"], "sync timed out after 10s");
        assert!(failed["step"].is_null());
    }

    #[test]
    fn test_outcome_json_lists_refused_lines() {
        let key = LineKey::new(ProductId::new(7), Some("S"));
        let report = SyncReport {
            attempt_id: Uuid::new_v4(),
            pushed: vec![],
            clamped: vec![],
            rejected: vec![RejectedPush {
                key: key.clone(),
                requested: 5,
                reason: "Insufficient stock. Only 2 items available".to_string(),
            }],
            overwritten: vec![],
            dropped: vec![key],
            completed_at: Utc::now(),
        };
        let value = outcome_json(&SyncOutcome::Completed(report));
        assert_eq!(value["result"], "completed");
        assert_eq!(value["rejected"][0]["requested"], 5);
        assert_eq!(value["rejected"][0]["key"]["size"], "S");
        assert_eq!(value["dropped"][0]["productId"], 7);
    }
}
