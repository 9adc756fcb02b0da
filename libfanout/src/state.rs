//! Post status state machine
//!
//! Validates status transitions and derives a post's aggregate status from
//! its per-platform attempt history. The aggregate is a pure function of
//! (targeted platforms, attempts), so any worker can recompute it after
//! recording an attempt and always land on the same answer.

use crate::error::{FanoutError, Result};
use crate::types::{Platform, PostStatus, PublishAttempt};

/// How a single platform stands after its attempts so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformResolution {
    /// No attempts yet, or the latest attempt has a retry pending.
    Unresolved,
    /// The latest attempt succeeded.
    Succeeded,
    /// The latest attempt failed with no retry scheduled.
    Exhausted,
}

/// Checks a status change against the transition table.
///
/// # Errors
///
/// Returns `InvalidTransition` for any pair not in the table. Callers must
/// treat that as a logic fault, not a retryable condition.
pub fn validate_transition(from: PostStatus, to: PostStatus) -> Result<()> {
    use PostStatus::*;

    let allowed = matches!(
        (from, to),
        (Draft, PendingApproval)
            | (PendingApproval, Approved)
            | (PendingApproval, Draft)
            | (Approved, Scheduled)
            | (Scheduled, Published)
            | (Scheduled, Failed)
            | (Scheduled, Scheduled)
            | (Failed, Scheduled)
    );

    if allowed {
        Ok(())
    } else {
        Err(FanoutError::InvalidTransition { from, to })
    }
}

/// Resolution of one platform, judged by its highest-numbered attempt.
///
/// Attempt numbers are unique per (post, platform), so this is independent
/// of the order rows were read in.
///
/// `epoch` is the post's current schedule time. Attempts only start after
/// the schedule time arrives, so during normal operation every attempt is
/// at or after the epoch. A manual re-submission assigns a fresh, future
/// schedule time, which makes all earlier terminal failures superseded:
/// the platform counts as unresolved again and gets new delivery attempts.
/// Successes are never superseded.
pub fn platform_resolution(
    platform: Platform,
    attempts: &[PublishAttempt],
    epoch: i64,
) -> PlatformResolution {
    let latest = attempts
        .iter()
        .filter(|a| a.platform == platform)
        .max_by_key(|a| a.attempt_number);

    match latest {
        None => PlatformResolution::Unresolved,
        Some(a) if a.is_success() => PlatformResolution::Succeeded,
        Some(a) if a.is_terminal_failure() && a.started_at >= epoch => {
            PlatformResolution::Exhausted
        }
        Some(_) => PlatformResolution::Unresolved,
    }
}

/// Derives the aggregate status of an in-flight post.
///
/// Every platform succeeded -> `Published`. Every platform resolved with at
/// least one exhausted -> `Failed` (the attempt history shows which ones
/// made it). Anything still unresolved -> `Scheduled`.
pub fn derive_aggregate(
    platforms: &[Platform],
    attempts: &[PublishAttempt],
    epoch: i64,
) -> PostStatus {
    let mut all_succeeded = true;
    let mut all_resolved = true;

    for platform in platforms {
        match platform_resolution(*platform, attempts, epoch) {
            PlatformResolution::Succeeded => {}
            PlatformResolution::Exhausted => all_succeeded = false,
            PlatformResolution::Unresolved => {
                all_succeeded = false;
                all_resolved = false;
            }
        }
    }

    if platforms.is_empty() {
        // Should not happen: the platform set is non-empty by invariant.
        return PostStatus::Failed;
    }

    if all_succeeded {
        PostStatus::Published
    } else if all_resolved {
        PostStatus::Failed
    } else {
        PostStatus::Scheduled
    }
}
