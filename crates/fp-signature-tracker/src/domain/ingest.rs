//! # Per-height ingestion policy
//!
//! Pure decision logic of the ingestion state machine:
//!
//! ```text
//! PENDING -> FETCHING -> { SUCCESS_WITH_VOTES | SUCCESS_EMPTY | ERROR } -> RETRY | DONE
//! ```
//!
//! The engine performs the fetch and the cache merge, then asks
//! [`next_step`] what to do. Everything here is synchronous and clock-free.

use crate::domain::types::BlockHeight;
use std::fmt;
use std::time::Duration;

/// One unit of ingestion work. Also the in-flight dedupe key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IngestTask {
    pub height: BlockHeight,
    pub attempt: u32,
}

impl IngestTask {
    pub fn new(height: BlockHeight, attempt: u32) -> Self {
        Self { height, attempt }
    }

    pub fn first(height: BlockHeight) -> Self {
        Self::new(height, 0)
    }

    pub fn next_attempt(&self) -> Self {
        Self::new(self.height, self.attempt.saturating_add(1))
    }
}

impl fmt::Display for IngestTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.height, self.attempt)
    }
}

/// Exponential backoff with a retry budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// `min(initial * 2^attempt, max)`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn has_budget(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// What one fetch attempt produced, after the cache merge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Non-empty vote list; `added` signers were new at this height
    Votes { added: usize },
    /// The chain answered with no votes
    Empty,
    /// Network or decode failure
    TransientError,
    /// Height is beyond the chain tip
    FutureHeight,
}

/// Decision after a fetch attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NextStep {
    /// Fetch again after `delay`; nothing usable arrived yet
    Retry { task: IngestTask, delay: Duration },
    /// Data recorded; look again after `delay` for late votes
    Verify { task: IngestTask, delay: Duration },
    /// Data is final
    MarkProcessed,
    /// Budget exhausted with no votes ever seen: record an empty, processed set
    RecordEmpty,
    /// Budget exhausted on errors: the height stays unknown
    GiveUp,
    /// Future height: drop without using budget; a later tick picks it up
    Abandon,
}

impl NextStep {
    /// Whether the height needs no further scheduled work.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, NextStep::Retry { .. } | NextStep::Verify { .. })
    }
}

/// Decide the next step for `task` given what its fetch produced.
///
/// `has_cached_data` is whether the height had a record before this
/// attempt's merge.
pub fn next_step(
    policy: &RetryPolicy,
    task: IngestTask,
    outcome: FetchOutcome,
    has_cached_data: bool,
) -> NextStep {
    let retry = |task: IngestTask| NextStep::Retry {
        task: task.next_attempt(),
        delay: policy.backoff(task.attempt),
    };
    let verify = |task: IngestTask| NextStep::Verify {
        task: task.next_attempt(),
        delay: policy.backoff(task.attempt),
    };

    match outcome {
        FetchOutcome::FutureHeight => NextStep::Abandon,
        FetchOutcome::TransientError if policy.has_budget(task.attempt) => retry(task),
        FetchOutcome::TransientError => NextStep::GiveUp,
        FetchOutcome::Empty if !has_cached_data && policy.has_budget(task.attempt) => retry(task),
        FetchOutcome::Empty if !has_cached_data => NextStep::RecordEmpty,
        FetchOutcome::Empty => settle_with_data(policy, task, 0, verify),
        FetchOutcome::Votes { added } => settle_with_data(policy, task, added, verify),
    }
}

fn settle_with_data(
    policy: &RetryPolicy,
    task: IngestTask,
    added: usize,
    verify: impl Fn(IngestTask) -> NextStep,
) -> NextStep {
    if policy.has_budget(task.attempt) {
        return verify(task);
    }
    // One extra pass when the last budgeted pass still found new signers
    if task.attempt == policy.max_retries && added > 0 {
        return verify(task);
    }
    NextStep::MarkProcessed
}

/// Whether late votes for `height` are no longer expected.
///
/// A height is finalizable once `finalization_lag` blocks have been produced
/// on top of it.
pub fn is_finalizable(height: BlockHeight, current_height: BlockHeight, finalization_lag: u64) -> bool {
    height.saturating_add(finalization_lag) <= current_height
}

/// Highest finalizable height for a chain tip.
pub fn finalized_tip(current_height: BlockHeight, finalization_lag: u64) -> BlockHeight {
    current_height.saturating_sub(finalization_lag)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.backoff(0), Duration::from_millis(100));
        assert_eq!(p.backoff(1), Duration::from_millis(200));
        assert_eq!(p.backoff(2), Duration::from_millis(400));
        assert_eq!(p.backoff(3), Duration::from_millis(500));
        assert_eq!(p.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn test_future_height_abandons_without_budget() {
        let step = next_step(&policy(), IngestTask::first(10), FetchOutcome::FutureHeight, false);
        assert_eq!(step, NextStep::Abandon);
    }

    #[test]
    fn test_empty_without_data_retries_then_records_empty() {
        let p = policy();
        let step = next_step(&p, IngestTask::new(10, 1), FetchOutcome::Empty, false);
        assert_eq!(
            step,
            NextStep::Retry {
                task: IngestTask::new(10, 2),
                delay: Duration::from_millis(200)
            }
        );

        let step = next_step(&p, IngestTask::new(10, 3), FetchOutcome::Empty, false);
        assert_eq!(step, NextStep::RecordEmpty);
    }

    #[test]
    fn test_transient_error_gives_up_after_budget() {
        let p = policy();
        assert!(matches!(
            next_step(&p, IngestTask::new(10, 2), FetchOutcome::TransientError, true),
            NextStep::Retry { .. }
        ));
        assert_eq!(
            next_step(&p, IngestTask::new(10, 3), FetchOutcome::TransientError, false),
            NextStep::GiveUp
        );
    }

    #[test]
    fn test_votes_verify_while_budget_remains() {
        let p = policy();
        let step = next_step(&p, IngestTask::first(10), FetchOutcome::Votes { added: 2 }, false);
        assert!(matches!(step, NextStep::Verify { task, .. } if task.attempt == 1));
    }

    #[test]
    fn test_exhausted_pass_with_new_signers_gets_one_more() {
        let p = policy();
        let step = next_step(&p, IngestTask::new(10, 3), FetchOutcome::Votes { added: 1 }, true);
        assert!(matches!(step, NextStep::Verify { task, .. } if task.attempt == 4));

        let step = next_step(&p, IngestTask::new(10, 4), FetchOutcome::Votes { added: 1 }, true);
        assert_eq!(step, NextStep::MarkProcessed);

        let step = next_step(&p, IngestTask::new(10, 3), FetchOutcome::Votes { added: 0 }, true);
        assert_eq!(step, NextStep::MarkProcessed);
    }

    #[test]
    fn test_empty_with_cached_data_is_not_a_retry() {
        let p = policy();
        let step = next_step(&p, IngestTask::new(10, 3), FetchOutcome::Empty, true);
        assert_eq!(step, NextStep::MarkProcessed);
        assert!(step.is_terminal());
    }

    #[test]
    fn test_finalizable() {
        // Tip 105, lag 3: 102 is finalizable, 103 is not
        assert!(is_finalizable(102, 105, 3));
        assert!(!is_finalizable(103, 105, 3));
        assert!(!is_finalizable(105, 105, 3));
        assert_eq!(finalized_tip(105, 3), 102);
        assert_eq!(finalized_tip(2, 3), 0);
    }
}
