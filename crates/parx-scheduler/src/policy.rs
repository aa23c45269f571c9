//! Auto-stop failure policy over the stream of completed outcomes.

use parx_core::{ResolvedConfig, TaskStatus};

/// Verdict after each completed outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyDecision {
    Continue,
    /// Stop dispatching and cancel what is still running.
    Stop,
}

/// Stateful predicate deciding whether to stop early.
///
/// Once STOP has been returned it is returned for every later outcome, so
/// the decision is monotone over outcome-stream prefixes.
#[derive(Debug)]
pub struct FailurePolicy {
    enabled: bool,
    max_consecutive_failures: u32,
    max_failure_rate: f64,
    min_tasks_for_rate_check: u32,

    consecutive_failures: u32,
    failures: u32,
    total_completed: u32,
    stopped: bool,
}

impl FailurePolicy {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            enabled: config.stop_limits_enabled,
            max_consecutive_failures: config.max_consecutive_failures,
            max_failure_rate: config.max_failure_rate,
            min_tasks_for_rate_check: config.min_tasks_for_rate_check,
            consecutive_failures: 0,
            failures: 0,
            total_completed: 0,
            stopped: false,
        }
    }

    /// Record one completed outcome and decide whether to keep going.
    ///
    /// FAILED, TIMEOUT, and LAUNCH_ERROR count as failures. SUCCESS is the
    /// only outcome that resets the consecutive counter. CANCELLED is
    /// neutral: it neither counts toward any limit nor resets anything.
    pub fn record(&mut self, status: TaskStatus) -> PolicyDecision {
        if !self.enabled {
            return PolicyDecision::Continue;
        }
        if self.stopped {
            return PolicyDecision::Stop;
        }

        match status {
            s if s.is_failure() => {
                self.consecutive_failures += 1;
                self.failures += 1;
                self.total_completed += 1;
            }
            TaskStatus::Success => {
                self.consecutive_failures = 0;
                self.total_completed += 1;
            }
            TaskStatus::Cancelled => {}
            // is_failure covers the rest; this arm is unreachable.
            _ => {}
        }

        if self.consecutive_failures >= self.max_consecutive_failures {
            self.stopped = true;
        } else if self.total_completed >= self.min_tasks_for_rate_check
            && f64::from(self.failures) / f64::from(self.total_completed) > self.max_failure_rate
        {
            self.stopped = true;
        }

        if self.stopped {
            PolicyDecision::Stop
        } else {
            PolicyDecision::Continue
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_consecutive: u32, max_rate: f64, min_tasks: u32) -> FailurePolicy {
        FailurePolicy::from_config(&ResolvedConfig {
            stop_limits_enabled: true,
            max_consecutive_failures: max_consecutive,
            max_failure_rate: max_rate,
            min_tasks_for_rate_check: min_tasks,
            ..Default::default()
        })
    }

    #[test]
    fn test_disabled_policy_never_stops() {
        let mut policy = FailurePolicy::from_config(&ResolvedConfig {
            stop_limits_enabled: false,
            max_consecutive_failures: 1,
            ..Default::default()
        });
        for _ in 0..20 {
            assert_eq!(policy.record(TaskStatus::Failed), PolicyDecision::Continue);
        }
    }

    #[test]
    fn test_consecutive_failures_trip() {
        let mut policy = policy(3, 1.0, 1000);
        assert_eq!(policy.record(TaskStatus::Failed), PolicyDecision::Continue);
        assert_eq!(policy.record(TaskStatus::Timeout), PolicyDecision::Continue);
        assert_eq!(policy.record(TaskStatus::Failed), PolicyDecision::Stop);
    }

    #[test]
    fn test_success_resets_consecutive() {
        let mut policy = policy(3, 1.0, 1000);
        policy.record(TaskStatus::Failed);
        policy.record(TaskStatus::Failed);
        assert_eq!(policy.record(TaskStatus::Success), PolicyDecision::Continue);
        policy.record(TaskStatus::Failed);
        assert_eq!(policy.record(TaskStatus::Failed), PolicyDecision::Continue);
        assert_eq!(policy.record(TaskStatus::Failed), PolicyDecision::Stop);
    }

    #[test]
    fn test_cancelled_neither_counts_nor_resets() {
        let mut policy = policy(3, 1.0, 1000);
        policy.record(TaskStatus::Failed);
        policy.record(TaskStatus::Failed);
        assert_eq!(policy.record(TaskStatus::Cancelled), PolicyDecision::Continue);
        assert_eq!(policy.record(TaskStatus::Failed), PolicyDecision::Stop);
    }

    #[test]
    fn test_launch_error_counts_as_failure() {
        let mut policy = policy(2, 1.0, 1000);
        policy.record(TaskStatus::LaunchError);
        assert_eq!(policy.record(TaskStatus::LaunchError), PolicyDecision::Stop);
    }

    #[test]
    fn test_rate_check_waits_for_min_tasks() {
        // 1 failure in 2 is 50% > 40%, but the check only arms at 5 tasks.
        let mut policy = policy(100, 0.4, 5);
        policy.record(TaskStatus::Failed);
        assert_eq!(policy.record(TaskStatus::Success), PolicyDecision::Continue);
        policy.record(TaskStatus::Success);
        policy.record(TaskStatus::Failed);
        // Fifth completion: 2/5 = 40%, not above the limit.
        assert_eq!(policy.record(TaskStatus::Success), PolicyDecision::Continue);
        // Sixth completion: 3/6 = 50% > 40%.
        assert_eq!(policy.record(TaskStatus::Failed), PolicyDecision::Stop);
    }

    #[test]
    fn test_rate_uses_strict_inequality() {
        // Exactly at the limit keeps going.
        let mut policy = policy(100, 0.5, 2);
        policy.record(TaskStatus::Failed);
        assert_eq!(policy.record(TaskStatus::Success), PolicyDecision::Continue);
    }

    #[test]
    fn test_stop_is_sticky() {
        let mut policy = policy(1, 1.0, 1000);
        assert_eq!(policy.record(TaskStatus::Failed), PolicyDecision::Stop);
        assert_eq!(policy.record(TaskStatus::Success), PolicyDecision::Stop);
        assert_eq!(policy.record(TaskStatus::Cancelled), PolicyDecision::Stop);
    }

    #[test]
    fn test_failure_counter_exposed() {
        let mut policy = policy(100, 1.0, 1000);
        policy.record(TaskStatus::Failed);
        policy.record(TaskStatus::Success);
        policy.record(TaskStatus::Timeout);
        assert_eq!(policy.failures(), 2);
    }
}
