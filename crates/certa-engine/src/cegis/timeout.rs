//! Overall-deadline bookkeeping shared by the loop and the verifier.

use std::time::{Duration, Instant};

pub(crate) fn deadline_exceeded(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

/// `0` means no overall limit.
pub(crate) fn overall_timeout_duration(timeout_secs: u64) -> Option<Duration> {
    (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs))
}

pub(crate) fn deadline_from_timeout_secs(timeout_secs: u64) -> Option<Instant> {
    overall_timeout_duration(timeout_secs).and_then(|t| Instant::now().checked_add(t))
}

/// Time left before `deadline`, or `None` without one.
pub(crate) fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|d| d.saturating_duration_since(Instant::now()))
}

/// Budget for one query: the per-query limit capped by what is left of the
/// overall deadline. `Some(Duration::ZERO)` means the deadline has passed.
pub(crate) fn query_budget(per_query_secs: u64, deadline: Option<Instant>) -> Option<Duration> {
    let per_query = overall_timeout_duration(per_query_secs);
    match (per_query, remaining(deadline)) {
        (Some(q), Some(r)) => Some(q.min(r)),
        (q, r) => q.or(r),
    }
}

pub(crate) fn timeout_unknown_reason(context: &str) -> String {
    format!("{context} timed out before completion.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_exceeded_none_returns_false() {
        assert!(!deadline_exceeded(None));
    }

    #[test]
    fn deadline_exceeded_past_returns_true() {
        let past = Instant::now() - Duration::from_secs(1);
        assert!(deadline_exceeded(Some(past)));
        let future = Instant::now() + Duration::from_secs(60);
        assert!(!deadline_exceeded(Some(future)));
    }

    #[test]
    fn zero_timeout_means_no_deadline() {
        assert!(overall_timeout_duration(0).is_none());
        assert!(deadline_from_timeout_secs(0).is_none());
        assert_eq!(overall_timeout_duration(30), Some(Duration::from_secs(30)));
    }

    #[test]
    fn query_budget_takes_the_tighter_limit() {
        assert_eq!(query_budget(0, None), None);
        assert_eq!(query_budget(5, None), Some(Duration::from_secs(5)));

        let soon = Instant::now() + Duration::from_secs(2);
        let budget = query_budget(30, Some(soon)).expect("bounded");
        assert!(budget <= Duration::from_secs(2));

        let later = Instant::now() + Duration::from_secs(600);
        assert_eq!(query_budget(5, Some(later)), Some(Duration::from_secs(5)));
    }

    #[test]
    fn query_budget_is_zero_after_the_deadline() {
        let past = Instant::now() - Duration::from_secs(5);
        assert_eq!(query_budget(30, Some(past)), Some(Duration::ZERO));
        assert_eq!(query_budget(0, Some(past)), Some(Duration::ZERO));
    }

    #[test]
    fn timeout_unknown_reason_formats_context() {
        assert_eq!(
            timeout_unknown_reason("decrease check"),
            "decrease check timed out before completion."
        );
    }
}
