//! Bounded-wait polling loop.
//!
//! The loop polls an event source until the handler asks it to stop or the
//! source stays silent for a whole idle budget:
//! 1. Drain every buffered event, handing each to the handler in order.
//!    Any event refills the idle budget.
//! 2. If nothing was buffered, sleep one poll interval and spend one unit
//!    of the budget.
//! 3. An exhausted budget is a timeout, not an error.
//!
//! Both the glitch-attempt monitor and the payload reader run on this; they
//! differ only in the source and the stop predicate.

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;

/// Idle budget and poll granularity for one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitPolicy {
    /// Consecutive empty polls tolerated before timing out.
    pub idle_polls: u32,
    /// Sleep between empty polls.
    pub poll_interval: Duration,
}

impl WaitPolicy {
    pub const fn new(idle_polls: u32, poll_interval: Duration) -> Self {
        Self {
            idle_polls,
            poll_interval,
        }
    }

    /// Wall-clock silence tolerated before timing out.
    pub fn idle_budget(&self) -> Duration {
        self.poll_interval * self.idle_polls
    }
}

/// Handler verdict for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control<R> {
    Continue,
    StopSuccess(R),
    StopFailure(R),
}

/// How a wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome<R> {
    /// Handler stopped with success; carries its last classification.
    Succeeded(R),
    /// Handler stopped with failure; carries its last classification.
    Failed(R),
    /// The idle budget ran out.
    TimedOut,
    /// The cancel token fired.
    Cancelled,
}

impl<R> LoopOutcome<R> {
    pub fn is_timed_out(&self) -> bool {
        matches!(self, LoopOutcome::TimedOut)
    }

    pub fn reason(&self) -> Option<&R> {
        match self {
            LoopOutcome::Succeeded(r) | LoopOutcome::Failed(r) => Some(r),
            LoopOutcome::TimedOut | LoopOutcome::Cancelled => None,
        }
    }
}

/// Run the wait.
///
/// `poll` returns the next buffered event or `None` when nothing is pending
/// right now; it must not block. Source errors abort the wait immediately.
pub fn run_until<E, R, Err>(
    mut poll: impl FnMut() -> Result<Option<E>, Err>,
    mut on_event: impl FnMut(E) -> Control<R>,
    policy: &WaitPolicy,
    cancel: &CancelToken,
) -> Result<LoopOutcome<R>, Err> {
    let mut remaining = policy.idle_polls;

    while remaining > 0 {
        if cancel.is_cancelled() {
            return Ok(LoopOutcome::Cancelled);
        }

        let mut active = false;
        while let Some(event) = poll()? {
            active = true;
            remaining = policy.idle_polls;
            match on_event(event) {
                Control::Continue => {}
                Control::StopSuccess(reason) => return Ok(LoopOutcome::Succeeded(reason)),
                Control::StopFailure(reason) => return Ok(LoopOutcome::Failed(reason)),
            }
        }

        if !active {
            if !policy.poll_interval.is_zero() {
                thread::sleep(policy.poll_interval);
            }
            remaining -= 1;
        }
    }

    Ok(LoopOutcome::TimedOut)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::convert::Infallible;

    use super::*;

    fn fast(idle_polls: u32) -> WaitPolicy {
        WaitPolicy::new(idle_polls, Duration::ZERO)
    }

    #[test]
    fn test_silent_source_times_out_after_budget() {
        let polls = Cell::new(0u32);
        let outcome = run_until(
            || -> Result<Option<()>, Infallible> {
                polls.set(polls.get() + 1);
                Ok(None)
            },
            |_| Control::<()>::Continue,
            &fast(10),
            &CancelToken::new(),
        )
        .unwrap();

        assert!(outcome.is_timed_out());
        assert_eq!(polls.get(), 10);
    }

    #[test]
    fn test_zero_budget_times_out_without_polling() {
        let outcome = run_until(
            || -> Result<Option<()>, Infallible> { panic!("polled") },
            |_| Control::<()>::Continue,
            &fast(0),
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(outcome, LoopOutcome::TimedOut);
    }

    #[test]
    fn test_activity_refills_budget() {
        // An event arrives every third poll; budget 3 must never expire
        // while events keep coming.
        let mut schedule: VecDeque<Option<u32>> = VecDeque::new();
        for i in 0..5 {
            schedule.push_back(None);
            schedule.push_back(None);
            schedule.push_back(Some(i));
            schedule.push_back(None); // end of batch
        }
        let seen = Cell::new(0u32);

        let outcome = run_until(
            || -> Result<Option<u32>, Infallible> { Ok(schedule.pop_front().flatten()) },
            |_| {
                seen.set(seen.get() + 1);
                Control::<()>::Continue
            },
            &fast(3),
            &CancelToken::new(),
        )
        .unwrap();

        assert!(outcome.is_timed_out());
        assert_eq!(seen.get(), 5);
    }

    #[test]
    fn test_stop_carries_reason() {
        let mut events = vec![3, 2, 1].into_iter();
        let outcome = run_until(
            || -> Result<Option<i32>, Infallible> { Ok(events.next()) },
            |e| {
                if e == 2 {
                    Control::StopFailure(e * 10)
                } else {
                    Control::Continue
                }
            },
            &fast(5),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(outcome, LoopOutcome::Failed(20));
        assert_eq!(outcome.reason(), Some(&20));
        // The event after the stop stays unconsumed.
        assert_eq!(events.next(), Some(1));
    }

    #[test]
    fn test_source_error_propagates() {
        let result = run_until(
            || -> Result<Option<()>, &'static str> { Err("bus gone") },
            |_| Control::<()>::Continue,
            &fast(5),
            &CancelToken::new(),
        );
        assert_eq!(result.unwrap_err(), "bus gone");
    }

    #[test]
    fn test_cancelled_token_stops_loop() {
        let token = CancelToken::new();
        token.cancel();
        let outcome = run_until(
            || -> Result<Option<()>, Infallible> { Ok(Some(())) },
            |_| Control::<()>::Continue,
            &fast(5),
            &token,
        )
        .unwrap();
        assert_eq!(outcome, LoopOutcome::Cancelled);
    }

    #[test]
    fn test_idle_budget_duration() {
        let policy = WaitPolicy::new(10, Duration::from_millis(100));
        assert_eq!(policy.idle_budget(), Duration::from_secs(1));
    }
}
