//! The timer list: unordered, linearly scanned once per tick.
//!
//! spec.md §4.2 is explicit that timers are "an unordered list, scanned
//! linearly each tick" rather than a wheel — `kasync` has a real
//! `time::wheel` for its OS-kernel use case, but importing that structure
//! here would contradict the spec's deliberately simple choice, so this
//! stays a `Vec` scan, grounded on `kasync::time::timeout` only for the
//! shape of "a future that completes after a deadline".

use crate::task::TaskId;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::task::Waker;
use std::time::{Duration, Instant};

pub(crate) struct TimerEntry {
    pub(crate) owner: TaskId,
    pub(crate) deadline: Instant,
    pub(crate) fired: Cell<bool>,
    pub(crate) waker: RefCell<Option<Waker>>,
}

#[derive(Default)]
pub(crate) struct Timers {
    entries: RefCell<Vec<std::rc::Rc<TimerEntry>>>,
}

impl Timers {
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub(crate) fn register(&self, owner: TaskId, deadline: Instant) -> std::rc::Rc<TimerEntry> {
        let entry = std::rc::Rc::new(TimerEntry {
            owner,
            deadline,
            fired: Cell::new(false),
            waker: RefCell::new(None),
        });
        self.entries.borrow_mut().push(entry.clone());
        entry
    }

    /// Drop every timer owned by `owner` without waking it (used by task
    /// cancellation, which delivers a throw-in directly instead).
    pub(crate) fn cancel_owned(&self, owner: TaskId) {
        self.entries.borrow_mut().retain(|e| e.owner != owner);
    }

    /// The earliest deadline still pending, used to bound the reactor's
    /// `poll` timeout so a due timer is never missed while blocked on I/O.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.entries
            .borrow()
            .iter()
            .filter(|e| !e.fired.get())
            .map(|e| e.deadline)
            .min()
    }

    /// Phase A of a scheduler tick: fire every timer whose deadline has
    /// passed, waking its future and dropping it from the list.
    pub(crate) fn fire_due(&self, now: Instant) -> bool {
        let due: Vec<_> = self
            .entries
            .borrow()
            .iter()
            .filter(|e| !e.fired.get() && e.deadline <= now)
            .cloned()
            .collect();

        if due.is_empty() {
            return false;
        }

        for entry in &due {
            entry.fired.set(true);
            if let Some(waker) = entry.waker.borrow_mut().take() {
                waker.wake();
            }
        }
        self.entries.borrow_mut().retain(|e| !e.fired.get());
        true
    }
}

pub(crate) fn deadline_timeout(next: Option<Instant>, now: Instant) -> Option<Duration> {
    next.map(|d| d.saturating_duration_since(now))
}

/// Suspends the calling execution until `seconds` have elapsed.
///
/// Negative values are clamped to zero (spec.md §4.2), making `delay(0)` the
/// canonical "yield to the next tick".
///
/// # Errors
/// Returns [`crate::Error::CallerBug`] if called outside any running task.
pub fn delay(seconds: f64) -> Delay {
    let Some(rt) = crate::runtime::try_current() else {
        return Delay(DelayState::Rejected(Some(crate::Error::caller_bug(
            "delay() called outside any execution",
        ))));
    };
    match rt.current_task.get() {
        None => Delay(DelayState::Rejected(Some(crate::Error::caller_bug(
            "delay() called outside any execution",
        )))),
        Some(owner) => {
            let seconds = seconds.max(0.0);
            let deadline = Instant::now() + Duration::from_secs_f64(seconds);
            let entry = rt.timers.register(owner, deadline);
            Delay(DelayState::Waiting(entry))
        }
    }
}

/// Alias for [`delay`] (spec.md §6's helper facade lists `sleep` as a
/// delegate to `delay`).
pub fn sleep(seconds: f64) -> Delay {
    delay(seconds)
}

enum DelayState {
    Rejected(Option<crate::Error>),
    Waiting(std::rc::Rc<TimerEntry>),
}

pub struct Delay(DelayState);

impl Future for Delay {
    type Output = Result<(), crate::Error>;

    fn poll(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        match &mut self.0 {
            DelayState::Rejected(err) => std::task::Poll::Ready(Err(err
                .take()
                .expect("Delay polled again after returning Ready"))),
            DelayState::Waiting(entry) => {
                if entry.fired.get() {
                    std::task::Poll::Ready(Ok(()))
                } else {
                    *entry.waker.borrow_mut() = Some(cx.waker().clone());
                    std::task::Poll::Pending
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::pin;
    use std::task::{Context, Poll, Waker};

    #[test]
    fn delay_outside_any_runtime_is_a_caller_bug_not_a_panic() {
        let mut fut = pin!(delay(1.0));
        let waker = Waker::noop();
        let mut cx = Context::from_waker(waker);
        let poll = fut.as_mut().poll(&mut cx);
        assert!(matches!(
            poll,
            Poll::Ready(Err(crate::Error::CallerBug(_)))
        ));
    }
}

