//! The task object: a handle for one cooperative unit of work.
//!
//! Grounded on `kasync::task` (JonasKruckenberg/k23): there a `Task<F, S>` is
//! a type-erased, reference-counted, `Header`+`Stage`-carrying object polled
//! by the scheduler through a `VTable`, with a `JoinHandle` used to retrieve
//! its output and a `Waker` used to wake whoever awaits it. Here the same
//! shape is kept but drastically simplified for a single-threaded runtime:
//! no atomics, no `Header`/`VTable` split (plain trait objects suffice
//! without cross-thread type erasure concerns), and the "waker wakes the
//! scheduler's run queue" idiom becomes "the waker re-polls this task
//! immediately", matching spec.md's synchronous resume-on-event semantics.

mod waker;

use crate::error::Error;
use crate::runtime::RuntimeInner;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// Identity for a [`Task`], stable for its whole lifetime.
///
/// Stands in for comparing "execution" pointers directly: Rust's `Future`
/// state machines don't have a stable address before being pinned and boxed,
/// so a small counter-assigned id is used instead wherever spec.md compares
/// or looks up an "execution".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Object-safe half of a task, used by the scheduler, reactor and timer
/// wheel without needing to know the task's result type `T`.
///
/// This is the Rust analogue of spec.md's `execution_to_task` back-reference:
/// the scheduler only ever needs to resume, cancel or parent-link a task, all
/// of which are representable without `T`.
pub(crate) trait Schedulable {
    fn id(&self) -> TaskId;
    fn is_done(&self) -> bool;
    fn add_child(&self, child: Rc<dyn Schedulable>);
    fn children(&self) -> Vec<Rc<dyn Schedulable>>;
    /// Stores a failure to be delivered on the next resumption instead of
    /// polling the underlying future (the "error-throw-on-resume" pattern
    /// from spec.md's Design Notes).
    fn throw(&self, err: Error);
    /// Poll (or, if a throw is pending, complete) this task. Idempotent once
    /// done.
    fn poll_task(self: Rc<Self>);
}

enum State<T> {
    Running(Pin<Box<dyn Future<Output = Result<T, Error>>>>),
    Done(Result<T, Error>),
}

pub(crate) struct TaskInner<T> {
    id: TaskId,
    runtime: Rc<RuntimeInner>,
    state: RefCell<State<T>>,
    children: RefCell<Vec<Rc<dyn Schedulable>>>,
    awaiters: RefCell<Vec<std::task::Waker>>,
    pending_throw: Cell<Option<Error>>,
}

impl<T: Clone + 'static> Schedulable for TaskInner<T> {
    fn id(&self) -> TaskId {
        self.id
    }

    fn is_done(&self) -> bool {
        matches!(&*self.state.borrow(), State::Done(_))
    }

    fn add_child(&self, child: Rc<dyn Schedulable>) {
        self.children.borrow_mut().push(child);
    }

    fn children(&self) -> Vec<Rc<dyn Schedulable>> {
        self.children.borrow().clone()
    }

    fn throw(&self, err: Error) {
        self.pending_throw.set(Some(err));
    }

    fn poll_task(self: Rc<Self>) {
        if self.is_done() {
            return;
        }

        if let Some(err) = self.pending_throw.take() {
            tracing::debug!(task = %self.id, "delivering throw-in");
            self.complete(Err(err));
            return;
        }

        let waker = waker::make(self.clone());
        let mut cx = Context::from_waker(&waker);

        let prev = self.runtime.current_task.replace(Some(self.id));
        let poll_result = {
            let mut state = self.state.borrow_mut();
            match &mut *state {
                State::Running(fut) => fut.as_mut().poll(&mut cx),
                State::Done(_) => unreachable!("guarded by is_done above"),
            }
        };
        self.runtime.current_task.set(prev);

        if let Poll::Ready(result) = poll_result {
            self.complete(result);
        }
    }
}

impl<T: Clone + 'static> TaskInner<T> {
    fn complete(self: &Rc<Self>, result: Result<T, Error>) {
        tracing::trace!(task = %self.id, ok = result.is_ok(), "task completed");
        *self.state.borrow_mut() = State::Done(result);
        for waker in self.awaiters.borrow_mut().drain(..) {
            waker.wake();
        }
    }
}

/// A handle for one cooperative unit of work.
///
/// Implements [`Future`] so that `task.await` inside another execution is
/// exactly spec.md's "await from inside another execution" contract: the
/// first poll either returns the already-resolved result, or registers this
/// context's waker as an awaiter and suspends.
pub struct Task<T: Clone + 'static> {
    pub(crate) inner: Rc<TaskInner<T>>,
}

static_assertions::assert_not_impl_any!(Task<()>: Send, Sync);

impl<T: Clone + 'static> Clone for Task<T> {
    fn clone(&self) -> Self {
        Task {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + 'static> Task<T> {
    pub(crate) fn spawn_on<F>(runtime: Rc<RuntimeInner>, fut: F) -> Task<T>
    where
        F: Future<Output = Result<T, Error>> + 'static,
    {
        let id = runtime.next_task_id();
        let inner = Rc::new(TaskInner {
            id,
            runtime: runtime.clone(),
            state: RefCell::new(State::Running(Box::pin(fut))),
            children: RefCell::new(Vec::new()),
            awaiters: RefCell::new(Vec::new()),
            pending_throw: Cell::new(None),
        });

        let erased: Rc<dyn Schedulable> = inner.clone();

        if let Some(parent_id) = runtime.current_task.get() {
            if let Some(parent) = runtime.lookup(parent_id) {
                parent.add_child(erased.clone());
            }
        }
        runtime.register(id, &erased);

        let task = Task { inner };
        tracing::trace!(task = %id, parent = ?runtime.current_task.get(), "queued");
        erased.poll_task();
        task
    }

    /// Identity of this task, for diagnostics and for [`crate::Runtime::cancel`].
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// `true` once the execution has terminated, normally or by throw-in.
    pub fn is_done(&self) -> bool {
        Schedulable::is_done(&*self.inner)
    }

    /// Reads the resolved outcome without going through `Future::poll`,
    /// i.e. without requiring a `Waker`. Used by the root `await` contract
    /// (spec.md §4.1: "From outside any execution... return the result or
    /// raise the stored error") and by `all`/`race`.
    pub(crate) fn try_result(&self) -> Option<Result<T, Error>> {
        match &*self.inner.state.borrow() {
            State::Done(result) => Some(result.clone()),
            State::Running(_) => None,
        }
    }

    pub(crate) fn erased(&self) -> Rc<dyn Schedulable> {
        self.inner.clone()
    }
}

impl<T: Clone + 'static> Future for Task<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = &self.inner;

        if inner.runtime.current_task.get() == Some(inner.id) {
            return Poll::Ready(Err(Error::caller_bug(
                "circular await: a task cannot await itself",
            )));
        }

        if let Some(result) = self.try_result() {
            return Poll::Ready(result);
        }

        inner.awaiters.borrow_mut().push(cx.waker().clone());
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;

    #[test]
    fn single_task_runs_to_completion() {
        let rt = Runtime::new();
        let _guard = rt.enter();
        let task: Task<i32> = rt.queue(async { Ok(40 + 2) });
        rt.block_on(&task).unwrap();
        assert_eq!(task.try_result().unwrap().unwrap(), 42);
    }

    #[test]
    fn parent_child_relationship_is_recorded() {
        let rt = Runtime::new();
        let _guard = rt.enter();
        let parent: Task<String> = rt.queue(async {
            let child: Task<String> = crate::combinators::spawn(async { Ok("c".to_string()) });
            let c = child.await?;
            Ok(format!("{c}-p"))
        });
        rt.block_on(&parent).unwrap();
        assert_eq!(parent.try_result().unwrap().unwrap(), "c-p");
    }
}
