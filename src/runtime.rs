//! The scheduler: a single-threaded tick loop over timers and I/O
//! readiness, plus the task registry and the ambient "current runtime"
//! used by free functions like [`crate::combinators::spawn`].
//!
//! Grounded on `kasync::executor` (JonasKruckenberg/k23) for the overall
//! run/drive shape, but with its multi-worker, run-queue-and-steal design
//! stripped down to the single synchronous path spec.md §4.2 describes:
//! there is no run queue at all, since a waker re-polls its task
//! immediately instead of scheduling it for later. That also means `tick`'s
//! deadlock check only has to look at timers and I/O watchers, matching
//! spec.md's wording directly.

use crate::error::Error;
use crate::reactor::Reactor;
use crate::task::{Schedulable, Task, TaskId};
use crate::time::Timers;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::rc::{Rc, Weak};
use std::time::Instant;

pub(crate) struct RuntimeInner {
    pub(crate) current_task: Cell<Option<TaskId>>,
    registry: RefCell<HashMap<TaskId, Weak<dyn Schedulable>>>,
    next_id: Cell<u64>,
    pub(crate) reactor: Reactor,
    pub(crate) timers: Timers,
}

impl RuntimeInner {
    pub(crate) fn next_task_id(&self) -> TaskId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        TaskId(id)
    }

    pub(crate) fn register(&self, id: TaskId, task: &Rc<dyn Schedulable>) {
        self.registry.borrow_mut().insert(id, Rc::downgrade(task));
    }

    pub(crate) fn lookup(&self, id: TaskId) -> Option<Rc<dyn Schedulable>> {
        self.registry.borrow().get(&id)?.upgrade()
    }

    fn has_pending_work(&self) -> bool {
        !self.reactor.is_empty() || !self.timers.is_empty()
    }

    fn tick(&self) {
        let now = Instant::now();
        self.timers.fire_due(now);
        let timeout = crate::time::deadline_timeout(self.timers.next_deadline(), Instant::now());
        self.reactor.poll_once(timeout);
        self.timers.fire_due(Instant::now());
    }

    /// Runs ticks until `done` returns `true` (spec.md §4.2's `drive`).
    ///
    /// # Errors
    /// Returns [`Error::Deadlock`] if, on a tick boundary, there is no
    /// pending I/O and no pending timer left to make progress with.
    pub(crate) fn drive(&self, done: impl Fn() -> bool) -> Result<(), Error> {
        while !done() {
            if !self.has_pending_work() {
                return Err(Error::Deadlock);
            }
            self.tick();
        }
        Ok(())
    }

    /// Cancels `task` and every one of its descendants, children first
    /// (spec.md §4.2's `Cancel`).
    pub(crate) fn cancel(self: &Rc<Self>, target: Rc<dyn Schedulable>) {
        if target.is_done() {
            return;
        }
        for child in target.children() {
            self.cancel(child);
        }
        self.reactor.cancel_owned(target.id());
        self.timers.cancel_owned(target.id());
        target.throw(Error::Cancelled);
        target.poll_task();
    }
}

thread_local! {
    static CURRENT: RefCell<Vec<Rc<RuntimeInner>>> = const { RefCell::new(Vec::new()) };
}

/// Looks up the runtime this call is nested inside of via [`Runtime::enter`].
///
/// # Panics
/// Panics if called outside any entered runtime. Reserved for call sites
/// that are only ever reached from inside a running task (and therefore
/// inside an entered runtime) as a matter of the crate's own internal
/// invariants, never for anything a caller of the public API can trigger —
/// spec.md §4.2's suspending primitives (`delay`, `write`, `read_all`) must
/// use [`try_current`] instead, since a caller can reach those before ever
/// entering a runtime.
pub(crate) fn current() -> Rc<RuntimeInner> {
    try_current().expect("no runtime entered: call this from inside a running task")
}

/// Fallible counterpart to [`current`] for suspending primitives that must
/// surface "called outside any execution" as [`Error::CallerBug`] rather
/// than panic (spec.md §4.2's Requirements, §7's CallerBug taxonomy).
pub(crate) fn try_current() -> Option<Rc<RuntimeInner>> {
    CURRENT.with(|c| c.borrow().last().cloned())
}

/// RAII guard returned by [`Runtime::enter`]; pops the runtime back off the
/// thread-local stack on drop.
#[must_use]
pub struct RuntimeGuard {
    _private: (),
}

impl Drop for RuntimeGuard {
    fn drop(&mut self) {
        CURRENT.with(|c| {
            c.borrow_mut().pop();
        });
    }
}

/// The cooperative scheduler: a handle around a single-threaded, reference
/// counted runtime core.
///
/// There is deliberately no `Send`/`Sync` bound anywhere in this crate —
/// spec.md §1 scopes this to a single OS thread, and trying to make
/// [`RuntimeInner`]'s `Rc`/`RefCell`/`Cell` fields thread-safe would mean
/// reintroducing exactly the atomics `kasync` needs and this runtime
/// doesn't.
pub struct Runtime(Rc<RuntimeInner>);

static_assertions::assert_not_impl_any!(Runtime: Send, Sync);
static_assertions::assert_not_impl_any!(RuntimeInner: Send, Sync);

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Runtime(Rc::new(RuntimeInner {
            current_task: Cell::new(None),
            registry: RefCell::new(HashMap::new()),
            next_id: Cell::new(0),
            reactor: Reactor::default(),
            timers: Timers::default(),
        }))
    }

    /// Makes this runtime the ambient one for as long as the returned guard
    /// is alive. Required before [`Runtime::queue`] or any of the free
    /// functions in [`crate::combinators`]/[`crate::io`]/[`crate::time`] can
    /// be used.
    pub fn enter(&self) -> RuntimeGuard {
        CURRENT.with(|c| c.borrow_mut().push(self.0.clone()));
        RuntimeGuard { _private: () }
    }

    /// Starts a new top-level execution, running it synchronously up to its
    /// first suspension point before returning its handle (spec.md §3.1).
    pub fn queue<F, T>(&self, fut: F) -> Task<T>
    where
        F: Future<Output = Result<T, Error>> + 'static,
        T: Clone + 'static,
    {
        Task::spawn_on(self.0.clone(), fut)
    }

    /// Runs ticks until `done` returns `true`.
    ///
    /// # Errors
    /// Returns [`Error::Deadlock`] if, on a tick boundary, there is no
    /// pending I/O and no pending timer left to make progress with.
    pub fn drive(&self, done: impl Fn() -> bool) -> Result<(), Error> {
        self.0.drive(done)
    }

    /// Drives the runtime until `task` completes, then returns its result.
    ///
    /// This is spec.md §4.1's "await from outside any execution" entry
    /// point: unlike `Task::poll`, it does not register a waker, it simply
    /// ticks the scheduler until the task's own completion makes `is_done`
    /// true.
    pub fn block_on<T: Clone + 'static>(&self, task: &Task<T>) -> Result<T, Error> {
        self.drive(|| task.is_done())?;
        task.try_result()
            .expect("drive only returns Ok once `done` is true")
    }

    /// Cancels `task` and every one of its descendants (children before
    /// parent is never the order; spec.md §4.2 cascades to children
    /// first), tearing down their watchers and timers and delivering a
    /// [`Error::Cancelled`] throw-in to each.
    pub fn cancel<T: Clone + 'static>(&self, task: &Task<T>) {
        self.0.cancel(task.erased());
    }
}
