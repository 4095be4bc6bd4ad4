//! Structured-concurrency helpers built entirely from the runtime's own
//! primitives: `spawn`, `run`, `all`, `race`, `timeout`.
//!
//! Grounded on `async-exec`'s combinator style (JonasKruckenberg/k23) —
//! small free functions returning a future built from `queue`/`await`
//! rather than scheduler-internal machinery — adapted to spec.md §4.3's
//! exact semantics (`all` keyed by map, `race` first-done-wins-by-order).

use crate::error::Error;
use crate::runtime::current;
use crate::task::Task;
use crate::time::delay;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;

/// Queues `fut` as a new top-level task of the ambient runtime.
///
/// # Panics
/// Panics if called outside any entered [`crate::Runtime`] — see
/// [`crate::runtime::current`].
pub fn spawn<F, T>(fut: F) -> Task<T>
where
    F: Future<Output = Result<T, Error>> + 'static,
    T: Clone + 'static,
{
    let rt = current();
    Task::spawn_on(rt, fut)
}

/// Spawns `fut` and immediately awaits it.
///
/// Equivalent to `spawn(fn).await` (spec.md §4.3); exists mainly so
/// `timeout` and ad-hoc fire-and-await call sites read the same as the
/// source's `run`.
pub async fn run<F, T>(fut: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>> + 'static,
    T: Clone + 'static,
{
    spawn(fut).await
}

/// One entry to [`all`] or [`race`]: either an already-running task or a
/// closure to queue now (spec.md §4.3's "Tasks are accepted as-is;
/// Closures are queued now").
pub enum Work<T: Clone + 'static> {
    Task(Task<T>),
    Spawn(Pin<Box<dyn Future<Output = Result<T, Error>>>>),
}

impl<T: Clone + 'static> Work<T> {
    pub fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = Result<T, Error>> + 'static,
    {
        Work::Spawn(Box::pin(fut))
    }
}

impl<T: Clone + 'static> From<Task<T>> for Work<T> {
    fn from(task: Task<T>) -> Self {
        Work::Task(task)
    }
}

fn normalize<T: Clone + 'static>(work: Work<T>) -> Task<T> {
    match work {
        Work::Task(task) => task,
        Work::Spawn(fut) => Task::spawn_on(current(), fut),
    }
}

/// Drives the scheduler until every task in `tasks` is done, then returns
/// each key's resolved result (spec.md §4.3's `all`).
///
/// # Errors
/// Surfaces the first task error encountered while collecting results, in
/// key-iteration order; per the spec's Open Question on this point, this
/// implementation does **not** cancel the remaining tasks on first error —
/// see `DESIGN.md`.
pub fn all<K, T>(tasks: HashMap<K, Work<T>>) -> Result<HashMap<K, T>, Error>
where
    K: Eq + Hash,
    T: Clone + 'static,
{
    let rt = current();
    let tasks: HashMap<K, Task<T>> = tasks.into_iter().map(|(k, w)| (k, normalize(w))).collect();

    rt.drive(|| tasks.values().all(Task::is_done))?;

    let mut out = HashMap::with_capacity(tasks.len());
    for (k, task) in tasks {
        let result = task
            .try_result()
            .expect("drive only returns once every task is done");
        out.insert(k, result?);
    }
    Ok(out)
}

/// Drives the scheduler until the first task in `tasks` is done, cancels
/// every other task, and returns the winner's result (spec.md §4.3's
/// `race`).
///
/// # Errors
/// Returns [`Error::CallerBug`] if `tasks` is empty, or surfaces the
/// winner's own error.
pub fn race<T: Clone + 'static>(tasks: Vec<Work<T>>) -> Result<T, Error> {
    if tasks.is_empty() {
        return Err(Error::caller_bug("race: at least one task is required"));
    }

    let rt = current();
    let tasks: Vec<Task<T>> = tasks.into_iter().map(normalize).collect();

    rt.drive(|| tasks.iter().any(Task::is_done))?;

    let winner_idx = tasks
        .iter()
        .position(Task::is_done)
        .expect("drive only returns once at least one task is done");

    for (i, task) in tasks.iter().enumerate() {
        if i != winner_idx {
            rt.cancel(task.erased());
        }
    }

    tasks[winner_idx]
        .try_result()
        .expect("winner is done by construction")
}

/// Races `fut` against a timer that fails after `seconds` (spec.md §4.3's
/// `timeout`, built as `race({work, timer})`).
pub fn timeout<F, T>(fut: F, seconds: f64) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>> + 'static,
    T: Clone + 'static,
{
    let work = Work::spawn(fut);
    let timer = Work::spawn(async move {
        delay(seconds).await?;
        Err(Error::caller_bug(format!("Timeout {seconds}s")))
    });
    race(vec![work, timer])
}
