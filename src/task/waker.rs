//! A type-erased, single-threaded [`Waker`] for [`Schedulable`] tasks.
//!
//! `std::task::RawWaker` stores a single `*const ()` word of context, but
//! `Rc<dyn Schedulable>` is a fat pointer (data + vtable) and doesn't fit.
//! The fix used here — box the fat pointer in one more `Rc` and store a thin
//! pointer to *that* — is the standard trick for type-erased wakers; it
//! replaces `kasync`'s atomic `Header`/refcount dance (needed there for
//! cross-thread wakers) with plain `Rc` refcounting, since this runtime never
//! leaves one thread.

use super::Schedulable;
use std::mem::ManuallyDrop;
use std::rc::Rc;
use std::task::{RawWaker, RawWakerVTable, Waker};

type Handle = Rc<dyn Schedulable>;

pub(super) fn make(task: Handle) -> Waker {
    let raw = new_raw(task);
    unsafe { Waker::from_raw(raw) }
}

fn new_raw(task: Handle) -> RawWaker {
    let boxed: Rc<Handle> = Rc::new(task);
    RawWaker::new(Rc::into_raw(boxed) as *const (), &VTABLE)
}

unsafe fn clone(ptr: *const ()) -> RawWaker {
    let existing = ManuallyDrop::new(unsafe { Rc::from_raw(ptr as *const Handle) });
    let cloned: Handle = (**existing).clone();
    new_raw(cloned)
}

unsafe fn wake(ptr: *const ()) {
    let owned = unsafe { Rc::from_raw(ptr as *const Handle) };
    let task: Handle = (*owned).clone();
    drop(owned);
    task.poll_task();
}

unsafe fn wake_by_ref(ptr: *const ()) {
    let existing = ManuallyDrop::new(unsafe { Rc::from_raw(ptr as *const Handle) });
    let task: Handle = (**existing).clone();
    task.poll_task();
}

unsafe fn drop_waker(ptr: *const ()) {
    drop(unsafe { Rc::from_raw(ptr as *const Handle) });
}

static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, wake, wake_by_ref, drop_waker);
