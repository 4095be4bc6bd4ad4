//! The ambient `write`/`read_all` primitives and the byte-stream handle
//! they operate on.
//!
//! Grounded on `kasync::io`'s `AsyncRead`/`AsyncWrite` futures for the
//! general shape (a poll that registers with a reactor on first call and
//! checks a completion slot thereafter), but over the crate's own
//! [`crate::reactor::Reactor`] rather than `kasync`'s mio-backed one.

use crate::error::{Error, IoFailure};
use crate::reactor::{self, ReadOutcome, ReadWatcher, WriteOutcome, WriteWatcher};
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::net::TcpStream;
use std::os::fd::{IntoRawFd, RawFd};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// A byte-oriented, request/response-style stream handle.
///
/// Owns a raw file descriptor. Ownership transfers to whichever watcher is
/// currently tracking it; the reactor closes the descriptor when a watcher
/// is torn down (success, failure or cancellation), matching spec.md §5's
/// "streams are owned exclusively by their current watcher" rule. A
/// `Stream` not currently under any watcher closes itself on drop.
pub struct Stream {
    fd: RawFd,
    open: Cell<bool>,
}

impl Stream {
    pub(crate) fn from_raw(fd: RawFd) -> Self {
        Stream {
            fd,
            open: Cell::new(true),
        }
    }

    fn take_fd(&self) -> RawFd {
        self.open.set(false);
        self.fd
    }
}

impl From<TcpStream> for Stream {
    fn from(tcp: TcpStream) -> Self {
        Stream::from_raw(tcp.into_raw_fd())
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if self.open.get() {
            reactor::close(self.fd);
        }
    }
}

fn current_owner() -> Result<(Rc<crate::runtime::RuntimeInner>, crate::task::TaskId), Error> {
    let Some(rt) = crate::runtime::try_current() else {
        return Err(Error::caller_bug(
            "I/O primitive called outside any execution",
        ));
    };
    match rt.current_task.get() {
        Some(owner) => Ok((rt, owner)),
        None => Err(Error::caller_bug(
            "I/O primitive called outside any execution",
        )),
    }
}

/// Writes `data` to `stream` in full, suspending until every byte has been
/// delivered or the stream fails.
///
/// A no-op if `data` is empty — spec.md §4.2. On success the stream is
/// handed back (still open) so the caller can read a response over the
/// same connection; on failure the stream has already been closed.
pub fn write(stream: Stream, data: impl Into<Vec<u8>>) -> Write {
    let data = data.into();
    if data.is_empty() {
        return Write(WriteState::Done(Some(Ok(stream))));
    }

    match current_owner() {
        Err(e) => Write(WriteState::Done(Some(Err(e)))),
        Ok((rt, owner)) => {
            let fd = stream.take_fd();
            if let Err(_io) = reactor::set_nonblocking(fd) {
                reactor::close(fd);
                return Write(WriteState::Done(Some(Err(Error::Io(IoFailure::WriteFailed)))));
            }
            Write(WriteState::Starting {
                rt,
                owner,
                fd,
                data: data.into(),
            })
        }
    }
}

enum WriteState {
    Starting {
        rt: Rc<crate::runtime::RuntimeInner>,
        owner: crate::task::TaskId,
        fd: RawFd,
        data: Rc<[u8]>,
    },
    Waiting {
        fd: RawFd,
        watcher: Rc<WriteWatcher>,
    },
    Done(Option<Result<Stream, Error>>),
}

pub struct Write(WriteState);

impl Unpin for Write {}

impl Future for Write {
    type Output = Result<Stream, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            match &this.0 {
                WriteState::Done(_) => {
                    let WriteState::Done(result) = &mut this.0 else {
                        unreachable!()
                    };
                    return Poll::Ready(result.take().expect("Write polled again after Ready"));
                }
                WriteState::Starting { .. } => {
                    let WriteState::Starting { rt, owner, fd, data } =
                        std::mem::replace(&mut this.0, WriteState::Done(None))
                    else {
                        unreachable!()
                    };
                    let watcher = Rc::new(WriteWatcher {
                        owner,
                        data,
                        offset: Cell::new(0),
                        waker: RefCell::new(cx.waker().clone()),
                        outcome: RefCell::new(None),
                    });
                    rt.reactor.write.borrow_mut().insert(fd, watcher.clone());
                    this.0 = WriteState::Waiting { fd, watcher };
                    return Poll::Pending;
                }
                WriteState::Waiting { fd, watcher } => {
                    let taken = watcher.outcome.borrow_mut().take();
                    if let Some(outcome) = taken {
                        let result = match outcome {
                            WriteOutcome::Done => Ok(Stream::from_raw(*fd)),
                            WriteOutcome::Failed(e) => Err(e),
                        };
                        this.0 = WriteState::Done(Some(result));
                        continue;
                    }
                    *watcher.waker.borrow_mut() = cx.waker().clone();
                    return Poll::Pending;
                }
            }
        }
    }
}

/// Reads `stream` to EOF, suspending until the remote side closes the
/// connection, accumulating at most `max_bytes` (inclusive) before failing
/// with [`IoFailure::ResponseTooLarge`].
///
/// # Errors
/// Returns [`Error::CallerBug`] if `max_bytes` is not positive.
pub fn read_all(stream: Stream, max_bytes: usize) -> ReadAll {
    if max_bytes == 0 {
        return ReadAll(ReadState::Done(Some(Err(Error::caller_bug(
            "read_all: max_bytes must be > 0",
        )))));
    }

    match current_owner() {
        Err(e) => ReadAll(ReadState::Done(Some(Err(e)))),
        Ok((rt, owner)) => {
            let fd = stream.take_fd();
            if let Err(_io) = reactor::set_nonblocking(fd) {
                reactor::close(fd);
                return ReadAll(ReadState::Done(Some(Err(Error::Io(IoFailure::ReadFailed)))));
            }
            ReadAll(ReadState::Starting { rt, owner, fd, cap: max_bytes })
        }
    }
}

enum ReadState {
    Starting {
        rt: Rc<crate::runtime::RuntimeInner>,
        owner: crate::task::TaskId,
        fd: RawFd,
        cap: usize,
    },
    Waiting {
        watcher: Rc<ReadWatcher>,
    },
    Done(Option<Result<Vec<u8>, Error>>),
}

pub struct ReadAll(ReadState);

impl Unpin for ReadAll {}

impl Future for ReadAll {
    type Output = Result<Vec<u8>, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            match &this.0 {
                ReadState::Done(_) => {
                    let ReadState::Done(result) = &mut this.0 else {
                        unreachable!()
                    };
                    return Poll::Ready(result.take().expect("ReadAll polled again after Ready"));
                }
                ReadState::Starting { .. } => {
                    let ReadState::Starting { rt, owner, fd, cap } =
                        std::mem::replace(&mut this.0, ReadState::Done(None))
                    else {
                        unreachable!()
                    };
                    let watcher = Rc::new(ReadWatcher {
                        owner,
                        cap,
                        waker: RefCell::new(cx.waker().clone()),
                        buf: RefCell::new(Vec::new()),
                        outcome: RefCell::new(None),
                    });
                    rt.reactor.read.borrow_mut().insert(fd, watcher.clone());
                    this.0 = ReadState::Waiting { watcher };
                    return Poll::Pending;
                }
                ReadState::Waiting { watcher } => {
                    let taken = watcher.outcome.borrow_mut().take();
                    if let Some(outcome) = taken {
                        let result = match outcome {
                            ReadOutcome::Done(buf) => Ok(buf),
                            ReadOutcome::Failed(e) => Err(e),
                        };
                        this.0 = ReadState::Done(Some(result));
                        continue;
                    }
                    *watcher.waker.borrow_mut() = cx.waker().clone();
                    return Poll::Pending;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_outside_any_runtime_is_a_caller_bug_not_a_panic() {
        let stream = Stream::from_raw(-1);
        let result = futures_poll_once(write(stream, b"x".to_vec()));
        assert!(matches!(result, Poll::Ready(Err(Error::CallerBug(_)))));
    }

    #[test]
    fn read_all_outside_any_runtime_is_a_caller_bug_not_a_panic() {
        let stream = Stream::from_raw(-1);
        let result = futures_poll_once(read_all(stream, 16));
        assert!(matches!(result, Poll::Ready(Err(Error::CallerBug(_)))));
    }

    fn futures_poll_once<F: Future + Unpin>(mut fut: F) -> Poll<F::Output> {
        let waker = std::task::Waker::noop();
        let mut cx = Context::from_waker(waker);
        Pin::new(&mut fut).poll(&mut cx)
    }
}
