//! The I/O readiness layer: watcher records, chunked transfer and the OS
//! readiness wait.
//!
//! Grounded on `kasync::io`'s `Read`/`Write` poll traits for the *shape* of
//! "a pending I/O operation resumable by a waker", but realized over real
//! OS file descriptors with a direct `libc::poll` call rather than a
//! `Future`-generic trait — spec.md's Non-goals explicitly exclude building
//! "a general epoll/kqueue abstraction", so this stays a one-shot readiness
//! probe invoked once per scheduler tick, never a persistent registration.

use crate::error::{Error, IoFailure};
use crate::task::TaskId;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::task::Waker;
use std::time::Duration;

/// Maximum bytes a single watcher may advance in one direction, per tick.
///
/// Matches spec.md §4.2 exactly: "IO_CHUNK is fixed at 8192 bytes; this is
/// the maximum per-tick progress per watcher per direction."
pub const IO_CHUNK: usize = 8192;

pub(crate) enum ReadOutcome {
    Done(Vec<u8>),
    Failed(Error),
}

pub(crate) enum WriteOutcome {
    Done,
    Failed(Error),
}

/// One in-flight read. Immutable as a bookkeeping record (`fd`, `owner`,
/// `cap`) with interior-mutable progress fields — spec.md's "replace on
/// change" discipline realized as in-place `Cell`/`RefCell` mutation since
/// exactly one task ever owns a given watcher (documented in DESIGN.md).
pub(crate) struct ReadWatcher {
    pub(crate) owner: TaskId,
    pub(crate) cap: usize,
    pub(crate) waker: RefCell<Waker>,
    pub(crate) buf: RefCell<Vec<u8>>,
    pub(crate) outcome: RefCell<Option<ReadOutcome>>,
}

pub(crate) struct WriteWatcher {
    pub(crate) owner: TaskId,
    pub(crate) data: Rc<[u8]>,
    pub(crate) offset: Cell<usize>,
    pub(crate) waker: RefCell<Waker>,
    pub(crate) outcome: RefCell<Option<WriteOutcome>>,
}

#[derive(Default)]
pub(crate) struct Reactor {
    pub(crate) read: RefCell<HashMap<RawFd, Rc<ReadWatcher>>>,
    pub(crate) write: RefCell<HashMap<RawFd, Rc<WriteWatcher>>>,
}

impl Reactor {
    pub(crate) fn is_empty(&self) -> bool {
        self.read.borrow().is_empty() && self.write.borrow().is_empty()
    }

    /// Remove every watcher owned by `owner`, closing its stream. Used by
    /// cancellation (spec.md §4.2 `Cancel`).
    pub(crate) fn cancel_owned(&self, owner: TaskId) {
        let fds: Vec<RawFd> = self
            .read
            .borrow()
            .iter()
            .filter(|(_, w)| w.owner == owner)
            .map(|(fd, _)| *fd)
            .collect();
        for fd in fds {
            self.read.borrow_mut().remove(&fd);
            close(fd);
        }

        let fds: Vec<RawFd> = self
            .write
            .borrow()
            .iter()
            .filter(|(_, w)| w.owner == owner)
            .map(|(fd, _)| *fd)
            .collect();
        for fd in fds {
            self.write.borrow_mut().remove(&fd);
            close(fd);
        }
    }

    /// Phase B of a scheduler tick: wait for readiness on every watched
    /// stream (bounded by `timeout`, `None` meaning unbounded) and advance
    /// each ready watcher by at most [`IO_CHUNK`] bytes.
    ///
    /// Returns `true` if the OS reported any readiness at all.
    pub(crate) fn poll_once(&self, timeout: Option<Duration>) -> bool {
        if self.is_empty() {
            if let Some(t) = timeout {
                std::thread::sleep(t);
            }
            return false;
        }

        let read_fds: Vec<RawFd> = self.read.borrow().keys().copied().collect();
        let write_fds: Vec<RawFd> = self.write.borrow().keys().copied().collect();

        let mut pollfds: Vec<libc::pollfd> = Vec::with_capacity(read_fds.len() + write_fds.len());
        for fd in &read_fds {
            pollfds.push(libc::pollfd {
                fd: *fd,
                events: libc::POLLIN,
                revents: 0,
            });
        }
        for fd in &write_fds {
            pollfds.push(libc::pollfd {
                fd: *fd,
                events: libc::POLLOUT,
                revents: 0,
            });
        }

        let timeout_ms: i32 = match timeout {
            Some(d) => i32::try_from(d.as_millis()).unwrap_or(i32::MAX),
            None => -1,
        };

        // SAFETY: `pollfds` is a valid, exclusively-owned buffer of the
        // length passed, for the duration of the call.
        let ready = unsafe {
            libc::poll(
                pollfds.as_mut_ptr(),
                pollfds.len() as libc::nfds_t,
                timeout_ms,
            )
        };

        if ready <= 0 {
            return false;
        }

        // Writes before reads, within a tick (spec.md §5 ordering).
        for pfd in pollfds.iter().skip(read_fds.len()) {
            if pfd.revents != 0 {
                self.process_write(pfd.fd);
            }
        }
        for pfd in pollfds.iter().take(read_fds.len()) {
            if pfd.revents != 0 {
                self.process_read(pfd.fd);
            }
        }

        true
    }

    fn process_write(&self, fd: RawFd) {
        let Some(w) = self.write.borrow().get(&fd).cloned() else {
            return;
        };

        let offset = w.offset.get();
        let end = std::cmp::min(offset + IO_CHUNK, w.data.len());
        let chunk = &w.data[offset..end];

        match write_nonblocking(fd, chunk) {
            Err(e) => {
                self.write.borrow_mut().remove(&fd);
                close(fd);
                *w.outcome.borrow_mut() = Some(WriteOutcome::Failed(e));
                let waker = w.waker.borrow().clone();
                waker.wake();
            }
            Ok(0) => {}
            Ok(written) => {
                let new_offset = offset + written;
                w.offset.set(new_offset);
                if new_offset == w.data.len() {
                    self.write.borrow_mut().remove(&fd);
                    *w.outcome.borrow_mut() = Some(WriteOutcome::Done);
                    let waker = w.waker.borrow().clone();
                    waker.wake();
                }
            }
        }
    }

    fn process_read(&self, fd: RawFd) {
        let Some(w) = self.read.borrow().get(&fd).cloned() else {
            return;
        };

        let mut chunk = vec![0u8; IO_CHUNK];
        match read_nonblocking(fd, &mut chunk) {
            Err(e) => {
                self.read.borrow_mut().remove(&fd);
                close(fd);
                *w.outcome.borrow_mut() = Some(ReadOutcome::Failed(e));
                let waker = w.waker.borrow().clone();
                waker.wake();
            }
            Ok(None) => {}
            Ok(Some(0)) => {
                self.read.borrow_mut().remove(&fd);
                close(fd);
                let buf = w.buf.borrow().clone();
                *w.outcome.borrow_mut() = Some(ReadOutcome::Done(buf));
                let waker = w.waker.borrow().clone();
                waker.wake();
            }
            Ok(Some(n)) => {
                chunk.truncate(n);
                w.buf.borrow_mut().extend_from_slice(&chunk);
                if w.buf.borrow().len() > w.cap {
                    self.read.borrow_mut().remove(&fd);
                    close(fd);
                    *w.outcome.borrow_mut() =
                        Some(ReadOutcome::Failed(Error::Io(IoFailure::ResponseTooLarge)));
                    let waker = w.waker.borrow().clone();
                    waker.wake();
                } else {
                    let waker = w.waker.borrow().clone();
                    waker.wake();
                }
            }
        }
    }
}

fn write_nonblocking(fd: RawFd, data: &[u8]) -> Result<usize, Error> {
    // SAFETY: `fd` is a valid, open descriptor owned by its watcher for the
    // duration of this call; `data` is a valid slice.
    let n = unsafe { libc::write(fd, data.as_ptr().cast(), data.len()) };
    if n >= 0 {
        return Ok(n as usize);
    }
    let err = io::Error::last_os_error();
    if would_block(&err) {
        Ok(0)
    } else {
        Err(Error::Io(IoFailure::WriteFailed))
    }
}

/// `Ok(None)` means EAGAIN (no progress this tick, not EOF); `Ok(Some(0))`
/// means EOF.
fn read_nonblocking(fd: RawFd, buf: &mut [u8]) -> Result<Option<usize>, Error> {
    // SAFETY: `fd` is a valid, open descriptor owned by its watcher for the
    // duration of this call; `buf` is a valid, exclusively-borrowed buffer.
    let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
    if n >= 0 {
        return Ok(Some(n as usize));
    }
    let err = io::Error::last_os_error();
    if would_block(&err) {
        Ok(None)
    } else {
        Err(Error::Io(IoFailure::ReadFailed))
    }
}

fn would_block(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}

pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: `fd` is a valid descriptor; `fcntl` with `F_GETFL`/`F_SETFL`
    // is the standard way to flip O_NONBLOCK without owning a typed socket.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

pub(crate) fn close(fd: RawFd) {
    // SAFETY: `fd` is owned by the watcher being torn down and not used
    // again afterwards.
    unsafe {
        libc::close(fd);
    }
}
