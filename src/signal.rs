//! Scoped suppression of the broken-pipe signal
//!
//! Writing to a socket whose peer has gone away raises `SIGPIPE`, which
//! terminates the process by default. Every operation that may write (or
//! close) holds a [`SigpipeGuard`] for its duration: the first live guard
//! snapshots the prior disposition and installs "ignore", the last guard to
//! drop restores the snapshot. Guards are reference counted because the
//! disposition is process-wide and may be entered from several threads.
//!
//! On platforms without `SIGPIPE` the guard is a no-op with the same API, so
//! callers keep a single code path.

/// Whether this build can change the broken-pipe signal disposition
pub const SIGNALS_SUPPORTED: bool = cfg!(unix);

/// Opaque snapshot of the broken-pipe handler, comparable for equality
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disposition(usize);

/// Read the current broken-pipe disposition without changing it.
///
/// Always returns the same value where signals are unsupported.
pub fn current_disposition() -> std::io::Result<Disposition> {
    imp::current().map(Disposition)
}

/// Holds broken-pipe suppression until dropped.
#[derive(Debug)]
#[must_use = "the signal is only suppressed while the guard is alive"]
pub struct SigpipeGuard {
    _private: (),
}

impl SigpipeGuard {
    /// Ignore `SIGPIPE` until the returned guard (and any other live guard)
    /// is dropped.
    pub fn new() -> std::io::Result<Self> {
        imp::acquire()?;
        Ok(Self { _private: () })
    }
}

impl Drop for SigpipeGuard {
    fn drop(&mut self) {
        imp::release();
    }
}

#[cfg(unix)]
mod imp {
    use std::io;
    use std::mem::MaybeUninit;
    use std::ptr;
    use std::sync::{Mutex, PoisonError};

    struct GuardState {
        depth: usize,
        saved: Option<libc::sigaction>,
    }

    static STATE: Mutex<GuardState> = Mutex::new(GuardState {
        depth: 0,
        saved: None,
    });

    pub(super) fn current() -> io::Result<usize> {
        let mut action = MaybeUninit::<libc::sigaction>::zeroed();
        // SAFETY: a null `act` only queries; `oldact` points to writable memory.
        let rc = unsafe { libc::sigaction(libc::SIGPIPE, ptr::null(), action.as_mut_ptr()) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: sigaction succeeded and filled the struct.
        Ok(unsafe { action.assume_init() }.sa_sigaction)
    }

    pub(super) fn acquire() -> io::Result<()> {
        let mut state = STATE.lock().unwrap_or_else(PoisonError::into_inner);
        if state.depth == 0 {
            // SAFETY: an all-zero sigaction is a valid value to fill in.
            let mut ignore: libc::sigaction = unsafe { std::mem::zeroed() };
            ignore.sa_sigaction = libc::SIG_IGN;
            ignore.sa_flags = 0;
            // SAFETY: sa_mask is a valid sigset_t owned by `ignore`.
            if unsafe { libc::sigemptyset(&mut ignore.sa_mask) } != 0 {
                return Err(io::Error::last_os_error());
            }

            let mut prior = MaybeUninit::<libc::sigaction>::zeroed();
            // SAFETY: both pointers are valid for the duration of the call.
            if unsafe { libc::sigaction(libc::SIGPIPE, &ignore, prior.as_mut_ptr()) } != 0 {
                return Err(io::Error::last_os_error());
            }
            // SAFETY: sigaction succeeded and filled `prior`.
            state.saved = Some(unsafe { prior.assume_init() });
            tracing::trace!("SIGPIPE ignored");
        }
        state.depth += 1;
        Ok(())
    }

    pub(super) fn release() {
        let mut state = STATE.lock().unwrap_or_else(PoisonError::into_inner);
        state.depth = state.depth.saturating_sub(1);
        if state.depth > 0 {
            return;
        }
        if let Some(prior) = state.saved.take() {
            // SAFETY: `prior` was produced by a successful sigaction call.
            if unsafe { libc::sigaction(libc::SIGPIPE, &prior, ptr::null_mut()) } != 0 {
                tracing::warn!(
                    "failed to restore SIGPIPE disposition: {}",
                    io::Error::last_os_error()
                );
            } else {
                tracing::trace!("SIGPIPE disposition restored");
            }
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use std::io;

    pub(super) fn current() -> io::Result<usize> {
        Ok(0)
    }

    pub(super) fn acquire() -> io::Result<()> {
        Ok(())
    }

    pub(super) fn release() {}
}
