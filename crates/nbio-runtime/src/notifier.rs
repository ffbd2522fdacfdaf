//! Cross-thread wakeups for runners blocked in a selector wait
//!
//! A runner parked in `epoll_wait` does not see `Thread::unpark`; it needs
//! a readable fd in its interest set. The notifier is that fd.
//!
//! # Implementors
//!
//! - `EventFdNotifier`: a non-blocking eventfd (Linux and Android, the
//!   targets with an epoll selector). Multiple `notify()` calls before the
//!   runner drains add to one counter and wake it once.

use nbio_core::error::RunnerError;

#[cfg(any(target_os = "linux", target_os = "android"))]
use std::os::unix::io::RawFd;

/// Wakes a runner waiting on its selector
///
/// **Contract:**
/// - `notify()` must never block.
/// - Repeated notifications before `drain()` coalesce.
pub trait Notifier: Send + Sync {
    /// Signal the waiting runner
    fn notify(&self) -> Result<(), RunnerError>;
}

#[cfg(any(target_os = "linux", target_os = "android"))]
#[inline]
fn last_errno() -> i32 {
    nix::errno::Errno::last() as i32
}

/// Readable-fd wakeup source over an eventfd
#[cfg(any(target_os = "linux", target_os = "android"))]
pub struct EventFdNotifier {
    fd: RawFd,
}

#[cfg(any(target_os = "linux", target_os = "android"))]
impl EventFdNotifier {
    /// Create the eventfd, non-blocking and close-on-exec
    pub fn create() -> Result<Self, RunnerError> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(RunnerError::Os(last_errno()));
        }
        Ok(Self { fd })
    }

    /// Descriptor to register for read readiness
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Consume pending notifications so the fd stops reporting readable
    pub fn drain(&self) {
        // One 8-byte read returns and resets the whole counter
        let mut counter = [0u8; 8];
        unsafe {
            libc::read(self.fd, counter.as_mut_ptr() as *mut libc::c_void, counter.len());
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
impl Notifier for EventFdNotifier {
    fn notify(&self) -> Result<(), RunnerError> {
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.fd,
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let errno = last_errno();
            // Counter saturated: a wakeup is already pending
            if errno == libc::EAGAIN {
                return Ok(());
            }
            return Err(RunnerError::Os(errno));
        }
        Ok(())
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
impl Drop for EventFdNotifier {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
