//! Single-owner RAII around raw OS handles.
//!
//! Every successful resource acquisition gets a matching release even on
//! error, cancellation or early return: the owner closes on drop, moves
//! transfer ownership, copies are impossible.

/// Raw OS handle value. On Windows this is the `HANDLE` integer, on Unix a
/// file descriptor widened to the same representation.
pub type RawHandle = isize;

/// Sentinel for "no handle" (`INVALID_HANDLE_VALUE` on Windows).
pub const INVALID_RAW_HANDLE: RawHandle = -1;

/// Move-only owner of a raw OS handle.
///
/// An invalid handle is the sentinel value; closing an invalid handle is a
/// no-op. Destruction closes the handle.
#[derive(Debug)]
pub struct OwnedHandle {
    raw: RawHandle,
}

impl OwnedHandle {
    /// Take ownership of `raw`. The caller must not close it afterwards.
    ///
    /// # Safety
    ///
    /// `raw` must be a handle the caller owns, or the invalid sentinel.
    pub unsafe fn adopt(raw: RawHandle) -> Self {
        OwnedHandle { raw }
    }

    /// An owner of nothing.
    pub fn invalid() -> Self {
        OwnedHandle {
            raw: INVALID_RAW_HANDLE,
        }
    }

    pub fn get(&self) -> RawHandle {
        self.raw
    }

    pub fn is_valid(&self) -> bool {
        self.raw != INVALID_RAW_HANDLE && self.raw != 0
    }

    /// Give up ownership without closing.
    pub fn release(&mut self) -> RawHandle {
        std::mem::replace(&mut self.raw, INVALID_RAW_HANDLE)
    }

    /// Replace the owned handle, closing the current one if valid.
    ///
    /// # Safety
    ///
    /// Same contract as [`OwnedHandle::adopt`].
    pub unsafe fn reset(&mut self, raw: RawHandle) {
        if self.raw != raw {
            self.close();
            self.raw = raw;
        }
    }

    /// Close now. Idempotent.
    pub fn close(&mut self) {
        if self.is_valid() {
            close_raw(self.raw);
            self.raw = INVALID_RAW_HANDLE;
        }
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(windows)]
fn close_raw(raw: RawHandle) {
    use windows::Win32::Foundation::{CloseHandle, HANDLE};

    // A stale handle value at teardown is not actionable, only log it.
    if let Err(e) = unsafe { CloseHandle(HANDLE(raw as *mut core::ffi::c_void)) } {
        log::warn!(target: "handle", "CloseHandle failed: {e}");
    }
}

#[cfg(unix)]
fn close_raw(raw: RawHandle) {
    use std::os::fd::{FromRawFd, OwnedFd, RawFd};

    drop(unsafe { OwnedFd::from_raw_fd(raw as RawFd) });
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn invalid_handle_is_noop_to_close() {
        let mut handle = OwnedHandle::invalid();
        assert!(!handle.is_valid());
        handle.close();
        handle.close();
        assert!(!handle.is_valid());
    }

    #[test]
    fn release_forgets_without_closing() {
        let mut handle = unsafe { OwnedHandle::adopt(INVALID_RAW_HANDLE) };
        assert_eq!(handle.release(), INVALID_RAW_HANDLE);
        assert!(!handle.is_valid());
    }

    #[test]
    fn move_transfers_ownership() {
        let handle = OwnedHandle::invalid();
        let moved = handle;
        assert!(!moved.is_valid());
    }

    #[cfg(unix)]
    #[test]
    fn drop_closes_an_adopted_descriptor() {
        use std::fs::File;
        use std::os::fd::IntoRawFd;

        let fd = File::open("/dev/null").unwrap().into_raw_fd();
        let mut owned = unsafe { OwnedHandle::adopt(fd as RawHandle) };
        assert!(owned.is_valid());
        drop(owned);
        // Double close through reset must not happen either.
        owned = OwnedHandle::invalid();
        owned.close();
    }
}
