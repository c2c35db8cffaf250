//! Platform-specific process liveness checks.
//!
//! The registry stores the PID of each Primary; registration uses this
//! check to tell a row held by a live owner from one left behind by a
//! crash. An alive PID is never treated as proof the owner is serving —
//! only a connection probe decides that.

// OS process APIs require raw FFI on both Unix and Windows.
#![allow(unsafe_code)]

#[cfg(not(any(unix, windows)))]
use tracing::warn;

/// Check if a process with the given PID is alive.
///
/// # Platform Behavior
/// - **Linux/macOS**: Uses `kill(pid, 0)` signal check
/// - **Windows**: Uses `OpenProcess` with `PROCESS_QUERY_LIMITED_INFORMATION`
pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        // SAFETY: signal 0 performs no delivery, only an existence and
        // permission check on the target PID.
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }

    #[cfg(windows)]
    {
        use windows_sys::Win32::Foundation::CloseHandle;
        use windows_sys::Win32::System::Threading::{
            OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
        };

        // SAFETY: OpenProcess returns null on failure; a non-null handle is
        // closed immediately after the check.
        unsafe {
            let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
            if !handle.is_null() {
                CloseHandle(handle);
                true
            } else {
                false
            }
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        // Fallback: assume it exists; the connection probe still decides.
        warn!("Process alive check not implemented for this platform");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_pid_is_alive() {
        assert!(is_process_alive(std::process::id()));
    }

    #[test]
    fn test_implausible_pid_is_dead() {
        #[cfg(unix)]
        assert!(!is_process_alive(999_999_999));
    }
}
