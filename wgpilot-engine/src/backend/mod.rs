//! WireGuard backend abstraction
//!
//! The backend owns the cryptographic tunnel. The controller only ever sees
//! an integer session handle and routes every interaction through the
//! [`Backend`] trait, the same five operations a `wireguard-go` style
//! library exposes.

mod mock;
mod userspace;

use std::fmt;
use std::os::unix::io::RawFd;
use std::sync::OnceLock;

pub use mock::{BackendCall, MockBackend};
pub use userspace::UserspaceBackend;

/// Live backend session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(i32);

impl SessionHandle {
    /// Wrap a raw handle; negative values are error codes, not handles
    pub fn from_raw(raw: i32) -> Option<Self> {
        (raw >= 0).then_some(Self(raw))
    }

    pub fn as_raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Operations on a WireGuard implementation
///
/// Calls are blocking; the controller runs [`Backend::start`] on the
/// blocking thread pool.
pub trait Backend: Send + Sync {
    /// Start a session on `tun_fd` with the given UAPI text
    ///
    /// Returns a non-negative handle on success or a negative error code.
    fn start(&self, config: &str, tun_fd: RawFd) -> i32;

    /// End a session
    fn stop(&self, handle: SessionHandle);

    /// Current runtime configuration as UAPI text
    fn get_config(&self, handle: SessionHandle) -> Option<String>;

    /// Apply UAPI text to a running session; 0 on success
    fn set_config(&self, handle: SessionHandle, config: &str) -> i64;

    /// Rebind the session's UDP sockets after a network change
    fn bump_sockets(&self, handle: SessionHandle);
}

static ROAMING: OnceLock<bool> = OnceLock::new();

/// Set whether peers may roam to new source addresses
///
/// Only the first call in a process takes effect; returns whether this call
/// set the flag.
pub fn enable_roaming(enabled: bool) -> bool {
    let set = ROAMING.set(enabled).is_ok();
    if !set {
        log::debug!("Roaming already configured as {}", roaming_enabled());
    }
    set
}

/// Whether peers may roam; on unless disabled at start-up
pub fn roaming_enabled() -> bool {
    ROAMING.get().copied().unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_handle() {
        assert_eq!(SessionHandle::from_raw(0).map(SessionHandle::as_raw), Some(0));
        assert_eq!(SessionHandle::from_raw(7).unwrap().to_string(), "#7");
        assert_eq!(SessionHandle::from_raw(-1), None);
    }
}
