use std::os::unix::io::RawFd;
use std::sync::Mutex;

use super::{Backend, SessionHandle};

/// A call made on [`MockBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Start { config: String, tun_fd: RawFd },
    Stop(SessionHandle),
    GetConfig(SessionHandle),
    SetConfig(SessionHandle, String),
    BumpSockets(SessionHandle),
}

#[derive(Debug)]
struct MockState {
    calls: Vec<BackendCall>,
    start_error: Option<i32>,
    runtime_config: String,
    set_status: i64,
    next_handle: i32,
    active: Vec<SessionHandle>,
}

/// In-memory backend that records every call
#[derive(Debug)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            state: Mutex::new(MockState {
                calls: Vec::new(),
                start_error: None,
                runtime_config: String::new(),
                set_status: 0,
                next_handle: 0,
                active: Vec::new(),
            }),
        }
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every start fail with `code`
    pub fn failing_start(code: i32) -> Self {
        let backend = Self::default();
        backend.lock().start_error = Some(code);
        backend
    }

    /// Text returned by `get_config`
    pub fn set_runtime_config(&self, text: impl Into<String>) {
        self.lock().runtime_config = text.into();
    }

    /// Status returned by `set_config`
    pub fn set_config_status(&self, status: i64) {
        self.lock().set_status = status;
    }

    /// All calls so far
    pub fn calls(&self) -> Vec<BackendCall> {
        self.lock().calls.clone()
    }

    /// Number of successful starts not yet stopped
    pub fn active_sessions(&self) -> usize {
        self.lock().active.len()
    }

    /// Number of `start` calls, successful or not
    pub fn start_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, BackendCall::Start { .. }))
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Backend for MockBackend {
    fn start(&self, config: &str, tun_fd: RawFd) -> i32 {
        let mut state = self.lock();
        state.calls.push(BackendCall::Start {
            config: config.to_string(),
            tun_fd,
        });

        if let Some(code) = state.start_error {
            return code;
        }

        let raw = state.next_handle;
        state.next_handle += 1;
        if let Some(handle) = SessionHandle::from_raw(raw) {
            state.active.push(handle);
        }
        raw
    }

    fn stop(&self, handle: SessionHandle) {
        let mut state = self.lock();
        state.calls.push(BackendCall::Stop(handle));
        state.active.retain(|h| *h != handle);
    }

    fn get_config(&self, handle: SessionHandle) -> Option<String> {
        let mut state = self.lock();
        state.calls.push(BackendCall::GetConfig(handle));
        state
            .active
            .contains(&handle)
            .then(|| state.runtime_config.clone())
    }

    fn set_config(&self, handle: SessionHandle, config: &str) -> i64 {
        let mut state = self.lock();
        state.calls.push(BackendCall::SetConfig(handle, config.to_string()));
        state.set_status
    }

    fn bump_sockets(&self, handle: SessionHandle) {
        self.lock().calls.push(BackendCall::BumpSockets(handle));
    }
}
