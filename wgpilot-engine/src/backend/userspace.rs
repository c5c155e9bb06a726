//! Backend driving a userspace WireGuard daemon
//!
//! Runs a `wireguard-go` compatible binary in the foreground on an
//! existing TUN descriptor (`WG_TUN_FD`) and talks to it over its UAPI
//! socket, `<uapi_dir>/<interface>.sock`.

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, ErrorKind, Write};
use std::os::unix::io::RawFd;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{roaming_enabled, Backend, SessionHandle};
use crate::config::ServiceConfig;

const UAPI_WAIT_INTERVAL: Duration = Duration::from_millis(25);
const UAPI_SOCKET_TIMEOUT: Duration = Duration::from_secs(5);
const UAPI_READ_TIMEOUT: Duration = Duration::from_millis(250);
const UAPI_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Start error: the daemon could not be spawned
pub const ERR_SPAWN: i32 = -1;
/// Start error: the UAPI socket never appeared
pub const ERR_SOCKET_TIMEOUT: i32 = -2;
/// Start error: the daemon rejected the configuration
pub const ERR_CONFIG_REJECTED: i32 = -3;
/// Start error: the TUN descriptor could not be duplicated
pub const ERR_TUN_FD: i32 = -4;

struct Session {
    child: Child,
    /// `public_key`/`endpoint` pairs re-applied after a socket bump
    pinned_endpoints: Option<String>,
}

/// Backend running `wireguard-go` as a child process
pub struct UserspaceBackend {
    binary: PathBuf,
    interface: String,
    uapi_dir: PathBuf,
    log_level: String,
    next_handle: AtomicI32,
    sessions: Mutex<HashMap<i32, Session>>,
}

impl UserspaceBackend {
    pub fn new(binary: impl Into<PathBuf>, interface: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            interface: interface.into(),
            uapi_dir: PathBuf::from("/var/run/wireguard"),
            log_level: "error".to_string(),
            next_handle: AtomicI32::new(0),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Build from the `[service]` section
    pub fn from_service(service: &ServiceConfig) -> Self {
        Self::new(&service.backend_binary, &service.interface_name)
            .with_uapi_dir(&service.uapi_dir)
            .with_log_level(&service.log_level)
    }

    pub fn with_uapi_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.uapi_dir = dir.into();
        self
    }

    /// Map a `log` level name onto the daemon's `LOG_LEVEL`
    pub fn with_log_level(mut self, level: &str) -> Self {
        self.log_level = match level {
            "debug" | "trace" => "verbose",
            _ => "error",
        }
        .to_string();
        self
    }

    pub fn socket_path(&self) -> PathBuf {
        self.uapi_dir.join(format!("{}.sock", self.interface))
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<i32, Session>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn spawn(&self, tun_fd: RawFd) -> Result<Child, i32> {
        // dup() clears close-on-exec so the child inherits the descriptor
        let fd = unsafe { libc::dup(tun_fd) };
        if fd < 0 {
            log::error!(
                "Failed to duplicate TUN descriptor {}: {}",
                tun_fd,
                io::Error::last_os_error()
            );
            return Err(ERR_TUN_FD);
        }

        let result = Command::new(&self.binary)
            .arg("-f")
            .arg(&self.interface)
            .env("WG_TUN_FD", fd.to_string())
            .env("LOG_LEVEL", &self.log_level)
            .stdin(Stdio::null())
            .spawn();

        unsafe {
            libc::close(fd);
        }

        result.map_err(|e| {
            log::error!("Failed to spawn {:?}: {}", self.binary, e);
            ERR_SPAWN
        })
    }

    fn wait_for_socket(&self, child: &mut Child) -> Result<(), i32> {
        let path = self.socket_path();
        let start = Instant::now();

        loop {
            if path.exists() {
                log::debug!("UAPI socket ready at {:?}", path);
                return Ok(());
            }
            if let Ok(Some(status)) = child.try_wait() {
                log::error!("{:?} exited during start-up: {}", self.binary, status);
                return Err(ERR_SPAWN);
            }
            if start.elapsed() >= UAPI_SOCKET_TIMEOUT {
                log::error!("Timed out waiting for UAPI socket {:?}", path);
                return Err(ERR_SOCKET_TIMEOUT);
            }
            std::thread::sleep(UAPI_WAIT_INTERVAL);
        }
    }

    fn set(&self, text: &str) -> i64 {
        match uapi_exchange(&self.socket_path(), &format!("set=1\n{}\n", text)) {
            Ok((_, 0)) => 0,
            Ok((_, errno)) => {
                log::warn!("UAPI set returned errno={}", errno);
                -i64::from(errno.abs())
            }
            Err(e) => {
                log::warn!("UAPI set failed: {}", e);
                -i64::from(e.raw_os_error().unwrap_or(libc::EIO))
            }
        }
    }

    fn get(&self) -> Option<String> {
        match uapi_exchange(&self.socket_path(), "get=1\n\n") {
            Ok((body, 0)) => Some(body),
            Ok((_, errno)) => {
                log::warn!("UAPI get returned errno={}", errno);
                None
            }
            Err(e) => {
                log::warn!("UAPI get failed: {}", e);
                None
            }
        }
    }
}

impl Backend for UserspaceBackend {
    fn start(&self, config: &str, tun_fd: RawFd) -> i32 {
        let socket = self.socket_path();
        if let Err(e) = std::fs::remove_file(&socket) {
            if e.kind() != ErrorKind::NotFound {
                log::warn!("Failed to remove stale UAPI socket {:?}: {}", socket, e);
            }
        }

        let mut child = match self.spawn(tun_fd) {
            Ok(child) => child,
            Err(code) => return code,
        };
        log::info!(
            "Started {:?} (pid {}) on {}",
            self.binary,
            child.id(),
            self.interface
        );

        if let Err(code) = self.wait_for_socket(&mut child) {
            kill(&mut child, &socket);
            return code;
        }

        if self.set(config) != 0 {
            kill(&mut child, &socket);
            return ERR_CONFIG_REJECTED;
        }

        let pinned_endpoints = if roaming_enabled() {
            None
        } else {
            Some(endpoint_lines(config)).filter(|s| !s.is_empty())
        };

        let raw = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.sessions().insert(
            raw,
            Session {
                child,
                pinned_endpoints,
            },
        );
        raw
    }

    fn stop(&self, handle: SessionHandle) {
        let session = self.sessions().remove(&handle.as_raw());
        match session {
            Some(mut session) => {
                kill(&mut session.child, &self.socket_path());
                log::info!("Stopped backend session {}", handle);
            }
            None => log::debug!("Stop for unknown backend session {}", handle),
        }
    }

    fn get_config(&self, handle: SessionHandle) -> Option<String> {
        if !self.sessions().contains_key(&handle.as_raw()) {
            return None;
        }
        self.get()
    }

    fn set_config(&self, handle: SessionHandle, config: &str) -> i64 {
        if !self.sessions().contains_key(&handle.as_raw()) {
            return -i64::from(libc::ENOENT);
        }
        self.set(config)
    }

    fn bump_sockets(&self, handle: SessionHandle) {
        let pinned = match self.sessions().get(&handle.as_raw()) {
            Some(session) => session.pinned_endpoints.clone(),
            None => return,
        };

        // Re-setting the current port makes the daemon rebind its sockets
        let port = self.get().as_deref().and_then(|text| {
            text.lines()
                .find_map(|line| line.strip_prefix("listen_port="))
                .map(str::to_string)
        });
        match port {
            Some(port) => {
                let status = self.set(&format!("listen_port={}\n", port));
                log::debug!("Rebound backend sockets on port {} (status {})", port, status);
            }
            None => log::warn!("Backend reported no listen port; sockets not rebound"),
        }

        if let Some(pinned) = pinned {
            if self.set(&pinned) != 0 {
                log::warn!("Failed to re-pin peer endpoints");
            }
        }
    }
}

impl Drop for UserspaceBackend {
    fn drop(&mut self) {
        let socket = self.socket_path();
        let sessions = self.sessions.get_mut().unwrap_or_else(|e| e.into_inner());
        for (_, mut session) in sessions.drain() {
            kill(&mut session.child, &socket);
        }
    }
}

fn kill(child: &mut Child, socket: &Path) {
    let _ = child.kill();
    let _ = child.wait();
    let _ = std::fs::remove_file(socket);
}

/// `public_key` and `endpoint` lines of every peer that has an endpoint
fn endpoint_lines(config: &str) -> String {
    let mut out = String::new();
    let mut public_key: Option<&str> = None;

    for line in config.lines() {
        if line.starts_with("public_key=") {
            public_key = Some(line);
        } else if line.starts_with("endpoint=") {
            if let Some(key) = public_key {
                out.push_str(key);
                out.push('\n');
                out.push_str(line);
                out.push('\n');
            }
        }
    }

    out
}

/// Send one UAPI request and collect the reply up to its `errno=` line
fn uapi_exchange(socket: &Path, request: &str) -> io::Result<(String, i32)> {
    let mut stream = UnixStream::connect(socket)?;
    stream.set_read_timeout(Some(UAPI_READ_TIMEOUT))?;
    stream.write_all(request.as_bytes())?;

    let mut reader = BufReader::new(stream);
    let deadline = Instant::now() + UAPI_RESPONSE_TIMEOUT;
    let mut body = String::new();
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => {
                log::debug!("UAPI response missing errno, assuming success");
                return Ok((body, 0));
            }
            Ok(_) => {
                if let Some(value) = line.trim_end().strip_prefix("errno=") {
                    let errno = value
                        .parse::<i32>()
                        .map_err(|_| io::Error::new(ErrorKind::InvalidData, line.clone()))?;
                    return Ok((body, errno));
                }
                body.push_str(&line);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                if Instant::now() >= deadline {
                    return Err(io::Error::new(
                        ErrorKind::TimedOut,
                        "timed out waiting for UAPI response",
                    ));
                }
            }
            Err(e) => return Err(e),
        }
    }
}
