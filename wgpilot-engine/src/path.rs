//! Network path monitoring
//!
//! A [`PathMonitor`] reports when the host's route to the outside world
//! changes: Wi-Fi to cellular, a new default gateway, a link going down.
//! The controller subscribes while a tunnel is up and reacts by refreshing
//! peer endpoints and rebinding the backend's sockets.

use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use wg_tun::RouteManager;

/// Reachability of the current path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathStatus {
    /// A usable route exists
    Satisfied,
    /// No usable route exists
    Unsatisfied,
    /// A route would exist once a connection is brought up
    RequiresConnection,
}

impl fmt::Display for PathStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathStatus::Satisfied => write!(f, "satisfied"),
            PathStatus::Unsatisfied => write!(f, "unsatisfied"),
            PathStatus::RequiresConnection => write!(f, "requires-connection"),
        }
    }
}

/// Snapshot of the network path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPath {
    pub status: PathStatus,
    /// Interfaces in preference order
    pub interfaces: Vec<String>,
    /// Gateway of the default route
    pub gateway: Option<IpAddr>,
}

impl NetworkPath {
    /// A path with no usable route
    pub fn unsatisfied() -> Self {
        Self {
            status: PathStatus::Unsatisfied,
            interfaces: Vec::new(),
            gateway: None,
        }
    }

    /// Derive a path from the current default route
    pub fn from_default_route(route: Option<&wg_tun::Route>) -> Self {
        match route {
            Some(route) => Self {
                status: PathStatus::Satisfied,
                interfaces: route.interface.iter().cloned().collect(),
                gateway: route.gateway,
            },
            None => Self::unsatisfied(),
        }
    }
}

impl fmt::Display for NetworkPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.status, self.interfaces.join(", "))?;
        if let Some(gw) = self.gateway {
            write!(f, " via {}", gw)?;
        }
        Ok(())
    }
}

/// Callback receiving path updates
pub type PathSink = Arc<dyn Fn(NetworkPath) + Send + Sync>;

/// Active path watch; cancelled when dropped
pub struct PathSubscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl PathSubscription {
    /// Create a subscription that runs `cancel` once when ended
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Create a subscription backed by a spawned task
    pub fn from_task(task: tokio::task::JoinHandle<()>) -> Self {
        Self::new(move || task.abort())
    }

    /// Stop delivering updates
    pub fn cancel(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for PathSubscription {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

impl fmt::Debug for PathSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathSubscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Source of path updates
pub trait PathMonitor: Send + Sync {
    /// Start delivering path changes to `sink` until the subscription ends
    fn watch(&self, sink: PathSink) -> PathSubscription;
}

/// Path monitor driven by routing table changes
///
/// The path is derived from the default route and re-derived after every
/// route change; `sink` only sees paths that differ from the previous one.
#[derive(Debug, Default, Clone, Copy)]
pub struct RouteChangeMonitor;

impl RouteChangeMonitor {
    pub fn new() -> Self {
        Self
    }
}

impl PathMonitor for RouteChangeMonitor {
    fn watch(&self, sink: PathSink) -> PathSubscription {
        let task = tokio::spawn(async move {
            let manager = match RouteManager::new().await {
                Ok(m) => m,
                Err(e) => {
                    log::error!("Path monitor unavailable: {}", e);
                    return;
                }
            };

            let mut current = current_path(&manager).await;
            log::debug!("Initial network path: {}", current);

            let changes = manager.changes();
            futures::pin_mut!(changes);

            while let Some(change) = changes.next().await {
                log::trace!("Route change: {:?}", change);
                let path = current_path(&manager).await;
                if path != current {
                    current = path.clone();
                    sink(path);
                }
            }

            log::debug!("Route change stream ended");
        });

        PathSubscription::from_task(task)
    }
}

async fn current_path(manager: &RouteManager) -> NetworkPath {
    match manager.default_route().await {
        Ok(route) => NetworkPath::from_default_route(route.as_ref()),
        Err(e) => {
            log::warn!("Failed to read default route: {}", e);
            NetworkPath::unsatisfied()
        }
    }
}

#[derive(Default)]
struct ManualInner {
    next_id: AtomicU64,
    sinks: Mutex<Vec<(u64, PathSink)>>,
}

/// Path monitor whose updates are pushed by hand
///
/// Useful for tests and for embedders that learn about path changes from
/// their host platform.
#[derive(Clone, Default)]
pub struct ManualPathMonitor {
    inner: Arc<ManualInner>,
}

impl ManualPathMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `path` to every active subscriber
    pub fn emit(&self, path: NetworkPath) {
        let sinks: Vec<PathSink> = self
            .inner
            .sinks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, sink)| sink.clone())
            .collect();

        for sink in sinks {
            sink(path.clone());
        }
    }

    /// Number of active subscriptions
    pub fn subscribers(&self) -> usize {
        self.inner.sinks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl PathMonitor for ManualPathMonitor {
    fn watch(&self, sink: PathSink) -> PathSubscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .sinks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, sink));

        let inner = self.inner.clone();
        PathSubscription::new(move || {
            inner
                .sinks
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .retain(|(sid, _)| *sid != id);
        })
    }
}

impl fmt::Debug for ManualPathMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualPathMonitor")
            .field("subscribers", &self.subscribers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn wifi() -> NetworkPath {
        NetworkPath {
            status: PathStatus::Satisfied,
            interfaces: vec!["wlan0".into()],
            gateway: Some("192.168.1.1".parse().unwrap()),
        }
    }

    #[test]
    fn test_manual_monitor_delivers_until_cancelled() {
        let monitor = ManualPathMonitor::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = seen.clone();
        let sub = monitor.watch(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(monitor.subscribers(), 1);

        monitor.emit(wifi());
        monitor.emit(NetworkPath::unsatisfied());
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        sub.cancel();
        assert_eq!(monitor.subscribers(), 0);
        monitor.emit(wifi());
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_subscription_cancels_on_drop() {
        let monitor = ManualPathMonitor::new();
        {
            let _sub = monitor.watch(Arc::new(|_| {}));
            assert_eq!(monitor.subscribers(), 1);
        }
        assert_eq!(monitor.subscribers(), 0);
    }

    #[test]
    fn test_path_from_default_route() {
        let route = wg_tun::Route::new("0.0.0.0/0".parse().unwrap(), "10.0.0.1".parse().unwrap())
            .with_interface("eth0");
        let path = NetworkPath::from_default_route(Some(&route));
        assert_eq!(path.status, PathStatus::Satisfied);
        assert_eq!(path.interfaces, vec!["eth0".to_string()]);
        assert_eq!(path.to_string(), "satisfied [eth0] via 10.0.0.1");

        assert_eq!(NetworkPath::from_default_route(None), NetworkPath::unsatisfied());
    }
}
