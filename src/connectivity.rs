use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectivityError {
    #[error("a reconnect listener is already running")]
    AlreadyListening,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    WentOnline,
    WentOffline,
}

/// Invoked once per offline -> online transition.
#[async_trait]
pub trait ReconnectHandler: Send + Sync {
    async fn on_reconnect(&self);
}

/// Tracks reachability as reported by the host and queues one reconnect
/// notification per transition to online. Notifications are handed to the
/// listener strictly one after another.
pub struct ConnectivityMonitor {
    online: AtomicBool,
    reconnects: mpsc::UnboundedSender<()>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<()>>>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            online: AtomicBool::new(initially_online),
            reconnects: tx,
            receiver: Mutex::new(Some(rx)),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Feeds a platform `online`/`offline` event. Repeating the current state
    /// is not a transition.
    pub fn set_online(&self, online: bool) -> Option<Transition> {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        match (was_online, online) {
            (false, true) => {
                info!("connectivity restored");
                // The receiver lives as long as `self` unless a listener task ended.
                let _ = self.reconnects.send(());
                Some(Transition::WentOnline)
            }
            (true, false) => {
                info!("connectivity lost");
                Some(Transition::WentOffline)
            }
            _ => None,
        }
    }

    /// Spawns the task that runs `handler` for each queued reconnect. The task
    /// holds the handler weakly and stops once it has been dropped.
    pub fn listen(
        &self,
        handler: Arc<dyn ReconnectHandler>,
    ) -> Result<JoinHandle<()>, ConnectivityError> {
        let mut rx = self
            .receiver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or(ConnectivityError::AlreadyListening)?;
        let weak: Weak<dyn ReconnectHandler> = Arc::downgrade(&handler);

        Ok(tokio::spawn(async move {
            while rx.recv().await.is_some() {
                let Some(handler) = weak.upgrade() else {
                    debug!("reconnect handler dropped, stopping listener");
                    break;
                };
                handler.on_reconnect().await;
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct CountingHandler {
        calls: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
        notify: Notify,
    }

    #[async_trait]
    impl ReconnectHandler for CountingHandler {
        async fn on_reconnect(&self) {
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now_active, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.notify.notify_one();
        }
    }

    async fn wait_for_calls(handler: &CountingHandler, expected: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while handler.calls.load(Ordering::SeqCst) < expected {
                handler.notify.notified().await;
            }
        })
        .await
        .expect("reconnect handler was not called in time");
    }

    #[test]
    fn transitions_flip_state() {
        let monitor = ConnectivityMonitor::new(true);
        assert!(monitor.is_online());
        assert_eq!(monitor.set_online(true), None);
        assert_eq!(monitor.set_online(false), Some(Transition::WentOffline));
        assert!(!monitor.is_online());
        assert_eq!(monitor.set_online(false), None);
        assert_eq!(monitor.set_online(true), Some(Transition::WentOnline));
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn handler_runs_once_per_transition_to_online() {
        let monitor = ConnectivityMonitor::new(false);
        let handler = Arc::new(CountingHandler::default());
        let _task = monitor.listen(handler.clone()).unwrap();

        monitor.set_online(true);
        monitor.set_online(true);
        wait_for_calls(&handler, 1).await;

        monitor.set_online(false);
        monitor.set_online(true);
        wait_for_calls(&handler, 2).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rapid_transitions_never_overlap() {
        let monitor = ConnectivityMonitor::new(false);
        let handler = Arc::new(CountingHandler::default());
        let _task = monitor.listen(handler.clone()).unwrap();

        for _ in 0..3 {
            monitor.set_online(true);
            monitor.set_online(false);
        }
        wait_for_calls(&handler, 3).await;

        assert_eq!(handler.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn only_one_listener() {
        let monitor = ConnectivityMonitor::new(true);
        let handler: Arc<dyn ReconnectHandler> = Arc::new(CountingHandler::default());
        let _task = monitor.listen(handler.clone()).unwrap();
        assert_eq!(
            monitor.listen(handler).unwrap_err(),
            ConnectivityError::AlreadyListening
        );
    }

    #[tokio::test]
    async fn listener_stops_when_handler_dropped() {
        let monitor = ConnectivityMonitor::new(false);
        let handler = Arc::new(CountingHandler::default());
        let task = monitor.listen(handler.clone()).unwrap();
        drop(handler);

        monitor.set_online(true);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("listener did not stop")
            .unwrap();
    }
}
