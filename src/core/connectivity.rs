//! Connectivity recovery.
//!
//! When uploads or deletes are deferred for lack of connectivity, the
//! coordinator asks a [`Connectivity`] implementation to trigger a full
//! reconciliation sweep once the remote side is reachable again. Which
//! implementation is used is decided once, at startup:
//!
//! - [`ProbeMonitor`]: active probing for platforms whose online signal
//!   cannot be trusted. Fixed interval, no backoff.
//! - [`NativeMonitor`]: follows a platform-provided online signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::adapters::Reachability;
use crate::domain::SyncMessage;

use super::coordinator::SyncHandle;

/// Default spacing between recovery attempts
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(5);

/// Recovery scheduling capability
pub trait Connectivity: Send + Sync {
    /// Best current guess at whether the remote side is reachable
    fn is_online(&self) -> bool;

    /// A remote call just failed at the transport level
    fn report_unreachable(&self) {}

    /// A remote call just succeeded
    fn report_reachable(&self) {}

    /// Arrange for a `retry-all` to be submitted once connectivity returns.
    ///
    /// At most one recovery is outstanding; calling again while one is
    /// pending is a no-op.
    fn schedule_recovery(&self, handle: SyncHandle);
}

/// Clears the "armed" flag when the recovery task ends, however it ends
struct Disarm(Arc<AtomicBool>);

impl Drop for Disarm {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Active reachability probing
pub struct ProbeMonitor {
    prober: Arc<dyn Reachability>,
    interval: Duration,
    timeout: Duration,
    online: Arc<AtomicBool>,
    armed: Arc<AtomicBool>,
}

impl ProbeMonitor {
    pub fn new(prober: Arc<dyn Reachability>, interval: Duration, timeout: Duration) -> Self {
        Self {
            prober,
            interval,
            timeout,
            online: Arc::new(AtomicBool::new(true)),
            armed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a probe timer is currently outstanding
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }
}

impl Connectivity for ProbeMonitor {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn report_unreachable(&self) {
        self.online.store(false, Ordering::SeqCst);
    }

    fn report_reachable(&self) {
        self.online.store(true, Ordering::SeqCst);
    }

    fn schedule_recovery(&self, handle: SyncHandle) {
        if self.armed.swap(true, Ordering::SeqCst) {
            debug!("Recovery probe already pending");
            return;
        }

        let prober = Arc::clone(&self.prober);
        let online = Arc::clone(&self.online);
        let disarm = Disarm(Arc::clone(&self.armed));
        let interval = self.interval;
        let timeout = self.timeout;

        debug!(interval_ms = interval.as_millis() as u64, "Recovery probe scheduled");

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                if handle.is_closed() {
                    debug!("Sync worker gone, dropping recovery probe");
                    return;
                }

                let reachable = tokio::time::timeout(timeout, prober.probe())
                    .await
                    .unwrap_or(false);

                if reachable {
                    online.store(true, Ordering::SeqCst);
                    drop(disarm);
                    info!("Connectivity restored, triggering reconciliation");
                    if handle.submit(SyncMessage::RetryAll).await.is_err() {
                        debug!("Sync worker gone before recovery sweep");
                    }
                    return;
                }

                online.store(false, Ordering::SeqCst);
                debug!("Probe failed, rescheduling");
            }
        });
    }
}

/// Recovery driven by a platform online signal
pub struct NativeMonitor {
    signal: watch::Receiver<bool>,
    min_interval: Duration,
    armed: Arc<AtomicBool>,
}

impl NativeMonitor {
    /// Follow `signal`, waiting at least `min_interval` between recoveries
    pub fn new(signal: watch::Receiver<bool>, min_interval: Duration) -> Self {
        Self {
            signal,
            min_interval,
            armed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A monitor plus the sender the platform layer feeds
    pub fn channel(initially_online: bool, min_interval: Duration) -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(initially_online);
        (tx, Self::new(rx, min_interval))
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }
}

impl Connectivity for NativeMonitor {
    fn is_online(&self) -> bool {
        *self.signal.borrow()
    }

    fn schedule_recovery(&self, handle: SyncHandle) {
        if self.armed.swap(true, Ordering::SeqCst) {
            debug!("Recovery already registered");
            return;
        }

        let mut signal = self.signal.clone();
        let disarm = Disarm(Arc::clone(&self.armed));
        let min_interval = self.min_interval;

        tokio::spawn(async move {
            tokio::time::sleep(min_interval).await;

            while !*signal.borrow_and_update() {
                if signal.changed().await.is_err() {
                    debug!("Online signal source dropped");
                    return;
                }
            }

            drop(disarm);
            info!("Platform reports online, triggering reconciliation");
            if handle.submit(SyncMessage::RetryAll).await.is_err() {
                debug!("Sync worker gone before recovery sweep");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use crate::core::coordinator::Task;

    /// Fails the first `failures` probes, then succeeds
    struct FlakyProbe {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Reachability for FlakyProbe {
        async fn probe(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst) >= self.failures
        }
    }

    fn expect_retry_all(task: Option<Task>) {
        match task {
            Some(Task::Message(SyncMessage::RetryAll)) => {}
            other => panic!("expected retry-all, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_reschedules_until_reachable() {
        let probe = Arc::new(FlakyProbe {
            failures: 2,
            calls: AtomicUsize::new(0),
        });
        let monitor = ProbeMonitor::new(probe.clone(), DEFAULT_PROBE_INTERVAL, Duration::from_secs(1));
        let (handle, mut rx) = SyncHandle::pair(8);

        monitor.report_unreachable();
        assert!(!monitor.is_online());

        monitor.schedule_recovery(handle);
        assert!(monitor.is_armed());

        expect_retry_all(rx.recv().await);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
        assert!(monitor.is_online());
        assert!(!monitor.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_most_one_probe_outstanding() {
        let probe = Arc::new(FlakyProbe {
            failures: 0,
            calls: AtomicUsize::new(0),
        });
        let monitor = ProbeMonitor::new(probe.clone(), DEFAULT_PROBE_INTERVAL, Duration::from_secs(1));
        let (handle, mut rx) = SyncHandle::pair(8);

        monitor.schedule_recovery(handle.clone());
        monitor.schedule_recovery(handle.clone());
        monitor.schedule_recovery(handle);

        expect_retry_all(rx.recv().await);
        tokio::time::sleep(DEFAULT_PROBE_INTERVAL * 3).await;

        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_native_waits_for_online_signal() {
        let (online_tx, monitor) = NativeMonitor::channel(false, Duration::from_millis(10));
        let (handle, mut rx) = SyncHandle::pair(8);

        assert!(!monitor.is_online());
        monitor.schedule_recovery(handle.clone());
        monitor.schedule_recovery(handle);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(rx.try_recv().is_err());

        online_tx.send(true).unwrap();
        expect_retry_all(rx.recv().await);
        assert!(monitor.is_online());
        assert!(!monitor.is_armed());
    }
}
