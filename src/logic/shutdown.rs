//! Shutdown Signal
//!
//! One flag shared by every loop. Threads wait on a condvar, async tasks on a
//! `tokio::sync::Notify`; `trigger` wakes both. Once set it stays set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

struct Inner {
    triggered: AtomicBool,
    lock: Mutex<()>,
    cvar: Condvar,
    notify: Notify,
}

#[derive(Clone)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                triggered: AtomicBool::new(false),
                lock: Mutex::new(()),
                cvar: Condvar::new(),
                notify: Notify::new(),
            }),
        }
    }

    pub fn trigger(&self) {
        {
            let _guard = self.inner.lock.lock();
            self.inner.triggered.store(true, Ordering::SeqCst);
            self.inner.cvar.notify_all();
        }
        self.inner.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Sleep up to `timeout`, returning early on shutdown.
    /// Returns `true` if shutdown was triggered.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock.lock();
        while !self.is_triggered() {
            if self.inner.cvar.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        self.is_triggered()
    }

    /// Resolves once shutdown has been triggered
    pub async fn notified(&self) {
        loop {
            // Registered before the flag check so a concurrent trigger is not missed
            let notified = self.inner.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_times_out_without_trigger() {
        let signal = ShutdownSignal::new();
        let started = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(20)));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_trigger_wakes_sleeping_thread() {
        let signal = ShutdownSignal::new();
        let waiter = signal.clone();
        let handle = std::thread::spawn(move || waiter.wait_timeout(Duration::from_secs(30)));

        std::thread::sleep(Duration::from_millis(20));
        let started = Instant::now();
        signal.trigger();
        assert!(handle.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_notified_after_trigger_resolves() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        tokio::time::timeout(Duration::from_secs(1), signal.notified())
            .await
            .unwrap();
    }
}
