//! Periodic background work with cooperative shutdown.
//!
//! A [`PeriodicTask`] runs a synchronous job on a fixed interval inside a
//! tokio task. Stopping it sends a [`ShutdownSignal`] over a broadcast
//! channel and joins the task with a bounded timeout.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Shutdown signal sent via broadcast channel.
#[derive(Debug, Clone)]
pub struct ShutdownSignal;

type TickFn = Arc<dyn Fn() -> ControlFlow<()> + Send + Sync>;

/// Handle to a running periodic loop.
pub struct PeriodicTask {
    name: &'static str,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Spawn `tick` every `period` on the current tokio runtime.
    ///
    /// The first tick fires one full period after spawning. Each tick runs on
    /// the blocking pool. Returning `ControlFlow::Break` ends the loop.
    pub fn spawn<F>(name: &'static str, period: Duration, tick: F) -> Self
    where
        F: Fn() -> ControlFlow<()> + Send + Sync + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let tick: TickFn = Arc::new(tick);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(task = name, period_ms = period.as_millis() as u64, "background task started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!(task = name, "shutdown signal received");
                        break;
                    }
                    _ = ticker.tick() => {
                        let job = Arc::clone(&tick);
                        match tokio::task::spawn_blocking(move || job()).await {
                            Ok(ControlFlow::Continue(())) => {}
                            Ok(ControlFlow::Break(())) => break,
                            Err(e) => warn!(task = name, error = %e, "background tick failed"),
                        }
                    }
                }
            }

            info!(task = name, "background task stopped");
        });

        Self {
            name,
            shutdown_tx,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Signal the loop to stop and wait up to `timeout` for it to exit.
    ///
    /// Returns false if the task had to be abandoned after the timeout.
    pub async fn stop(mut self, timeout: Duration) -> bool {
        let _ = self.shutdown_tx.send(ShutdownSignal);
        let Some(handle) = self.handle.take() else {
            return true;
        };
        let abort = handle.abort_handle();

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(task = self.name, error = %e, "background task ended abnormally");
                true
            }
            Err(_) => {
                warn!(
                    task = self.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "background task did not stop in time, abandoning it"
                );
                abort.abort();
                false
            }
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(ShutdownSignal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_ticks_until_stopped() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let task = PeriodicTask::spawn("counter", Duration::from_millis(5), move || {
            seen.fetch_add(1, Ordering::SeqCst);
            ControlFlow::Continue(())
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(task.stop(Duration::from_secs(2)).await);
        assert!(count.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_break_ends_loop() {
        let task = PeriodicTask::spawn("once", Duration::from_millis(5), || ControlFlow::Break(()));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(task.is_finished());
        assert!(task.stop(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_stop_before_first_tick() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let task = PeriodicTask::spawn("idle", Duration::from_secs(3600), move || {
            seen.fetch_add(1, Ordering::SeqCst);
            ControlFlow::Continue(())
        });
        assert!(task.stop(Duration::from_secs(1)).await);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_slow_tick_times_out() {
        let task = PeriodicTask::spawn("slow", Duration::from_millis(1), || {
            std::thread::sleep(Duration::from_millis(300));
            ControlFlow::Continue(())
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!task.stop(Duration::from_millis(10)).await);
    }
}
