//! Cancellable background tasks: a fixed-interval repeater and a debouncer.
//!
//! Both run on tokio's clock, so tests drive them with a paused runtime.
//! Dropping a task handle stops it; an action already running is aborted at
//! its next await point. `DebouncedTask::close` lets that action finish.

#[cfg(test)]
#[path = "task_test.rs"]
mod task_test;

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

// =============================================================================
// REPEATING
// =============================================================================

/// Runs an action every `period`, starting immediately. Ticks that come due
/// while the action is still running are skipped, never queued.
pub struct RepeatingTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl RepeatingTask {
    pub fn start<F, Fut>(name: &'static str, period: Duration, mut action: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                action().await;
            }
        });
        debug!(task = name, period_ms = period.as_millis(), "repeating task started");
        Self { name, handle }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn stop(&self) {
        if !self.handle.is_finished() {
            self.handle.abort();
            debug!(task = self.name, "repeating task stopped");
        }
    }
}

impl Drop for RepeatingTask {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// DEBOUNCED
// =============================================================================

/// Runs an action once `quiet` has passed since the last trigger. Triggers
/// that arrive while the action runs start a new quiet period afterwards.
pub struct DebouncedTask {
    name: &'static str,
    trigger: Option<mpsc::UnboundedSender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl DebouncedTask {
    pub fn start<F, Fut>(name: &'static str, quiet: Duration, mut action: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (trigger, mut rx) = mpsc::unbounded_channel::<()>();
        let handle = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                loop {
                    tokio::select! {
                        more = rx.recv() => {
                            if more.is_none() {
                                return;
                            }
                        }
                        () = tokio::time::sleep(quiet) => break,
                    }
                }
                action().await;
            }
        });
        Self { name, trigger: Some(trigger), handle: Some(handle) }
    }

    /// Restart the quiet period.
    pub fn trigger(&self) {
        if self.trigger.as_ref().is_none_or(|tx| tx.send(()).is_err()) {
            debug!(task = self.name, "trigger after stop ignored");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel any pending run. A running action is aborted at its next await.
    pub fn stop(&self) {
        if let Some(handle) = &self.handle
            && !handle.is_finished()
        {
            handle.abort();
            debug!(task = self.name, "debounced task stopped");
        }
    }

    /// Stop taking triggers and wait for a running action to finish. A run
    /// still in its quiet period is dropped.
    pub async fn close(mut self) {
        self.trigger = None;
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Err(e) = handle.await {
            warn!(task = self.name, error = %e, "debounced task ended abnormally");
        }
        debug!(task = self.name, "debounced task closed");
    }
}

impl Drop for DebouncedTask {
    fn drop(&mut self) {
        self.stop();
    }
}
