// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Single-slot background timer.
//!
//! Each timer owns one task and one pending deadline. Scheduling only ever
//! moves the deadline earlier; when it fires, the job runs and returns the
//! next deadline, if any. Jobs never overlap.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

pub(crate) struct Timer {
    name: &'static str,
    slot: Arc<watch::Sender<Option<Instant>>>,
    task: JoinHandle<()>,
}

impl Timer {
    /// Spawns the timer task; it stays idle until scheduled.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn spawn<F, Fut>(name: &'static str, job: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<Instant>> + Send + 'static,
    {
        let (tx, mut rx) = watch::channel(None::<Instant>);
        let slot = Arc::new(tx);
        let task_slot = Arc::clone(&slot);
        let task = tokio::spawn(async move {
            loop {
                let deadline = *rx.borrow_and_update();
                let Some(at) = deadline else {
                    if rx.changed().await.is_err() {
                        return;
                    }
                    continue;
                };
                tokio::select! {
                    _ = tokio::time::sleep_until(at) => {}
                    changed = rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        continue;
                    }
                }
                trace!(timer = name, "fired");
                // Deadlines scheduled while the job runs must survive it.
                task_slot.send_if_modified(|slot| {
                    let fired = *slot == Some(at);
                    if fired {
                        *slot = None;
                    }
                    fired
                });
                let next = job().await;
                task_slot.send_modify(|slot| *slot = earliest(*slot, next));
            }
        });
        Self { name, slot, task }
    }

    /// Arms the timer for `at` unless an earlier deadline is pending.
    pub(crate) fn schedule_earliest(&self, at: Instant) {
        let changed = self.slot.send_if_modified(|slot| {
            let next = earliest(*slot, Some(at));
            let changed = next != *slot;
            *slot = next;
            changed
        });
        if changed {
            trace!(timer = self.name, "rescheduled");
        }
    }

    #[inline]
    pub(crate) fn schedule_now(&self) {
        self.schedule_earliest(Instant::now());
    }

    /// Stops the task; a job already running is dropped at its next await.
    pub(crate) fn cancel(&self) {
        self.task.abort();
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_fires_once_per_schedule() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let timer = Timer::spawn("test", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                None
            }
        });

        timer.schedule_now();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        timer.schedule_earliest(Instant::now() + Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_earlier_deadline_wins() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let timer = Timer::spawn("test", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                None
            }
        });

        timer.schedule_earliest(Instant::now() + Duration::from_secs(60));
        timer.schedule_earliest(Instant::now() + Duration::from_millis(10));
        timer.schedule_earliest(Instant::now() + Duration::from_secs(30));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_job_rearms_itself() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let timer = Timer::spawn("test", move || {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                (n < 3).then(Instant::now)
            }
        });

        timer.schedule_now();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancel_stops_timer() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let timer = Timer::spawn("test", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                None
            }
        });

        timer.cancel();
        timer.schedule_now();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
