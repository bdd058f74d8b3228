//! One-shot cancellable deadline.
//!
//! Used to bound blocking startup calls. The guard tracks whether it is armed,
//! stopped or fired so the caller can tell a late deadline apart from a
//! successful completion and ignore whichever lost the race.

use std::{
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use tokio_util::sync::CancellationToken;

const ARMED: u8 = 1;
const STOPPED: u8 = 2;
const FIRED: u8 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardState {
    Idle,
    Armed,
    Stopped,
    Fired,
}

#[derive(Default)]
pub struct TimeoutGuard {
    // Shared with the armed timer task. Replaced on every `start` so a task
    // from an earlier arming cannot flip the state of a later one.
    state: Mutex<Option<Arming>>,
}

struct Arming {
    flag: Arc<AtomicU8>,
    cancel: CancellationToken,
}

impl TimeoutGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the deadline. Re-arming replaces (and cancels) the previous timer.
    pub fn start<F>(&self, deadline: Duration, on_timeout: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        let flag = Arc::new(AtomicU8::new(ARMED));
        let cancel = CancellationToken::new();

        {
            let mut slot = self.slot();
            if let Some(prev) = slot.take() {
                prev.cancel.cancel();
            }
            *slot = Some(Arming {
                flag: flag.clone(),
                cancel: cancel.clone(),
            });
        }

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(deadline) => {
                    if flag
                        .compare_exchange(ARMED, FIRED, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        on_timeout();
                    }
                }
            }
        });

        self
    }

    /// Disarm the deadline if it has not fired yet.
    ///
    /// Returns `true` if this call disarmed it, `false` if it had already
    /// fired (or was never armed).
    pub fn stop(&self) -> bool {
        let slot = self.slot();
        let Some(arming) = slot.as_ref() else {
            return false;
        };
        arming.cancel.cancel();
        arming
            .flag
            .compare_exchange(ARMED, STOPPED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn state(&self) -> GuardState {
        match self.slot().as_ref().map(|a| a.flag.load(Ordering::SeqCst)) {
            Some(ARMED) => GuardState::Armed,
            Some(STOPPED) => GuardState::Stopped,
            Some(FIRED) => GuardState::Fired,
            _ => GuardState::Idle,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.state() == GuardState::Armed
    }

    pub fn has_fired(&self) -> bool {
        self.state() == GuardState::Fired
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Arming>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        if let Some(arming) = self.slot().take() {
            arming.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_deadline() {
        let guard = TimeoutGuard::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        guard.start(Duration::from_secs(12), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert!(guard.is_armed());

        tokio::time::sleep(Duration::from_secs(13)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(guard.has_fired());
        assert!(!guard.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_deadline_suppresses_callback() {
        let guard = TimeoutGuard::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        guard.start(Duration::from_secs(1), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(guard.stop());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(guard.state(), GuardState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_previous_arming() {
        let guard = TimeoutGuard::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let c1 = calls.clone();
        guard.start(Duration::from_secs(1), move || {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = calls.clone();
        guard.start(Duration::from_secs(5), move || {
            c2.fetch_add(10, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(guard.is_armed());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }
}
