//! Reconnect timer.
//!
//! At most one reconnect is ever pending: scheduling a new one cancels the
//! previous. Each schedule carries a generation number so that a firing
//! that raced a later cancel can be recognised and ignored.

use std::time::Duration;
use tokio::task::JoinHandle;

/// A single cancellable delayed callback.
#[derive(Debug, Default)]
pub struct ReconnectTimer {
    task: Option<JoinHandle<()>>,
    generation: u64,
}

impl ReconnectTimer {
    /// Create an idle timer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `fire` with the new generation after `delay`, replacing any
    /// pending schedule.
    pub fn schedule<F>(&mut self, delay: Duration, fire: F) -> u64
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel();
        self.generation += 1;

        let generation = self.generation;
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire(generation);
        }));
        generation
    }

    /// Cancel the pending schedule. Returns `true` if one was pending.
    pub fn cancel(&mut self) -> bool {
        match self.task.take() {
            Some(task) => {
                let pending = !task.is_finished();
                task.abort();
                pending
            }
            None => false,
        }
    }

    /// Check if a schedule is waiting to fire.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Consume a firing. Returns `true` only for the latest, uncancelled
    /// schedule.
    pub fn acknowledge(&mut self, generation: u64) -> bool {
        if generation == self.generation && self.task.is_some() {
            self.task = None;
            true
        } else {
            false
        }
    }
}

impl Drop for ReconnectTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn sender(tx: &mpsc::UnboundedSender<u64>) -> impl FnOnce(u64) + Send + 'static {
        let tx = tx.clone();
        move |generation| {
            let _ = tx.send(generation);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = ReconnectTimer::new();

        let generation = timer.schedule(Duration::from_secs(5), sender(&tx));
        assert!(timer.is_pending());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.try_recv().unwrap(), generation);
        assert!(timer.acknowledge(generation));
        assert!(!timer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescheduling_leaves_one_pending() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = ReconnectTimer::new();

        for _ in 0..5 {
            timer.schedule(Duration::from_secs(5), sender(&tx));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let last = timer.schedule(Duration::from_secs(5), sender(&tx));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(rx.try_recv().unwrap(), last);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = ReconnectTimer::new();

        timer.schedule(Duration::from_secs(5), sender(&tx));
        assert!(timer.cancel());
        assert!(!timer.cancel());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_generation_ignored() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = ReconnectTimer::new();

        let first = timer.schedule(Duration::from_secs(1), sender(&tx));
        tokio::time::sleep(Duration::from_secs(2)).await;
        // Fired, but a new schedule supersedes it before it is consumed.
        let second = timer.schedule(Duration::from_secs(5), sender(&tx));

        assert_eq!(rx.try_recv().unwrap(), first);
        assert!(!timer.acknowledge(first));
        assert!(timer.is_pending());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(timer.acknowledge(rx.try_recv().unwrap()));
        assert_ne!(first, second);
    }
}
