use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{task::JoinHandle, time::sleep};

struct Pending {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Runs the most recently triggered action once `delay` has passed without a
/// newer trigger. An action that already started is never cancelled.
pub struct Debouncer {
    delay: Duration,
    generation: AtomicU64,
    pending: Arc<Mutex<Option<Pending>>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            generation: AtomicU64::new(0),
            pending: Arc::new(Mutex::new(None)),
        }
    }

    pub fn trigger<F, Fut>(&self, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = self.delay;
        let slot = Arc::clone(&self.pending);

        // Held across spawn so the timer cannot observe the slot before this
        // generation is recorded in it.
        let mut pending = self.pending.lock();
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            {
                let mut pending = slot.lock();
                match pending.as_ref() {
                    Some(current) if current.generation == generation => {
                        pending.take();
                    }
                    _ => return,
                }
            }
            action().await;
        });
        if let Some(previous) = pending.replace(Pending { generation, handle }) {
            previous.handle.abort();
        }
    }

    pub fn cancel(&self) {
        if let Some(previous) = self.pending.lock().take() {
            previous.handle.abort();
        }
    }

    #[cfg(test)]
    pub fn is_pending(&self) -> bool {
        self.pending.lock().is_some()
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counter_action(counter: &Arc<AtomicUsize>) -> impl FnOnce() -> futures::future::Ready<()> + Send + 'static {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_triggers_collapse_into_one_run() {
        let debouncer = Debouncer::new(Duration::from_millis(1_500));
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            debouncer.trigger(counter_action(&runs));
            tokio::time::advance(Duration::from_millis(500)).await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(debouncer.is_pending());

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn separated_triggers_each_fire() {
        let debouncer = Debouncer::new(Duration::from_millis(100));
        let runs = Arc::new(AtomicUsize::new(0));

        debouncer.trigger(counter_action(&runs));
        tokio::time::sleep(Duration::from_millis(150)).await;
        debouncer.trigger(counter_action(&runs));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_drops_pending_action() {
        let debouncer = Debouncer::new(Duration::from_millis(100));
        let runs = Arc::new(AtomicUsize::new(0));

        debouncer.trigger(counter_action(&runs));
        debouncer.cancel();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
