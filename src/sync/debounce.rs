use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::task::JoinHandle;

type Sink<T> = Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;

struct Slot<T> {
    pending: Option<T>,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

/// Trailing-edge coalescing scheduler. Each `schedule` replaces the pending
/// value and restarts the window; only the last value of a burst reaches the
/// sink. Sink calls run one at a time in the order they fired.
pub struct Debouncer<T: Send + 'static> {
    window: Duration,
    sink: Sink<T>,
    slot: Arc<Mutex<Slot<T>>>,
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new<F, Fut>(window: Duration, sink: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            window,
            sink: Arc::new(move |value: T| -> BoxFuture<'static, ()> { sink(value).boxed() }),
            slot: Arc::new(Mutex::new(Slot {
                pending: None,
                generation: 0,
                timer: None,
            })),
            gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn schedule(&self, value: T) {
        let mut slot = lock(&self.slot);
        slot.generation = slot.generation.wrapping_add(1);
        slot.pending = Some(value);
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }

        let generation = slot.generation;
        let window = self.window;
        let shared = self.slot.clone();
        let sink = self.sink.clone();
        let gate = self.gate.clone();
        slot.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let value = {
                let mut slot = lock(&shared);
                if slot.generation != generation {
                    return;
                }
                // past this point the fire can no longer be aborted
                slot.timer = None;
                slot.pending.take()
            };
            if let Some(value) = value {
                let _gate = gate.lock().await;
                sink(value).await;
            }
        }));
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.slot).pending.is_some()
    }

    /// Sends the pending value now, after any fire already in flight.
    pub async fn flush(&self) -> bool {
        let value = self.take_pending();
        let _gate = self.gate.lock().await;
        match value {
            Some(value) => {
                (self.sink)(value).await;
                true
            }
            None => false,
        }
    }

    /// Drops the pending value. Returns whether there was one.
    pub fn cancel(&self) -> bool {
        self.take_pending().is_some()
    }

    /// Waits until no sink call is running.
    pub async fn idle(&self) {
        let _gate = self.gate.lock().await;
    }

    fn take_pending(&self) -> Option<T> {
        let mut slot = lock(&self.slot);
        slot.generation = slot.generation.wrapping_add(1);
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }
        slot.pending.take()
    }
}

impl<T: Send + 'static> Drop for Debouncer<T> {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.slot).timer.take() {
            timer.abort();
        }
    }
}

fn lock<T>(slot: &Mutex<Slot<T>>) -> MutexGuard<'_, Slot<T>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
