//! Table countdown clock. Ticks once a second while running and fires its
//! callback once when it reaches zero.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

const TICK: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct Clock {
    duration_secs: u64,
    left_secs: u64,
    active: bool,
}

pub struct GameTimer {
    clock: Arc<Mutex<Clock>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Default for GameTimer {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

impl GameTimer {
    /// Sub-second parts of `duration` are dropped.
    pub fn new(duration: Duration) -> Self {
        let secs = duration.as_secs();
        Self {
            clock: Arc::new(Mutex::new(Clock {
                duration_secs: secs,
                left_secs: secs,
                active: false,
            })),
            task: Mutex::new(None),
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(lock(&self.clock).duration_secs)
    }

    pub fn time_left(&self) -> Duration {
        Duration::from_secs(lock(&self.clock).left_secs)
    }

    pub fn is_active(&self) -> bool {
        lock(&self.clock).active
    }

    /// Stops the clock and rewinds it to the new duration.
    pub fn set_duration(&self, duration: Duration) {
        self.stop();
        let mut clock = lock(&self.clock);
        clock.duration_secs = duration.as_secs();
        clock.left_secs = clock.duration_secs;
    }

    /// Starts or resumes the countdown. A clock that already ran out starts
    /// over from the full duration. Returns false when already running or
    /// when there is no time to count.
    pub fn start<F, Fut>(&self, on_time_up: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        {
            let mut clock = lock(&self.clock);
            if clock.active {
                return false;
            }
            if clock.left_secs == 0 {
                clock.left_secs = clock.duration_secs;
            }
            if clock.left_secs == 0 {
                return false;
            }
            clock.active = true;
        }

        let clock = self.clock.clone();
        let handle = tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + TICK, TICK);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let expired = {
                    let mut clock = lock(&clock);
                    if !clock.active {
                        return;
                    }
                    if clock.left_secs <= 1 {
                        clock.left_secs = 0;
                        clock.active = false;
                        true
                    } else {
                        clock.left_secs -= 1;
                        false
                    }
                };
                if expired {
                    on_time_up().await;
                    return;
                }
            }
        });
        if let Some(previous) = lock_task(&self.task).replace(handle) {
            previous.abort();
        }
        true
    }

    /// Pauses the countdown, keeping the time left. A callback already
    /// under way is left to finish.
    pub fn stop(&self) -> bool {
        let was_active = {
            let mut clock = lock(&self.clock);
            std::mem::replace(&mut clock.active, false)
        };
        if was_active {
            if let Some(task) = lock_task(&self.task).take() {
                task.abort();
            }
        }
        was_active
    }

    pub fn reset(&self) {
        self.stop();
        let mut clock = lock(&self.clock);
        clock.left_secs = clock.duration_secs;
    }

    /// Stops the countdown and any callback still running.
    pub fn cancel(&self) {
        lock(&self.clock).active = false;
        if let Some(task) = lock_task(&self.task).take() {
            task.abort();
        }
    }
}

impl Drop for GameTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// `MM:SS`, minutes uncapped.
pub fn format_time(left: Duration) -> String {
    let secs = left.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

fn lock(clock: &Mutex<Clock>) -> MutexGuard<'_, Clock> {
    clock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn lock_task(task: &Mutex<Option<JoinHandle<()>>>) -> MutexGuard<'_, Option<JoinHandle<()>>> {
    task.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
