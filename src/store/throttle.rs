//! Escalating debounce for optimistic writes.
//!
//! The first call after a quiet period waits `delays[0]`. Calls made while a run is pending
//! replace its argument. Each run moves to the next delay (capped at the last one), and a
//! quiet period as long as the active delay falls back to `delays[0]`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::platform::runtime::{sleep, spawn_detached, PlatformFuture};

pub type ThrottledAction<A> = Arc<dyn Fn(A) -> PlatformFuture<'static, ()> + Send + Sync + 'static>;

pub struct Throttle<A> {
    inner: Arc<ThrottleInner<A>>,
}

struct ThrottleInner<A> {
    delays: Vec<Duration>,
    action: ThrottledAction<A>,
    state: Mutex<ThrottleState<A>>,
}

struct ThrottleState<A> {
    pending: Option<A>,
    scheduled: bool,
    delay_index: usize,
    quiet_generation: u64,
}

impl<A> Throttle<A>
where
    A: Send + 'static,
{
    /// `delays` must not be empty; an empty list runs immediately.
    pub fn new(delays: Vec<Duration>, action: ThrottledAction<A>) -> Self {
        Self {
            inner: Arc::new(ThrottleInner {
                delays,
                action,
                state: Mutex::new(ThrottleState {
                    pending: None,
                    scheduled: false,
                    delay_index: 0,
                    quiet_generation: 0,
                }),
            }),
        }
    }

    pub fn call(&self, argument: A) {
        let delay = {
            let mut state = self.inner.state.lock().unwrap();
            state.pending = Some(argument);
            state.quiet_generation += 1;
            if state.scheduled {
                return;
            }
            state.scheduled = true;
            self.inner.delay_at(state.delay_index)
        };

        let inner = Arc::clone(&self.inner);
        spawn_detached(async move {
            sleep(delay).await;
            ThrottleInner::run(inner).await;
        });
    }

    /// Whether a run is waiting for its delay.
    pub fn is_pending(&self) -> bool {
        self.inner.state.lock().unwrap().scheduled
    }

    pub fn current_delay(&self) -> Duration {
        let state = self.inner.state.lock().unwrap();
        self.inner.delay_at(state.delay_index)
    }
}

impl<A> ThrottleInner<A>
where
    A: Send + 'static,
{
    fn delay_at(&self, index: usize) -> Duration {
        self.delays
            .get(index)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    async fn run(inner: Arc<Self>) {
        let (argument, active_delay, generation) = {
            let mut state = inner.state.lock().unwrap();
            state.scheduled = false;
            state.delay_index = (state.delay_index + 1).min(inner.delays.len().saturating_sub(1));
            state.quiet_generation += 1;
            (
                state.pending.take(),
                inner.delay_at(state.delay_index),
                state.quiet_generation,
            )
        };

        let reset = Arc::clone(&inner);
        spawn_detached(async move {
            sleep(active_delay).await;
            let mut state = reset.state.lock().unwrap();
            if state.quiet_generation == generation && !state.scheduled {
                state.delay_index = 0;
            }
        });

        if let Some(argument) = argument {
            (inner.action)(argument).await;
        }
    }
}

impl<A> Clone for Throttle<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording_throttle(delays: &[u64]) -> (Throttle<u32>, Arc<Mutex<Vec<u32>>>) {
        let runs = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&runs);
        let action: ThrottledAction<u32> =
            Arc::new(move |value: u32| -> PlatformFuture<'static, ()> {
                sink.lock().unwrap().push(value);
                Box::pin(async {})
            });
        let delays = delays.iter().copied().map(Duration::from_millis).collect();
        (Throttle::new(delays, action), runs)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_runs_once_with_last_argument() {
        let (throttle, runs) = recording_throttle(&[50, 1000]);
        for value in 1..=5 {
            throttle.call(value);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(*runs.lock().unwrap(), vec![5]);
        assert!(!throttle.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn delays_escalate_then_reset_after_quiet_period() {
        let (throttle, runs) = recording_throttle(&[50, 1000]);
        throttle.call(1);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(throttle.current_delay(), Duration::from_millis(1000));

        throttle.call(2);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(*runs.lock().unwrap(), vec![1]);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(*runs.lock().unwrap(), vec![1, 2]);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(throttle.current_delay(), Duration::from_millis(50));
    }
}
