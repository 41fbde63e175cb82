//! Automated spam: one generated message, then a random pause, repeated.
//!
//! The loop runs as a tokio task owned by [`SpamDriver`]. Stopping aborts the
//! task and retires its generation under the state lock, so once `stop`
//! returns no further message can land.

use std::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::state::{lock, SharedSim};

pub struct SpamDriver {
    sim: SharedSim,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SpamDriver {
    pub fn new(sim: SharedSim) -> Self {
        Self {
            sim,
            task: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.sim).spam().enabled
    }

    /// Start spamming. Returns false if already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock().unwrap_or_else(|p| p.into_inner());
        self.start_locked(&mut task)
    }

    /// Stop spamming. Returns false if it was not running.
    pub fn stop(&self) -> bool {
        let mut task = self.task.lock().unwrap_or_else(|p| p.into_inner());
        self.stop_locked(&mut task)
    }

    /// Flip spam on/off. Returns the new state.
    ///
    /// The check and the flip happen under one task lock, so concurrent
    /// toggles alternate.
    pub fn toggle(&self) -> bool {
        let mut task = self.task.lock().unwrap_or_else(|p| p.into_inner());
        if self.is_running() {
            self.stop_locked(&mut task);
            false
        } else {
            self.start_locked(&mut task);
            true
        }
    }

    fn start_locked(&self, task: &mut Option<JoinHandle<()>>) -> bool {
        let generation = {
            let mut sim = lock(&self.sim);
            if sim.spam().enabled {
                return false;
            }
            sim.begin_spam()
        };
        info!(generation, "spam started");
        *task = Some(tokio::spawn(run(self.sim.clone(), generation)));
        true
    }

    fn stop_locked(&self, task: &mut Option<JoinHandle<()>>) -> bool {
        {
            let mut sim = lock(&self.sim);
            if !sim.spam().enabled {
                return false;
            }
            sim.end_spam();
        }
        if let Some(handle) = task.take() {
            handle.abort();
        }
        info!("spam stopped");
        true
    }
}

impl Drop for SpamDriver {
    fn drop(&mut self) {
        let task = self.task.get_mut().unwrap_or_else(|p| p.into_inner());
        if let Some(handle) = task.take() {
            handle.abort();
        }
    }
}

async fn run(sim: SharedSim, generation: u64) {
    loop {
        // the guard must be released before sleeping
        let tick = lock(&sim).spam_tick(generation);
        let Some(delay) = tick else {
            break;
        };
        tokio::time::sleep(delay).await;
    }
    debug!(generation, "spam task finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::generator::MessageGenerator;
    use crate::state::{ChatEvent, ChatSim};
    use std::time::Duration;

    fn shared_sim() -> SharedSim {
        let config = SimConfig::builtin().unwrap();
        ChatSim::new(&config, MessageGenerator::from_config(&config, Some(21))).shared()
    }

    #[tokio::test(start_paused = true)]
    async fn test_spam_writes_until_stopped() {
        let sim = shared_sim();
        let driver = SpamDriver::new(sim.clone());
        assert!(driver.start());
        tokio::time::sleep(Duration::from_secs(10)).await;
        let written = lock(&sim).log().len();
        assert!(written >= 5, "only {written} messages in 10s");

        assert!(driver.stop());
        let mut rx = lock(&sim).subscribe();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(lock(&sim).log().len(), written);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_message_is_immediate() {
        let sim = shared_sim();
        let driver = SpamDriver::new(sim.clone());
        driver.start();
        tokio::task::yield_now().await;
        assert!(!lock(&sim).log().is_empty());
        driver.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_start_and_stop() {
        let sim = shared_sim();
        let driver = SpamDriver::new(sim.clone());
        assert!(driver.start());
        assert!(!driver.start());
        assert!(driver.stop());
        assert!(!driver.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_reports_state() {
        let sim = shared_sim();
        let driver = SpamDriver::new(sim.clone());
        assert!(driver.toggle());
        assert!(driver.is_running());
        assert!(!driver.toggle());
        assert!(!driver.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_toggles_alternate() {
        let sim = shared_sim();
        let driver = SpamDriver::new(sim.clone());
        let runtime = tokio::runtime::Handle::current();
        let results: Vec<bool> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        let _guard = runtime.enter();
                        driver.toggle()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results.iter().filter(|on| **on).count(), 4);
        assert_eq!(results.iter().filter(|on| !**on).count(), 4);
        assert!(!driver.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_first_tick_writes_nothing() {
        let sim = shared_sim();
        let driver = SpamDriver::new(sim.clone());
        driver.start();
        driver.stop();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(lock(&sim).log().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_faster_speed_writes_more() {
        let slow = shared_sim();
        lock(&slow).set_speed(0).unwrap();
        let fast = shared_sim();
        lock(&fast).set_speed(100).unwrap();

        let slow_driver = SpamDriver::new(slow.clone());
        let fast_driver = SpamDriver::new(fast.clone());
        slow_driver.start();
        fast_driver.start();
        tokio::time::sleep(Duration::from_secs(20)).await;
        slow_driver.stop();
        fast_driver.stop();

        // log may have trimmed; count via ids instead
        let slow_count = lock(&slow).log().last().map(|e| e.id + 1).unwrap_or(0);
        let fast_count = lock(&fast).log().last().map(|e| e.id + 1).unwrap_or(0);
        assert!(fast_count > slow_count * 3, "fast {fast_count} vs slow {slow_count}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_emits_spam_events() {
        let sim = shared_sim();
        let mut rx = lock(&sim).subscribe();
        let driver = SpamDriver::new(sim.clone());
        driver.start();
        driver.stop();
        let enabled: Vec<bool> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|event| match event {
                ChatEvent::Spam { spam } => Some(spam.enabled),
                _ => None,
            })
            .collect();
        assert_eq!(enabled, vec![true, false]);
    }
}
