//! Named background-task registry
//!
//! Every periodic task a session spawns is registered here under a stable
//! name, so session teardown is one `cancel_all` instead of a scatter of
//! individually tracked handles.

use std::collections::HashMap;
use tokio::task::JoinHandle;
use tracing::debug;

/// Owns the background tasks of one session
#[derive(Default)]
pub struct TimerSet {
    tasks: parking_lot::Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task under `name`, aborting any task previously held
    /// under the same name
    pub fn register(&self, name: &str, handle: JoinHandle<()>) {
        if let Some(previous) = self.tasks.lock().insert(name.to_string(), handle) {
            debug!(name, "replacing registered task");
            previous.abort();
        }
    }

    /// Abort and forget the task under `name`, if any
    pub fn cancel(&self, name: &str) {
        if let Some(handle) = self.tasks.lock().remove(name) {
            debug!(name, "cancelling task");
            handle.abort();
        }
    }

    /// Abort every registered task
    pub fn cancel_all(&self) {
        let mut tasks = self.tasks.lock();
        for (name, handle) in tasks.drain() {
            debug!(name = %name, "cancelling task");
            handle.abort();
        }
    }

    /// Number of registered tasks
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn looping_task(flag: Arc<AtomicBool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(5)).await;
                flag.store(true, Ordering::SeqCst);
            }
        })
    }

    #[tokio::test]
    async fn test_cancel_stops_named_task() {
        let timers = TimerSet::new();
        let flag = Arc::new(AtomicBool::new(false));
        timers.register("beat", looping_task(Arc::clone(&flag)));
        assert_eq!(timers.len(), 1);

        timers.cancel("beat");
        tokio::time::sleep(Duration::from_millis(20)).await;
        flag.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!flag.load(Ordering::SeqCst));
        assert!(timers.is_empty());
    }

    #[tokio::test]
    async fn test_register_replaces_previous_task() {
        let timers = TimerSet::new();
        let first = Arc::new(AtomicBool::new(false));
        let second = Arc::new(AtomicBool::new(false));
        timers.register("beat", looping_task(Arc::clone(&first)));
        timers.register("beat", looping_task(Arc::clone(&second)));
        assert_eq!(timers.len(), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        first.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!first.load(Ordering::SeqCst));
        assert!(second.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_all_drains_registry() {
        let timers = TimerSet::new();
        for name in ["a", "b", "c"] {
            timers.register(name, looping_task(Arc::new(AtomicBool::new(false))));
        }
        assert_eq!(timers.len(), 3);
        timers.cancel_all();
        assert!(timers.is_empty());
    }
}
