// src/system/completion.rs

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Slot {
    code: Mutex<Option<i32>>,
    resolved: Condvar,
}

/// A child's exit code, available once the child has terminated.
///
/// Clones observe the same outcome. The value is set exactly once.
#[derive(Debug, Clone, Default)]
pub struct ExitFuture {
    slot: Arc<Slot>,
}

impl ExitFuture {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<i32>> {
        self.slot
            .code
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stores the exit code and wakes every waiter. Returns `false` if already resolved.
    pub(crate) fn resolve(&self, code: i32) -> bool {
        let mut guard = self.lock();
        if guard.is_some() {
            return false;
        }
        *guard = Some(code);
        self.slot.resolved.notify_all();
        true
    }

    /// Blocks until the exit code is known.
    pub fn wait(&self) -> i32 {
        let mut guard = self.lock();
        loop {
            if let Some(code) = *guard {
                return code;
            }
            guard = self
                .slot
                .resolved
                .wait(guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Blocks for at most `timeout`. Returns `None` if the child is still running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<i32> {
        // A deadline past what `Instant` can represent is no deadline at all.
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return Some(self.wait());
        };
        let mut guard = self.lock();
        loop {
            if let Some(code) = *guard {
                return Some(code);
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            guard = self
                .slot
                .resolved
                .wait_timeout(guard, remaining)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
    }

    /// The exit code if already known. Never blocks.
    pub fn try_get(&self) -> Option<i32> {
        *self.lock()
    }

    pub fn is_resolved(&self) -> bool {
        self.try_get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_once_for_every_clone() {
        let future = ExitFuture::new();
        let observer = future.clone();
        assert_eq!(observer.try_get(), None);

        assert!(future.resolve(3));
        assert!(!future.resolve(4));

        assert_eq!(observer.wait(), 3);
        assert_eq!(observer.try_get(), Some(3));
    }

    #[test]
    fn test_wait_blocks_until_resolved() {
        let future = ExitFuture::new();
        let waiter = std::thread::spawn({
            let future = future.clone();
            move || future.wait()
        });

        std::thread::sleep(Duration::from_millis(50));
        future.resolve(0);

        assert_eq!(waiter.join().unwrap(), 0);
    }

    #[test]
    fn test_wait_timeout_expires() {
        let future = ExitFuture::new();
        assert_eq!(future.wait_timeout(Duration::from_millis(20)), None);
        assert!(!future.is_resolved());
    }

    #[test]
    fn test_wait_timeout_accepts_unbounded_duration() {
        let resolved = ExitFuture::new();
        resolved.resolve(5);
        assert_eq!(resolved.wait_timeout(Duration::MAX), Some(5));

        let future = ExitFuture::new();
        let waiter = std::thread::spawn({
            let future = future.clone();
            move || future.wait_timeout(Duration::MAX)
        });
        std::thread::sleep(Duration::from_millis(50));
        future.resolve(9);

        assert_eq!(waiter.join().unwrap(), Some(9));
    }
}
