// src/core/timer.rs

use log::debug;
use std::time::{Duration, Instant};

/// Times the stages of a multi-step operation such as the native bootstrap.
///
/// Each [`StageTimer::mark`] logs the time spent since the previous mark. The
/// total is logged when the timer is dropped, so early returns are covered too.
#[derive(Debug)]
pub struct StageTimer {
    operation: &'static str,
    started: Instant,
    last_mark: Instant,
    stages: Vec<(&'static str, Duration)>,
}

impl StageTimer {
    pub fn start(operation: &'static str) -> Self {
        let now = Instant::now();
        Self {
            operation,
            started: now,
            last_mark: now,
            stages: Vec::new(),
        }
    }

    /// Closes the current stage under `stage` and returns its duration.
    pub fn mark(&mut self, stage: &'static str) -> Duration {
        let now = Instant::now();
        let spent = now.duration_since(self.last_mark);
        self.last_mark = now;
        self.stages.push((stage, spent));
        debug!("{} / {}: {} µs", self.operation, stage, spent.as_micros());
        spent
    }

    /// Stages closed so far, in order.
    pub fn stages(&self) -> &[(&'static str, Duration)] {
        &self.stages
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        debug!(
            "{}: {} µs over {} stage(s)",
            self.operation,
            self.started.elapsed().as_micros(),
            self.stages.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marks_are_recorded_in_order() {
        let mut timer = StageTimer::start("bootstrap");
        timer.mark("resolve");
        std::thread::sleep(Duration::from_millis(5));
        let load = timer.mark("load");

        let names: Vec<&str> = timer.stages().iter().map(|(name, _)| *name).collect();
        assert_eq!(names, ["resolve", "load"]);
        assert!(load >= Duration::from_millis(5));
    }
}
