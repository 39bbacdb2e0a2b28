//! Timer utilities
//!
//! Wall-clock timing for whole runs and for the phases of a single unit.

use std::fmt;
use std::time::{Duration, Instant};

/// Simple timer for measuring elapsed time
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    label: String,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            label: label.into(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }

    /// Stop timer and return elapsed time
    pub fn stop(self) -> Duration {
        let elapsed = self.elapsed();
        tracing::debug!("{}: {:.3} secs", self.label, elapsed.as_secs_f64());
        elapsed
    }
}

/// Time spent in each phase of a state machine
///
/// Entering a phase closes the previous one; the last phase stays open until
/// [`PhaseTimer::finish`] is called.
#[derive(Debug)]
pub struct PhaseTimer<P> {
    start: Instant,
    current: Option<(P, Instant)>,
    laps: Vec<(P, Duration)>,
}

impl<P: Copy + fmt::Display> PhaseTimer<P> {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
            current: None,
            laps: Vec::new(),
        }
    }

    /// Close the running phase and open `phase`
    pub fn enter(&mut self, phase: P) {
        let now = Instant::now();
        if let Some((previous, since)) = self.current.replace((phase, now)) {
            self.laps.push((previous, now - since));
        }
    }

    /// Close the running phase
    pub fn finish(&mut self) {
        if let Some((phase, since)) = self.current.take() {
            self.laps.push((phase, since.elapsed()));
        }
    }

    pub fn current(&self) -> Option<P> {
        self.current.map(|(phase, _)| phase)
    }

    pub fn total(&self) -> Duration {
        self.start.elapsed()
    }

    /// Closed phases in the order they were entered
    pub fn laps(&self) -> &[(P, Duration)] {
        &self.laps
    }

    pub fn summary(&self) -> String {
        let parts: Vec<String> = self
            .laps
            .iter()
            .map(|(phase, d)| format!("{}={}ms", phase, d.as_millis()))
            .collect();
        format!("{} (total {}ms)", parts.join(" "), self.total().as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_timer() {
        let timer = Timer::start("test");
        sleep(Duration::from_millis(10));
        assert!(timer.elapsed() >= Duration::from_millis(10));
    }

    #[derive(Clone, Copy, Debug, PartialEq)]
    enum Step {
        One,
        Two,
    }

    impl fmt::Display for Step {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{self:?}")
        }
    }

    #[test]
    fn test_phase_timer() {
        let mut timer = PhaseTimer::start();
        timer.enter(Step::One);
        sleep(Duration::from_millis(10));
        timer.enter(Step::Two);
        assert_eq!(timer.current(), Some(Step::Two));
        timer.finish();

        let laps = timer.laps();
        assert_eq!(laps.len(), 2);
        assert_eq!(laps[0].0, Step::One);
        assert!(laps[0].1 >= Duration::from_millis(10));
        assert!(timer.current().is_none());
        assert!(timer.summary().starts_with("One="));
    }
}
