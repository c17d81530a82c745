use std::time::{Duration, Instant};

/// Frame clock. `tick` follows the wall clock; `advance` steps a fixed amount for
/// deterministic runs (harness, tests, headless CLI).
#[derive(Debug, Clone)]
pub struct Time {
    last: Instant,
    elapsed: Duration,
    pub delta: Duration,
}

impl Time {
    pub fn new() -> Self {
        Self { last: Instant::now(), elapsed: Duration::ZERO, delta: Duration::ZERO }
    }

    pub fn tick(&mut self) {
        let now = Instant::now();
        self.delta = now - self.last;
        self.elapsed += self.delta;
        self.last = now;
    }

    pub fn advance(&mut self, dt: Duration) {
        self.delta = dt;
        self.elapsed += dt;
        self.last = Instant::now();
    }

    pub fn delta_seconds(&self) -> f64 {
        self.delta.as_secs_f64()
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

impl Default for Time {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_steps_accumulate() {
        let mut time = Time::new();
        time.advance(Duration::from_millis(250));
        time.advance(Duration::from_millis(250));
        assert_eq!(time.delta_seconds(), 0.25);
        assert_eq!(time.elapsed_seconds(), 0.5);
    }
}
