use tokio::time::Instant;

/// Monotonic stopwatch for run diagnostics.
///
/// Uses Tokio's clock so elapsed times stay meaningful under a paused test
/// clock.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    started: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn restart(&mut self) {
        self.started = Instant::now();
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::start()
    }
}
