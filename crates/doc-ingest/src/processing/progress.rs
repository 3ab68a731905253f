//! Mapping of phase-local progress onto the task's 0-100 scale

/// A sub-range of the overall progress scale owned by one phase
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressBand {
    start: f64,
    end: f64,
}

impl ProgressBand {
    pub fn new(start: f64, end: f64) -> Self {
        let start = start.clamp(0.0, 100.0);
        let end = end.clamp(start, 100.0);
        Self { start, end }
    }

    /// The full scale
    pub fn full() -> Self {
        Self::new(0.0, 100.0)
    }

    pub fn start(&self) -> u8 {
        self.start.floor() as u8
    }

    pub fn end(&self) -> u8 {
        self.end.floor() as u8
    }

    /// Map a fraction in `[0, 1]` into the band
    pub fn map(&self, fraction: f64) -> u8 {
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        (self.start + (self.end - self.start) * fraction).floor() as u8
    }

    /// Map `done` of `total`; an unknown total maps to the band start
    pub fn map_counts(&self, done: usize, total: usize) -> u8 {
        if total == 0 {
            return self.start();
        }
        self.map(done as f64 / total as f64)
    }

    /// The `index`-th of `parts` equal slices
    pub fn split(&self, parts: usize, index: usize) -> Self {
        let parts = parts.max(1);
        let index = index.min(parts - 1);
        let width = (self.end - self.start) / parts as f64;
        Self::new(
            self.start + width * index as f64,
            self.start + width * (index + 1) as f64,
        )
    }
}
