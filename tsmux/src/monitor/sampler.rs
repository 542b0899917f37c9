use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Default high-water mark, in percent.
pub const DEFAULT_HIGH_WATER_PCT: f64 = 90.0;
/// Default low-water mark, in percent.
pub const DEFAULT_LOW_WATER_PCT: f64 = 50.0;

/// One reading of host pressure.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResourceSample {
    pub cpu_pct: f64,
    pub disk_pct: f64,
}

impl ResourceSample {
    pub fn new(cpu_pct: f64, disk_pct: f64) -> Self {
        Self { cpu_pct, disk_pct }
    }
}

/// Thresholds that drive the capacity recommendation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Watermarks {
    /// Either metric above this shrinks capacity by one.
    pub high_pct: f64,
    /// Both metrics below this grow capacity by one.
    pub low_pct: f64,
}

impl Default for Watermarks {
    fn default() -> Self {
        Self {
            high_pct: DEFAULT_HIGH_WATER_PCT,
            low_pct: DEFAULT_LOW_WATER_PCT,
        }
    }
}

impl Watermarks {
    pub fn new(high_pct: f64, low_pct: f64) -> Self {
        Self { high_pct, low_pct }
    }

    /// Recommend a worker count for `sample`, always within `1..=max`.
    pub fn recommend(&self, sample: ResourceSample, current: usize, max: usize) -> usize {
        let max = max.max(1);
        let current = current.clamp(1, max);

        let under_pressure = sample.cpu_pct > self.high_pct || sample.disk_pct > self.high_pct;
        let idle = sample.cpu_pct < self.low_pct && sample.disk_pct < self.low_pct;

        if under_pressure {
            current.saturating_sub(1).max(1)
        } else if idle && current < max {
            current + 1
        } else {
            current
        }
    }
}

/// Source of host pressure readings.
///
/// `sample` may block briefly; the pool calls it off the async workers.
pub trait ResourceSampler: Send + Sync + 'static {
    fn sample(&self) -> ResourceSample;

    fn watermarks(&self) -> Watermarks {
        Watermarks::default()
    }

    /// Worker count to aim for given the current capacity and the run's cap.
    fn recommended_workers(&self, current: usize, max: usize) -> usize {
        self.watermarks().recommend(self.sample(), current, max)
    }
}

/// A sampler whose readings are set by hand.
///
/// Useful for tests and for running without adaptation.
#[derive(Debug, Default)]
pub struct FixedSampler {
    reading: Mutex<ResourceSample>,
    watermarks: Watermarks,
    samples_taken: AtomicUsize,
}

impl FixedSampler {
    pub fn new(cpu_pct: f64, disk_pct: f64) -> Self {
        Self {
            reading: Mutex::new(ResourceSample::new(cpu_pct, disk_pct)),
            watermarks: Watermarks::default(),
            samples_taken: AtomicUsize::new(0),
        }
    }

    /// A reading that sits between the watermarks and never moves capacity.
    pub fn steady() -> Self {
        Self::new(70.0, 70.0)
    }

    pub fn with_watermarks(mut self, watermarks: Watermarks) -> Self {
        self.watermarks = watermarks;
        self
    }

    pub fn set(&self, cpu_pct: f64, disk_pct: f64) {
        *self.reading.lock() = ResourceSample::new(cpu_pct, disk_pct);
    }

    pub fn samples_taken(&self) -> usize {
        self.samples_taken.load(Ordering::SeqCst)
    }
}

impl ResourceSampler for FixedSampler {
    fn sample(&self) -> ResourceSample {
        self.samples_taken.fetch_add(1, Ordering::SeqCst);
        *self.reading.lock()
    }

    fn watermarks(&self) -> Watermarks {
        self.watermarks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_high_pressure_shrinks() {
        let marks = Watermarks::default();
        assert_eq!(marks.recommend(ResourceSample::new(95.0, 10.0), 3, 4), 2);
        assert_eq!(marks.recommend(ResourceSample::new(10.0, 95.0), 3, 4), 2);
        assert_eq!(marks.recommend(ResourceSample::new(95.0, 95.0), 1, 4), 1);
    }

    #[test]
    fn test_idle_grows_up_to_max() {
        let marks = Watermarks::default();
        assert_eq!(marks.recommend(ResourceSample::new(10.0, 10.0), 2, 4), 3);
        assert_eq!(marks.recommend(ResourceSample::new(10.0, 10.0), 4, 4), 4);
    }

    #[test]
    fn test_between_watermarks_holds() {
        let marks = Watermarks::default();
        assert_eq!(marks.recommend(ResourceSample::new(70.0, 10.0), 2, 4), 2);
        assert_eq!(marks.recommend(ResourceSample::new(90.0, 90.0), 2, 4), 2);
        assert_eq!(marks.recommend(ResourceSample::new(50.0, 10.0), 2, 4), 2);
    }

    #[test]
    fn test_recommendation_is_always_bounded() {
        let marks = Watermarks::default();
        let readings = [
            ResourceSample::new(0.0, 0.0),
            ResourceSample::new(100.0, 0.0),
            ResourceSample::new(70.0, 20.0),
        ];
        for max in 1..=6 {
            for current in 0..=8 {
                for sample in readings {
                    let rec = marks.recommend(sample, current, max);
                    assert!((1..=max).contains(&rec), "{rec} outside 1..={max}");
                }
            }
        }
    }

    #[test]
    fn test_fixed_sampler_counts_samples() {
        let sampler = FixedSampler::new(10.0, 10.0);
        assert_eq!(sampler.recommended_workers(1, 3), 2);
        sampler.set(99.0, 0.0);
        assert_eq!(sampler.recommended_workers(2, 3), 1);
        assert_eq!(sampler.samples_taken(), 2);
    }

    #[test]
    fn test_custom_watermarks() {
        let sampler = FixedSampler::new(75.0, 10.0).with_watermarks(Watermarks::new(70.0, 20.0));
        assert_eq!(sampler.recommended_workers(3, 3), 2);
    }
}
