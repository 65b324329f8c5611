//! Bounded time-series ring and the statistics used on top of it.
//!
//! The metrics engine allocates its rings once at startup and never resizes
//! them; everything here is O(n) per tick with n ≤ 144.

/// A single timestamped sample. Timestamps are monotonic milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedSample {
    pub at_ms: u64,
    pub value: f32,
}

/// Fixed-capacity ring of timestamped samples.
///
/// Pushing beyond capacity overwrites the oldest sample. Storage is allocated
/// once in [`TimedRing::new`].
#[derive(Debug, Clone)]
pub struct TimedRing {
    samples: Vec<TimedSample>,
    /// Next write position.
    head: usize,
    len: usize,
    capacity: usize,
}

impl TimedRing {
    /// Create a ring holding at most `capacity` samples.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        Self {
            samples: Vec::with_capacity(capacity),
            head: 0,
            len: 0,
            capacity,
        }
    }

    pub fn push(&mut self, at_ms: u64, value: f32) {
        let sample = TimedSample { at_ms, value };
        if self.samples.len() < self.capacity {
            self.samples.push(sample);
        } else {
            self.samples[self.head] = sample;
        }
        self.head = (self.head + 1) % self.capacity;
        self.len = (self.len + 1).min(self.capacity);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.head = 0;
        self.len = 0;
    }

    /// Most recently pushed sample.
    #[must_use]
    pub fn latest(&self) -> Option<TimedSample> {
        if self.len == 0 {
            return None;
        }
        let idx = (self.head + self.capacity - 1) % self.capacity;
        // When not yet full, head - 1 indexes the last push directly.
        if self.samples.len() < self.capacity {
            self.samples.last().copied()
        } else {
            Some(self.samples[idx])
        }
    }

    /// Iterate samples oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = TimedSample> + '_ {
        let (older, newer) = if self.samples.len() < self.capacity {
            (&self.samples[..], &[][..])
        } else {
            // head points at the oldest sample once the ring is full
            let (newer, older) = self.samples.split_at(self.head);
            (older, newer)
        };
        older.iter().chain(newer.iter()).copied()
    }

    /// Samples with `at_ms` within the last `window_ms` before `now_ms`,
    /// oldest to newest.
    #[must_use]
    pub fn samples_within(&self, now_ms: u64, window_ms: u64) -> Vec<TimedSample> {
        let cutoff = now_ms.saturating_sub(window_ms);
        self.iter().filter(|s| s.at_ms >= cutoff).collect()
    }
}

/// Median of a set of values. Sorts the slice in place.
///
/// Even-length inputs return the mean of the two middle values.
#[must_use]
pub fn median(values: &mut [f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f32::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}

/// Sample standard deviation (n − 1 denominator). Needs at least 2 values.
#[must_use]
pub fn sample_stddev(values: &[f32]) -> Option<f32> {
    if values.len() < 2 {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
    let var = values
        .iter()
        .map(|&v| {
            let d = f64::from(v) - mean;
            d * d
        })
        .sum::<f64>()
        / (n - 1.0);
    #[allow(clippy::cast_possible_truncation)]
    let sd = var.sqrt() as f32;
    Some(sd)
}

/// 3-point median filter. Endpoints are passed through unchanged.
#[must_use]
pub fn median3_filter(values: &[f32]) -> Vec<f32> {
    if values.len() < 3 {
        return values.to_vec();
    }
    let mut out = Vec::with_capacity(values.len());
    out.push(values[0]);
    for w in values.windows(3) {
        let mut tri = [w[0], w[1], w[2]];
        tri.sort_by(f32::total_cmp);
        out.push(tri[1]);
    }
    out.push(values[values.len() - 1]);
    out
}

/// Least-squares slope of `y` against `x`. Needs at least 2 points and a
/// non-degenerate spread in `x`.
#[must_use]
pub fn least_squares_slope(points: &[(f64, f64)]) -> Option<f64> {
    if points.len() < 2 {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;
    let mut num = 0.0;
    let mut den = 0.0;
    for &(x, y) in points {
        num += (x - mean_x) * (y - mean_y);
        den += (x - mean_x) * (x - mean_x);
    }
    if den == 0.0 {
        return None;
    }
    Some(num / den)
}

/// Exponential moving average, `y = α·x + (1 − α)·y_prev`.
#[derive(Debug, Clone)]
pub struct Ema {
    alpha: f32,
    value: Option<f32>,
}

impl Ema {
    #[must_use]
    pub fn new(alpha: f32) -> Self {
        Self { alpha, value: None }
    }

    /// Fold in a new observation and return the smoothed value. The first
    /// observation seeds the average directly.
    pub fn update(&mut self, x: f32) -> f32 {
        let next = match self.value {
            Some(prev) => self.alpha * x + (1.0 - self.alpha) * prev,
            None => x,
        };
        self.value = Some(next);
        next
    }

    #[must_use]
    pub fn value(&self) -> Option<f32> {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_push_and_len() {
        let mut ring = TimedRing::new(4);
        assert!(ring.is_empty());
        ring.push(0, 1.0);
        ring.push(10, 2.0);
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.latest().unwrap().value, 2.0);
    }

    #[test]
    fn test_ring_wrap_overwrites_oldest() {
        let mut ring = TimedRing::new(3);
        for i in 0..5u64 {
            #[allow(clippy::cast_precision_loss)]
            ring.push(i * 10, i as f32);
        }
        assert_eq!(ring.len(), 3);
        let values: Vec<f32> = ring.iter().map(|s| s.value).collect();
        // 0.0 and 1.0 were overwritten
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
        assert_eq!(ring.latest().unwrap().value, 4.0);
    }

    #[test]
    fn test_ring_iter_chronological_after_wrap() {
        let mut ring = TimedRing::new(3);
        ring.push(0, 0.0);
        ring.push(10, 1.0);
        ring.push(20, 2.0);
        ring.push(30, 3.0); // overwrites t=0
        let times: Vec<u64> = ring.iter().map(|s| s.at_ms).collect();
        assert_eq!(times, vec![10, 20, 30]);
    }

    #[test]
    fn test_samples_within_window() {
        let mut ring = TimedRing::new(8);
        for i in 0..8u64 {
            ring.push(i * 100, 1.0);
        }
        // now = 700, window 300 -> cutoff 400 -> samples at 400..=700
        let within = ring.samples_within(700, 300);
        assert_eq!(within.len(), 4);
        assert_eq!(within[0].at_ms, 400);
        assert_eq!(within[3].at_ms, 700);
    }

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&mut []), None);
    }

    #[test]
    fn test_sample_stddev() {
        // Classic example: mean 5, deviations {-3, -1, 0, 1, 3}
        let sd = sample_stddev(&[2.0, 4.0, 5.0, 6.0, 8.0]).unwrap();
        assert!((sd - 2.2360679).abs() < 1e-4);
        assert_eq!(sample_stddev(&[1.0]), None);
    }

    #[test]
    fn test_median3_filter_removes_spike() {
        let filtered = median3_filter(&[1.0, 1.0, 9.0, 1.0, 1.0]);
        assert_eq!(filtered, vec![1.0, 1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_median3_filter_short_input_passthrough() {
        assert_eq!(median3_filter(&[5.0, 7.0]), vec![5.0, 7.0]);
    }

    #[test]
    fn test_least_squares_slope_exact_line() {
        // y = 3x + 1
        let points = [(0.0, 1.0), (1.0, 4.0), (2.0, 7.0), (3.0, 10.0)];
        let slope = least_squares_slope(&points).unwrap();
        assert!((slope - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_least_squares_slope_degenerate() {
        assert_eq!(least_squares_slope(&[(1.0, 2.0)]), None);
        assert_eq!(least_squares_slope(&[(1.0, 2.0), (1.0, 5.0)]), None);
    }

    #[test]
    fn test_ema_seeds_then_smooths() {
        let mut ema = Ema::new(0.25);
        assert_eq!(ema.update(100.0), 100.0);
        // 0.25 * 200 + 0.75 * 100 = 125
        assert_eq!(ema.update(200.0), 125.0);
        ema.reset();
        assert_eq!(ema.value(), None);
    }
}
