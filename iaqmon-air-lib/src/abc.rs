//! Automatic baseline correction (ABC) for the CO₂ sensor.
//!
//! Indoor CO₂ sensors drift; the classic correction assumes the room touches
//! outdoor-ish levels overnight. The tracker records the minimum CO₂ seen on
//! each qualifying "night" (a local-time window with a flat CO₂ slope, so an
//! occupied room doesn't count), keeps the last seven nightly minima, and
//! once the ring is full offers an additive offset that moves the ring
//! minimum onto the configured outdoor baseline.
//!
//! Wall-clock time is an input here, not an assumption: until the caller can
//! provide synchronized local time the tracker simply never observes a night
//! and stays at zero confidence.

use crate::ring::least_squares_slope;

/// Nightly minima kept; full ring = full confidence.
pub const NIGHTS_TRACKED: usize = 7;

/// Local-time night window, minutes since midnight: 02:00–06:00.
const NIGHT_WINDOW_MIN: (u16, u16) = (120, 360);

/// A night sample only counts while the short-term CO₂ slope is flatter than
/// this, in ppm/hr. Occupancy or ventilation shows up as slope first.
const FLAT_SLOPE_PPM_HR: f64 = 15.0;

/// Samples kept for the short-term slope estimate (one per minute).
const SLOPE_SAMPLES: usize = 16;
const SLOPE_SAMPLE_SPACING_MS: u64 = 60_000;

/// Typical outdoor CO₂ concentration, ppm.
pub const DEFAULT_OUTDOOR_PPM: f32 = 415.0;

#[derive(Debug, Clone)]
pub struct BaselineTracker {
    outdoor_ppm: f32,
    minima: [f32; NIGHTS_TRACKED],
    nights: usize,
    /// Write cursor into `minima` once the ring is full.
    next_slot: usize,
    /// Running minimum of the night currently in progress.
    night_min: Option<f32>,
    in_night: bool,
    /// Recent (at_ms, ppm) pairs for the slope estimate.
    slope_window: Vec<(u64, f32)>,
    last_slope_sample_ms: Option<u64>,
}

impl BaselineTracker {
    #[must_use]
    pub fn new(outdoor_ppm: f32) -> Self {
        Self {
            outdoor_ppm,
            minima: [f32::NAN; NIGHTS_TRACKED],
            nights: 0,
            next_slot: 0,
            night_min: None,
            in_night: false,
            slope_window: Vec::with_capacity(SLOPE_SAMPLES),
            last_slope_sample_ms: None,
        }
    }

    /// Restore a persisted baseline. The ring is refilled with the stored
    /// value, so a device that already earned a baseline resumes at full
    /// confidence instead of re-learning for a week.
    pub fn restore(&mut self, baseline_ppm: f32) {
        if baseline_ppm.is_nan() || baseline_ppm <= 0.0 {
            return;
        }
        self.minima = [baseline_ppm; NIGHTS_TRACKED];
        self.nights = NIGHTS_TRACKED;
        self.next_slot = 0;
    }

    /// Feed one CO₂ observation.
    ///
    /// `local_minutes` is minutes since local midnight from a synchronized
    /// clock, or `None` when no such clock exists yet (ABC stays dormant).
    /// Call roughly once a second; the slope window samples itself at one
    /// point per minute internally.
    pub fn update(&mut self, at_ms: u64, local_minutes: Option<u16>, co2_ppm: f32) {
        if co2_ppm.is_nan() || co2_ppm <= 0.0 {
            return;
        }

        self.sample_slope_window(at_ms, co2_ppm);

        let Some(minutes) = local_minutes else {
            // No synchronized clock: never enter a night.
            self.abort_night();
            return;
        };

        let in_window = (NIGHT_WINDOW_MIN.0..NIGHT_WINDOW_MIN.1).contains(&minutes);
        match (self.in_night, in_window) {
            (false, true) => {
                self.in_night = true;
                self.night_min = None;
            }
            (true, false) => {
                self.commit_night();
            }
            _ => {}
        }

        if self.in_night && self.slope_is_flat() {
            self.night_min = Some(match self.night_min {
                Some(m) => m.min(co2_ppm),
                None => co2_ppm,
            });
        }
    }

    fn sample_slope_window(&mut self, at_ms: u64, co2_ppm: f32) {
        let due = match self.last_slope_sample_ms {
            Some(last) => at_ms.saturating_sub(last) >= SLOPE_SAMPLE_SPACING_MS,
            None => true,
        };
        if !due {
            return;
        }
        self.last_slope_sample_ms = Some(at_ms);
        if self.slope_window.len() == SLOPE_SAMPLES {
            self.slope_window.remove(0);
        }
        self.slope_window.push((at_ms, co2_ppm));
    }

    fn slope_is_flat(&self) -> bool {
        if self.slope_window.len() < 5 {
            return false;
        }
        let t0 = self.slope_window[0].0;
        let points: Vec<(f64, f64)> = self
            .slope_window
            .iter()
            .map(|&(t, v)| {
                #[allow(clippy::cast_precision_loss)]
                let hours = (t - t0) as f64 / 3_600_000.0;
                (hours, f64::from(v))
            })
            .collect();
        match least_squares_slope(&points) {
            Some(slope) => slope.abs() <= FLAT_SLOPE_PPM_HR,
            None => false,
        }
    }

    fn commit_night(&mut self) {
        self.in_night = false;
        let Some(minimum) = self.night_min.take() else {
            return; // never flat during the window, nothing learned
        };
        self.minima[self.next_slot] = minimum;
        self.next_slot = (self.next_slot + 1) % NIGHTS_TRACKED;
        self.nights = (self.nights + 1).min(NIGHTS_TRACKED);
    }

    fn abort_night(&mut self) {
        self.in_night = false;
        self.night_min = None;
    }

    /// The learned baseline: minimum of the tracked nightly minima.
    #[must_use]
    pub fn baseline_ppm(&self) -> Option<f32> {
        if self.nights == 0 {
            return None;
        }
        self.minima[..self.nights]
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .min_by(f32::total_cmp)
    }

    /// Additive correction to apply to CO₂ readings. Zero until seven nights
    /// have been tracked.
    #[must_use]
    pub fn offset_ppm(&self) -> f32 {
        if self.nights < NIGHTS_TRACKED {
            return 0.0;
        }
        match self.baseline_ppm() {
            Some(baseline) => self.outdoor_ppm - baseline,
            None => 0.0,
        }
    }

    /// Confidence 0..=100: `min(100, nights · 100 / 7)`.
    #[must_use]
    pub fn confidence_pct(&self) -> u8 {
        #[allow(clippy::cast_possible_truncation)]
        let pct = (self.nights * 100 / NIGHTS_TRACKED).min(100) as u8;
        pct
    }

    #[must_use]
    pub fn nights(&self) -> usize {
        self.nights
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR_MS: u64 = 3_600_000;

    /// Feed a flat night (03:00–05:00) at `ppm`, one update per minute.
    fn feed_night(tracker: &mut BaselineTracker, start_ms: u64, ppm: f32) -> u64 {
        let mut t = start_ms;
        // Warm the slope window before the window opens (01:30)
        for _ in 0..20 {
            tracker.update(t, Some(90), ppm);
            t += 60_000;
        }
        for _ in 0..120 {
            tracker.update(t, Some(180), ppm);
            t += 60_000;
        }
        // Step out of the window to commit (06:30)
        tracker.update(t, Some(390), ppm);
        t + 60_000
    }

    #[test]
    fn test_dormant_without_clock() {
        let mut tracker = BaselineTracker::new(DEFAULT_OUTDOOR_PPM);
        let mut t = 0;
        for _ in 0..600 {
            tracker.update(t, None, 450.0);
            t += 60_000;
        }
        assert_eq!(tracker.nights(), 0);
        assert_eq!(tracker.confidence_pct(), 0);
        assert_eq!(tracker.offset_ppm(), 0.0);
    }

    #[test]
    fn test_confidence_grows_per_night() {
        let mut tracker = BaselineTracker::new(DEFAULT_OUTDOOR_PPM);
        let mut t = 0;
        for night in 1..=4u8 {
            t = feed_night(&mut tracker, t, 460.0);
            t += 20 * HOUR_MS; // skip to the next night
            assert_eq!(tracker.nights(), usize::from(night));
        }
        // 4 nights: 4 * 100 / 7 = 57
        assert_eq!(tracker.confidence_pct(), 57);
        // Offset stays zero until the ring is full
        assert_eq!(tracker.offset_ppm(), 0.0);
    }

    #[test]
    fn test_offset_after_seven_nights() {
        let mut tracker = BaselineTracker::new(415.0);
        let mut t = 0;
        for _ in 0..7 {
            t = feed_night(&mut tracker, t, 460.0);
            t += 20 * HOUR_MS;
        }
        assert_eq!(tracker.nights(), 7);
        assert_eq!(tracker.confidence_pct(), 100);
        assert_eq!(tracker.baseline_ppm(), Some(460.0));
        // Reading 460 at night should look like outdoor 415: offset -45
        assert!((tracker.offset_ppm() + 45.0).abs() < 0.01);
    }

    #[test]
    fn test_sloped_night_does_not_count() {
        let mut tracker = BaselineTracker::new(415.0);
        let mut t = 0;
        // CO₂ climbing 2 ppm per minute (120 ppm/hr) all night: occupied room
        let mut ppm = 500.0;
        for _ in 0..150 {
            tracker.update(t, Some(180), ppm);
            t += 60_000;
            ppm += 2.0;
        }
        tracker.update(t, Some(390), ppm);
        assert_eq!(tracker.nights(), 0);
    }

    #[test]
    fn test_restore_resumes_full_confidence() {
        let mut tracker = BaselineTracker::new(415.0);
        tracker.restore(470.0);
        assert_eq!(tracker.confidence_pct(), 100);
        assert_eq!(tracker.baseline_ppm(), Some(470.0));
        assert!((tracker.offset_ppm() + 55.0).abs() < 0.01);
    }

    #[test]
    fn test_restore_rejects_garbage() {
        let mut tracker = BaselineTracker::new(415.0);
        tracker.restore(f32::NAN);
        tracker.restore(0.0);
        assert_eq!(tracker.nights(), 0);
    }

    #[test]
    fn test_ring_keeps_last_seven() {
        let mut tracker = BaselineTracker::new(415.0);
        let mut t = 0;
        // Seven nights at 500, then three more at 450: the old 500s age out
        // only as the ring wraps, and the baseline is the ring minimum.
        for _ in 0..7 {
            t = feed_night(&mut tracker, t, 500.0);
            t += 20 * HOUR_MS;
        }
        for _ in 0..3 {
            t = feed_night(&mut tracker, t, 450.0);
            t += 20 * HOUR_MS;
        }
        assert_eq!(tracker.nights(), 7);
        assert_eq!(tracker.baseline_ppm(), Some(450.0));
    }
}
