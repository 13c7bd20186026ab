use std::collections::BTreeMap;

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use thiserror::Error;

use crate::config::DetectorSettings;
use crate::extract::trajectory::Trajectory;
use crate::extract::TrackKey;

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("body point '{0}' not present in trajectory")]
    UnknownPoint(String),
    #[error("analysis window must be at least one frame")]
    EmptyWindow,
}

/// What the detector concluded about one analysis window.
///
/// `Skipped` (every candidate point failed the displacement gate) and `Quiet`
/// (at least one point analyzed, none oscillating) both contribute zero to the
/// undulation rate — skipped windows are indeterminate, not negative, and the
/// distinction is kept here so it stays observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowOutcome {
    Detected,
    Quiet,
    Skipped,
}

#[derive(Debug, Clone, Copy)]
pub struct WindowScan {
    pub start_frame: usize,
    pub outcome: WindowOutcome,
}

/// All detection output for one animal in one video: undulation-positive
/// window start frames (sorted, deduplicated) plus the per-window outcome log.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub events: Vec<usize>,
    pub scans: Vec<WindowScan>,
}

impl Detection {
    /// Number of events whose window starts in `[start, end)`, by binary
    /// search over the sorted event list.
    pub fn events_in(&self, start: usize, end: usize) -> usize {
        let lo = self.events.partition_point(|&f| f < start);
        let hi = self.events.partition_point(|&f| f < end);
        hi - lo
    }
}

/// One-sided power spectral density of a real signal (boxcar window, constant
/// detrend), matching the conventional periodogram estimate. Degenerate input
/// (constant or empty) yields all-zero power, never an error.
pub fn periodogram(signal: &[f64], sample_rate: f64) -> Vec<f64> {
    let n = signal.len();
    if n == 0 {
        return Vec::new();
    }

    let mean = signal.iter().sum::<f64>() / n as f64;
    let mut buf: Vec<Complex<f64>> = signal
        .iter()
        .map(|&v| Complex::new(v - mean, 0.0))
        .collect();

    FftPlanner::new().plan_fft_forward(n).process(&mut buf);

    let scale = 1.0 / (sample_rate * n as f64);
    let half = n / 2;
    let mut psd = Vec::with_capacity(half + 1);
    for (k, c) in buf.iter().take(half + 1).enumerate() {
        let mut power = c.norm_sqr() * scale;
        // One-sided doubling, except DC and (for even n) Nyquist
        if k != 0 && !(n % 2 == 0 && k == half) {
            power *= 2.0;
        }
        psd.push(power);
    }
    psd
}

/// Maximum power over spectrum indices `[low, high)`, clamped to the spectrum
/// length. An empty band reads as zero power.
fn band_max(psd: &[f64], low: usize, high: usize) -> f64 {
    let high = high.min(psd.len());
    if low >= high {
        return 0.0;
    }
    psd[low..high].iter().fold(0.0_f64, |acc, &p| acc.max(p))
}

/// Combined x/y displacement range of a point within a window.
/// Returns NaN if any coordinate is NaN, which fails the gate comparison and
/// excludes the window for this point.
fn displacement_range(x: &[f64], y: &[f64]) -> f64 {
    let mut min_x = f64::INFINITY;
    let mut max_x = f64::NEG_INFINITY;
    let mut min_y = f64::INFINITY;
    let mut max_y = f64::NEG_INFINITY;
    for (&xv, &yv) in x.iter().zip(y) {
        if xv.is_nan() || yv.is_nan() {
            return f64::NAN;
        }
        min_x = min_x.min(xv);
        max_x = max_x.max(xv);
        min_y = min_y.min(yv);
        max_y = max_y.max(yv);
    }
    ((max_x - min_x).powi(2) + (max_y - min_y).powi(2)).sqrt()
}

/// Scan one trajectory for undulation.
///
/// Non-overlapping windows of `window_frames` tile the recording from frame 0
/// (final partial window analyzed as-is). Per window, candidate points are
/// checked in the given order; the first oscillating point decides the window:
///
/// 1. The point's displacement range must sit strictly inside the configured
///    band — near-static points have no signal, implausibly large excursions
///    mean the tracker jumped. Either way the point is excluded, biasing
///    toward no-detection.
/// 2. The x series is judged oscillatory when its peak power in spectrum
///    indices `[band_low, band_high)` beats the peak in `[0, band_low)`;
///    y is consulted with the same rule only when x says no.
pub fn detect_undulation(
    traj: &Trajectory,
    points: &[String],
    window_frames: usize,
    settings: &DetectorSettings,
) -> Result<Detection, DetectError> {
    if window_frames == 0 {
        return Err(DetectError::EmptyWindow);
    }
    for point in points {
        if traj.point(point).is_none() {
            return Err(DetectError::UnknownPoint(point.clone()));
        }
    }

    let frames = traj.frame_count();
    let mut detection = Detection::default();

    let mut start = 0;
    while start < frames {
        let end = (start + window_frames).min(frames);
        let mut any_checked = false;
        let mut detected = false;

        for point in points {
            let track = traj.point(point).expect("validated above");
            let x = &track.x[start..end];
            let y = &track.y[start..end];

            let range = displacement_range(x, y);
            if !(settings.min_displacement < range && range < settings.max_displacement) {
                continue;
            }
            any_checked = true;

            if is_oscillating(x, settings) || is_oscillating(y, settings) {
                detected = true;
                break;
            }
        }

        let outcome = if detected {
            detection.events.push(start);
            WindowOutcome::Detected
        } else if any_checked {
            WindowOutcome::Quiet
        } else {
            WindowOutcome::Skipped
        };
        detection.scans.push(WindowScan {
            start_frame: start,
            outcome,
        });

        start += window_frames;
    }

    Ok(detection)
}

fn is_oscillating(series: &[f64], settings: &DetectorSettings) -> bool {
    let psd = periodogram(series, settings.sample_rate);
    band_max(&psd, settings.band_low, settings.band_high) > band_max(&psd, 0, settings.band_low)
}

/// Run detection across all animals in parallel.
pub fn detect_all(
    tracks: &BTreeMap<TrackKey, Trajectory>,
    points: &[String],
    window_frames: usize,
    settings: &DetectorSettings,
    jobs: usize,
) -> Result<BTreeMap<TrackKey, Detection>, DetectError> {
    let pb = ProgressBar::new(tracks.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_message("Detecting...");

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build()
        .unwrap();

    let entries: Vec<(&TrackKey, &Trajectory)> = tracks.iter().collect();
    let results: Vec<Result<(TrackKey, Detection), DetectError>> = pool.install(|| {
        entries
            .par_iter()
            .map(|(key, traj)| {
                let detection = detect_undulation(traj, points, window_frames, settings)?;
                pb.inc(1);
                Ok((**key, detection))
            })
            .collect()
    });

    let mut out = BTreeMap::new();
    for result in results {
        let (key, detection) = result?;
        out.insert(key, detection);
    }

    pb.finish_with_message(format!("Done: {} animals scanned", out.len()));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::trajectory::Trajectory;
    use std::f64::consts::PI;

    fn settings() -> DetectorSettings {
        DetectorSettings::default()
    }

    /// Trajectory with one point whose x/y series are given explicitly.
    fn traj_from_series(x: &[f64], y: &[f64]) -> Trajectory {
        let rows: Vec<_> = x
            .iter()
            .zip(y)
            .enumerate()
            .map(|(f, (&xv, &yv))| (f, "head".to_string(), Some(xv), Some(yv)))
            .collect();
        Trajectory::from_rows(&rows)
    }

    fn sine(freq_hz: f64, amplitude: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|t| amplitude * (2.0 * PI * freq_hz * t as f64 / 15.0).sin())
            .collect()
    }

    fn points() -> Vec<String> {
        vec!["head".to_string()]
    }

    // === periodogram ===

    #[test]
    fn test_periodogram_peak_at_signal_frequency() {
        // 1 Hz at fs=15 over 150 samples → spectrum index 10
        let psd = periodogram(&sine(1.0, 1.0, 150), 15.0);
        assert_eq!(psd.len(), 76);
        let peak = psd
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        assert_eq!(peak, 10);
    }

    #[test]
    fn test_periodogram_constant_is_all_zero() {
        let psd = periodogram(&[3.5; 64], 15.0);
        assert!(psd.iter().all(|&p| p.abs() < 1e-20));
    }

    #[test]
    fn test_periodogram_empty() {
        assert!(periodogram(&[], 15.0).is_empty());
    }

    #[test]
    fn test_band_max_clamps_and_defaults() {
        let psd = vec![1.0, 5.0, 2.0];
        assert_eq!(band_max(&psd, 0, 2), 5.0);
        assert_eq!(band_max(&psd, 1, 100), 5.0);
        assert_eq!(band_max(&psd, 10, 17), 0.0);
    }

    // === detection ===

    #[test]
    fn test_one_hz_single_window_yields_exactly_one_event() {
        // Amplitude 2 → displacement range 4, inside the (0.5, 15) gate;
        // 1 Hz lands at index 10 of a 150-sample window, inside [4, 17)
        let x = sine(1.0, 2.0, 150);
        let y = vec![7.0; 150];
        let traj = traj_from_series(&x, &y);

        let d = detect_undulation(&traj, &points(), 150, &settings()).unwrap();
        assert_eq!(d.events, vec![0]);
        assert_eq!(d.scans.len(), 1);
        assert_eq!(d.scans[0].outcome, WindowOutcome::Detected);
    }

    #[test]
    fn test_oscillation_on_y_only_still_detected() {
        let x = vec![7.0; 150];
        let y = sine(1.0, 2.0, 150);
        let traj = traj_from_series(&x, &y);

        let d = detect_undulation(&traj, &points(), 150, &settings()).unwrap();
        assert_eq!(d.events, vec![0]);
    }

    #[test]
    fn test_static_point_skipped_not_detected() {
        // Range 0 fails the lower gate regardless of spectral content
        let traj = traj_from_series(&[2.0; 150], &[3.0; 150]);
        let d = detect_undulation(&traj, &points(), 150, &settings()).unwrap();
        assert!(d.events.is_empty());
        assert_eq!(d.scans[0].outcome, WindowOutcome::Skipped);
    }

    #[test]
    fn test_huge_excursion_skipped_even_when_oscillating() {
        // Amplitude 20 → range 40, above the 15-unit gate: tracking failure
        let x = sine(1.0, 20.0, 150);
        let y = vec![0.0; 150];
        let traj = traj_from_series(&x, &y);
        let d = detect_undulation(&traj, &points(), 150, &settings()).unwrap();
        assert!(d.events.is_empty());
        assert_eq!(d.scans[0].outcome, WindowOutcome::Skipped);
    }

    #[test]
    fn test_slow_drift_is_quiet() {
        // Monotone drift concentrates power below index 4
        let x: Vec<f64> = (0..150).map(|t| t as f64 * 0.02).collect();
        let y = vec![0.0; 150];
        let traj = traj_from_series(&x, &y);
        let d = detect_undulation(&traj, &points(), 150, &settings()).unwrap();
        assert!(d.events.is_empty());
        assert_eq!(d.scans[0].outcome, WindowOutcome::Quiet);
    }

    #[test]
    fn test_nan_window_excluded() {
        let mut x = sine(1.0, 2.0, 150);
        x[75] = f64::NAN;
        let y = vec![0.0; 150];
        let traj = traj_from_series(&x, &y);
        let d = detect_undulation(&traj, &points(), 150, &settings()).unwrap();
        assert!(d.events.is_empty());
        assert_eq!(d.scans[0].outcome, WindowOutcome::Skipped);
    }

    #[test]
    fn test_events_deduplicated_and_sorted_across_windows() {
        // 6 windows of 150 frames; oscillation only in windows 1 and 4
        let mut x = vec![7.0; 900];
        let burst = sine(1.0, 2.0, 150);
        x[150..300].copy_from_slice(&burst);
        x[600..750].copy_from_slice(&burst);
        let y = vec![7.0; 900];
        let traj = traj_from_series(&x, &y);

        let d = detect_undulation(&traj, &points(), 150, &settings()).unwrap();
        assert_eq!(d.events, vec![150, 600]);
        assert_eq!(d.scans.len(), 6);
    }

    #[test]
    fn test_events_in_range_queries() {
        let d = Detection {
            events: vec![0, 150, 600, 750],
            scans: Vec::new(),
        };
        assert_eq!(d.events_in(0, 300), 2);
        assert_eq!(d.events_in(300, 900), 2);
        assert_eq!(d.events_in(900, 1800), 0);
    }

    #[test]
    fn test_unknown_point_is_an_error() {
        let traj = traj_from_series(&[0.0; 10], &[0.0; 10]);
        let err =
            detect_undulation(&traj, &["pharynx".to_string()], 150, &settings()).unwrap_err();
        assert!(matches!(err, DetectError::UnknownPoint(_)));
    }

    #[test]
    fn test_partial_final_window_analyzed() {
        // 225 frames with a 150-frame window → one full + one 75-frame window
        let x = sine(1.0, 2.0, 225);
        let y = vec![0.0; 225];
        let traj = traj_from_series(&x, &y);
        let d = detect_undulation(&traj, &points(), 150, &settings()).unwrap();
        assert_eq!(d.scans.len(), 2);
        assert_eq!(d.scans[1].start_frame, 150);
    }
}
