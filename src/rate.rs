use std::collections::BTreeMap;
use std::fmt;

use crate::detect::Detection;
use crate::extract::TrackKey;
use crate::layout::{AnimalId, PlateLayout, Well};

/// One (time, rate) sample of an animal's undulation series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesPoint {
    /// End of the bin in minutes from the start of the recording.
    pub time_min: f64,
    /// Fraction of the bin's analysis windows that were undulation-positive.
    pub rate: f64,
}

/// Time-binned undulation rates for one animal, videos concatenated in order.
#[derive(Debug, Clone)]
pub struct AnimalSeries {
    pub animal: AnimalId,
    pub well: Well,
    pub points: Vec<SeriesPoint>,
}

/// An animal whose recording covers fewer videos than the rest of the batch.
/// Surfaced, never silently padded or truncated.
#[derive(Debug, Clone)]
pub struct SeriesMismatch {
    pub animal: AnimalId,
    pub well: Well,
    pub videos: usize,
    pub expected: usize,
}

impl fmt::Display for SeriesMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (well {}) covers {} of {} videos — series ends early",
            self.animal, self.well, self.videos, self.expected
        )
    }
}

/// Result of binning one condition's detections.
pub struct BinnedRates {
    pub series: Vec<AnimalSeries>,
    pub mismatched: Vec<SeriesMismatch>,
}

/// Roll per-window detection events up into per-animal rate series.
///
/// Each video contributes `frame_count / bin_frames` bins; a bin's rate is the
/// event count inside it divided by the bin's window capacity
/// (`bin_frames / window_frames`), so rates sit in [0, 1]. Consecutive videos
/// of the same well are concatenated in video order and the time axis runs
/// through them: the k-th bin overall ends at (k+1) * bin_minutes minutes.
pub fn bin_rates(
    detections: &BTreeMap<TrackKey, Detection>,
    frame_count: usize,
    window_frames: usize,
    bin_minutes: usize,
    layout: PlateLayout,
) -> BinnedRates {
    let bin_frames = bin_minutes * crate::FRAMES_PER_MINUTE;
    let bins_per_video = frame_count / bin_frames;
    let expected_per_bin = (bin_frames / window_frames) as f64;

    // Regroup (video, well) detections by well, keeping video order
    let mut by_well: BTreeMap<Well, Vec<(u32, &Detection)>> = BTreeMap::new();
    for (key, detection) in detections {
        by_well
            .entry(key.well)
            .or_default()
            .push((key.video, detection));
    }
    for videos in by_well.values_mut() {
        videos.sort_by_key(|(video, _)| *video);
    }

    let max_videos = by_well.values().map(Vec::len).max().unwrap_or(0);

    let mut series = Vec::new();
    let mut mismatched = Vec::new();

    for (well, videos) in &by_well {
        let animal = layout.resolve(*well);

        if videos.len() < max_videos {
            let mismatch = SeriesMismatch {
                animal,
                well: *well,
                videos: videos.len(),
                expected: max_videos,
            };
            log::warn!("{mismatch}");
            mismatched.push(mismatch);
        }

        let mut points = Vec::with_capacity(videos.len() * bins_per_video);
        for (video_idx, (_, detection)) in videos.iter().enumerate() {
            for bin in 0..bins_per_video {
                let start = bin * bin_frames;
                let end = start + bin_frames;
                let count = detection.events_in(start, end) as f64;
                let global_bin = video_idx * bins_per_video + bin;
                points.push(SeriesPoint {
                    time_min: ((global_bin + 1) * bin_minutes) as f64,
                    rate: count / expected_per_bin,
                });
            }
        }

        series.push(AnimalSeries {
            animal,
            well: *well,
            points,
        });
    }

    // Exported tables read best in label order (WT first, then MUT)
    series.sort_by_key(|s| s.animal);

    BinnedRates { series, mismatched }
}

/// A named experimental condition and its animals' rate series.
pub struct Group {
    pub name: String,
    pub series: Vec<AnimalSeries>,
}

/// Per-(group, time) aggregate across a group's animals.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub group: String,
    pub time_min: f64,
    pub mean: f64,
    /// Sample standard error (ddof = 1); NaN when only one animal holds the bin.
    pub sem: f64,
    pub n: usize,
}

/// Average each group's series per time point: mean rate, sample SEM, and the
/// animal count. Animals whose series end early simply stop contributing, and
/// the per-time count keeps that visible.
pub fn summarize(groups: &[Group]) -> Vec<SummaryRow> {
    let mut rows = Vec::new();

    for group in groups {
        let max_len = group.series.iter().map(|s| s.points.len()).max().unwrap_or(0);

        for idx in 0..max_len {
            let values: Vec<f64> = group
                .series
                .iter()
                .filter_map(|s| s.points.get(idx).map(|p| p.rate))
                .collect();
            let time_min = group
                .series
                .iter()
                .find_map(|s| s.points.get(idx).map(|p| p.time_min))
                .unwrap_or_default();

            let n = values.len();
            let mean = values.iter().sum::<f64>() / n as f64;
            let sem = if n > 1 {
                let var =
                    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n as f64 - 1.0);
                (var / n as f64).sqrt()
            } else {
                f64::NAN
            };

            rows.push(SummaryRow {
                group: group.name.clone(),
                time_min,
                mean,
                sem,
                n,
            });
        }
    }

    rows
}
