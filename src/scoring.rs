//! Manually scored ground truth: load human behavior scorings and line them
//! up against tracker-derived undulation rates for the same well.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use walkdir::WalkDir;

use crate::rate::SeriesPoint;
use crate::FRAMES_PER_MINUTE;

#[derive(Error, Debug)]
pub enum ScoringError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad row in {path}: {message}")]
    BadRow { path: PathBuf, message: String },
    #[error("no manual scoring found for well {0}")]
    MissingWell(String),
}

/// One scored behavior bout, frame range inclusive on both ends.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredInterval {
    pub behaviour: String,
    pub start_frame: usize,
    pub stop_frame: usize,
}

#[derive(Debug, Deserialize)]
struct ScoreCsvRow {
    #[serde(rename = "Behaviour")]
    behaviour: String,
    #[serde(rename = "Start_Frame")]
    start_frame: usize,
    #[serde(rename = "Stop_Frame")]
    stop_frame: usize,
}

/// Load every scoring CSV in `dir`, keyed by the well encoded in the last two
/// characters of the file stem (e.g. `scoring_ZT8_A4.csv` → A4). Files whose
/// stem doesn't end in a well identifier are skipped.
pub fn load_scores(
    dir: &Path,
) -> Result<BTreeMap<crate::layout::Well, Vec<ScoredInterval>>, ScoringError> {
    let mut scores = BTreeMap::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !entry.file_type().is_file()
            || path.extension().and_then(|e| e.to_str()) != Some("csv")
        {
            continue;
        }
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
        let well_part = stem.get(stem.len().saturating_sub(2)..).unwrap_or("");
        let Ok(well) = well_part.parse::<crate::layout::Well>() else {
            log::debug!("Skipping {} (no well in name)", path.display());
            continue;
        };

        let mut reader = csv::Reader::from_path(path).map_err(|e| ScoringError::BadRow {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let mut intervals = Vec::new();
        for result in reader.deserialize::<ScoreCsvRow>() {
            let row = result.map_err(|e| ScoringError::BadRow {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
            intervals.push(ScoredInterval {
                behaviour: row.behaviour,
                start_frame: row.start_frame,
                stop_frame: row.stop_frame,
            });
        }
        scores.insert(well, intervals);
    }

    Ok(scores)
}

/// Undulation rate per time bin from manual scorings: the fraction of each
/// bin's frames covered by an "Undulation" bout. Overlapping bouts are merged
/// first so double-scored frames count once.
pub fn manual_rate_series(
    intervals: &[ScoredInterval],
    frame_count: usize,
    bin_minutes: usize,
) -> Vec<SeriesPoint> {
    let bin_frames = bin_minutes * FRAMES_PER_MINUTE;
    let bins = frame_count / bin_frames;

    // Merge undulation bouts into disjoint [start, end) spans
    let mut spans: Vec<(usize, usize)> = intervals
        .iter()
        .filter(|iv| iv.behaviour == "Undulation")
        .map(|iv| (iv.start_frame, iv.stop_frame + 1))
        .collect();
    spans.sort_unstable();
    let mut merged: Vec<(usize, usize)> = Vec::new();
    for (start, end) in spans {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }

    (0..bins)
        .map(|bin| {
            let bin_start = bin * bin_frames;
            let bin_end = bin_start + bin_frames;
            let covered: usize = merged
                .iter()
                .map(|&(s, e)| e.min(bin_end).saturating_sub(s.max(bin_start)))
                .sum();
            SeriesPoint {
                time_min: ((bin + 1) * bin_minutes) as f64,
                rate: covered as f64 / bin_frames as f64,
            }
        })
        .collect()
}

/// One time bin of the tracker-vs-human comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreComparisonRow {
    pub time_min: f64,
    pub tracker_rate: f64,
    pub manual_rate: f64,
}

/// Pair a tracker series with the manual series for the same well, bin by
/// bin, and report the mean absolute rate difference. Length mismatches are
/// compared over the shared prefix and logged.
pub fn compare_series(
    tracker: &[SeriesPoint],
    manual: &[SeriesPoint],
) -> (Vec<ScoreComparisonRow>, f64) {
    if tracker.len() != manual.len() {
        log::warn!(
            "Tracker series has {} bins, manual has {} — comparing the shared prefix",
            tracker.len(),
            manual.len()
        );
    }

    let rows: Vec<ScoreComparisonRow> = tracker
        .iter()
        .zip(manual)
        .map(|(t, m)| ScoreComparisonRow {
            time_min: t.time_min,
            tracker_rate: t.rate,
            manual_rate: m.rate,
        })
        .collect();

    let mad = if rows.is_empty() {
        0.0
    } else {
        rows.iter()
            .map(|r| (r.tracker_rate - r.manual_rate).abs())
            .sum::<f64>()
            / rows.len() as f64
    };

    (rows, mad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn iv(behaviour: &str, start: usize, stop: usize) -> ScoredInterval {
        ScoredInterval {
            behaviour: behaviour.to_string(),
            start_frame: start,
            stop_frame: stop,
        }
    }

    #[test]
    fn test_manual_rate_full_and_empty_bins() {
        // 2 one-minute bins of 900 frames; undulation covers all of bin 0
        let intervals = vec![iv("Undulation", 0, 899)];
        let series = manual_rate_series(&intervals, 1800, 1);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].rate, 1.0);
        assert_eq!(series[0].time_min, 1.0);
        assert_eq!(series[1].rate, 0.0);
    }

    #[test]
    fn test_manual_rate_interval_straddles_bins() {
        // 450 frames in each of the two bins
        let intervals = vec![iv("Undulation", 450, 1349)];
        let series = manual_rate_series(&intervals, 1800, 1);
        assert!((series[0].rate - 0.5).abs() < 1e-12);
        assert!((series[1].rate - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_manual_rate_overlapping_bouts_count_once() {
        let intervals = vec![iv("Undulation", 0, 449), iv("Undulation", 300, 449)];
        let series = manual_rate_series(&intervals, 900, 1);
        assert!((series[0].rate - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_manual_rate_ignores_other_behaviours() {
        let intervals = vec![iv("Pumping", 0, 899)];
        let series = manual_rate_series(&intervals, 900, 1);
        assert_eq!(series[0].rate, 0.0);
    }

    #[test]
    fn test_compare_series_mad() {
        let tracker = vec![
            SeriesPoint { time_min: 3.0, rate: 0.5 },
            SeriesPoint { time_min: 6.0, rate: 1.0 },
        ];
        let manual = vec![
            SeriesPoint { time_min: 3.0, rate: 0.4 },
            SeriesPoint { time_min: 6.0, rate: 0.7 },
        ];
        let (rows, mad) = compare_series(&tracker, &manual);
        assert_eq!(rows.len(), 2);
        assert!((mad - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_load_scores_keys_by_well() {
        let dir = std::env::temp_dir().join("wormwave_scores");
        std::fs::create_dir_all(&dir).unwrap();
        let mut f = std::fs::File::create(dir.join("scoring_ZT8_A4.csv")).unwrap();
        writeln!(f, "Behaviour,Start_Frame,Stop_Frame").unwrap();
        writeln!(f, "Undulation,0,899").unwrap();
        writeln!(f, "Pumping,900,1000").unwrap();
        drop(f);
        std::fs::write(dir.join("readme.csv"), "not,a,scoring\n1,2,3\n").unwrap();

        let scores = load_scores(&dir).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        assert_eq!(scores.len(), 1);
        let well: crate::layout::Well = "A4".parse().unwrap();
        assert_eq!(scores[&well].len(), 2);
        assert_eq!(scores[&well][0], iv("Undulation", 0, 899));
    }
}
