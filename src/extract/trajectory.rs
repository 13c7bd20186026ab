use std::collections::HashMap;

/// Per-frame x/y coordinates of one tracked body point. Frames where the
/// tracker lost the point hold NaN.
#[derive(Debug, Clone, Default)]
pub struct PointTrack {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

/// All tracked body points of one animal in one video, indexed by frame.
///
/// Built by pivoting the row-per-(frame, point) tracking CSV into dense
/// per-point coordinate vectors. Immutable after loading, except for the
/// one-time gap interpolation pass.
#[derive(Debug, Clone, Default)]
pub struct Trajectory {
    point_names: Vec<String>,
    tracks: HashMap<String, PointTrack>,
    frames: usize,
}

impl Trajectory {
    /// Assemble a trajectory from (frame, point, x, y) rows. Missing
    /// coordinates and frames never mentioned in the file become NaN.
    pub fn from_rows(rows: &[(usize, String, Option<f64>, Option<f64>)]) -> Self {
        let frames = rows.iter().map(|r| r.0 + 1).max().unwrap_or(0);

        let mut point_names: Vec<String> = Vec::new();
        let mut tracks: HashMap<String, PointTrack> = HashMap::new();

        for (frame, name, x, y) in rows {
            let track = tracks.entry(name.clone()).or_insert_with(|| {
                point_names.push(name.clone());
                PointTrack {
                    x: vec![f64::NAN; frames],
                    y: vec![f64::NAN; frames],
                }
            });
            track.x[*frame] = x.unwrap_or(f64::NAN);
            track.y[*frame] = y.unwrap_or(f64::NAN);
        }

        Self {
            point_names,
            tracks,
            frames,
        }
    }

    /// Body point names in file order.
    pub fn point_names(&self) -> &[String] {
        &self.point_names
    }

    pub fn point(&self, name: &str) -> Option<&PointTrack> {
        self.tracks.get(name)
    }

    /// Number of frames covered by the file (highest frame index + 1).
    pub fn frame_count(&self) -> usize {
        self.frames
    }

    /// Fraction of frames with a valid x coordinate for the given point.
    /// Expected frame count comes from the caller — a file that ends early
    /// scores low against the full video length.
    pub fn coverage(&self, point: &str, expected_frames: usize) -> f64 {
        if expected_frames == 0 {
            return 0.0;
        }
        match self.tracks.get(point) {
            Some(track) => {
                let valid = track.x.iter().filter(|v| !v.is_nan()).count();
                valid as f64 / expected_frames as f64
            }
            None => 0.0,
        }
    }

    /// Linearly interpolate NaN gaps in every coordinate series. Interior gaps
    /// are filled between the surrounding valid values, trailing gaps hold the
    /// last valid value, leading gaps stay NaN (the detector's movement gate
    /// rejects windows containing NaN, so untracked starts bias toward
    /// no-detection rather than invented motion).
    pub fn interpolate(&mut self) {
        for track in self.tracks.values_mut() {
            interpolate_series(&mut track.x);
            interpolate_series(&mut track.y);
        }
    }
}

fn interpolate_series(values: &mut [f64]) {
    let mut last_valid: Option<usize> = None;

    for i in 0..values.len() {
        if values[i].is_nan() {
            continue;
        }
        if let Some(prev) = last_valid {
            let gap = i - prev;
            if gap > 1 {
                let step = (values[i] - values[prev]) / gap as f64;
                for (k, slot) in (prev + 1..i).enumerate() {
                    values[slot] = values[prev] + step * (k + 1) as f64;
                }
            }
        }
        last_valid = Some(i);
    }

    // Hold the last observation through a trailing gap
    if let Some(prev) = last_valid {
        let fill = values[prev];
        for v in values[prev + 1..].iter_mut() {
            *v = fill;
        }
    }
}
