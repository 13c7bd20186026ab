pub mod filename;
pub mod trajectory;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use thiserror::Error;
use walkdir::WalkDir;

use crate::layout::Well;
use trajectory::Trajectory;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad row {line} in {path}: {message}")]
    BadRow {
        path: PathBuf,
        line: u64,
        message: String,
    },
    #[error("{path} holds no tracking rows")]
    Empty { path: PathBuf },
}

/// Identity of one animal recording: which video, which well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrackKey {
    pub video: u32,
    pub well: Well,
}

impl fmt::Display for TrackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06}{}", self.video, self.well)
    }
}

/// Outcome of extracting one directory of tracking files.
///
/// Files that don't follow the naming convention are counted in `skipped`;
/// files that matched but failed to parse are collected in `failed` with their
/// error so the caller can decide skip-vs-abort. Neither aborts the batch.
pub struct ExtractionResult {
    pub tracks: BTreeMap<TrackKey, Trajectory>,
    pub skipped: usize,
    pub failed: Vec<(PathBuf, ExtractError)>,
}

impl ExtractionResult {
    /// Body point names seen in the data, taken from the first trajectory
    /// (tracking exports of one experiment share one point set).
    pub fn point_names(&self) -> Vec<String> {
        self.tracks
            .values()
            .next()
            .map(|t| t.point_names().to_vec())
            .unwrap_or_default()
    }
}

// Tracking CSV row as written by the tracker: one body point in one frame.
// Untracked coordinates are empty cells. Extra columns are ignored.
#[derive(Debug, Deserialize)]
struct RawRow {
    frame_number: usize,
    name: String,
    x: Option<f64>,
    y: Option<f64>,
}

/// Load every tracking file in `dir` (flat directory, `.csv` only) into
/// per-(video, well) trajectories.
pub fn extract_dir(dir: &Path) -> Result<ExtractionResult, ExtractError> {
    let mut csv_files: Vec<(PathBuf, filename::ParsedTrackFile)> = Vec::new();
    let mut skipped = 0usize;

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        if ext != "csv" {
            continue;
        }
        match filename::parse_track_file(path) {
            Some(parsed) => csv_files.push((path.to_path_buf(), parsed)),
            None => {
                log::debug!("Skipping {} (name does not match convention)", path.display());
                skipped += 1;
            }
        }
    }

    // Sorting by (video, well) keeps extraction order deterministic
    csv_files.sort_by_key(|(_, p)| (p.video, p.well));

    let pb = ProgressBar::new(csv_files.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_message("Extracting...");

    let mut tracks = BTreeMap::new();
    let mut failed = Vec::new();

    for (path, parsed) in csv_files {
        match load_track_file(&path) {
            Ok(traj) => {
                let key = TrackKey {
                    video: parsed.video,
                    well: parsed.well,
                };
                tracks.insert(key, traj);
            }
            Err(e) => {
                log::warn!("Failed to load {}: {}", path.display(), e);
                failed.push((path, e));
            }
        }
        pb.inc(1);
    }

    pb.finish_with_message(format!(
        "Done: {} loaded, {} skipped, {} failed",
        tracks.len(),
        skipped,
        failed.len()
    ));

    Ok(ExtractionResult {
        tracks,
        skipped,
        failed,
    })
}

fn load_track_file(path: &Path) -> Result<Trajectory, ExtractError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows: Vec<(usize, String, Option<f64>, Option<f64>)> = Vec::new();

    for result in reader.deserialize::<RawRow>() {
        match result {
            Ok(row) => rows.push((row.frame_number, row.name, row.x, row.y)),
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or(0);
                return Err(ExtractError::BadRow {
                    path: path.to_path_buf(),
                    line,
                    message: e.to_string(),
                });
            }
        }
    }

    if rows.is_empty() {
        return Err(ExtractError::Empty {
            path: path.to_path_buf(),
        });
    }

    Ok(Trajectory::from_rows(&rows))
}

impl From<csv::Error> for ExtractError {
    fn from(e: csv::Error) -> Self {
        match e.into_kind() {
            csv::ErrorKind::Io(io) => ExtractError::Io(io),
            other => ExtractError::BadRow {
                path: PathBuf::new(),
                line: 0,
                message: format!("{other:?}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_track_csv(dir: &Path, name: &str, rows: &[(usize, &str, &str, &str)]) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        writeln!(f, "frame_number,name,x,y").unwrap();
        for (frame, point, x, y) in rows {
            writeln!(f, "{frame},{point},{x},{y}").unwrap();
        }
    }

    #[test]
    fn test_extract_dir_loads_matching_files() {
        let dir = std::env::temp_dir().join("wormwave_extract_ok");
        std::fs::create_dir_all(&dir).unwrap();
        write_track_csv(
            &dir,
            "zt8000001A1_tracks.csv",
            &[(0, "head", "1.0", "2.0"), (1, "head", "1.1", "2.1")],
        );
        write_track_csv(&dir, "notes.csv", &[(0, "head", "1.0", "2.0")]);

        let result = extract_dir(&dir).unwrap();
        assert_eq!(result.tracks.len(), 1);
        assert_eq!(result.skipped, 1);
        assert!(result.failed.is_empty());

        let key = *result.tracks.keys().next().unwrap();
        assert_eq!(key.video, 1);
        assert_eq!(key.well.to_string(), "A1");
        assert_eq!(result.tracks[&key].frame_count(), 2);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_extract_dir_surfaces_per_file_failures() {
        let dir = std::env::temp_dir().join("wormwave_extract_bad");
        std::fs::create_dir_all(&dir).unwrap();
        write_track_csv(&dir, "zt8000001A1_tracks.csv", &[(0, "head", "1.0", "2.0")]);
        // Matched name but garbage column structure
        let mut f = std::fs::File::create(dir.join("zt8000002A2_tracks.csv")).unwrap();
        writeln!(f, "something,else").unwrap();
        writeln!(f, "1,2").unwrap();
        drop(f);

        let result = extract_dir(&dir).unwrap();
        assert_eq!(result.tracks.len(), 1);
        assert_eq!(result.failed.len(), 1);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_coordinates_become_nan() {
        let dir = std::env::temp_dir().join("wormwave_extract_nan");
        std::fs::create_dir_all(&dir).unwrap();
        write_track_csv(
            &dir,
            "zt8000001A1_tracks.csv",
            &[(0, "head", "1.0", "2.0"), (1, "head", "", "")],
        );

        let result = extract_dir(&dir).unwrap();
        let traj = result.tracks.values().next().unwrap();
        let head = traj.point("head").unwrap();
        assert!(head.x[1].is_nan());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
