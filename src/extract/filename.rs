use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::layout::Well;

/// Identity recovered from a tracking file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedTrackFile {
    pub video: u32,
    pub well: Well,
}

// Tracking exports are named `<date stamp><6-digit video number><well><suffix>`,
// e.g. 20200325000113A4_tracks.csv or 20200325_000113_A4_tracks.csv.
// The well may be separated from the video number by `_` or `-`.
static TRACK_FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        ^(?P<prefix>\w+?)
        (?P<video>\d{6})
        [_-]?
        (?P<well>[A-Ea-e][1-5])
        (?P<rest>\w*)$",
    )
    .unwrap()
});

/// Parse a tracking file path into (video number, well).
///
/// Returns `None` for paths that don't follow the naming convention — those
/// files are skipped, not errors (tracking directories routinely hold stray
/// exports and notes).
pub fn parse_track_file(path: &Path) -> Option<ParsedTrackFile> {
    let stem = path.file_stem().and_then(|s| s.to_str())?;
    let caps = TRACK_FILE_RE.captures(stem)?;

    let video: u32 = caps.name("video")?.as_str().parse().ok()?;
    let well: Well = caps.name("well")?.as_str().parse().ok()?;

    Some(ParsedTrackFile { video, well })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_compact_name() {
        let p = PathBuf::from("20200325000113A4_tracks.csv");
        let r = parse_track_file(&p).unwrap();
        assert_eq!(r.video, 113);
        assert_eq!(r.well.to_string(), "A4");
    }

    #[test]
    fn test_underscore_separated() {
        let p = PathBuf::from("zt8_000002_C3_tracks.csv");
        let r = parse_track_file(&p).unwrap();
        assert_eq!(r.video, 2);
        assert_eq!(r.well.to_string(), "C3");
    }

    #[test]
    fn test_lowercase_well() {
        let p = PathBuf::from("exp1000007b5.csv");
        let r = parse_track_file(&p).unwrap();
        assert_eq!(r.video, 7);
        assert_eq!(r.well.to_string(), "B5");
    }

    #[test]
    fn test_video_numbers_sort_numerically() {
        let a = parse_track_file(&PathBuf::from("d000002A1.csv")).unwrap();
        let b = parse_track_file(&PathBuf::from("d000010A1.csv")).unwrap();
        assert!(a.video < b.video);
    }

    #[test]
    fn test_no_video_number_skipped() {
        assert_eq!(parse_track_file(&PathBuf::from("notes_A4.csv")), None);
    }

    #[test]
    fn test_well_off_plate_skipped() {
        // F is not a plate row, so the pattern can't place a well
        assert_eq!(parse_track_file(&PathBuf::from("x000001F1_tracks.csv")), None);
    }

    #[test]
    fn test_unrelated_file_skipped() {
        assert_eq!(parse_track_file(&PathBuf::from("README.md")), None);
        assert_eq!(parse_track_file(&PathBuf::from(".hidden")), None);
    }
}
