use std::collections::{BTreeMap, BTreeSet};

use crate::extract::trajectory::Trajectory;
use crate::extract::TrackKey;
use crate::layout::Well;

/// Find wells whose tracking is too patchy to trust.
///
/// A well is flagged when, in any of its videos, any required body point has
/// fewer valid frames than `threshold` of the expected count. Flagging never
/// mutates the data — exclusion is a separate, explicit step so the caller
/// (or the operator, via CLI overrides) keeps the final say.
pub fn check_coverage(
    tracks: &BTreeMap<TrackKey, Trajectory>,
    expected_frames: usize,
    required_points: &[String],
    threshold: f64,
) -> BTreeSet<Well> {
    let mut flagged = BTreeSet::new();

    for (key, traj) in tracks {
        if flagged.contains(&key.well) {
            continue;
        }
        for point in required_points {
            let coverage = traj.coverage(point, expected_frames);
            if coverage < threshold {
                log::warn!(
                    "Well {} video {:06}: point '{}' tracked in {:.1}% of frames (below {:.0}%)",
                    key.well,
                    key.video,
                    point,
                    coverage * 100.0,
                    threshold * 100.0
                );
                flagged.insert(key.well);
                break;
            }
        }
    }

    flagged
}

/// Apply operator overrides to the flagged set: `keep` un-flags wells the
/// operator vouches for, `exclude` adds wells regardless of coverage. A well
/// named in both stays excluded.
pub fn apply_overrides(flagged: &mut BTreeSet<Well>, keep: &[Well], exclude: &[Well]) {
    for well in keep {
        if flagged.remove(well) {
            log::info!("Keeping well {well} despite low coverage");
        }
    }
    for well in exclude {
        flagged.insert(*well);
    }
}

/// Remove every (video, well) entry whose well is flagged. Idempotent; wells
/// with no remaining entries are a no-op.
pub fn remove_flagged(tracks: &mut BTreeMap<TrackKey, Trajectory>, flagged: &BTreeSet<Well>) {
    tracks.retain(|key, _| !flagged.contains(&key.well));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::trajectory::Trajectory;

    fn traj(valid_frames: usize, total_frames: usize) -> Trajectory {
        let rows: Vec<_> = (0..total_frames)
            .map(|f| {
                let coord = if f < valid_frames { Some(1.0) } else { None };
                (f, "head".to_string(), coord, coord)
            })
            .collect();
        Trajectory::from_rows(&rows)
    }

    fn key(video: u32, well: &str) -> TrackKey {
        TrackKey {
            video,
            well: well.parse().unwrap(),
        }
    }

    fn points() -> Vec<String> {
        vec!["head".to_string()]
    }

    #[test]
    fn test_complete_tracking_never_flagged() {
        let mut tracks = BTreeMap::new();
        tracks.insert(key(1, "A1"), traj(100, 100));
        tracks.insert(key(1, "B2"), traj(100, 100));
        let flagged = check_coverage(&tracks, 100, &points(), 0.9);
        assert!(flagged.is_empty());
    }

    #[test]
    fn test_low_coverage_flagged() {
        let mut tracks = BTreeMap::new();
        tracks.insert(key(1, "A1"), traj(100, 100));
        tracks.insert(key(1, "B2"), traj(50, 100));
        let flagged = check_coverage(&tracks, 100, &points(), 0.9);
        assert_eq!(flagged.len(), 1);
        assert!(flagged.contains(&"B2".parse().unwrap()));
    }

    #[test]
    fn test_flag_applies_across_videos_of_same_well() {
        // Bad tracking in one video taints the well everywhere
        let mut tracks = BTreeMap::new();
        tracks.insert(key(1, "A1"), traj(100, 100));
        tracks.insert(key(2, "A1"), traj(10, 100));
        let flagged = check_coverage(&tracks, 100, &points(), 0.9);
        assert!(flagged.contains(&"A1".parse().unwrap()));

        let mut tracks = tracks;
        remove_flagged(&mut tracks, &flagged);
        assert!(tracks.is_empty());
    }

    #[test]
    fn test_missing_required_point_flagged() {
        let mut tracks = BTreeMap::new();
        tracks.insert(key(1, "A1"), traj(100, 100));
        let flagged = check_coverage(&tracks, 100, &["tail".to_string()], 0.9);
        assert_eq!(flagged.len(), 1);
    }

    #[test]
    fn test_keep_override_unflags_single_well() {
        let mut tracks = BTreeMap::new();
        tracks.insert(key(1, "A1"), traj(50, 100));
        tracks.insert(key(1, "B2"), traj(50, 100));
        tracks.insert(key(1, "C3"), traj(100, 100));
        let mut flagged = check_coverage(&tracks, 100, &points(), 0.9);
        assert_eq!(flagged.len(), 2);

        // Operator keeps A1; B2 stays flagged and is still dropped
        apply_overrides(&mut flagged, &["A1".parse().unwrap()], &[]);
        remove_flagged(&mut tracks, &flagged);
        assert_eq!(tracks.len(), 2);
        assert!(tracks.contains_key(&key(1, "A1")));
        assert!(!tracks.contains_key(&key(1, "B2")));
    }

    #[test]
    fn test_exclude_wins_over_keep() {
        let mut flagged = BTreeSet::new();
        let well: Well = "D4".parse().unwrap();
        apply_overrides(&mut flagged, &[well], &[well]);
        assert!(flagged.contains(&well));
    }

    #[test]
    fn test_remove_flagged_idempotent() {
        let mut tracks = BTreeMap::new();
        tracks.insert(key(1, "A1"), traj(100, 100));
        let mut flagged = BTreeSet::new();
        flagged.insert("B2".parse::<Well>().unwrap());

        remove_flagged(&mut tracks, &flagged);
        remove_flagged(&mut tracks, &flagged);
        assert_eq!(tracks.len(), 1);
    }
}
