use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

use crate::layout::PlateLayout;
use crate::{FRAMES_PER_MINUTE, FRAME_RATE};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("no experimental groups configured")]
    NoGroups,
    #[error("duplicate group name '{0}'")]
    DuplicateGroup(String),
    #[error("no body points configured for detection")]
    NoBodyPoints,
    #[error("analysis window must be positive, got {0} s")]
    BadWindow(f64),
    #[error("time bin must be positive, got {0} min")]
    BadBin(usize),
    #[error(
        "time bin ({bin_frames} frames) is not a whole number of analysis windows ({window_frames} frames)"
    )]
    BinWindowMismatch {
        bin_frames: usize,
        window_frames: usize,
    },
    #[error("frame count {frame_count} is not a whole number of {bin_minutes}-minute bins")]
    FrameBinMismatch {
        frame_count: usize,
        bin_minutes: usize,
    },
    #[error("significance threshold must be in (0, 1), got {0}")]
    BadAlpha(f64),
    #[error("coverage threshold must be in (0, 1], got {0}")]
    BadCoverage(f64),
    #[error("unknown body point '{point}' — tracked points are: {known}")]
    UnknownBodyPoint { point: String, known: String },
}

/// One experimental condition: a name and the directory holding its tracking files.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    pub dir: PathBuf,
}

/// Analysis configuration loaded from a TOML file.
///
/// Replaces the prompt-per-value flow of the original workflow: every knob is
/// declared up front and validated once before any analysis runs. All fields
/// have defaults except the group list.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Experimental groups, one tracking-file directory per condition.
    pub groups: Vec<GroupConfig>,
    /// Expected frames per video (54000 = one hour at 15 fps).
    pub frame_count: usize,
    /// Width of the spectral analysis window in seconds.
    pub window_secs: f64,
    /// Width of the rate aggregation bin in minutes.
    pub bin_minutes: usize,
    /// Plate layout mapping wells to animal labels.
    pub layout: PlateLayout,
    /// Body points checked for undulation, in priority order.
    pub body_points: Vec<String>,
    /// Whether compared groups are independent samples (unpaired tests).
    pub independent: bool,
    /// Significance threshold for normality and group comparisons.
    pub alpha: f64,
    /// Minimum fraction of tracked frames per body point before a well is flagged.
    pub coverage_threshold: f64,
    /// Directory of manually scored behavior CSVs, if any.
    pub scoring_dir: Option<PathBuf>,
    /// Spectral detector tuning. The defaults are calibrated to 15 fps worm
    /// tracking and should not normally be changed.
    pub detector: DetectorSettings,
}

/// Hand-tuned detector constants, exposed as configuration for completeness
/// but behaviorally fixed: band indices 4/17 and the (0.5, 15) displacement
/// gate match the validated analysis.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    pub sample_rate: f64,
    pub band_low: usize,
    pub band_high: usize,
    pub min_displacement: f64,
    pub max_displacement: f64,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            sample_rate: FRAME_RATE,
            band_low: 4,
            band_high: 17,
            min_displacement: 0.5,
            max_displacement: 15.0,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            groups: Vec::new(),
            frame_count: 54000,
            window_secs: 60.0,
            bin_minutes: 3,
            layout: PlateLayout::Common,
            body_points: vec!["head".to_string()],
            independent: true,
            alpha: 0.05,
            coverage_threshold: 0.9,
            scoring_dir: None,
            detector: DetectorSettings::default(),
        }
    }
}

impl AnalysisConfig {
    /// Load and validate a config file. With no explicit path, falls back to
    /// `~/.config/wormwave/config.toml` (missing file = defaults). Group
    /// directories are only checked by `require_groups`, so subcommands that
    /// work from exported tables run without any config file.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(p) => Self::read(p)?,
            None => match Self::default_path() {
                Some(p) if p.exists() => Self::read(&p)?,
                _ => {
                    log::debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Analysis window width in frames.
    pub fn window_frames(&self) -> usize {
        (self.window_secs * self.detector.sample_rate) as usize
    }

    /// Aggregation bin width in frames.
    pub fn bin_frames(&self) -> usize {
        self.bin_minutes * FRAMES_PER_MINUTE
    }

    /// Validate the configuration's internal consistency. Deliberately does
    /// not require groups: `compare` reads its samples from an exported AUC
    /// table and must run with a bare (or absent) config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (i, g) in self.groups.iter().enumerate() {
            if self.groups[..i].iter().any(|other| other.name == g.name) {
                return Err(ConfigError::DuplicateGroup(g.name.clone()));
            }
        }
        if self.body_points.is_empty() {
            return Err(ConfigError::NoBodyPoints);
        }
        if self.window_secs <= 0.0 {
            return Err(ConfigError::BadWindow(self.window_secs));
        }
        if self.bin_minutes == 0 {
            return Err(ConfigError::BadBin(self.bin_minutes));
        }
        let window_frames = self.window_frames();
        let bin_frames = self.bin_frames();
        if window_frames == 0 || bin_frames % window_frames != 0 {
            return Err(ConfigError::BinWindowMismatch {
                bin_frames,
                window_frames,
            });
        }
        if self.frame_count == 0 || self.frame_count % bin_frames != 0 {
            return Err(ConfigError::FrameBinMismatch {
                frame_count: self.frame_count,
                bin_minutes: self.bin_minutes,
            });
        }
        if !(0.0..1.0).contains(&self.alpha) || self.alpha == 0.0 {
            return Err(ConfigError::BadAlpha(self.alpha));
        }
        if !(0.0..=1.0).contains(&self.coverage_threshold) || self.coverage_threshold == 0.0 {
            return Err(ConfigError::BadCoverage(self.coverage_threshold));
        }
        Ok(())
    }

    /// Subcommands that read tracking directories call this before touching
    /// `groups`.
    pub fn require_groups(&self) -> Result<(), ConfigError> {
        if self.groups.is_empty() {
            return Err(ConfigError::NoGroups);
        }
        Ok(())
    }

    /// Check the configured body points against the point names actually
    /// present in the loaded data. An out-of-range selection stops analysis.
    pub fn validate_body_points(&self, known: &[String]) -> Result<(), ConfigError> {
        for point in &self.body_points {
            if !known.contains(point) {
                return Err(ConfigError::UnknownBodyPoint {
                    point: point.clone(),
                    known: known.join(", "),
                });
            }
        }
        Ok(())
    }
}
