pub mod config;
pub mod coverage;
pub mod detect;
pub mod export;
pub mod extract;
pub mod layout;
pub mod rate;
pub mod scoring;
pub mod stats;

/// Native frame rate of the tracking videos (frames per second).
pub const FRAME_RATE: f64 = 15.0;

/// Frames per minute of recording at the native frame rate.
pub const FRAMES_PER_MINUTE: usize = 900;

/// Application name for XDG paths
pub const APP_NAME: &str = "wormwave";
