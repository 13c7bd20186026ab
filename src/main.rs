use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;

use wormwave::config::AnalysisConfig;
use wormwave::layout::Well;
use wormwave::rate::{AnimalSeries, Group};

#[derive(Parser)]
#[command(name = "wormwave", version, about = "Worm undulation analysis from tracking data")]
struct Cli {
    /// Path to the analysis config (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: extract, detect, bin, summarize, compare
    Analyze {
        /// Directory for output CSVs
        #[arg(short, long, default_value = ".")]
        out: PathBuf,

        /// Number of parallel workers (0 = auto-detect)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,

        /// Keep all wells that fail the coverage check instead of dropping them
        #[arg(long)]
        keep_low_coverage: bool,

        /// Keep these specific wells even if flagged (e.g. A3 B5)
        #[arg(long, num_args = 0..)]
        keep: Vec<String>,

        /// Additionally exclude these wells (e.g. A3 B5)
        #[arg(long, num_args = 0..)]
        exclude: Vec<String>,
    },

    /// Report per-well tracking coverage without running the analysis
    Coverage,

    /// Compare two groups from a previously exported AUC table
    Compare {
        /// AUC CSV written by a prior `analyze` run
        auc_file: PathBuf,

        /// First group name
        group_a: String,

        /// Second group name
        group_b: String,
    },

    /// Check tracker-derived rates against manually scored behavior
    Score {
        /// Group whose tracking data to score against (defaults to the first)
        #[arg(short, long)]
        group: Option<String>,

        /// Directory of manual scoring CSVs (overrides config scoring_dir)
        #[arg(short, long)]
        scores: Option<PathBuf>,

        /// Directory for output CSVs
        #[arg(short, long, default_value = ".")]
        out: PathBuf,

        /// Number of parallel workers (0 = auto-detect)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    let config = AnalysisConfig::load(cli.config.as_deref()).context("Invalid configuration")?;

    match cli.command {
        Commands::Analyze {
            out,
            jobs,
            keep_low_coverage,
            keep,
            exclude,
        } => run_analyze(
            &config,
            &out,
            resolve_jobs(jobs),
            keep_low_coverage,
            &keep,
            &exclude,
        ),
        Commands::Coverage => run_coverage(&config),
        Commands::Compare {
            auc_file,
            group_a,
            group_b,
        } => run_compare(&config, &auc_file, &group_a, &group_b),
        Commands::Score {
            group,
            scores,
            out,
            jobs,
        } => run_score(&config, group.as_deref(), scores, &out, resolve_jobs(jobs)),
    }
}

fn resolve_jobs(jobs: usize) -> usize {
    if jobs > 0 {
        return jobs;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn parse_wells(args: &[String], flag: &str) -> Result<Vec<Well>> {
    args.iter()
        .map(|w| {
            w.parse()
                .map_err(|e| anyhow::anyhow!("Bad well in --{flag}: {e}"))
        })
        .collect()
}

/// Extract, coverage-check, and detect one group's tracking directory,
/// returning its binned rate series.
fn process_group(
    config: &AnalysisConfig,
    name: &str,
    dir: &std::path::Path,
    jobs: usize,
    keep_low_coverage: bool,
    keep: &[Well],
    exclude: &[Well],
) -> Result<Vec<AnimalSeries>> {
    log::info!("Processing group '{name}' from {}", dir.display());

    let extraction = wormwave::extract::extract_dir(dir)
        .with_context(|| format!("Failed to read tracking data for group '{name}'"))?;
    for (path, err) in &extraction.failed {
        log::warn!("Skipping {}: {err}", path.display());
    }
    if extraction.tracks.is_empty() {
        anyhow::bail!("No usable tracking files in {}", dir.display());
    }

    config
        .validate_body_points(&extraction.point_names())
        .context("Configured body points not present in the tracking data")?;

    let mut tracks = extraction.tracks;

    let mut flagged = wormwave::coverage::check_coverage(
        &tracks,
        config.frame_count,
        &config.body_points,
        config.coverage_threshold,
    );
    if keep_low_coverage {
        if !flagged.is_empty() {
            println!(
                "Keeping {} low-coverage well(s) in group '{name}' as requested",
                flagged.len()
            );
        }
        flagged.clear();
    }
    wormwave::coverage::apply_overrides(&mut flagged, keep, exclude);
    if !flagged.is_empty() {
        let names: Vec<String> = flagged.iter().map(|w| w.to_string()).collect();
        println!(
            "Group '{name}': dropping {} well(s): {}",
            flagged.len(),
            names.join(", ")
        );
        wormwave::coverage::remove_flagged(&mut tracks, &flagged);
    }

    for traj in tracks.values_mut() {
        traj.interpolate();
    }

    let detections = wormwave::detect::detect_all(
        &tracks,
        &config.body_points,
        config.window_frames(),
        &config.detector,
        jobs,
    )
    .with_context(|| format!("Detection failed for group '{name}'"))?;

    let binned = wormwave::rate::bin_rates(
        &detections,
        config.frame_count,
        config.window_frames(),
        config.bin_minutes,
        config.layout,
    );
    for mismatch in &binned.mismatched {
        println!("Warning ({name}): {mismatch}");
    }

    Ok(binned.series)
}

fn run_analyze(
    config: &AnalysisConfig,
    out: &std::path::Path,
    jobs: usize,
    keep_low_coverage: bool,
    keep: &[String],
    exclude: &[String],
) -> Result<()> {
    config.require_groups()?;
    let keep = parse_wells(keep, "keep")?;
    let exclude = parse_wells(exclude, "exclude")?;

    std::fs::create_dir_all(out)
        .with_context(|| format!("Cannot create output directory {}", out.display()))?;

    let mut groups = Vec::new();
    for gc in &config.groups {
        let series = process_group(
            config,
            &gc.name,
            &gc.dir,
            jobs,
            keep_low_coverage,
            &keep,
            &exclude,
        )?;
        groups.push(Group {
            name: gc.name.clone(),
            series,
        });
    }

    let summary = wormwave::rate::summarize(&groups);
    let summary_path = wormwave::export::dated_path(out, "Undulation_Ratios");
    wormwave::export::write_summary(&summary_path, &summary)
        .context("Failed to write rate summary")?;
    println!("Rate summary: {}", summary_path.display());

    let auc = wormwave::stats::auc_table(&groups).context("AUC computation failed")?;
    let auc_path = wormwave::export::dated_path(out, "AUC_Data");
    wormwave::export::write_auc(&auc_path, &auc).context("Failed to write AUC table")?;
    println!("AUC table:    {}", auc_path.display());
    println!();

    for (i, a) in groups.iter().enumerate() {
        for b in &groups[i + 1..] {
            let comparison = wormwave::stats::compare_records(
                &auc,
                &a.name,
                &b.name,
                config.independent,
                config.alpha,
            )
            .with_context(|| format!("Comparison of '{}' vs '{}' failed", a.name, b.name))?;
            println!("{comparison}");
        }
    }

    Ok(())
}

fn run_coverage(config: &AnalysisConfig) -> Result<()> {
    config.require_groups()?;
    for gc in &config.groups {
        let extraction = wormwave::extract::extract_dir(&gc.dir)
            .with_context(|| format!("Failed to read tracking data for group '{}'", gc.name))?;
        for (path, err) in &extraction.failed {
            log::warn!("Skipping {}: {err}", path.display());
        }

        println!("Group: {} ({} tracks)", gc.name, extraction.tracks.len());
        println!("{:<10} {:<8} {:<8} {:>10}", "Video", "Well", "Point", "Coverage");
        println!("{}", "-".repeat(40));

        for (key, traj) in &extraction.tracks {
            for point in &config.body_points {
                let coverage = traj.coverage(point, config.frame_count);
                let marker = if coverage < config.coverage_threshold {
                    "  <-- low"
                } else {
                    ""
                };
                println!(
                    "{:<10} {:<8} {:<8} {:>9.1}%{marker}",
                    key.video,
                    key.well.to_string(),
                    point,
                    coverage * 100.0
                );
            }
        }
        println!();
    }
    Ok(())
}

fn run_compare(
    config: &AnalysisConfig,
    auc_file: &std::path::Path,
    group_a: &str,
    group_b: &str,
) -> Result<()> {
    let records = wormwave::export::read_auc(auc_file)
        .with_context(|| format!("Failed to read {}", auc_file.display()))?;
    let comparison =
        wormwave::stats::compare_records(&records, group_a, group_b, config.independent, config.alpha)
            .context("Comparison failed")?;
    println!("{comparison}");
    Ok(())
}

fn run_score(
    config: &AnalysisConfig,
    group: Option<&str>,
    scores_dir: Option<PathBuf>,
    out: &std::path::Path,
    jobs: usize,
) -> Result<()> {
    config.require_groups()?;
    let gc = match group {
        Some(name) => config
            .groups
            .iter()
            .find(|g| g.name == name)
            .with_context(|| format!("No group named '{name}' in the configuration"))?,
        None => &config.groups[0],
    };
    let scores_dir = scores_dir
        .or_else(|| config.scoring_dir.clone())
        .context("No scoring directory given (use --scores or set scoring_dir)")?;

    let scores = wormwave::scoring::load_scores(&scores_dir)
        .with_context(|| format!("Failed to load manual scorings from {}", scores_dir.display()))?;
    if scores.is_empty() {
        anyhow::bail!("No scoring CSVs found in {}", scores_dir.display());
    }

    let series = process_group(config, &gc.name, &gc.dir, jobs, true, &[], &[])?;
    let by_well: BTreeMap<_, _> = series.iter().map(|s| (s.well, s)).collect();

    std::fs::create_dir_all(out)
        .with_context(|| format!("Cannot create output directory {}", out.display()))?;

    println!("{:<8} {:>6} {:>16}", "Well", "Bins", "Mean |rate diff|");
    println!("{}", "-".repeat(34));

    for (well, intervals) in &scores {
        let Some(tracker) = by_well.get(well) else {
            log::warn!("No tracking data for scored well {well}, skipping");
            continue;
        };
        let manual = wormwave::scoring::manual_rate_series(
            intervals,
            config.frame_count,
            config.bin_minutes,
        );
        let (rows, mad) = wormwave::scoring::compare_series(&tracker.points, &manual);

        let path = wormwave::export::dated_path(out, &format!("Scoring_{well}"));
        wormwave::export::write_score_comparison(&path, &rows)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        println!("{:<8} {:>6} {:>16.3}", well.to_string(), rows.len(), mad);
    }

    Ok(())
}
