use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rate::SummaryRow;
use crate::scoring::ScoreComparisonRow;
use crate::stats::AucRecord;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

// Column names follow the historical export format so downstream plotting
// notebooks keep working.

#[derive(Debug, Serialize, Deserialize)]
struct SummaryCsvRow {
    #[serde(rename = "Group")]
    group: String,
    #[serde(rename = "Time")]
    time: f64,
    #[serde(rename = "Mean")]
    mean: f64,
    #[serde(rename = "SEM")]
    sem: f64,
    #[serde(rename = "N")]
    n: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct AucCsvRow {
    #[serde(rename = "Group")]
    group: String,
    #[serde(rename = "Worm")]
    worm: String,
    #[serde(rename = "AUC")]
    auc: f64,
}

#[derive(Debug, Serialize)]
struct ScoreCsvRow {
    #[serde(rename = "Time")]
    time: f64,
    #[serde(rename = "Tracker")]
    tracker: f64,
    #[serde(rename = "Manual")]
    manual: f64,
}

/// Date-stamped output path, e.g. `20260825_Undulation_Ratios.csv`.
pub fn dated_path(dir: &Path, stem: &str) -> PathBuf {
    let date = Local::now().format("%Y%m%d");
    dir.join(format!("{date}_{stem}.csv"))
}

pub fn write_summary(path: &Path, rows: &[SummaryRow]) -> Result<(), ExportError> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(SummaryCsvRow {
            group: row.group.clone(),
            time: row.time_min,
            mean: row.mean,
            sem: row.sem,
            n: row.n,
        })?;
    }
    writer.flush()?;
    Ok(())
}

// Only the AUC table is re-read by the CLI; the summary reader exists to
// verify the written format.
#[cfg(test)]
fn read_summary(path: &Path) -> Result<Vec<SummaryRow>, ExportError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for result in reader.deserialize::<SummaryCsvRow>() {
        let row = result?;
        rows.push(SummaryRow {
            group: row.group,
            time_min: row.time,
            mean: row.mean,
            sem: row.sem,
            n: row.n,
        });
    }
    Ok(rows)
}

pub fn write_auc(path: &Path, records: &[AucRecord]) -> Result<(), ExportError> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(AucCsvRow {
            group: record.group.clone(),
            worm: record.animal.clone(),
            auc: record.auc,
        })?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_auc(path: &Path) -> Result<Vec<AucRecord>, ExportError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    for result in reader.deserialize::<AucCsvRow>() {
        let row = result?;
        records.push(AucRecord {
            group: row.group,
            animal: row.worm,
            auc: row.auc,
        });
    }
    Ok(records)
}

pub fn write_score_comparison(
    path: &Path,
    rows: &[ScoreComparisonRow],
) -> Result<(), ExportError> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(ScoreCsvRow {
            time: row.time_min,
            tracker: row.tracker_rate,
            manual: row.manual_rate,
        })?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_round_trip() {
        let rows = vec![
            SummaryRow {
                group: "ZT8".to_string(),
                time_min: 3.0,
                mean: 0.4166666666666667,
                sem: 0.08333333333333333,
                n: 12,
            },
            SummaryRow {
                group: "ZT8".to_string(),
                time_min: 6.0,
                mean: 0.25,
                sem: 0.1,
                n: 11,
            },
        ];

        let path = std::env::temp_dir().join("wormwave_summary_roundtrip.csv");
        write_summary(&path, &rows).unwrap();
        let back = read_summary(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(back.len(), rows.len());
        for (a, b) in rows.iter().zip(&back) {
            assert_eq!(a.group, b.group);
            assert_eq!(a.time_min, b.time_min);
            assert_eq!(a.mean, b.mean);
            assert_eq!(a.sem, b.sem);
            assert_eq!(a.n, b.n);
        }
    }

    #[test]
    fn test_auc_round_trip() {
        let records = vec![
            AucRecord {
                group: "WT".to_string(),
                animal: "WT01".to_string(),
                auc: 12.375,
            },
            AucRecord {
                group: "MUT".to_string(),
                animal: "MUT07".to_string(),
                auc: 0.0,
            },
        ];

        let path = std::env::temp_dir().join("wormwave_auc_roundtrip.csv");
        write_auc(&path, &records).unwrap();
        let back = read_auc(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(back, records);
    }

    #[test]
    fn test_dated_path_shape() {
        let p = dated_path(Path::new("/tmp"), "Undulation_Ratios");
        let name = p.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with("_Undulation_Ratios.csv"));
        // YYYYMMDD prefix
        assert_eq!(name.chars().take(8).filter(char::is_ascii_digit).count(), 8);
    }
}
