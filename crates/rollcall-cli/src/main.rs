use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use rollcall_core::{
    build_reference_set, Config, DistanceMetric, FaceExtractor, Matcher, NearestNeighborMatcher,
    OnnxExtractor,
};
use rollcall_hw::Camera;
use rollcall_ledger::{AttendanceRecord, Ledger, RecordOutcome};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the reference set and show what was enrolled or skipped
    Enroll {
        /// Enrollment image directory (defaults to the configured one)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
    /// Identify every face in a still image
    Identify {
        image: PathBuf,
        /// Override the configured match threshold
        #[arg(short, long)]
        threshold: Option<f32>,
        /// Override the configured distance metric
        #[arg(short, long)]
        metric: Option<DistanceMetric>,
    },
    /// Print attendance records
    Report {
        /// Only records for this date (YYYY-MM-DD)
        #[arg(short, long)]
        date: Option<NaiveDate>,
        /// Emit JSON instead of CSV
        #[arg(long)]
        json: bool,
    },
    /// Record attendance by hand
    Mark {
        name: String,
        /// Timestamp to record ("YYYY-MM-DD HH:MM:SS"); defaults to now
        #[arg(long, value_parser = parse_timestamp)]
        at: Option<NaiveDateTime>,
    },
    /// List V4L2 capture devices
    Devices,
}

fn parse_timestamp(s: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|e| format!("expected \"YYYY-MM-DD HH:MM:SS\": {e}"))
}

/// Records from the ledger at `path`, or `None` if there is no ledger yet.
fn read_records(path: &Path, date: Option<NaiveDate>) -> Result<Option<Vec<AttendanceRecord>>> {
    if !path.exists() {
        return Ok(None);
    }
    let ledger = Ledger::open_read_only(path)
        .with_context(|| format!("cannot open ledger {}", path.display()))?;
    let records = match date {
        Some(date) => ledger.records_on(date)?,
        None => ledger.records()?,
    };
    Ok(Some(records))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("failed to load configuration")?;

    match cli.command {
        Commands::Enroll { dir } => {
            let dir = dir.unwrap_or_else(|| config.enrollment_dir.clone());
            let mut extractor = OnnxExtractor::load(&config.model_dir, config.preprocess())
                .context("failed to load models")?;
            let report = build_reference_set(&dir, &mut extractor)?;

            for identity in &report.reference {
                println!("enrolled  {} ({}-d)", identity.name, identity.embedding.dimension());
            }
            for skipped in &report.skipped {
                println!("skipped   {}: {}", skipped.path.display(), skipped.reason);
            }
            println!(
                "{} enrolled, {} skipped",
                report.reference.len(),
                report.skipped.len()
            );
        }
        Commands::Identify {
            image,
            threshold,
            metric,
        } => {
            let threshold = threshold.unwrap_or(config.threshold);
            let matcher = NearestNeighborMatcher::new(metric.unwrap_or(config.metric));
            let mut extractor = OnnxExtractor::load(&config.model_dir, config.preprocess())
                .context("failed to load models")?;
            let report = build_reference_set(&config.enrollment_dir, &mut extractor)?;

            let frame = image::open(&image)
                .with_context(|| format!("cannot decode {}", image.display()))?
                .to_luma8();
            let faces = extractor.extract(&frame)?;
            if faces.is_empty() {
                println!("no faces found");
            }
            let results = matcher.compare_all(&faces, &report.reference, threshold);
            for (face, result) in faces.iter().zip(&results) {
                let label = match &result.identity {
                    Some(name) => name.to_uppercase(),
                    None => result.label().to_string(),
                };
                println!(
                    "{:<16} distance={:.4} box=({:.0},{:.0},{:.0}x{:.0})",
                    label,
                    result.distance,
                    face.bbox.x,
                    face.bbox.y,
                    face.bbox.width,
                    face.bbox.height
                );
            }
        }
        Commands::Report { date, json } => {
            let Some(records) = read_records(&config.ledger_path, date)? else {
                println!("no ledger at {}", config.ledger_path.display());
                return Ok(());
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                println!("Name,Date,Time");
                for r in &records {
                    println!("{},{},{}", r.name, r.date_str(), r.time_str());
                }
            }
        }
        Commands::Mark { name, at } => {
            let mut ledger = Ledger::open(&config.ledger_path)?;
            let now = at.unwrap_or_else(|| Local::now().naive_local());
            match ledger.record_attendance(&name.to_uppercase(), now)? {
                RecordOutcome::Recorded(r) => {
                    println!("recorded {} on {} at {}", r.name, r.date_str(), r.time_str())
                }
                RecordOutcome::AlreadyRecorded(r) => {
                    println!("{} already recorded on {} at {}", r.name, r.date_str(), r.time_str())
                }
            }
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("no capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_timestamp_accepts_space_or_t() {
        let a = parse_timestamp("2024-05-06 08:30:00").unwrap();
        let b = parse_timestamp("2024-05-06T08:30:00").unwrap();
        assert_eq!(a, b);
        assert!(parse_timestamp("08:30").is_err());
    }

    #[test]
    fn test_identify_metric_flag() {
        let cli = Cli::try_parse_from(["rollcall", "identify", "face.jpg", "--metric", "cosine"])
            .unwrap();
        match cli.command {
            Commands::Identify { metric, threshold, .. } => {
                assert_eq!(metric, Some(DistanceMetric::Cosine));
                assert_eq!(threshold, None);
            }
            _ => panic!("expected identify"),
        }
    }

    #[test]
    fn test_report_does_not_create_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data/attendance.db");

        assert!(read_records(&path, None).unwrap().is_none());
        assert!(!path.exists());
        assert!(!dir.path().join("data").exists());
    }

    #[test]
    fn test_report_reads_existing_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.db");
        let day = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();
        let mut ledger = Ledger::open(&path).unwrap();
        ledger.record_attendance("ALICE", day.and_hms_opt(9, 0, 0).unwrap()).unwrap();
        let next_day = day.succ_opt().unwrap();
        ledger.record_attendance("BOB", next_day.and_hms_opt(9, 0, 0).unwrap()).unwrap();
        drop(ledger);

        let all = read_records(&path, None).unwrap().unwrap();
        assert_eq!(all.len(), 2);
        let first_day = read_records(&path, Some(day)).unwrap().unwrap();
        assert_eq!(first_day.len(), 1);
        assert_eq!(first_day[0].name, "ALICE");
    }
}
