use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rollcall_hw::{Camera, FrameSource};
use serde_json::Value;
use std::path::PathBuf;

#[zbus::proxy(
    interface = "org.rollcall.Kiosk1",
    default_service = "org.rollcall.Kiosk1",
    default_path = "/org/rollcall/Kiosk1"
)]
trait Kiosk {
    async fn register_student(&self, name: &str, matric_number: &str) -> zbus::Result<String>;
    async fn enroll(&self, matric_number: &str) -> zbus::Result<String>;
    async fn mark_attendance(&self, course_code: &str) -> zbus::Result<String>;
    async fn identify(&self) -> zbus::Result<String>;
    async fn list_students(&self) -> zbus::Result<String>;
    async fn remove_student(&self, matric_number: &str) -> zbus::Result<bool>;
    async fn attendance(&self, course_code: &str, date: &str) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance kiosk CLI")]
struct Cli {
    /// Bus the daemon is registered on
    #[arg(long, value_enum, default_value_t = Bus::Session, global = true)]
    bus: Bus,
    /// Print raw JSON replies
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Bus {
    Session,
    System,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a student (no face yet)
    Register {
        /// Full name
        #[arg(short, long)]
        name: String,
        /// Matric number, e.g. CS/2021/042
        matric: String,
    },
    /// Capture a registered student's face and enroll it
    Enroll {
        matric: String,
    },
    /// Capture a face and mark attendance for a course
    Scan {
        /// Course code, e.g. CSC401
        course: String,
    },
    /// Capture a face and show the best candidates without marking attendance
    Identify,
    /// List registered students
    Students,
    /// Remove a student and their attendance
    Remove {
        matric: String,
    },
    /// Show attendance for a course
    Attendance {
        course: String,
        /// Day as YYYY-MM-DD (default: today)
        #[arg(short, long)]
        date: Option<chrono::NaiveDate>,
    },
    /// Show daemon status
    Status,
    /// Run camera diagnostics
    Test {
        /// V4L2 device path
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        #[arg(long, default_value_t = 640)]
        width: u32,
        #[arg(long, default_value_t = 480)]
        height: u32,
        /// Number of frames to capture
        #[arg(short, long, default_value_t = 5)]
        frames: usize,
        /// Save the last captured frame to this file (format from extension)
        #[arg(short, long)]
        save: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Commands::Test {
        device,
        width,
        height,
        frames,
        save,
    } = &cli.command
    {
        return camera_test(device, *width, *height, *frames, save.as_deref());
    }

    tracing::debug!(bus = ?cli.bus, "connecting to rollcalld");
    let conn = match cli.bus {
        Bus::Session => zbus::Connection::session().await,
        Bus::System => zbus::Connection::system().await,
    }
    .context("cannot connect to D-Bus")?;
    let proxy = KioskProxy::new(&conn)
        .await
        .context("rollcalld is not reachable; is the daemon running?")?;

    let reply = match cli.command {
        Commands::Register { name, matric } => proxy.register_student(&name, &matric).await?,
        Commands::Enroll { matric } => {
            println!("Look at the camera...");
            proxy.enroll(&matric).await?
        }
        Commands::Scan { course } => {
            println!("Look at the camera...");
            proxy.mark_attendance(&course).await?
        }
        Commands::Identify => {
            println!("Look at the camera...");
            proxy.identify().await?
        }
        Commands::Students => proxy.list_students().await?,
        Commands::Remove { matric } => {
            proxy.remove_student(&matric).await?;
            println!("Removed {matric}");
            return Ok(());
        }
        Commands::Attendance { course, date } => {
            let date = date.map(|d| d.to_string()).unwrap_or_default();
            proxy.attendance(&course, &date).await?
        }
        Commands::Status => proxy.status().await?,
        Commands::Test { .. } => unreachable!("handled before connecting"),
    };

    tracing::trace!(reply = %reply, "daemon reply");
    let value: Value = serde_json::from_str(&reply).context("daemon sent malformed JSON")?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        print_human(&value);
    }
    Ok(())
}

fn print_human(value: &Value) {
    match value {
        Value::Array(rows) if rows.is_empty() => println!("(none)"),
        Value::Array(rows) => {
            for row in rows {
                println!("{}", summarize_row(row));
            }
        }
        Value::Object(map) if map.contains_key("outcome") => print_outcome(value),
        Value::Object(map) if map.contains_key("report") => print_identification(value),
        Value::Object(map) => {
            for (key, v) in map {
                match v {
                    Value::Object(_) => println!("{key}: {}", summarize_row(v)),
                    _ => println!("{key}: {}", plain(v)),
                }
            }
        }
        other => println!("{}", plain(other)),
    }
}

fn print_outcome(value: &Value) {
    let student = &value["student"];
    match value["outcome"].as_str() {
        Some("marked") => println!(
            "Marked {} ({}) present for {} on {} (score {:.3})",
            plain(&student["name"]),
            plain(&student["matric_number"]),
            plain(&value["course_code"]),
            plain(&value["date"]),
            value["score"].as_f64().unwrap_or_default(),
        ),
        Some("already_marked") => println!(
            "{} ({}) was already marked for {} at {}",
            plain(&student["name"]),
            plain(&student["matric_number"]),
            plain(&value["course_code"]),
            plain(&value["marked_at"]),
        ),
        _ => {
            println!(
                "No match above threshold {:.2}",
                value["threshold"].as_f64().unwrap_or_default()
            );
            print_candidates(&value["candidates"]);
        }
    }
}

fn print_identification(value: &Value) {
    match value["student"].as_object() {
        Some(_) => println!(
            "Identified {} ({})",
            plain(&value["student"]["name"]),
            plain(&value["student"]["matric_number"])
        ),
        None => println!("Not recognised"),
    }
    print_candidates(&value["report"]["ranked"]);
}

fn print_candidates(candidates: &Value) {
    let Some(list) = candidates.as_array() else {
        return;
    };
    for (rank, c) in list.iter().enumerate() {
        println!(
            "  {}. {:<16} score {:.3}  distance {:.3}",
            rank + 1,
            plain(&c["label"]),
            c["score"].as_f64().unwrap_or_default(),
            c["distance"].as_f64().unwrap_or_default(),
        );
    }
}

/// One line per student or attendance row.
fn summarize_row(row: &Value) -> String {
    if row.get("course_code").is_some() {
        return format!(
            "{:<16} {:<32} {}  score {:.3}",
            plain(&row["matric_number"]),
            plain(&row["name"]),
            plain(&row["marked_at"]),
            row["confidence"].as_f64().unwrap_or_default(),
        );
    }
    if row.get("matric_number").is_some() {
        return format!(
            "{:<16} {:<32} {}",
            plain(&row["matric_number"]),
            plain(&row["name"]),
            plain(&row["status"]),
        );
    }
    row.to_string()
}

fn plain(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

/// Direct camera test, bypassing the daemon.
fn camera_test(
    device: &str,
    width: u32,
    height: u32,
    frames: usize,
    save: Option<&std::path::Path>,
) -> Result<()> {
    println!("Running camera diagnostics...");

    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for d in &devices {
        println!("  {}: {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }

    let mut camera = Camera::open(device, width, height)
        .with_context(|| format!("failed to open {device}"))?;
    println!("Opened {}", camera.describe());

    let batch = camera.capture(frames)?;
    println!(
        "Captured {} usable frames ({} dark frames skipped)",
        batch.frames.len(),
        batch.dark_skipped
    );
    for frame in &batch.frames {
        println!(
            "  frame {:>3}: {}x{} brightness {:.1}",
            frame.sequence,
            frame.width(),
            frame.height(),
            frame.avg_brightness()
        );
    }

    if let Some(path) = save {
        let Some(frame) = batch.frames.last() else {
            bail!("no usable frame to save");
        };
        frame
            .image
            .save(path)
            .with_context(|| format!("failed to save frame to {}", path.display()))?;
        println!("Saved frame to {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use serde_json::json;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_attendance_date() {
        let cli = Cli::try_parse_from(["rollcall", "attendance", "CSC401", "--date", "2026-03-02"]).unwrap();
        match cli.command {
            Commands::Attendance { course, date } => {
                assert_eq!(course, "CSC401");
                assert_eq!(date.unwrap().to_string(), "2026-03-02");
            }
            _ => panic!("wrong subcommand"),
        }
        assert!(Cli::try_parse_from(["rollcall", "attendance", "CSC401", "--date", "March"]).is_err());
    }

    #[test]
    fn test_summarize_rows() {
        let student = json!({"matric_number": "CS/001", "name": "Ada", "status": "enrolled"});
        assert!(summarize_row(&student).contains("enrolled"));

        let entry = json!({
            "course_code": "CSC401",
            "matric_number": "CS/001",
            "name": "Ada",
            "marked_at": "2026-03-02T09:00:00Z",
            "confidence": 0.91
        });
        let line = summarize_row(&entry);
        assert!(line.contains("CS/001") && line.contains("0.910"));
    }

    #[test]
    fn test_plain_null() {
        assert_eq!(plain(&Value::Null), "-");
        assert_eq!(plain(&json!("x")), "x");
    }
}
