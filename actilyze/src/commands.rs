//! Subcommand implementations.

use actilyze_core::codec;
use actilyze_core::estimate::total_input_size_mb;
use actilyze_core::ingest::IngestReport;
use actilyze_core::runner::OutputLine;
use actilyze_core::{
    AnalysisSnapshot, Config, DurationEstimator, ExecutionRequest, ProcessRunner,
    ResultIngestor, RuntimeLocator, ScriptArg,
};
use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Resolve the interpreter off the async runtime; validation spawns processes.
async fn resolve_interpreter(config: &Config, forget: bool) -> Result<PathBuf> {
    let locator = RuntimeLocator::new(&config.runtime);
    tokio::task::spawn_blocking(move || {
        if forget {
            locator.forget()?;
        }
        locator.resolve()
    })
    .await
    .context("interpreter discovery task failed")?
    .context("no usable Rscript interpreter; install R or set runtime.interpreter in config.toml")
}

pub async fn locate(config: &Config, forget: bool) -> Result<()> {
    let path = resolve_interpreter(config, forget).await?;
    println!("Rscript: {}", path.display());
    Ok(())
}

/// Estimate with the calibration workload kept off the async runtime.
async fn estimate_duration(config: &Config, inputs: &[PathBuf]) -> Result<(f64, Duration)> {
    let estimator = Arc::new(DurationEstimator::new(&config.estimator));
    let inputs = inputs.to_vec();
    let (size_mb, estimate) = tokio::task::spawn_blocking(move || {
        let size_mb = total_input_size_mb(&inputs);
        (size_mb, estimator.estimate(size_mb))
    })
    .await
    .context("estimation task failed")?;
    Ok((size_mb, estimate))
}

pub async fn estimate(config: &Config, inputs: &[PathBuf]) -> Result<()> {
    let (size_mb, estimate) = estimate_duration(config, inputs).await?;
    println!("Input size: {:.1} MB", size_mb);
    println!("Estimated duration: {}", format_duration(estimate));
    Ok(())
}

pub async fn run(
    config: &Config,
    inputs: &[PathBuf],
    output: &Path,
    script: Option<PathBuf>,
    raw_args: &[String],
    ingest_after: bool,
) -> Result<()> {
    let script = script
        .or_else(|| config.runtime.script.clone())
        .context("no analysis script given; pass --script or set runtime.script")?;
    let args = raw_args
        .iter()
        .map(|a| a.parse::<ScriptArg>())
        .collect::<actilyze_core::Result<Vec<_>>>()
        .context("invalid --arg")?;
    let working_dir = common_parent(inputs)?;

    let interpreter = resolve_interpreter(config, false).await?;
    std::fs::create_dir_all(output)
        .with_context(|| format!("failed to create output directory {}", output.display()))?;

    let (size_mb, estimate) = estimate_duration(config, inputs).await?;
    println!("Rscript: {}", interpreter.display());
    println!(
        "Analysing {} file(s), {:.1} MB, estimated {}",
        inputs.len(),
        size_mb,
        format_duration(estimate)
    );

    let request = ExecutionRequest {
        interpreter,
        script,
        working_dir,
        output_dir: output.to_path_buf(),
        args,
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nCancelling analysis...");
        on_interrupt.cancel();
    })
    .context("failed to install Ctrl-C handler")?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap(),
    );
    pb.enable_steady_tick(Duration::from_millis(120));

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<OutputLine>();
    let progress = pb.clone();
    let relay = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            let text = line.text.trim();
            if !text.is_empty() {
                progress.set_message(text.to_string());
            }
        }
    });

    let result = ProcessRunner::with_observer(tx)
        .execute(&request, cancel)
        .await;
    let _ = relay.await;
    pb.finish_and_clear();

    if result.cancelled {
        eprintln!("Analysis cancelled after {}", format_duration(result.duration));
    } else if !result.success && !result.stderr.trim().is_empty() {
        eprintln!("{}", result.stderr.trim_end());
    }
    let result = result
        .into_result()
        .with_context(|| format!("analysis did not complete: {}", request.command_line()))?;

    println!("Analysis finished in {}", format_duration(result.duration));

    if ingest_after {
        ingest(config, output, false).await?;
    }
    Ok(())
}

pub async fn ingest(config: &Config, dir: &Path, json: bool) -> Result<()> {
    let report = ResultIngestor::new(&config.ingest)
        .ingest(dir)
        .await
        .with_context(|| format!("failed to ingest {}", dir.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report.snapshots)?);
    } else {
        print_report(&report);
    }

    if report.snapshots.is_empty() && report.has_failures() {
        bail!("no snapshots could be rebuilt from {}", dir.display());
    }
    Ok(())
}

pub async fn export(config: &Config, dir: &Path, name: &str, out: &Path) -> Result<()> {
    let report = ResultIngestor::new(&config.ingest)
        .ingest(dir)
        .await
        .with_context(|| format!("failed to ingest {}", dir.display()))?;

    let snapshot = report
        .snapshots
        .iter()
        .find(|s| s.file_name == name)
        .with_context(|| format!("no snapshot named {:?} in {}", name, dir.display()))?;

    let document = codec::embed(&report_body(snapshot), snapshot);
    std::fs::write(out, document)
        .with_context(|| format!("failed to write {}", out.display()))?;

    tracing::info!(snapshot = %name, path = %out.display(), "Exported report");
    println!("Wrote {}", out.display());
    Ok(())
}

fn print_report(report: &IngestReport) {
    println!(
        "Reports: {} decoded, {} failed",
        report.documents_succeeded, report.documents_failed
    );
    println!(
        "Runs:    {} rebuilt, {} failed",
        report.runs_succeeded, report.runs_failed
    );

    for snapshot in &report.snapshots {
        let tags: Vec<_> = snapshot.tags.iter().map(|t| t.name.as_str()).collect();
        println!(
            "  - {}{}: {} night(s), {} day(s) [{}]",
            snapshot.file_name,
            if snapshot.exported { " (report)" } else { "" },
            snapshot.sleep_records.len(),
            snapshot.activity_records.len(),
            tags.join(", ")
        );
    }

    for (path, error) in &report.failures {
        println!("  ! {}: {}", path.display(), error);
    }
}

/// Human-readable summary placed above the envelope.
fn report_body(snapshot: &AnalysisSnapshot) -> String {
    let mut body = format!(
        "Analysis report: {}\nGenerated: {}\n\n",
        snapshot.file_name,
        chrono::Local::now().format("%Y-%m-%d %H:%M")
    );

    if !snapshot.sleep_records.is_empty() {
        body.push_str("Night        Onset  Rise   Sleep  Efficiency\n");
        for night in &snapshot.sleep_records {
            body.push_str(&format!(
                "{:<12} {:<6} {:<6} {:<6} {}\n",
                night.night_starting,
                night.sleep_onset,
                night.rise_time,
                night.total_sleep_time,
                night.sleep_efficiency
            ));
        }
        body.push('\n');
    }

    if !snapshot.activity_records.is_empty() {
        body.push_str("Day    Steps   Sedentary  Light  Moderate  Vigorous\n");
        for day in &snapshot.activity_records {
            body.push_str(&format!(
                "{:<6} {:<7} {:<10} {:<6} {:<9} {}\n",
                day.day, day.steps, day.sedentary, day.light, day.moderate, day.vigorous
            ));
        }
        body.push('\n');
    }

    body
}

/// Directory shared by all inputs; the script runs there.
fn common_parent(inputs: &[PathBuf]) -> Result<PathBuf> {
    let mut parents = inputs.iter().map(|p| {
        std::fs::canonicalize(p)
            .with_context(|| format!("input not found: {}", p.display()))
            .map(|p| p.parent().map(Path::to_path_buf).unwrap_or(p))
    });

    let first = match parents.next() {
        Some(first) => first?,
        None => bail!("no input files given"),
    };
    for parent in parents {
        let parent = parent?;
        if parent != first {
            bail!(
                "inputs must share one directory ({} vs {})",
                first.display(),
                parent.display()
            );
        }
    }
    Ok(first)
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs == 0 {
        "under a second".to_string()
    } else if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::ZERO), "under a second");
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(7380)), "2h 3m");
    }

    #[test]
    fn test_common_parent() {
        let dir = tempfile::TempDir::new().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        std::fs::write(&a, b"a").unwrap();
        std::fs::write(&b, b"b").unwrap();

        let parent = common_parent(&[a.clone(), b]).unwrap();
        assert_eq!(parent, std::fs::canonicalize(dir.path()).unwrap());

        let other = tempfile::TempDir::new().unwrap();
        let c = other.path().join("c.bin");
        std::fs::write(&c, b"c").unwrap();
        assert!(common_parent(&[a, c]).is_err());
        assert!(common_parent(&[]).is_err());
    }

    #[test]
    fn test_report_body_lists_records() {
        let mut snapshot = AnalysisSnapshot::new("Bob", "/out/Bob");
        snapshot.set_sleep_records(vec![actilyze_core::SleepRecord {
            night_starting: "2024-03-01".to_string(),
            sleep_efficiency: "77.9".to_string(),
            ..Default::default()
        }]);

        let body = report_body(&snapshot);
        assert!(body.starts_with("Analysis report: Bob\n"));
        assert!(body.contains("2024-03-01"));
        assert!(body.contains("77.9"));
        assert!(!body.contains("Steps"));
    }
}
