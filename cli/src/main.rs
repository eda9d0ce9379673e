//! backup - Command-line front end for the backup engine.
//!
//! A thin batch interface: manage the job registry, run a selection of jobs
//! with progress on stderr, and inspect the live state file written by
//! running jobs.

use std::io::Write;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use backup_engine::{
    BackupType, EngineConfig, JobEngine, JobSelection, JobState, ProgressCallback, ProgressState,
    StateStore,
};
use clap::{Parser, Subcommand};
use crossbeam_channel::{Receiver, Sender};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// backup - Local backup job orchestrator
#[derive(Parser, Debug)]
#[command(name = "backup")]
#[command(version)]
#[command(about = "Define and run local backup jobs")]
struct Args {
    /// Configuration file (defaults to $BACKUP_ENGINE_CONFIG, then ./backup.toml)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Write logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Print every progress update instead of a throttled bar
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered jobs
    List,

    /// Register a new job
    Add {
        name: String,
        source: String,
        target: String,

        /// Backup type: complete or differential
        #[arg(long = "type", value_name = "TYPE", default_value = "complete")]
        backup_type: String,
    },

    /// Remove a job
    Delete { id: u32 },

    /// Run jobs: all, 2, 1-3 or 1;3
    Run {
        #[arg(default_value = "all")]
        selection: String,
    },

    /// Show jobs currently running
    Status,
}

/// Forwards snapshots from worker threads to the printer thread.
struct ChannelProgress {
    sender: Sender<ProgressState>,
}

impl ProgressCallback for ChannelProgress {
    fn on_progress(&self, state: &ProgressState) {
        // The printer only goes away once every run has returned
        let _ = self.sender.send(state.clone());
    }
}

/// Prints snapshots until every sender is dropped.
fn print_progress(receiver: Receiver<ProgressState>, verbose: bool) {
    let mut last_print: Option<Instant> = None;
    let mut last_state: Option<(String, JobState)> = None;

    for state in receiver {
        let key = (state.backup_name.clone(), state.state);
        let changed = last_state.as_ref() != Some(&key);
        let recent = last_print.is_some_and(|t| t.elapsed() < Duration::from_millis(200));
        if !verbose && !changed && recent {
            continue;
        }
        last_state = Some(key);
        last_print = Some(Instant::now());

        let mut line = format!(
            "{:<16} {:<9} {} {}/{} files, {} left",
            state.backup_name,
            state.state.to_string(),
            progress_bar(state.progress_percentage),
            state.total_files - state.files_remaining.min(state.total_files),
            state.total_files,
            format_bytes(state.size_remaining),
        );
        if let Some(message) = &state.message {
            line.push_str(&format!(" ({message})"));
        }
        eprintln!("{line}");
    }
    let _ = std::io::stderr().flush();
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

fn progress_bar(percent: f64) -> String {
    let percent = percent.clamp(0.0, 100.0) as u32;
    let filled = (percent / 5) as usize;
    format!("[{}{}] {:>3}%", "=".repeat(filled), " ".repeat(20 - filled), percent)
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() {
    let args = Args::parse();
    init_tracing(args.json);

    let exit_code = match run_cli(&args) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {e:#}");
            2
        }
    };

    std::process::exit(exit_code);
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load configuration {}", path.display())),
        None => Ok(EngineConfig::load_or_default()),
    }
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args) -> Result<()> {
    let config = load_config(args)?;

    match &args.command {
        Command::Status => print_status(&config)?,
        Command::List => {
            let jobs = open_engine(config)?.jobs();
            if jobs.is_empty() {
                println!("No backup jobs defined");
            }
            for job in jobs {
                let last = job
                    .last_execution
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{:>3}  {:<16} {:<12} {:<9} {} -> {} (last run: {last})",
                    job.id,
                    job.name,
                    job.backup_type.to_string(),
                    job.state.to_string(),
                    job.source_directory.display(),
                    job.target_directory.display(),
                );
            }
        }
        Command::Add {
            name,
            source,
            target,
            backup_type,
        } => {
            let Some(backup_type) = BackupType::from_name(backup_type) else {
                bail!("Invalid backup type '{backup_type}'. Must be 'complete', 'differential' or 'incremental'");
            };
            let id = open_engine(config)?
                .add_job(name, source, target, backup_type)
                .context("Job was not added")?;
            println!("Added job {id}");
        }
        Command::Delete { id } => {
            open_engine(config)?.delete_job(*id)?;
            println!("Deleted job {id}");
        }
        Command::Run { selection } => run_jobs(&open_engine(config)?, selection, args.verbose)?,
    }
    Ok(())
}

fn open_engine(config: EngineConfig) -> Result<JobEngine> {
    JobEngine::from_config(config).context("Failed to open job registry")
}

fn run_jobs(engine: &JobEngine, selection: &str, verbose: bool) -> Result<()> {
    let selection = JobSelection::parse(selection)?;
    let (sender, receiver) = crossbeam_channel::unbounded();
    let printer = thread::Builder::new()
        .name("progress".to_string())
        .spawn(move || print_progress(receiver, verbose))
        .context("Failed to start progress printer")?;

    info!(%selection, "running backup jobs");
    let started = Instant::now();
    let progress = ChannelProgress { sender };
    let outcomes = engine.execute_jobs(&selection, Some(&progress));
    drop(progress);
    if printer.join().is_err() {
        warn!("progress printer panicked");
    }
    let outcomes = outcomes?;

    if outcomes.is_empty() {
        println!("No backup job matches '{selection}'");
        return Ok(());
    }

    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(JobState::Completed) => println!("{}: completed", outcome.name),
            Ok(state) => {
                failed += 1;
                println!("{}: ended as {state}", outcome.name);
            }
            Err(e) => {
                failed += 1;
                println!("{}: failed: {e}", outcome.name);
            }
        }
    }
    println!("Elapsed: {:.1}s", started.elapsed().as_secs_f64());

    if failed > 0 {
        bail!("{failed} of {} jobs did not complete", outcomes.len());
    }
    Ok(())
}

fn print_status(config: &EngineConfig) -> Result<()> {
    let states = StateStore::read_snapshot(&config.state_file)
        .with_context(|| format!("Failed to read {}", config.state_file.display()))?;
    if states.is_empty() {
        println!("No backup job is running");
    }
    for state in states {
        let current = state
            .current_source_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        println!(
            "{:<16} {:<9} {} {}",
            state.backup_name,
            state.state.to_string(),
            progress_bar(state.progress_percentage),
            current
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Config file pointing the registry and state file into `dir`.
    fn config_in(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("backup.toml");
        let jobs = dir.path().join("jobs.json");
        let state = dir.path().join("state.json");
        std::fs::write(
            &path,
            format!(
                "jobs_file = {:?}\nstate_file = {:?}\n",
                jobs.to_str().unwrap(),
                state.to_str().unwrap()
            ),
        )
        .expect("Failed to write config");
        path
    }

    fn args(config: &PathBuf, command: Command) -> Args {
        Args {
            config: Some(config.clone()),
            json: false,
            verbose: false,
            command,
        }
    }

    fn add(config: &PathBuf, name: &str, source: &str, target: &str, backup_type: &str) -> Result<()> {
        run_cli(&args(
            config,
            Command::Add {
                name: name.to_string(),
                source: source.to_string(),
                target: target.to_string(),
                backup_type: backup_type.to_string(),
            },
        ))
    }

    #[test]
    fn test_cli_add_and_run() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let config = config_in(&dir);
        let src = dir.path().join("src");
        std::fs::create_dir(&src).unwrap();
        std::fs::write(src.join("test.txt"), "hello").expect("Failed to write file");
        let dst = dir.path().join("dst");

        add(&config, "docs", src.to_str().unwrap(), dst.to_str().unwrap(), "differential")
            .expect("CLI should add a valid job");

        let result = run_cli(&args(&config, Command::Run { selection: "1".to_string() }));
        assert!(result.is_ok(), "CLI should run the job: {result:?}");
        assert_eq!(std::fs::read_to_string(dst.join("test.txt")).unwrap(), "hello");

        assert!(run_cli(&args(&config, Command::List)).is_ok());
        assert!(run_cli(&args(&config, Command::Status)).is_ok());
    }

    #[test]
    fn test_cli_rejects_invalid_type() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let config = config_in(&dir);
        let result = add(&config, "docs", "/src", "/dst", "mirror");
        assert!(result.is_err(), "CLI should reject unknown backup type");
    }

    #[test]
    fn test_cli_rejects_blank_name() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let config = config_in(&dir);
        let result = add(&config, "  ", "/src", "/dst", "complete");
        assert!(result.is_err(), "CLI should reject blank job name");
    }

    #[test]
    fn test_cli_run_reports_failed_job() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let config = config_in(&dir);
        let missing = dir.path().join("missing");
        add(&config, "gone", missing.to_str().unwrap(), "/tmp/unused", "complete").unwrap();

        let result = run_cli(&args(&config, Command::Run { selection: "all".to_string() }));
        assert!(result.is_err(), "CLI should report a failed job");
    }

    #[test]
    fn test_cli_rejects_bad_selection() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let config = config_in(&dir);
        let result = run_cli(&args(&config, Command::Run { selection: "3-1".to_string() }));
        assert!(result.is_err(), "CLI should reject a reversed range");

        let result = run_cli(&args(&config, Command::Run { selection: "7".to_string() }));
        assert!(result.is_err(), "CLI should reject an unknown id");
    }

    #[test]
    fn test_cli_delete_unknown_job() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let config = config_in(&dir);
        let result = run_cli(&args(&config, Command::Delete { id: 1 }));
        assert!(result.is_err(), "CLI should reject deleting an unknown job");
    }

    #[test]
    fn test_progress_bar() {
        assert_eq!(progress_bar(0.0), format!("[{}]   0%", " ".repeat(20)));
        assert_eq!(progress_bar(100.0), format!("[{}] 100%", "=".repeat(20)));
        assert_eq!(progress_bar(150.0), progress_bar(100.0));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
    }
}
