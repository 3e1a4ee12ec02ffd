use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use duffel_core::archive::{ArchiveStrategy, Py7zrLibrary, SevenZipCli};
use duffel_core::backup::{BackupOutcome, BackupRunner};
use duffel_core::DuffelError;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "duffel")]
#[command(about = "Back up home-directory files to removable media as a 7z archive")]
#[command(version)]
struct Cli {
    /// Archive owner; defaults to the invoking user
    #[arg(long)]
    user: Option<String>,

    /// Directory to back up; defaults to the home directory
    #[arg(long)]
    source: Option<PathBuf>,

    /// Write into this directory instead of discovering a removable volume
    #[arg(long)]
    destination: Option<PathBuf>,

    /// Which archival strategies to run
    #[arg(long, value_enum, default_value = "auto")]
    strategy: StrategyChoice,

    /// Emit a JSON run summary on stdout
    #[arg(long)]
    json: bool,

    /// Enable debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum StrategyChoice {
    /// External 7z first, py7zr as fallback
    Auto,
    /// External 7z only
    Cli,
    /// py7zr only
    Library,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<u8> {
    let identity = match cli.user {
        Some(user) => user,
        None => resolve_username()?,
    };
    let source_root = match cli.source {
        Some(dir) => dir,
        None => dirs::home_dir().context("could not determine the home directory")?,
    };

    let strategies: Vec<Box<dyn ArchiveStrategy>> = match cli.strategy {
        StrategyChoice::Auto => vec![Box::new(SevenZipCli::new()), Box::new(Py7zrLibrary::new())],
        StrategyChoice::Cli => vec![Box::new(SevenZipCli::new())],
        StrategyChoice::Library => vec![Box::new(Py7zrLibrary::new())],
    };
    let runner = BackupRunner::new(identity).with_strategies(strategies);

    let outcome = match &cli.destination {
        Some(dir) => runner.execute_to(dir, &source_root),
        None => runner.execute(&source_root),
    };

    report(&outcome, cli.json)?;
    Ok(outcome_code(&outcome))
}

/// Resolution order mirrors the usual login-name conventions: LOGNAME and
/// USER on POSIX shells, USERNAME on Windows.
fn resolve_username() -> Result<String> {
    for var in ["LOGNAME", "USER", "USERNAME"] {
        if let Ok(value) = std::env::var(var) {
            if !value.is_empty() {
                return Ok(value);
            }
        }
    }
    bail!("could not determine the invoking user; pass --user")
}

/// Logs go to stderr; stdout is reserved for the run summary so `--json`
/// output stays parseable. `RUST_LOG` overrides the default directives.
fn init_logging(verbose: bool) {
    let default_directives = if verbose {
        "duffel=debug,duffel_core=debug"
    } else {
        "duffel=info,duffel_core=info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn report(outcome: &BackupOutcome, as_json: bool) -> Result<()> {
    if as_json {
        let value = match outcome {
            BackupOutcome::Archived { strategy, target } => serde_json::json!({
                "status": "archived",
                "strategy": strategy,
                "target": target,
            }),
            BackupOutcome::NoVolume => serde_json::json!({
                "status": "no-volume",
            }),
            BackupOutcome::Exhausted { failures } => serde_json::json!({
                "status": "failed",
                "attempts": failures
                    .iter()
                    .map(|(strategy, e)| serde_json::json!({
                        "strategy": strategy,
                        "error": e.to_string(),
                    }))
                    .collect::<Vec<_>>(),
            }),
        };
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    match outcome {
        BackupOutcome::Archived { strategy, target } => {
            println!("Backup completed successfully!");
            println!("==============================");
            println!("Strategy: {}", strategy);
            println!("Archive:  {}", target.display());
        }
        BackupOutcome::NoVolume => {
            println!("No removable volume detected. Plug in a drive and re-run.");
        }
        BackupOutcome::Exhausted { failures } => {
            println!("Backup failed.");
            println!("==============");
            for (strategy, e) in failures {
                println!("  {}: {}", strategy, e);
            }
        }
    }
    Ok(())
}

/// 0 success, 2 no volume, 3 nothing to archive, 4 external tool failed,
/// 5 library tier failed. When several strategies ran, the last failure
/// decides.
fn outcome_code(outcome: &BackupOutcome) -> u8 {
    match outcome {
        BackupOutcome::Archived { .. } => 0,
        BackupOutcome::NoVolume => 2,
        BackupOutcome::Exhausted { failures } => match failures.last().map(|(_, e)| e) {
            Some(DuffelError::SelectionEmpty { .. }) => 3,
            Some(DuffelError::ToolMissing { .. }) | Some(DuffelError::ToolFailed { .. }) => 4,
            _ => 5,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_maps_to_success() {
        let outcome = BackupOutcome::Archived {
            strategy: "7z-cli",
            target: PathBuf::from("/mnt/stick/kaiBackup.7z"),
        };
        assert_eq!(outcome_code(&outcome), 0);
    }

    #[test]
    fn missing_volume_maps_to_two() {
        assert_eq!(outcome_code(&BackupOutcome::NoVolume), 2);
    }

    #[test]
    fn empty_selection_maps_to_three() {
        let outcome = BackupOutcome::Exhausted {
            failures: vec![(
                "py7zr",
                DuffelError::SelectionEmpty {
                    root: PathBuf::from("/home/kai"),
                },
            )],
        };
        assert_eq!(outcome_code(&outcome), 3);
    }

    #[test]
    fn tool_failures_map_to_four() {
        let outcome = BackupOutcome::Exhausted {
            failures: vec![(
                "7z-cli",
                DuffelError::ToolMissing {
                    program: "7z".to_string(),
                },
            )],
        };
        assert_eq!(outcome_code(&outcome), 4);
    }

    #[test]
    fn the_last_failure_decides() {
        let outcome = BackupOutcome::Exhausted {
            failures: vec![
                (
                    "7z-cli",
                    DuffelError::ToolMissing {
                        program: "7z".to_string(),
                    },
                ),
                (
                    "py7zr",
                    DuffelError::LibraryUnavailable {
                        library: "py7zr".to_string(),
                    },
                ),
            ],
        };
        assert_eq!(outcome_code(&outcome), 5);
    }
}
