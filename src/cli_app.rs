//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::thread::JoinHandle;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use media_file_cleaner::core::config::Config;
use media_file_cleaner::core::errors::MfcError;
use media_file_cleaner::daemon::loop_main::{CleanerDaemon, DaemonArgs as LoopArgs};
use media_file_cleaner::daemon::orchestrator::{
    PassOptions, PassReport, PassTrigger, ThreadWaiter, run_configured_pass,
};
use media_file_cleaner::daemon::signals::SignalHandler;
use media_file_cleaner::disposal::{DispositionMode, stack};
use media_file_cleaner::library::{self, MediaCategory};
use media_file_cleaner::logger::cleaner_log::{CleanerLog, DEFAULT_LINES_TO_KEEP};
use media_file_cleaner::logger::dual::{ActivityLoggerHandle, DualLoggerConfig, spawn_logger};
use media_file_cleaner::logger::sqlite::SqliteLogger;
use media_file_cleaner::monitor::disk_space::DiskSpaceMonitor;
use media_file_cleaner::platform::pal::detect_platform;

/// Media File Cleaner: expires watched videos from a media-center library.
#[derive(Debug, Parser)]
#[command(
    name = "mfc",
    author,
    version,
    about = "Media File Cleaner - expire watched videos from your library",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Turn on debug diagnostics.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the cleanup service until SIGTERM/SIGINT.
    Daemon(DaemonArgs),
    /// Run exactly one cleanup pass.
    Clean(CleanArgs),
    /// List expired videos without touching them.
    Scan(ScanArgs),
    /// Show free space for the configured (or given) path.
    Disk(DiskArgs),
    /// Inspect configuration.
    Config(ConfigArgs),
    /// View or maintain the cleaned-files log.
    Log(LogArgs),
    /// Show recent activity from the SQLite history.
    History(HistoryArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct DaemonArgs {
    /// Run the first pass right away instead of after the delayed start.
    #[arg(long)]
    now: bool,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct CleanArgs {
    /// Show what would be cleaned without touching anything.
    #[arg(long)]
    dry_run: bool,
    /// Ignore play-state and disk-pressure gating.
    #[arg(long)]
    force: bool,
}

#[derive(Debug, Clone, Args, Default)]
struct ScanArgs {
    /// Only this category (defaults to every enabled category).
    #[arg(long, value_enum)]
    category: Option<MediaCategory>,
}

#[derive(Debug, Clone, Args, Default)]
struct DiskArgs {
    /// Path or network share to measure (defaults to `disk.check_path`).
    #[arg(value_name = "PATH")]
    path: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print the config file location.
    Path,
    /// Print the effective configuration.
    Show,
    /// Check the configuration for errors.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct LogArgs {
    #[command(subcommand)]
    command: Option<LogCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum LogCommand {
    /// Print the cleaned-files log.
    Show,
    /// Keep only the newest lines.
    Trim {
        /// Lines to keep.
        #[arg(long, default_value_t = DEFAULT_LINES_TO_KEEP, value_name = "N")]
        keep: usize,
    },
    /// Empty the log.
    Clear,
}

#[derive(Debug, Clone, Args)]
struct HistoryArgs {
    /// Maximum rows to show.
    #[arg(long, default_value_t = 20, value_name = "N")]
    limit: u32,
    /// Delete history older than this many days first.
    #[arg(long, value_name = "DAYS")]
    prune_days: Option<u32>,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Operation partially succeeded.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

impl From<MfcError> for CliError {
    fn from(err: MfcError) -> Self {
        match err {
            MfcError::InvalidConfig { .. }
            | MfcError::MissingConfig { .. }
            | MfcError::ConfigParse { .. }
            | MfcError::InvalidPath { .. } => Self::User(err.to_string()),
            _ => Self::Runtime(err.to_string()),
        }
    }
}

pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Daemon(args) => run_daemon(cli, args),
        Command::Clean(args) => run_clean(cli, args),
        Command::Scan(args) => run_scan(cli, args),
        Command::Disk(args) => run_disk(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Log(args) => run_log(cli, args),
        Command::History(args) => run_history(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    if cli.verbose {
        config.service.debugging_enabled = true;
    }
    Ok(config)
}

// ──────────────────── daemon ────────────────────

fn run_daemon(cli: &Cli, args: &DaemonArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let loop_args = LoopArgs {
        config_path: cli.config.clone(),
        skip_delayed_start: args.now,
    };
    let mut daemon = CleanerDaemon::init(config, &loop_args)?;
    daemon.run()?;
    Ok(())
}

// ──────────────────── clean ────────────────────

fn run_clean(cli: &Cli, args: &CleanArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let (logger, logger_join) = start_logger(&config);
    let signals = SignalHandler::new();
    let options = PassOptions {
        trigger: PassTrigger::Manual,
        dry_run: args.dry_run,
        force: args.force,
    };

    let outcome = run_configured_pass(
        &config,
        &options,
        logger.clone(),
        ThreadWaiter::with_shutdown(signals.shutdown_flag()),
    );
    stop_logger(logger.as_ref(), logger_join);
    let report = outcome?;

    match output_mode(cli) {
        OutputMode::Human => {
            if !cli.quiet {
                let relocated = config.disposition.mode == DispositionMode::Relocate;
                print_pass_report(&report, relocated);
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "clean",
                "report": serde_json::to_value(&report)?,
            });
            write_json_line(&payload)?;
        }
    }

    let failures = report.failures() + report.query_failures();
    if failures > 0 {
        return Err(CliError::Partial(format!(
            "{failures} problem(s) during the pass; see the activity log"
        )));
    }
    Ok(())
}

fn print_pass_report(report: &PassReport, relocated: bool) {
    if let Some(reason) = &report.skipped {
        println!("Pass skipped: {reason}.");
        return;
    }
    if report.dry_run {
        if report.planned.is_empty() {
            println!("Nothing to clean.");
        }
        for planned in &report.planned {
            match &planned.destination {
                Some(dest) => println!(
                    "would move  {} -> {}",
                    planned.path,
                    dest.display()
                ),
                None => println!("would delete  {}", planned.path),
            }
        }
        return;
    }

    match report.summary(relocated) {
        Some(summary) => println!("{}", summary.green()),
        None => println!("Nothing cleaned."),
    }
    for path in &report.cleaned {
        println!("\t-\t{path}");
    }
    for category in MediaCategory::ALL {
        let tally = report.tally(category);
        if let Some(err) = &tally.query_error {
            println!("{} {}: {err}", "query failed".red(), category.plural());
        }
        if tally.failed > 0 {
            println!("{} {} {}", tally.failed.to_string().red(), category.plural(), "failed".red());
        }
        if tally.vanished + tally.excluded > 0 {
            println!(
                "{} {}: {} already gone, {} excluded",
                "skipped".yellow(),
                category.plural(),
                tally.vanished,
                tally.excluded
            );
        }
    }
}

// ──────────────────── scan ────────────────────

#[derive(Debug, Serialize)]
struct ScanRow {
    category: MediaCategory,
    path: String,
    title: String,
    excluded: bool,
}

fn run_scan(cli: &Cli, args: &ScanArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let connection = library::connect(&config, None)?;
    let criteria = config.expiration_criteria();
    let exclusions = config.exclusion_filter();
    let categories = args
        .category
        .map_or_else(|| config.categories.enabled(), |c| vec![c]);

    let mut rows = Vec::new();
    let mut errors = Vec::new();
    for category in categories {
        match connection.library.find_expired(category, &criteria) {
            Ok(candidates) => {
                for candidate in candidates {
                    let excluded = stack::expand(&candidate.path)
                        .map(|parts| parts.iter().any(|p| exclusions.is_excluded(p)))
                        .unwrap_or(true);
                    rows.push(ScanRow {
                        category,
                        path: candidate.path,
                        title: candidate.title,
                        excluded,
                    });
                }
            }
            Err(err) => errors.push(format!("{}: {err}", category.plural())),
        }
    }

    match output_mode(cli) {
        OutputMode::Human => {
            if rows.is_empty() && !cli.quiet {
                println!("No expired videos.");
            }
            for row in &rows {
                let marker = if row.excluded {
                    "excluded".yellow().to_string()
                } else {
                    "expired".to_string()
                };
                println!("{:<10} {:<9} {}", row.category.to_string(), marker, row.path);
            }
            for err in &errors {
                eprintln!("{} {err}", "query failed:".red());
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "scan",
                "source": connection.library.describe(),
                "candidates": serde_json::to_value(&rows)?,
                "errors": errors,
            });
            write_json_line(&payload)?;
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(CliError::Partial(format!(
            "{} categor{} could not be queried",
            errors.len(),
            if errors.len() == 1 { "y" } else { "ies" }
        )))
    }
}

// ──────────────────── disk ────────────────────

fn run_disk(cli: &Cli, args: &DiskArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let platform = detect_platform()?;
    let path = args
        .path
        .clone()
        .unwrap_or_else(|| config.disk.check_path.clone());
    let reading = DiskSpaceMonitor::new(platform.as_ref()).measure(&path);
    let free_pct = reading.effective_pct();
    let threshold = config.disk.threshold_pct;
    let low = free_pct <= threshold;

    match output_mode(cli) {
        OutputMode::Human => {
            if let Some(diagnostic) = reading.diagnostic() {
                eprintln!("{} {diagnostic}", "warning:".yellow());
            }
            let verdict = if low {
                "LOW".red().bold()
            } else {
                "ok".green()
            };
            println!("{free_pct:.1}% free (threshold {threshold:.1}%): {verdict}");
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "disk",
                "path": path,
                "reading": serde_json::to_value(&reading)?,
                "free_pct": free_pct,
                "threshold_pct": threshold,
                "low": low,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ──────────────────── config ────────────────────

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = load_config(cli)?;
            let mut shown = config.clone();
            if shown.host.password.is_some() {
                shown.host.password = Some("********".to_string());
            }

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&shown)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&shown)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;
                let relocate_problem = config.disposition_policy().err().map(|e| e.to_string());

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                        if let Some(problem) = &relocate_problem {
                            println!("  {} {problem}", "warning:".yellow());
                        }
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                            "warnings": relocate_problem.into_iter().collect::<Vec<_>>(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => {
                        eprintln!("Configuration is INVALID: {e}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "code": e.code(),
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ──────────────────── cleaned-files log ────────────────────

fn run_log(cli: &Cli, args: &LogArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let log = CleanerLog::new(&config.paths.cleaner_log);
    let mode = output_mode(cli);

    match args.command.as_ref().unwrap_or(&LogCommand::Show) {
        LogCommand::Show => {
            let contents = log.get()?;
            match mode {
                OutputMode::Human => print!("{contents}"),
                OutputMode::Json => write_json_line(&json!({
                    "command": "log show",
                    "path": log.path().to_string_lossy(),
                    "contents": contents,
                }))?,
            }
        }
        LogCommand::Trim { keep } => {
            let kept = log.trim(*keep)?;
            let lines = kept.lines().count();
            match mode {
                OutputMode::Human => {
                    if !cli.quiet {
                        println!("Kept {lines} line(s) of {}", log.path().display());
                    }
                }
                OutputMode::Json => write_json_line(&json!({
                    "command": "log trim",
                    "path": log.path().to_string_lossy(),
                    "lines_kept": lines,
                }))?,
            }
        }
        LogCommand::Clear => {
            log.clear()?;
            match mode {
                OutputMode::Human => {
                    if !cli.quiet {
                        println!("Cleared {}", log.path().display());
                    }
                }
                OutputMode::Json => write_json_line(&json!({
                    "command": "log clear",
                    "path": log.path().to_string_lossy(),
                }))?,
            }
        }
    }
    Ok(())
}

// ──────────────────── history ────────────────────

fn run_history(cli: &Cli, args: &HistoryArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let db = SqliteLogger::open(&config.paths.sqlite_db)?;

    let pruned = match args.prune_days {
        Some(days) => Some(db.prune_activity_log(days)?),
        None => None,
    };
    let since = (chrono::Utc::now() - chrono::Duration::hours(24))
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    let deleted_24h = db.count_events_since("file_delete", &since)?;
    let relocated_24h = db.count_events_since("file_relocate", &since)?;
    let by_category = db.cleaned_by_category_since(&since)?;
    let rows = db.recent_activity(args.limit)?;

    match output_mode(cli) {
        OutputMode::Human => {
            if let Some(pruned) = pruned {
                println!("Pruned {pruned} old row(s).");
            }
            println!("Last 24h: {deleted_24h} deleted, {relocated_24h} relocated");
            for count in &by_category {
                println!("  {:<12} {:<14} {}", count.category, count.event_type, count.count);
            }
            for row in &rows {
                let status = if row.success == 1 {
                    "ok".green()
                } else {
                    "FAIL".red()
                };
                println!(
                    "{}  {:<18} {:<4} {}",
                    row.timestamp,
                    row.event_type,
                    status,
                    row.path.as_deref().or(row.details.as_deref()).unwrap_or("")
                );
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "history",
                "pruned": pruned,
                "last_24h": {
                    "deleted": deleted_24h,
                    "relocated": relocated_24h,
                    "by_category": serde_json::to_value(&by_category)?,
                },
                "rows": serde_json::to_value(&rows)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ──────────────────── helpers ────────────────────

fn start_logger(config: &Config) -> (Option<ActivityLoggerHandle>, Option<JoinHandle<()>>) {
    match spawn_logger(DualLoggerConfig::from_paths(&config.paths)) {
        Ok((handle, join)) => (Some(handle), Some(join)),
        Err(e) => {
            eprintln!("[{}] activity logging disabled: {e}", e.code());
            (None, None)
        }
    }
}

fn stop_logger(handle: Option<&ActivityLoggerHandle>, join: Option<JoinHandle<()>>) {
    if let Some(handle) = handle {
        handle.shutdown();
    }
    if let Some(join) = join {
        let _ = join.join();
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("MFC_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_before_and_after_subcommand() {
        let before = Cli::try_parse_from([
            "mfc",
            "--config",
            "/tmp/mfc.toml",
            "--json",
            "--no-color",
            "-v",
            "disk",
        ]);
        assert!(before.is_ok());

        let after = Cli::try_parse_from(["mfc", "disk", "--json", "--no-color", "-q"]);
        assert!(after.is_ok());
    }

    #[test]
    fn parses_every_subcommand() {
        let cases = [
            vec!["mfc", "daemon"],
            vec!["mfc", "daemon", "--now"],
            vec!["mfc", "clean", "--dry-run"],
            vec!["mfc", "clean", "--force"],
            vec!["mfc", "scan"],
            vec!["mfc", "scan", "--category", "musicvideo"],
            vec!["mfc", "disk", "smb://nas/media"],
            vec!["mfc", "config", "show"],
            vec!["mfc", "config", "validate"],
            vec!["mfc", "log", "trim", "--keep", "30"],
            vec!["mfc", "log", "clear"],
            vec!["mfc", "history", "--limit", "5", "--prune-days", "90"],
        ];
        for case in cases {
            let parsed = Cli::try_parse_from(case.clone());
            assert!(parsed.is_ok(), "failed to parse case: {case:?}");
        }
    }

    #[test]
    fn rejects_unknown_category_and_conflicting_verbosity() {
        assert!(Cli::try_parse_from(["mfc", "scan", "--category", "song"]).is_err());
        assert!(Cli::try_parse_from(["mfc", "-v", "-q", "disk"]).is_err());
    }

    #[test]
    fn trim_defaults_to_fifteen_lines() {
        let cli = Cli::try_parse_from(["mfc", "log", "trim"]).unwrap();
        match cli.command {
            Command::Log(LogArgs {
                command: Some(LogCommand::Trim { keep }),
            }) => assert_eq!(keep, 15),
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn completions_support_bash_zsh_and_fish() {
        for shell in ["bash", "zsh", "fish"] {
            let parsed = Cli::try_parse_from(["mfc", "completions", shell]);
            assert!(parsed.is_ok(), "failed shell parse for {shell}");
        }
    }

    #[test]
    fn output_mode_resolution_honors_precedence() {
        assert_eq!(
            resolve_output_mode(true, Some("human"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("json"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("human"), false),
            OutputMode::Human
        );
        assert_eq!(
            resolve_output_mode(false, Some("auto"), true),
            OutputMode::Human
        );
        assert_eq!(resolve_output_mode(false, None, false), OutputMode::Json);
    }

    #[test]
    fn config_errors_are_user_errors() {
        let err: CliError = MfcError::InvalidConfig {
            details: "bad".to_string(),
        }
        .into();
        assert_eq!(err.exit_code(), 1);
        let err: CliError = MfcError::Runtime {
            details: "boom".to_string(),
        }
        .into();
        assert_eq!(err.exit_code(), 2);
        assert_eq!(CliError::Partial(String::new()).exit_code(), 4);
    }
}
