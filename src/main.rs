//! Command-line entry point for rusty-tools.
//!
//! Loads the configuration, builds the policy store and tool registry, and
//! maps each `tools` subcommand onto them. Every failure is turned into a
//! message on stderr and a stable exit code.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use rusty_tools::config::{CONFIG_ENV_VAR, ConfigFile, DEFAULT_CONFIG_PATH};
use rusty_tools::policy::{Change, Policy, PolicyStore};
use rusty_tools::security::{
    ApprovalGate, AutoApprove, ExecutionResult, PromptApproval, ValidationVerdict,
};
use rusty_tools::tools::{BASH_TOOL, ToolOutcome, ToolRegistry};
use rusty_tools::utils::logger::init_logging;
use rusty_tools::{ConfigError, ErrorKind, ExecutionError, StoreError, ToolError};

#[derive(Debug, Parser)]
#[command(name = "rusty-tools", version, about = "Policy-gated shell command execution")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, global = true, env = CONFIG_ENV_VAR, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Approve every command without prompting
    #[arg(short, long, global = true)]
    yes: bool,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write logs to a timestamped file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Manage and run the shell tool
    #[command(subcommand)]
    Tools(ToolsCommand),
}

#[derive(Debug, Subcommand)]
enum ToolsCommand {
    /// Allow tool execution
    Enable,
    /// Deny every tool execution
    Disable,
    /// Show the current policy
    List {
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Check a command against the policy without running it
    Validate {
        #[arg(allow_hyphen_values = true)]
        command: String,
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Validate, confirm and run a command
    Exec {
        #[arg(allow_hyphen_values = true)]
        command: String,
        /// Deadline in seconds
        #[arg(long)]
        timeout: Option<u64>,
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Manage the approval requirement
    #[command(subcommand)]
    Safety(SafetyCommand),
    /// Manage paths no command may reference
    #[command(subcommand)]
    ExcludePath(ExcludePathCommand),
    /// Manage whitelisted commands and patterns
    #[command(subcommand)]
    Whitelist(WhitelistCommand),
}

#[derive(Debug, Subcommand)]
enum SafetyCommand {
    Enable,
    Disable,
    Status,
}

#[derive(Debug, Subcommand)]
enum ExcludePathCommand {
    List,
    Add { path: String },
    Remove { path: String },
}

#[derive(Debug, Subcommand)]
enum WhitelistCommand {
    AddCommand {
        #[arg(allow_hyphen_values = true)]
        command: String,
    },
    RemoveCommand {
        #[arg(allow_hyphen_values = true)]
        command: String,
    },
    AddPattern {
        #[arg(allow_hyphen_values = true)]
        pattern: String,
    },
    RemovePattern {
        #[arg(allow_hyphen_values = true)]
        pattern: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                ErrorKind::Usage.exit_code()
            } else {
                0
            };
            if let Err(print_err) = err.print() {
                eprintln!("{print_err}");
            }
            return exit_code(code);
        }
    };

    let _log_guard = init_logging(cli.verbose, cli.log_dir.as_deref());

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            let kind = classify(&err);
            tracing::debug!(%kind, "command failed");
            eprintln!("Error: {err:#}");
            exit_code(kind.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let file = ConfigFile::new(&cli.config);
    let config = file.load_or_default()?;
    let policy = Policy::from_config(&config.tools)?;
    let store = Arc::new(PolicyStore::new(policy, file));

    let gate: Arc<dyn ApprovalGate> = if cli.yes {
        Arc::new(AutoApprove)
    } else {
        Arc::new(PromptApproval::new())
    };

    match cli.command {
        Command::Tools(command) => tools(command, store, gate).await,
    }
}

async fn tools(
    command: ToolsCommand,
    store: Arc<PolicyStore>,
    gate: Arc<dyn ApprovalGate>,
) -> Result<ExitCode> {
    match command {
        ToolsCommand::Enable => {
            store.set_enabled(true)?;
            println!("Tools enabled");
        }
        ToolsCommand::Disable => {
            store.set_enabled(false)?;
            println!("Tools disabled");
        }
        ToolsCommand::List { format } => list(&store.current(), format)?,
        ToolsCommand::Validate { command, format } => {
            let registry = ToolRegistry::with_defaults(store, gate);
            let verdict = registry.validate(BASH_TOOL, &command)?;
            match format {
                Format::Json => print_json(&verdict)?,
                Format::Text => println!("{verdict}"),
            }
            if !verdict.allowed {
                return Ok(exit_code(ErrorKind::Denied.exit_code()));
            }
        }
        ToolsCommand::Exec {
            command,
            timeout,
            format,
        } => {
            let registry = ToolRegistry::with_defaults(store, gate);
            let outcome = registry
                .execute(BASH_TOOL, &command, timeout.map(Duration::from_secs))
                .await?;
            return report_outcome(&outcome, format);
        }
        ToolsCommand::Safety(command) => safety(command, &store)?,
        ToolsCommand::ExcludePath(command) => exclude_path(command, &store)?,
        ToolsCommand::Whitelist(command) => whitelist(command, &store)?,
    }
    Ok(ExitCode::SUCCESS)
}

fn list(policy: &Policy, format: Format) -> Result<()> {
    let summary = policy.summary();
    if format == Format::Json {
        return print_json(&summary);
    }

    println!("Tools: {}", on_off(summary.enabled));
    println!("Approval required: {}", on_off(summary.safety.require_approval));
    print_section("Whitelisted commands", &summary.commands);
    print_section("Whitelisted patterns", &summary.patterns);
    print_section("Excluded paths", &summary.exclude_paths);
    Ok(())
}

fn safety(command: SafetyCommand, store: &PolicyStore) -> Result<()> {
    match command {
        SafetyCommand::Enable => {
            store.set_require_approval(true)?;
            println!("Approval required: enabled");
        }
        SafetyCommand::Disable => {
            store.set_require_approval(false)?;
            println!("Approval required: disabled");
        }
        SafetyCommand::Status => {
            println!(
                "Approval required: {}",
                on_off(store.current().require_approval())
            );
        }
    }
    Ok(())
}

fn exclude_path(command: ExcludePathCommand, store: &PolicyStore) -> Result<()> {
    match command {
        ExcludePathCommand::List => {
            let policy = store.current();
            let entries = policy.exclude_paths().entries();
            if entries.is_empty() {
                println!("No excluded paths configured");
            }
            for entry in entries {
                println!("{entry}");
            }
        }
        ExcludePathCommand::Add { path } => match store.add_excluded_path(&path)? {
            Change::AlreadyPresent => println!("'{path}' is already in the excluded paths list"),
            _ => println!("Added '{path}' to the excluded paths list"),
        },
        ExcludePathCommand::Remove { path } => match store.remove_excluded_path(&path)? {
            Change::NotFound => println!("'{path}' was not in the excluded paths list"),
            _ => println!("Removed '{path}' from the excluded paths list"),
        },
    }
    Ok(())
}

fn whitelist(command: WhitelistCommand, store: &PolicyStore) -> Result<()> {
    let (entry, change) = match command {
        WhitelistCommand::AddCommand { command } => {
            let change = store.add_whitelist_command(&command)?;
            (command, change)
        }
        WhitelistCommand::RemoveCommand { command } => {
            let change = store.remove_whitelist_command(&command)?;
            (command, change)
        }
        WhitelistCommand::AddPattern { pattern } => {
            let change = store.add_whitelist_pattern(&pattern)?;
            (pattern, change)
        }
        WhitelistCommand::RemovePattern { pattern } => {
            let change = store.remove_whitelist_pattern(&pattern)?;
            (pattern, change)
        }
    };
    match change {
        Change::Added => println!("Added '{entry}' to the whitelist"),
        Change::AlreadyPresent => println!("'{entry}' is already whitelisted"),
        Change::Removed => println!("Removed '{entry}' from the whitelist"),
        Change::NotFound => println!("'{entry}' was not in the whitelist"),
    }
    Ok(())
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum OutcomeReport<'a> {
    Denied { verdict: &'a ValidationVerdict },
    ApprovalDenied,
    Completed { result: &'a ExecutionResult },
}

fn report_outcome(outcome: &ToolOutcome, format: Format) -> Result<ExitCode> {
    if format == Format::Json {
        let report = match outcome {
            ToolOutcome::Denied(verdict) => OutcomeReport::Denied { verdict },
            ToolOutcome::ApprovalDenied => OutcomeReport::ApprovalDenied,
            ToolOutcome::Completed(result) => OutcomeReport::Completed { result },
        };
        print_json(&report)?;
    }

    match outcome {
        ToolOutcome::Denied(verdict) => {
            if format == Format::Text {
                eprintln!("Command denied: {}", verdict.reason.describe());
            }
            Ok(exit_code(ErrorKind::Denied.exit_code()))
        }
        ToolOutcome::ApprovalDenied => {
            if format == Format::Text {
                eprintln!("Command not approved");
            }
            Ok(exit_code(ErrorKind::ApprovalDenied.exit_code()))
        }
        ToolOutcome::Completed(result) => {
            if format == Format::Text {
                let mut stdout = std::io::stdout().lock();
                stdout
                    .write_all(result.combined_output())
                    .and_then(|()| stdout.flush())
                    .context("Failed to write command output")?;
                if result.truncated() {
                    eprintln!("[output truncated]");
                }
                if result.timed_out() {
                    eprintln!(
                        "Command timed out after {:.1}s",
                        result.duration().as_secs_f64()
                    );
                }
            }
            if result.timed_out() {
                return Ok(exit_code(ErrorKind::TimedOut.exit_code()));
            }
            Ok(exit_code(result.exit_code()))
        }
    }
}

fn print_section(title: &str, entries: &[String]) {
    println!("{title}:");
    if entries.is_empty() {
        println!("  (none)");
    }
    for entry in entries {
        println!("  {entry}");
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn on_off(flag: bool) -> &'static str {
    if flag { "enabled" } else { "disabled" }
}

/// Anything outside 0..=255 becomes a generic failure.
fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn classify(err: &anyhow::Error) -> ErrorKind {
    for cause in err.chain() {
        if let Some(err) = cause.downcast_ref::<ConfigError>() {
            return err.kind();
        }
        if let Some(err) = cause.downcast_ref::<StoreError>() {
            return err.kind();
        }
        if let Some(err) = cause.downcast_ref::<ToolError>() {
            return err.kind();
        }
        if let Some(err) = cause.downcast_ref::<ExecutionError>() {
            return err.kind();
        }
    }
    ErrorKind::Io
}
