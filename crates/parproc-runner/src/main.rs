//! parproc
//!
//! Runs a set of external commands with at most `--pool-size` of them alive
//! at once, echoing each command's captured output as it finishes.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use parproc_runner::{CommandHandle, CommandSpec, Manifest, PoolRunner};

#[derive(Parser, Debug)]
#[command(name = "parproc")]
#[command(version, about = "Run processes in parallel with a bounded pool")]
struct Args {
    #[command(subcommand)]
    command: Cmd,

    /// Maximum concurrently running processes (0 or less means unbounded).
    /// Overrides the manifest and settings files.
    #[arg(short = 'j', long, global = true, allow_negative_numbers = true)]
    pool_size: Option<i64>,

    /// Milliseconds to sleep between polling passes.
    #[arg(long, global = true)]
    poll_interval_ms: Option<u64>,

    /// Log level filter (e.g. "info", "debug", "trace").
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, global = true, env = "PARPROC_LOG_JSON")]
    log_json: bool,

    /// Do not echo captured process output.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run the jobs listed in a TOML manifest.
    Run {
        /// Path to the manifest file.
        manifest: PathBuf,
    },
    /// Run each argument as a `sh -c` command.
    Exec {
        #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
        commands: Vec<String>,
    },
}

#[derive(Debug, Default)]
struct Summary {
    succeeded: usize,
    failed: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let cwd = std::env::current_dir().context("Failed to resolve working directory")?;
    let mut config = parproc_core::config::load_config(Some(cwd.as_path()))?;
    if let Some(level) = &args.log_level {
        config.log_level.clone_from(level);
    }
    if let Some(interval) = args.poll_interval_ms {
        config.poll_interval_ms = interval;
    }

    let log_filter = format!(
        "parproc={0},parproc_runner={0},parproc_core={0}",
        config.log_level
    );
    parproc_core::tracing_init::init_tracing(&log_filter, args.log_json);

    let (items, manifest_pool_size) = match args.command {
        Cmd::Run { manifest } => {
            let parsed = Manifest::load(&manifest)
                .with_context(|| format!("Failed to load manifest {}", manifest.display()))?;
            let pool_size = parsed.pool_size;
            let base = manifest.parent().map(Path::to_path_buf);
            (parsed.into_handles(base.as_deref()), pool_size)
        }
        Cmd::Exec { commands } => (shell_handles(commands), None),
    };
    let pool_size = args
        .pool_size
        .or(manifest_pool_size)
        .unwrap_or(config.pool_size);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        jobs = items.len(),
        pool_size,
        poll_interval_ms = config.poll_interval_ms,
        "Starting parproc"
    );

    let mut runner =
        PoolRunner::with_pool_size(items, pool_size).with_poll_interval(config.poll_interval());
    let mut summary = Summary::default();
    let quiet = args.quiet;

    let run = runner.run(|handle: &mut CommandHandle, key: &str| {
        report(handle, key, quiet, &mut summary)
    });
    tokio::select! {
        result = run => result?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; processes already started are left running");
            return Ok(ExitCode::from(130));
        }
    }

    info!(
        succeeded = summary.succeeded,
        failed = summary.failed.len(),
        "All jobs finished"
    );
    if summary.failed.is_empty() {
        return Ok(ExitCode::SUCCESS);
    }
    writeln!(io::stderr().lock(), "failed: {}", summary.failed.join(", "))?;
    Ok(ExitCode::FAILURE)
}

fn shell_handles(commands: Vec<String>) -> Vec<(String, CommandHandle)> {
    commands
        .into_iter()
        .enumerate()
        .map(|(i, command)| {
            (
                format!("cmd-{}", i + 1),
                CommandHandle::new(CommandSpec::shell(command)),
            )
        })
        .collect()
}

/// Completion callback: record the outcome and echo captured output.
fn report(
    handle: &CommandHandle,
    key: &str,
    quiet: bool,
    summary: &mut Summary,
) -> io::Result<()> {
    let elapsed = handle.elapsed().unwrap_or_default();
    if handle.success() {
        summary.succeeded += 1;
        info!(key, exit_code = ?handle.exit_code(), ?elapsed, "Job succeeded");
    } else {
        summary.failed.push(key.to_string());
        warn!(key, exit_code = ?handle.exit_code(), ?elapsed, "Job failed");
    }

    if !quiet {
        echo(&mut io::stdout().lock(), key, &handle.stdout())?;
        echo(&mut io::stderr().lock(), key, &handle.stderr())?;
    }
    Ok(())
}

fn echo(out: &mut impl Write, key: &str, text: &str) -> io::Result<()> {
    for line in text.lines() {
        writeln!(out, "[{key}] {line}")?;
    }
    out.flush()
}
