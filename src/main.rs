use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use mule::consts::default_journal_path;
use mule::dispatch::{Dispatcher, Notice};
use mule::handler::shell::{ShellConfig, ShellHandler, ShellMode};
use mule::journal::Journal;
use mule::service::WorkService;

#[derive(Parser)]
#[command(name = "mule", version, about = "One queue, one worker, strict order.")]
struct Cli {
    /// Commands to run one at a time, in order, then exit.
    /// With no commands, starts an interactive prompt.
    commands: Vec<String>,

    /// Allow write operations (default: read-only)
    #[arg(long, default_value_t = false)]
    allow_write: bool,

    /// Working directory for commands
    #[arg(short, long)]
    work_dir: Option<PathBuf>,

    /// Journal database path (use :memory: for ephemeral)
    #[arg(short, long)]
    journal: Option<String>,

    /// Resubmit the most recent unfinished command from a previous run
    #[arg(long, default_value_t = false)]
    redeliver: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let mode = if cli.allow_write {
        ShellMode::ReadWrite
    } else {
        ShellMode::ReadOnly
    };
    let config = ShellConfig {
        mode,
        working_dir: cli
            .work_dir
            .unwrap_or_else(|| std::env::temp_dir().join("mule-sandbox")),
        ..ShellConfig::default()
    };
    let handler = Arc::new(ShellHandler::new(config));

    let journal_path = cli
        .journal
        .unwrap_or_else(|| default_journal_path().to_string_lossy().into_owned());
    if journal_path != ":memory:" {
        if let Some(parent) = std::path::Path::new(&journal_path).parent() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let journal = Arc::new(Journal::open(&journal_path)?);

    // Redelivery is a policy of this binary, not of the dispatcher: take
    // the most recent unfinished command from the last run, drop the rest.
    let mut backlog: Vec<String> = Vec::new();
    if cli.redeliver {
        if let Some((token, command)) = journal.latest_pending::<String>()? {
            eprintln!("redelivering unfinished command from last run (token {token}): {command}");
            backlog.push(command);
        }
    }
    journal.clear()?;
    backlog.extend(cli.commands.iter().cloned());

    if backlog.is_empty() {
        run_repl(handler, journal).await
    } else {
        run_batch(handler, journal, backlog).await
    }
}

/// Submit every command up front, then let the service drain and stop
/// itself once the last one completes.
async fn run_batch(
    handler: Arc<ShellHandler>,
    journal: Arc<Journal>,
    commands: Vec<String>,
) -> anyhow::Result<()> {
    let mut service = WorkService::new("mule", handler);
    service.start()?;

    for command in &commands {
        let token = service.submit(command.clone())?;
        journal.record(token, command)?;
    }

    service
        .drain_with(|token| {
            if let Err(e) = journal.complete(token) {
                tracing::warn!(token, error = %e, "failed to mark journal entry complete");
            }
        })
        .await
}

/// Interactive prompt. Lines are submitted as fast as they are typed;
/// the worker executes them strictly one at a time, in order.
async fn run_repl(handler: Arc<ShellHandler>, journal: Arc<Journal>) -> anyhow::Result<()> {
    let (dispatcher, mut notices) = Dispatcher::new("mule", handler);
    dispatcher.start()?;

    // Journal bookkeeping and fault reporting, off the prompt path.
    let notice_journal = Arc::clone(&journal);
    let notice_task = tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            match notice {
                Notice::Completed { token } => {
                    if let Err(e) = notice_journal.complete(token) {
                        tracing::warn!(token, error = %e, "failed to mark journal entry complete");
                    }
                }
                Notice::Faulted { token, error } => {
                    eprintln!("command {token} failed: {error:#}");
                    break;
                }
            }
        }
    });

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut next_token: u64 = 0;

    loop {
        print!("mule> ");
        io::stdout().flush()?;

        // Read next line, interruptible by Ctrl+C
        let line = tokio::select! {
            result = lines.next_line() => {
                match result {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        // Ctrl+D (EOF)
                        println!();
                        break;
                    }
                    Err(e) => {
                        eprintln!("input error: {e}");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };

        let command = line.trim();
        if command.is_empty() {
            continue;
        }
        if command == "quit" || command == "exit" {
            break;
        }

        next_token += 1;
        journal.record(next_token, &command.to_string())?;
        if let Err(e) = dispatcher.submit(command.to_string(), next_token) {
            eprintln!("error: {e}");
            break;
        }
    }

    // Whatever is still queued is discarded; the journal keeps it around
    // for --redeliver.
    dispatcher.stop();
    notice_task.abort();
    Ok(())
}
