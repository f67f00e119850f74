#![forbid(unsafe_code)]

mod cmd;
mod output;
mod remote;
mod session;

use std::env;
use std::process::ExitCode;

use clap::{CommandFactory, Parser, Subcommand};
use output::{CliError, OutputMode, render_error};
use session::{Session, SessionOptions};
use tracing::{debug, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "tally: local-first habit tracker",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Override the actor identity (skips TALLY_ACTOR and user config).
    #[arg(long, global = true)]
    actor: Option<String>,

    /// Work without contacting the remote; changes stay queued.
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn options(&self) -> SessionOptions {
        SessionOptions {
            json: self.json,
            actor: self.actor.clone(),
            offline: self.offline,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Setup",
        about = "Initialize a tally workspace",
        long_about = "Create .tally/ in the current directory, optionally pointing it at a shared remote directory.",
        after_help = "EXAMPLES:\n    # Local only\n    tally init\n\n    # Sync through a shared folder\n    tally init --remote ~/Dropbox/tally"
    )]
    Init(cmd::init::InitArgs),

    #[command(
        next_help_heading = "Items",
        about = "Start tracking a habit or goal",
        after_help = "EXAMPLES:\n    # A daily yes/no habit\n    tally add \"Read\"\n\n    # Twenty push-ups on weekdays\n    tally add \"Push-ups\" --kind count --unit reps --target 20 --days mon,tue,wed,thu,fri\n\n    # Thirty minutes of piano three times a week\n    tally add \"Piano\" --kind timed --minutes 30 --weekly 3"
    )]
    Add(cmd::add::AddArgs),

    #[command(
        next_help_heading = "Items",
        about = "Rename an item or change its goal or schedule",
        after_help = "EXAMPLES:\n    tally edit \"Push-ups\" --target 30\n    tally edit Read --title \"Read fiction\" --daily"
    )]
    Edit(cmd::edit::EditArgs),

    #[command(
        next_help_heading = "Items",
        about = "Archive or restore an item",
        after_help = "EXAMPLES:\n    tally archive Piano\n    tally archive Piano --undo"
    )]
    Archive(cmd::archive::ArchiveArgs),

    #[command(
        next_help_heading = "Items",
        about = "Delete an item",
        after_help = "EXAMPLES:\n    # Leave a tombstone (default)\n    tally delete Piano\n\n    # Remove for good\n    tally delete Piano --hard"
    )]
    Delete(cmd::delete::DeleteArgs),

    #[command(
        next_help_heading = "Days",
        about = "Log a day's progress, note, or mood",
        after_help = "EXAMPLES:\n    # Mark a binary habit done today\n    tally log Read\n\n    # Add reps, with a note\n    tally log \"Push-ups\" --add 10 --note \"morning set\"\n\n    # Fix a past day\n    tally log Read --day 2024-01-15 --skip\n\n    # Reset a day\n    tally log Read --clear"
    )]
    Log(cmd::log::LogArgs),

    #[command(
        next_help_heading = "Days",
        about = "Start, pause, or stop a timed item",
        after_help = "EXAMPLES:\n    tally timer start Piano\n    tally timer stop Piano"
    )]
    Timer(cmd::timer::TimerArgs),

    #[command(
        next_help_heading = "Read",
        about = "List items with the day's status",
        after_help = "EXAMPLES:\n    tally list\n    tally list --day 2024-01-15 --all\n    tally list --json"
    )]
    List(cmd::list::ListArgs),

    #[command(
        next_help_heading = "Read",
        about = "Show one item and its recent days",
        after_help = "EXAMPLES:\n    tally show Read\n    tally show srv-000001 --days 30"
    )]
    Show(cmd::show::ShowArgs),

    #[command(
        next_help_heading = "Sync",
        about = "Sync with the remote now",
        after_help = "EXAMPLES:\n    tally sync\n    tally sync --json"
    )]
    Sync(cmd::sync::SyncArgs),

    #[command(
        next_help_heading = "Sync",
        about = "Show identity, connectivity, and sync health"
    )]
    Status(cmd::status::StatusArgs),

    #[command(
        next_help_heading = "Sync",
        about = "List local changes waiting for the server"
    )]
    Outbox(cmd::outbox::OutboxArgs),

    #[command(
        next_help_heading = "Setup",
        about = "Generate shell completions",
        after_help = "EXAMPLES:\n    tally completions bash > ~/.local/share/bash-completion/completions/tally"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("TALLY_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "tally=debug,tally_core=debug,warn"
        } else {
            "tally=info,tally_core=warn,warn"
        })
    });

    let format = env::var("TALLY_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn with_session(
    cli: &Cli,
    cwd: &std::path::Path,
    run: impl FnOnce(&Session) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    let session = Session::open(cwd, &cli.options())?;
    let result = run(&session);
    if let Err(err) = session.save_marker() {
        warn!(error = %err, "failed to record sync status");
    }
    result
}

fn dispatch(cli: &Cli) -> anyhow::Result<()> {
    let cwd = env::current_dir()?;
    match &cli.command {
        Commands::Init(args) => cmd::init::run_init(args, &cwd),
        Commands::Completions(args) => {
            let mut command = Cli::command();
            cmd::completions::run_completions(args.shell, &mut command)
        }
        Commands::Add(args) => with_session(cli, &cwd, |s| cmd::add::run_add(args, s)),
        Commands::Edit(args) => with_session(cli, &cwd, |s| cmd::edit::run_edit(args, s)),
        Commands::Archive(args) => with_session(cli, &cwd, |s| cmd::archive::run_archive(args, s)),
        Commands::Delete(args) => with_session(cli, &cwd, |s| cmd::delete::run_delete(args, s)),
        Commands::Log(args) => with_session(cli, &cwd, |s| cmd::log::run_log(args, s)),
        Commands::Timer(args) => with_session(cli, &cwd, |s| cmd::timer::run_timer(args, s)),
        Commands::List(args) => with_session(cli, &cwd, |s| cmd::list::run_list(args, s)),
        Commands::Show(args) => with_session(cli, &cwd, |s| cmd::show::run_show(args, s)),
        Commands::Sync(args) => with_session(cli, &cwd, |s| cmd::sync::run_sync(args, s)),
        Commands::Status(args) => with_session(cli, &cwd, |s| cmd::status::run_status(args, s)),
        Commands::Outbox(args) => with_session(cli, &cwd, |s| cmd::outbox::run_outbox(args, s)),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    debug!(command = ?cli.command, "starting");

    match dispatch(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let mode = if cli.json {
                OutputMode::Json
            } else {
                OutputMode::Text
            };
            if render_error(mode, &CliError::from_anyhow(&err)).is_err() {
                eprintln!("error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_work_after_the_subcommand() {
        let cli = Cli::parse_from(["tally", "list", "--json", "--offline", "--actor", "ana"]);
        let options = cli.options();
        assert!(options.json);
        assert!(options.offline);
        assert_eq!(options.actor.as_deref(), Some("ana"));
        assert!(matches!(cli.command, Commands::List(_)));
    }

    #[test]
    fn log_parses_with_a_day() {
        let cli = Cli::parse_from(["tally", "log", "Read", "--day", "2024-01-15", "--done"]);
        let Commands::Log(args) = cli.command else {
            panic!("expected log");
        };
        assert_eq!(args.item, "Read");
        assert!(args.done);
        assert_eq!(args.day.as_deref(), Some("2024-01-15"));
    }

    #[test]
    fn init_accepts_a_remote() {
        let cli = Cli::parse_from(["tally", "init", "--remote", "/shared/tally"]);
        let Commands::Init(args) = cli.command else {
            panic!("expected init");
        };
        assert_eq!(args.remote.as_deref(), Some(std::path::Path::new("/shared/tally")));
    }

    #[test]
    fn completions_need_a_known_shell() {
        assert!(Cli::try_parse_from(["tally", "completions", "zsh"]).is_ok());
        assert!(Cli::try_parse_from(["tally", "completions", "tcsh"]).is_err());
    }
}
