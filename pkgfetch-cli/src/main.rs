//! pkgfetch - command-line front end of the package download engine.
//!
//! Tasks run in the foreground with a progress bar per task. Ctrl+C pauses
//! them; `pkgfetch resume` picks them up again, also after a crash.

mod commands;
mod error;
mod progress;
mod runner;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console::style;

use commands::add::AddArgs;
use commands::config::ConfigCommands;
use error::CliError;
use runner::{CliRunner, GlobalOptions};

#[derive(Parser)]
#[command(name = "pkgfetch")]
#[command(version)]
#[command(about = "Resumable, chunked package downloader")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Mirror logs to stderr at debug level (RUST_LOG overrides the filter)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Application data directory (tasks, chunk states, logs)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Product catalog file (defaults to <data dir>/catalog.json)
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a download task and run it
    Add(AddArgs),

    /// List download tasks
    List,

    /// Show a task and its packages
    Show {
        /// Task id or unique id prefix
        task: String,
    },

    /// Resume a paused task, or all paused and waiting tasks
    Resume {
        /// Task id or unique id prefix
        task: Option<String>,
    },

    /// Retry a task that failed with a recoverable error
    Retry {
        /// Task id or unique id prefix
        task: String,
    },

    /// Cancel a task
    Cancel {
        /// Task id or unique id prefix
        task: String,

        /// Delete the task directory as well
        #[arg(long)]
        remove_files: bool,
    },

    /// Remove a task from the list
    Remove {
        /// Task id or unique id prefix
        task: String,

        /// Delete the task directory as well
        #[arg(long)]
        delete_files: bool,
    },

    /// View and change settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn run(cli: Cli) -> Result<(), CliError> {
    let options = GlobalOptions {
        verbose: cli.verbose,
        data_dir: cli.data_dir,
        catalog: cli.catalog,
    };
    // Config commands work without the engine.
    let runner = || CliRunner::new(&options);

    match cli.command {
        Commands::Add(args) => commands::add::run(&runner()?, args),
        Commands::List => commands::list::run_list(&runner()?),
        Commands::Show { task } => commands::list::run_show(&runner()?, &task),
        Commands::Resume { task } => commands::resume::run_resume(&runner()?, task.as_deref()),
        Commands::Retry { task } => commands::resume::run_retry(&runner()?, &task),
        Commands::Cancel { task, remove_files } => {
            commands::remove::run_cancel(&runner()?, &task, remove_files)
        }
        Commands::Remove { task, delete_files } => {
            commands::remove::run_remove(&runner()?, &task, delete_files)
        }
        Commands::Config { command } => commands::config::run(command),
    }
}

fn main() {
    if let Err(e) = run(Cli::parse()) {
        eprintln!("{} {}", style("error:").red().bold(), e);
        std::process::exit(e.exit_code());
    }
}
