//! Add command - create a download task and run it in the foreground.

use std::path::PathBuf;

use clap::Args;
use pkgfetch::{CreateTaskRequest, DownloadStatus};

use super::common::{report, short_id};
use crate::error::CliError;
use crate::progress;
use crate::runner::CliRunner;

#[derive(Debug, Args)]
pub struct AddArgs {
    /// Product code, e.g. PHSP
    pub product: String,

    /// Product version (defaults to the newest in the catalog)
    #[arg(long)]
    pub version: Option<String>,

    /// Install language, e.g. de_DE, or ALL
    #[arg(short, long)]
    pub language: Option<String>,

    /// Target directory (defaults to <download dir>/<product>_<version>)
    #[arg(short, long)]
    pub directory: Option<PathBuf>,

    /// Only fetch these packages; may be repeated
    #[arg(short, long = "package")]
    pub packages: Vec<String>,

    /// Create the task without starting it
    #[arg(long)]
    pub no_start: bool,
}

impl AddArgs {
    fn request(&self) -> CreateTaskRequest {
        CreateTaskRequest {
            product_id: self.product.clone(),
            version: self.version.clone(),
            language: self.language.clone(),
            directory: self.directory.clone(),
            packages: self.packages.clone(),
        }
    }
}

pub fn run(runner: &CliRunner, args: AddArgs) -> Result<(), CliError> {
    runner.log_startup("add");
    let interrupt = runner.interrupt()?;

    runner.block_on(async {
        let manager = runner.manager(true).await?;
        let id = manager.create_task(args.request()).await?;
        let task = manager
            .task(id)
            .ok_or_else(|| CliError::NoSuchTask(id.to_string()))?;
        println!(
            "{} {} {} ({}) -> {}",
            short_id(id),
            task.display_name,
            task.version,
            task.language,
            task.directory.display()
        );

        if args.no_start {
            manager.shutdown().await;
            return Ok(());
        }

        // An unfinished task for the same product may already exist.
        match &task.status {
            DownloadStatus::Waiting => manager.start(id)?,
            status if status.can_resume() => manager.resume(id).await?,
            status if status.can_retry() => manager.retry(id).await?,
            _ => {}
        }

        let outcome = progress::watch(&manager, &[id], interrupt).await;
        manager.shutdown().await;
        report(&manager, &outcome?)
    })
}
