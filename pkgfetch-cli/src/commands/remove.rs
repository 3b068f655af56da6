//! Cancel and remove commands.

use super::common::{resolve_task, short_id};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Cancel a task. It stays listed as failed until removed.
pub fn run_cancel(runner: &CliRunner, task: &str, remove_files: bool) -> Result<(), CliError> {
    runner.log_startup("cancel");
    runner.block_on(async {
        let manager = runner.manager(false).await?;
        let id = resolve_task(&manager, task)?;
        manager.cancel(id, remove_files).await?;
        if remove_files {
            println!("Cancelled {} and deleted its files", short_id(id));
        } else {
            println!("Cancelled {}", short_id(id));
        }
        manager.shutdown().await;
        Ok(())
    })
}

/// Forget a task, optionally deleting what it downloaded.
pub fn run_remove(runner: &CliRunner, task: &str, delete_files: bool) -> Result<(), CliError> {
    runner.log_startup("remove");
    runner.block_on(async {
        let manager = runner.manager(false).await?;
        let id = resolve_task(&manager, task)?;
        let directory = manager.task(id).map(|t| t.directory);
        manager.remove(id, delete_files).await?;
        match directory {
            Some(dir) if delete_files => {
                println!("Removed {} and deleted {}", short_id(id), dir.display())
            }
            _ => println!("Removed {}", short_id(id)),
        }
        manager.shutdown().await;
        Ok(())
    })
}
