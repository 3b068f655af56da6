//! List and show commands - saved tasks and their packages.

use chrono::Local;
use indicatif::HumanBytes;
use pkgfetch::DownloadTask;

use super::common::{resolve_task, short_id, status_label};
use crate::error::CliError;
use crate::runner::CliRunner;

fn percent(fraction: f64) -> String {
    format!("{:>5.1}%", (fraction * 100.0).clamp(0.0, 100.0))
}

fn task_line(task: &DownloadTask) -> String {
    format!(
        "{:<8}  {:<12} {:<10} {:<6} {} {:>10}  {}",
        short_id(task.id),
        task.product_id,
        task.version,
        task.language,
        percent(task.total_progress),
        HumanBytes(task.total_size).to_string(),
        status_label(&task.status)
    )
}

pub fn run_list(runner: &CliRunner) -> Result<(), CliError> {
    runner.block_on(async {
        let manager = runner.manager(false).await?;
        let tasks = manager.list();
        if tasks.is_empty() {
            println!("No download tasks.");
        } else {
            println!(
                "{:<8}  {:<12} {:<10} {:<6} {:>6} {:>10}  STATUS",
                "ID", "PRODUCT", "VERSION", "LANG", "DONE", "SIZE"
            );
            for task in &tasks {
                println!("{}", task_line(task));
            }
        }
        manager.shutdown().await;
        Ok(())
    })
}

pub fn run_show(runner: &CliRunner, task: &str) -> Result<(), CliError> {
    runner.block_on(async {
        let manager = runner.manager(false).await?;
        let id = resolve_task(&manager, task)?;
        let task = manager
            .task(id)
            .ok_or_else(|| CliError::NoSuchTask(id.to_string()))?;

        println!("Task:      {}", task.id);
        println!("Product:   {} {} ({})", task.display_name, task.version, task.product_id);
        println!("Language:  {}", task.language);
        println!("Platform:  {}", task.platform);
        println!("Directory: {}", task.directory.display());
        println!(
            "Created:   {}",
            task.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        );
        println!("Status:    {}", status_label(&task.status));
        if task.retry_count > 0 {
            println!("Retries:   {}", task.retry_count);
        }
        println!(
            "Progress:  {} of {} ({})",
            HumanBytes(task.total_downloaded_size),
            HumanBytes(task.total_size),
            percent(task.total_progress).trim()
        );

        for group in &task.groups {
            println!();
            println!("[{} {}]", group.code, group.version);
            for package in &group.packages {
                println!(
                    "  {:<40} {} {:>10}  {:?}",
                    package.full_package_name,
                    percent(package.progress),
                    HumanBytes(package.download_size).to_string(),
                    package.status
                );
            }
        }
        if !task.is_resolved() {
            println!();
            println!("Packages are resolved when the task starts.");
        }

        manager.shutdown().await;
        Ok(())
    })
}
